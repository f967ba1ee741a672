//! Directory-backed device namespace
//!
//! Lays the device out under a root directory the way sysfs and devtmpfs
//! expose a character device:
//!
//! ```text
//! <root>/
//! ├── class/<class>/<name>/dev   # "major:minor\n"
//! └── dev/<name>                 # node file
//! ```
//!
//! Identities come from the dynamic major range. Opening a host reserves
//! every major already published under `class/*/*/dev`, so hosts opened one
//! after another on the same root do not hand out the same identity. Two
//! hosts allocating concurrently on one root are not coordinated. Bound
//! handlers are kept in an in-process routing table keyed by node name.

use super::{DeviceHost, HostError, HostResult};
use crate::device::CharDevice;
use crate::identity::{DeviceIdentity, MajorAllocator};
use rustix::fd::OwnedFd;
use rustix::fs::{mkdirat, openat, unlinkat, AtFlags, Mode, OFlags};
use rustix::io::Errno;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const CLASS_DIR: &str = "class";
const DEV_DIR: &str = "dev";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsClass {
    name: String,
}

impl FsClass {
    /// Class directory, relative to the host root
    pub fn path(&self) -> PathBuf {
        Path::new(CLASS_DIR).join(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsNode {
    name: String,
    class: String,
    identity: DeviceIdentity,
}

impl FsNode {
    /// Node file, relative to the host root
    pub fn path(&self) -> PathBuf {
        Path::new(DEV_DIR).join(&self.name)
    }

    /// Attribute directory under the class, relative to the host root
    pub fn attr_dir(&self) -> PathBuf {
        Path::new(CLASS_DIR).join(&self.class).join(&self.name)
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsBinding {
    node: String,
}

/// Filesystem [`DeviceHost`]
pub struct FsHost {
    root: OwnedFd,
    root_path: PathBuf,
    majors: Mutex<MajorAllocator>,
    handlers: Mutex<BTreeMap<String, (DeviceIdentity, Arc<CharDevice>)>>,
}

impl FsHost {
    /// Use an existing directory as the namespace root
    pub fn open(root: impl AsRef<Path>) -> HostResult<Self> {
        let root_path = root.as_ref().to_path_buf();
        let root = rustix::fs::open(
            root_path.as_path(),
            OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| io_error(&root_path, e))?;

        // Top-level directories outlive any one device
        for dir in [CLASS_DIR, DEV_DIR] {
            match mkdirat(&root, dir, dir_mode()) {
                Ok(()) | Err(Errno::EXIST) => {}
                Err(e) => return Err(io_error(&root_path.join(dir), e)),
            }
        }

        let majors = scan_published(&root_path)?;

        Ok(Self {
            root,
            root_path,
            majors: Mutex::new(majors),
            handlers: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Device bound to the node called `name`
    pub fn lookup(&self, name: &str) -> Option<Arc<CharDevice>> {
        let handlers = lock(&self.handlers);
        handlers.get(name).map(|(_, device)| Arc::clone(device))
    }

    /// Device bound to the node with this rdev
    pub fn lookup_rdev(&self, rdev: u64) -> Option<Arc<CharDevice>> {
        let handlers = lock(&self.handlers);
        handlers
            .values()
            .find(|(identity, _)| identity.rdev() == rdev)
            .map(|(_, device)| Arc::clone(device))
    }

    fn mkdir(&self, rel: &Path, kind: &'static str, name: &str) -> HostResult<()> {
        mkdirat(&self.root, rel, dir_mode()).map_err(|e| match e {
            Errno::EXIST => HostError::AlreadyExists {
                kind,
                name: name.to_string(),
            },
            e => io_error(&self.root_path.join(rel), e),
        })
    }

    fn rmdir(&self, rel: &Path) -> HostResult<()> {
        unlinkat(&self.root, rel, AtFlags::REMOVEDIR)
            .map_err(|e| io_error(&self.root_path.join(rel), e))
    }

    fn unlink(&self, rel: &Path) -> HostResult<()> {
        unlinkat(&self.root, rel, AtFlags::empty())
            .map_err(|e| io_error(&self.root_path.join(rel), e))
    }

    /// Create `rel` exclusively and fill it with `contents`
    fn create_file(
        &self,
        rel: &Path,
        kind: &'static str,
        name: &str,
        contents: &[u8],
    ) -> HostResult<()> {
        let fd = openat(
            &self.root,
            rel,
            OFlags::CREATE | OFlags::EXCL | OFlags::WRONLY | OFlags::CLOEXEC,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::ROTH,
        )
        .map_err(|e| match e {
            Errno::EXIST => HostError::AlreadyExists {
                kind,
                name: name.to_string(),
            },
            e => io_error(&self.root_path.join(rel), e),
        })?;

        let mut written = 0;
        while written < contents.len() {
            match rustix::io::write(&fd, &contents[written..]) {
                Ok(n) => written += n,
                Err(Errno::INTR) => continue,
                Err(e) => {
                    drop(fd);
                    self.cleanup(self.unlink(rel));
                    return Err(io_error(&self.root_path.join(rel), e));
                }
            }
        }
        Ok(())
    }

    /// Log a failed best-effort removal on an error path
    fn cleanup(&self, result: HostResult<()>) {
        if let Err(e) = result {
            tracing::warn!(
                root = %self.root_path.display(),
                error = %e,
                "cleanup left an entry behind"
            );
        }
    }
}

impl DeviceHost for FsHost {
    type Class = FsClass;
    type Node = FsNode;
    type Binding = FsBinding;

    fn allocate_identity(&self, _name: &str) -> HostResult<DeviceIdentity> {
        let major = lock(&self.majors)
            .allocate()
            .ok_or(HostError::NoIdentityAvailable)?;
        Ok(DeviceIdentity::new(major, 0))
    }

    fn release_identity(&self, identity: DeviceIdentity) -> HostResult<()> {
        if lock(&self.majors).release(identity.major()) {
            Ok(())
        } else {
            Err(HostError::NotFound {
                kind: "identity",
                name: identity.to_string(),
            })
        }
    }

    fn register_class(&self, name: &str, _identity: DeviceIdentity) -> HostResult<FsClass> {
        let class = FsClass {
            name: name.to_string(),
        };
        self.mkdir(&class.path(), "class", name)?;
        Ok(class)
    }

    fn unregister_class(&self, class: FsClass) -> HostResult<()> {
        self.rmdir(&class.path())
    }

    fn create_node(
        &self,
        class: &FsClass,
        identity: DeviceIdentity,
        name: &str,
    ) -> HostResult<FsNode> {
        let node = FsNode {
            name: name.to_string(),
            class: class.name.clone(),
            identity,
        };

        let attr_dir = node.attr_dir();
        self.mkdir(&attr_dir, "node", name)?;

        let attr = attr_dir.join("dev");
        let contents = format!("{}\n", identity);
        if let Err(e) = self.create_file(&attr, "attribute", name, contents.as_bytes()) {
            self.cleanup(self.rmdir(&attr_dir));
            return Err(e);
        }

        if let Err(e) = self.create_file(&node.path(), "node", name, b"") {
            self.cleanup(self.unlink(&attr));
            self.cleanup(self.rmdir(&attr_dir));
            return Err(e);
        }

        Ok(node)
    }

    fn destroy_node(&self, node: FsNode) -> HostResult<()> {
        // Keep going so a half-removed node does not block the rest
        let results = [
            self.unlink(&node.path()),
            self.unlink(&node.attr_dir().join("dev")),
            self.rmdir(&node.attr_dir()),
        ];
        results.into_iter().collect()
    }

    fn bind_handler(&self, node: &FsNode, device: Arc<CharDevice>) -> HostResult<FsBinding> {
        let mut handlers = lock(&self.handlers);
        if handlers.contains_key(&node.name) {
            return Err(HostError::AlreadyExists {
                kind: "handler",
                name: node.name.clone(),
            });
        }
        handlers.insert(node.name.clone(), (node.identity, device));
        Ok(FsBinding {
            node: node.name.clone(),
        })
    }

    fn unbind_handler(&self, binding: FsBinding) -> HostResult<()> {
        match lock(&self.handlers).remove(&binding.node) {
            Some(_) => Ok(()),
            None => Err(HostError::NotFound {
                kind: "handler",
                name: binding.node,
            }),
        }
    }
}

/// Majors already published under `<root>/class/*/*/dev`
fn scan_published(root: &Path) -> HostResult<MajorAllocator> {
    let mut majors = MajorAllocator::new();
    let class_root = root.join(CLASS_DIR);

    for class in read_dir(&class_root)? {
        let class = class.map_err(|e| std_io_error(&class_root, e))?;
        if !class.path().is_dir() {
            continue;
        }
        for node in read_dir(&class.path())?.flatten() {
            let attr = node.path().join("dev");
            let Ok(contents) = fs::read_to_string(&attr) else {
                continue;
            };
            match parse_identity(contents.trim()) {
                Some(identity) => {
                    majors.reserve(identity.major());
                }
                None => {
                    tracing::warn!(path = %attr.display(), "ignoring malformed dev attribute")
                }
            }
        }
    }
    Ok(majors)
}

fn read_dir(path: &Path) -> HostResult<fs::ReadDir> {
    fs::read_dir(path).map_err(|e| std_io_error(path, e))
}

/// Parse a `major:minor` attribute
fn parse_identity(text: &str) -> Option<DeviceIdentity> {
    let (major, minor) = text.split_once(':')?;
    Some(DeviceIdentity::new(major.parse().ok()?, minor.parse().ok()?))
}

fn dir_mode() -> Mode {
    Mode::RWXU | Mode::RGRP | Mode::XGRP | Mode::ROTH | Mode::XOTH
}

fn io_error(path: &Path, errno: Errno) -> HostError {
    HostError::Io {
        path: path.to_path_buf(),
        source: errno.into(),
    }
}

fn std_io_error(path: &Path, source: std::io::Error) -> HostError {
    HostError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
