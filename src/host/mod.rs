//! Host collaborator - the device namespace the device is published into
//!
//! The registrar only talks to a host through [`DeviceHost`]. Every
//! registration call has an inverse, and the registrar calls inverses in
//! LIFO order.
//!
//! Two hosts ship with the crate:
//! - [`MemoryHost`]: in-process namespace with fault injection and an event
//!   journal
//! - [`FsHost`]: publishes class and node entries under a directory

mod fs;
mod memory;

pub use fs::{FsBinding, FsClass, FsHost, FsNode};
pub use memory::{HostEvent, MemoryBinding, MemoryClass, MemoryHost, MemoryNode};

use crate::device::CharDevice;
use crate::identity::DeviceIdentity;
use crate::registrar::RegistrationStep;
use rustix::io::Errno;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type for host operations
pub type HostResult<T> = std::result::Result<T, HostError>;

/// Errors reported by a host
#[derive(Debug, Error)]
pub enum HostError {
    /// Dynamic major range exhausted
    #[error("No free device identity")]
    NoIdentityAvailable,

    /// Name already taken in the namespace
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// Entry to remove or bind to is not registered
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// Failure requested through fault injection
    #[error("Injected failure at {0}")]
    Injected(RegistrationStep),

    /// Filesystem operation failed
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl HostError {
    pub fn errno(&self) -> Errno {
        match self {
            // register_chrdev reports an exhausted dynamic range as EBUSY
            Self::NoIdentityAvailable => Errno::BUSY,
            Self::AlreadyExists { .. } => Errno::EXIST,
            Self::NotFound { .. } => Errno::NOENT,
            Self::Injected(_) => Errno::IO,
            Self::Io { source, .. } => Errno::from_io_error(source).unwrap_or(Errno::IO),
        }
    }
}

/// Registration API a host offers the registrar
///
/// Handles are owned tokens for what a step created; the registrar passes
/// each one back to exactly one inverse call.
pub trait DeviceHost: Send + Sync {
    /// Token for a registered class
    type Class: Clone + Send + Sync;
    /// Token for a created node
    type Node: Clone + Send + Sync;
    /// Token for a bound session handler
    type Binding: Clone + Send + Sync;

    /// Step 1: allocate a device identity for `name`
    fn allocate_identity(&self, name: &str) -> HostResult<DeviceIdentity>;

    /// Inverse of step 1
    fn release_identity(&self, identity: DeviceIdentity) -> HostResult<()>;

    /// Step 2: register a device class under `identity`
    fn register_class(&self, name: &str, identity: DeviceIdentity) -> HostResult<Self::Class>;

    /// Inverse of step 2
    fn unregister_class(&self, class: Self::Class) -> HostResult<()>;

    /// Step 3: create an addressable node in `class`
    fn create_node(
        &self,
        class: &Self::Class,
        identity: DeviceIdentity,
        name: &str,
    ) -> HostResult<Self::Node>;

    /// Inverse of step 3
    fn destroy_node(&self, node: Self::Node) -> HostResult<()>;

    /// Step 4: route session calls on `node` to `device`
    fn bind_handler(&self, node: &Self::Node, device: Arc<CharDevice>)
        -> HostResult<Self::Binding>;

    /// Inverse of step 4
    fn unbind_handler(&self, binding: Self::Binding) -> HostResult<()>;
}
