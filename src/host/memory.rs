//! In-process device namespace
//!
//! Keeps classes, nodes and bound handlers in a table behind one lock,
//! journals every registration call, and can be told to fail a given step
//! or the inverse of one.

use super::{DeviceHost, HostError, HostResult};
use crate::device::CharDevice;
use crate::identity::{DeviceIdentity, MajorAllocator};
use crate::registrar::RegistrationStep;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One registration call the host performed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    IdentityAllocated(DeviceIdentity),
    IdentityReleased(DeviceIdentity),
    ClassRegistered(String),
    ClassUnregistered(String),
    NodeCreated(String),
    NodeDestroyed(String),
    HandlerBound(String),
    HandlerUnbound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryClass {
    name: String,
    identity: DeviceIdentity,
}

impl MemoryClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryNode {
    name: String,
    class: String,
    identity: DeviceIdentity,
}

impl MemoryNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBinding {
    node: String,
}

struct NodeEntry {
    identity: DeviceIdentity,
    handler: Option<Arc<CharDevice>>,
}

#[derive(Default)]
struct Namespace {
    majors: MajorAllocator,
    classes: BTreeMap<String, DeviceIdentity>,
    nodes: BTreeMap<String, NodeEntry>,
    journal: Vec<HostEvent>,
    fail_at: Option<RegistrationStep>,
    undo_fail_at: Option<RegistrationStep>,
}

impl Namespace {
    fn check_fault(&self, step: RegistrationStep) -> HostResult<()> {
        match self.fail_at {
            Some(at) if at == step => Err(HostError::Injected(step)),
            _ => Ok(()),
        }
    }

    fn check_undo_fault(&self, step: RegistrationStep) -> HostResult<()> {
        match self.undo_fail_at {
            Some(at) if at == step => Err(HostError::Injected(step)),
            _ => Ok(()),
        }
    }
}

/// In-memory [`DeviceHost`]
#[derive(Default)]
pub struct MemoryHost {
    inner: Mutex<Namespace>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host whose `step` call always fails
    pub fn failing_at(step: RegistrationStep) -> Self {
        let host = Self::new();
        host.set_fault(Some(step));
        host
    }

    /// Make `step` fail from now on, or clear the fault with `None`
    pub fn set_fault(&self, step: Option<RegistrationStep>) {
        self.lock().fail_at = step;
    }

    /// Make the inverse of `step` fail from now on, or clear it with `None`
    ///
    /// A failed inverse leaves its entry registered.
    pub fn set_undo_fault(&self, step: Option<RegistrationStep>) {
        self.lock().undo_fail_at = step;
    }

    /// Every registration call performed so far, oldest first
    pub fn journal(&self) -> Vec<HostEvent> {
        self.lock().journal.clone()
    }

    /// Device bound to the node called `name`
    pub fn lookup(&self, name: &str) -> Option<Arc<CharDevice>> {
        self.lock().nodes.get(name)?.handler.clone()
    }

    /// Device bound to the node with this rdev
    pub fn lookup_rdev(&self, rdev: u64) -> Option<Arc<CharDevice>> {
        let ns = self.lock();
        ns.nodes
            .values()
            .find(|node| node.identity.rdev() == rdev)
            .and_then(|node| node.handler.clone())
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.lock().classes.contains_key(name)
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.lock().nodes.contains_key(name)
    }

    /// Number of allocated identities
    pub fn identities_in_use(&self) -> usize {
        self.lock().majors.in_use()
    }

    fn lock(&self) -> MutexGuard<'_, Namespace> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceHost for MemoryHost {
    type Class = MemoryClass;
    type Node = MemoryNode;
    type Binding = MemoryBinding;

    fn allocate_identity(&self, _name: &str) -> HostResult<DeviceIdentity> {
        let mut ns = self.lock();
        ns.check_fault(RegistrationStep::AllocateIdentity)?;
        let major = ns.majors.allocate().ok_or(HostError::NoIdentityAvailable)?;
        let identity = DeviceIdentity::new(major, 0);
        ns.journal.push(HostEvent::IdentityAllocated(identity));
        Ok(identity)
    }

    fn release_identity(&self, identity: DeviceIdentity) -> HostResult<()> {
        let mut ns = self.lock();
        ns.check_undo_fault(RegistrationStep::AllocateIdentity)?;
        if !ns.majors.release(identity.major()) {
            return Err(HostError::NotFound {
                kind: "identity",
                name: identity.to_string(),
            });
        }
        ns.journal.push(HostEvent::IdentityReleased(identity));
        Ok(())
    }

    fn register_class(&self, name: &str, identity: DeviceIdentity) -> HostResult<MemoryClass> {
        let mut ns = self.lock();
        ns.check_fault(RegistrationStep::RegisterClass)?;
        if ns.classes.contains_key(name) {
            return Err(HostError::AlreadyExists {
                kind: "class",
                name: name.to_string(),
            });
        }
        ns.classes.insert(name.to_string(), identity);
        ns.journal.push(HostEvent::ClassRegistered(name.to_string()));
        Ok(MemoryClass {
            name: name.to_string(),
            identity,
        })
    }

    fn unregister_class(&self, class: MemoryClass) -> HostResult<()> {
        let mut ns = self.lock();
        ns.check_undo_fault(RegistrationStep::RegisterClass)?;
        if ns.classes.remove(&class.name).is_none() {
            return Err(HostError::NotFound {
                kind: "class",
                name: class.name,
            });
        }
        ns.journal.push(HostEvent::ClassUnregistered(class.name));
        Ok(())
    }

    fn create_node(
        &self,
        class: &MemoryClass,
        identity: DeviceIdentity,
        name: &str,
    ) -> HostResult<MemoryNode> {
        let mut ns = self.lock();
        ns.check_fault(RegistrationStep::CreateNode)?;
        if !ns.classes.contains_key(&class.name) {
            return Err(HostError::NotFound {
                kind: "class",
                name: class.name.clone(),
            });
        }
        if ns.nodes.contains_key(name) {
            return Err(HostError::AlreadyExists {
                kind: "node",
                name: name.to_string(),
            });
        }
        ns.nodes.insert(
            name.to_string(),
            NodeEntry {
                identity,
                handler: None,
            },
        );
        ns.journal.push(HostEvent::NodeCreated(name.to_string()));
        Ok(MemoryNode {
            name: name.to_string(),
            class: class.name.clone(),
            identity,
        })
    }

    fn destroy_node(&self, node: MemoryNode) -> HostResult<()> {
        let mut ns = self.lock();
        ns.check_undo_fault(RegistrationStep::CreateNode)?;
        if ns.nodes.remove(&node.name).is_none() {
            return Err(HostError::NotFound {
                kind: "node",
                name: node.name,
            });
        }
        ns.journal.push(HostEvent::NodeDestroyed(node.name));
        Ok(())
    }

    fn bind_handler(
        &self,
        node: &MemoryNode,
        device: Arc<CharDevice>,
    ) -> HostResult<MemoryBinding> {
        let mut ns = self.lock();
        ns.check_fault(RegistrationStep::BindHandler)?;
        let entry = ns.nodes.get_mut(&node.name).ok_or_else(|| HostError::NotFound {
            kind: "node",
            name: node.name.clone(),
        })?;
        if entry.handler.is_some() {
            return Err(HostError::AlreadyExists {
                kind: "handler",
                name: node.name.clone(),
            });
        }
        entry.handler = Some(device);
        ns.journal.push(HostEvent::HandlerBound(node.name.clone()));
        Ok(MemoryBinding {
            node: node.name.clone(),
        })
    }

    fn unbind_handler(&self, binding: MemoryBinding) -> HostResult<()> {
        let mut ns = self.lock();
        ns.check_undo_fault(RegistrationStep::BindHandler)?;
        let unbound = ns
            .nodes
            .get_mut(&binding.node)
            .and_then(|entry| entry.handler.take());
        if unbound.is_none() {
            return Err(HostError::NotFound {
                kind: "handler",
                name: binding.node,
            });
        }
        ns.journal.push(HostEvent::HandlerUnbound(binding.node));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    #[test]
    fn test_register_and_lookup() {
        let host = MemoryHost::new();
        let identity = host.allocate_identity("chardev").unwrap();
        let class = host.register_class("chardev", identity).unwrap();
        let node = host.create_node(&class, identity, "chardev").unwrap();

        let device = Arc::new(CharDevice::new(DeviceConfig::default()).unwrap());
        host.bind_handler(&node, Arc::clone(&device)).unwrap();

        let found = host.lookup("chardev").unwrap();
        assert!(Arc::ptr_eq(&found, &device));
        assert!(host.lookup_rdev(identity.rdev()).is_some());
        assert!(host.lookup("missing").is_none());
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let host = MemoryHost::new();
        let identity = host.allocate_identity("a").unwrap();
        host.register_class("chardev", identity).unwrap();

        let err = host.register_class("chardev", identity).unwrap_err();
        assert!(matches!(err, HostError::AlreadyExists { kind: "class", .. }));
    }

    #[test]
    fn test_injected_fault_leaves_no_trace() {
        let host = MemoryHost::failing_at(RegistrationStep::AllocateIdentity);
        assert!(matches!(
            host.allocate_identity("chardev"),
            Err(HostError::Injected(RegistrationStep::AllocateIdentity))
        ));
        assert!(host.journal().is_empty());
        assert_eq!(host.identities_in_use(), 0);

        host.set_fault(None);
        assert!(host.allocate_identity("chardev").is_ok());
    }

    #[test]
    fn test_undo_fault_keeps_entry() {
        let host = MemoryHost::new();
        let identity = host.allocate_identity("chardev").unwrap();
        let class = host.register_class("chardev", identity).unwrap();

        host.set_undo_fault(Some(RegistrationStep::RegisterClass));
        assert!(matches!(
            host.unregister_class(class.clone()),
            Err(HostError::Injected(RegistrationStep::RegisterClass))
        ));
        assert!(host.has_class("chardev"));

        host.set_undo_fault(None);
        host.unregister_class(class).unwrap();
        assert!(!host.has_class("chardev"));
    }

    #[test]
    fn test_inverse_of_unknown_entry_fails() {
        let host = MemoryHost::new();
        let err = host.release_identity(DeviceIdentity::new(240, 0)).unwrap_err();
        assert!(matches!(err, HostError::NotFound { kind: "identity", .. }));
    }
}
