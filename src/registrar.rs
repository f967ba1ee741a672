//! Resource Registrar - bring-up and teardown
//!
//! Bring-up is four ordered steps against a [`DeviceHost`]:
//!
//! 1. allocate a device identity
//! 2. register the device class
//! 3. create the device node
//! 4. bind the session handler to the node
//!
//! Each successful step pushes its inverse onto a [`Rollback`] stack. If a
//! later step fails the stack is dropped and runs the inverses LIFO, so the
//! host ends up exactly as it was. On success the stack is committed and the
//! handles move into a [`RegisteredDevice`], whose teardown runs the same
//! inverses in the same order.

use crate::config::DeviceConfig;
use crate::device::CharDevice;
use crate::error::{ChardevError, Result};
use crate::host::{DeviceHost, HostResult};
use crate::identity::DeviceIdentity;
use crate::session::SessionState;
use std::fmt;
use std::sync::Arc;

/// One step of bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegistrationStep {
    AllocateIdentity,
    RegisterClass,
    CreateNode,
    BindHandler,
}

impl RegistrationStep {
    /// All steps in bring-up order
    pub const ALL: [RegistrationStep; 4] = [
        Self::AllocateIdentity,
        Self::RegisterClass,
        Self::CreateNode,
        Self::BindHandler,
    ];

    /// 1-based position in bring-up
    pub fn number(self) -> usize {
        self as usize + 1
    }
}

impl fmt::Display for RegistrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AllocateIdentity => "allocate identity",
            Self::RegisterClass => "register class",
            Self::CreateNode => "create node",
            Self::BindHandler => "bind handler",
        };
        write!(f, "{} ({})", self.number(), name)
    }
}

type Undo<'a> = Box<dyn FnOnce() -> HostResult<()> + 'a>;

/// Stack of inverse actions for the steps taken so far
///
/// Dropping an uncommitted stack runs every inverse, newest first.
pub struct Rollback<'a> {
    undo: Vec<(RegistrationStep, Undo<'a>)>,
}

impl<'a> Rollback<'a> {
    pub fn new() -> Self {
        Self { undo: Vec::new() }
    }

    /// Record the inverse of a step that just succeeded
    pub fn push<F>(&mut self, step: RegistrationStep, undo: F)
    where
        F: FnOnce() -> HostResult<()> + 'a,
    {
        self.undo.push((step, Box::new(undo)));
    }

    /// Keep everything; nothing is undone
    pub fn commit(mut self) {
        self.undo.clear();
    }

    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }
}

impl Default for Rollback<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        while let Some((step, undo)) = self.undo.pop() {
            match undo() {
                Ok(()) => tracing::info!(%step, "undid registration step"),
                Err(e) => tracing::error!(%step, error = %e, "failed to undo registration step"),
            }
        }
    }
}

/// Tag a host failure with the step it happened in
fn attempt<T>(step: RegistrationStep, result: HostResult<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tracing::info!(%step, "registration step done");
            Ok(value)
        }
        Err(source) => {
            tracing::error!(%step, error = %source, "registration step failed");
            Err(ChardevError::RegistrationStepFailed { step, source })
        }
    }
}

/// Bring a device up on `host`
///
/// Either every step succeeds and the device is live, or the steps that did
/// succeed are undone in reverse order and the failing step is reported.
pub fn bring_up<H: DeviceHost>(host: Arc<H>, config: DeviceConfig) -> Result<RegisteredDevice<H>> {
    let device = Arc::new(CharDevice::new(config)?);
    let name = device.config().device_name.clone();
    let class_name = device.config().class_name.clone();

    tracing::info!(device = %name, class = %class_name, "bringing up device");

    let h: &H = &host;
    let mut rollback = Rollback::new();

    let identity = attempt(
        RegistrationStep::AllocateIdentity,
        h.allocate_identity(&name),
    )?;
    tracing::info!(device = %name, %identity, "registered with major number {}", identity.major());
    rollback.push(RegistrationStep::AllocateIdentity, move || {
        h.release_identity(identity)
    });

    let class = attempt(
        RegistrationStep::RegisterClass,
        h.register_class(&class_name, identity),
    )?;
    let undo_class = class.clone();
    rollback.push(RegistrationStep::RegisterClass, move || {
        h.unregister_class(undo_class)
    });

    let node = attempt(
        RegistrationStep::CreateNode,
        h.create_node(&class, identity, &name),
    )?;
    let undo_node = node.clone();
    rollback.push(RegistrationStep::CreateNode, move || h.destroy_node(undo_node));

    let binding = attempt(
        RegistrationStep::BindHandler,
        h.bind_handler(&node, Arc::clone(&device)),
    )?;

    rollback.commit();
    tracing::info!(device = %name, %identity, "device is live");

    Ok(RegisteredDevice {
        host,
        identity,
        class: Some(class),
        node: Some(node),
        binding: Some(binding),
        device,
        live: true,
    })
}

/// A device that completed bring-up
///
/// [`teardown`](Self::teardown) consumes the handle, so teardown runs at most
/// once. Dropping a live handle tears it down as well.
pub struct RegisteredDevice<H: DeviceHost> {
    host: Arc<H>,
    identity: DeviceIdentity,
    class: Option<H::Class>,
    node: Option<H::Node>,
    binding: Option<H::Binding>,
    device: Arc<CharDevice>,
    live: bool,
}

impl<H: DeviceHost> RegisteredDevice<H> {
    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    pub fn device(&self) -> &Arc<CharDevice> {
        &self.device
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn class(&self) -> Option<&H::Class> {
        self.class.as_ref()
    }

    pub fn node(&self) -> Option<&H::Node> {
        self.node.as_ref()
    }

    /// Undo all four steps in reverse order
    ///
    /// Every inverse runs even if an earlier one fails; the first failure is
    /// returned.
    pub fn teardown(mut self) -> Result<()> {
        self.unregister()
    }

    fn unregister(&mut self) -> Result<()> {
        if !self.live {
            return Ok(());
        }
        self.live = false;

        let name = self.device.name().to_string();
        tracing::info!(device = %name, identity = %self.identity, "deregistering device");
        if self.device.state() == SessionState::Open {
            tracing::warn!(device = %name, "tearing down with a session still open");
        }

        let host = &*self.host;
        let mut first_error = None;
        let mut record = |step: RegistrationStep, result: HostResult<()>| match result {
            Ok(()) => tracing::info!(%step, "undid registration step"),
            Err(source) => {
                tracing::error!(%step, error = %source, "teardown step failed");
                first_error.get_or_insert(ChardevError::TeardownStepFailed { step, source });
            }
        };

        if let Some(binding) = self.binding.take() {
            record(RegistrationStep::BindHandler, host.unbind_handler(binding));
        }
        if let Some(node) = self.node.take() {
            record(RegistrationStep::CreateNode, host.destroy_node(node));
        }
        if let Some(class) = self.class.take() {
            record(RegistrationStep::RegisterClass, host.unregister_class(class));
        }
        record(
            RegistrationStep::AllocateIdentity,
            host.release_identity(self.identity),
        );

        tracing::info!(device = %name, "deregistered device");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<H: DeviceHost> Drop for RegisteredDevice<H> {
    fn drop(&mut self) {
        if let Err(e) = self.unregister() {
            tracing::error!(error = %e, "teardown on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostEvent, MemoryHost};

    #[test]
    fn test_bring_up_runs_steps_in_order() {
        let host = Arc::new(MemoryHost::new());
        let registered = bring_up(Arc::clone(&host), DeviceConfig::default()).unwrap();
        let identity = registered.identity();

        assert_eq!(
            host.journal(),
            vec![
                HostEvent::IdentityAllocated(identity),
                HostEvent::ClassRegistered("chardev".into()),
                HostEvent::NodeCreated("chardev".into()),
                HostEvent::HandlerBound("chardev".into()),
            ]
        );
        assert!(host.lookup("chardev").is_some());
    }

    #[test]
    fn test_failed_step_unwinds_in_reverse() {
        let host = Arc::new(MemoryHost::failing_at(RegistrationStep::CreateNode));
        let err = bring_up(Arc::clone(&host), DeviceConfig::default())
            .err()
            .unwrap();

        assert!(matches!(
            err,
            ChardevError::RegistrationStepFailed {
                step: RegistrationStep::CreateNode,
                ..
            }
        ));

        let journal = host.journal();
        let identity = match journal[0] {
            HostEvent::IdentityAllocated(id) => id,
            ref other => panic!("unexpected first event {other:?}"),
        };
        assert_eq!(
            journal,
            vec![
                HostEvent::IdentityAllocated(identity),
                HostEvent::ClassRegistered("chardev".into()),
                HostEvent::ClassUnregistered("chardev".into()),
                HostEvent::IdentityReleased(identity),
            ]
        );
        assert!(!host.has_class("chardev"));
        assert_eq!(host.identities_in_use(), 0);
    }

    #[test]
    fn test_teardown_inverts_bring_up() {
        let host = Arc::new(MemoryHost::new());
        let registered = bring_up(Arc::clone(&host), DeviceConfig::default()).unwrap();
        let identity = registered.identity();
        registered.teardown().unwrap();

        let journal = host.journal();
        assert_eq!(
            journal[4..],
            [
                HostEvent::HandlerUnbound("chardev".into()),
                HostEvent::NodeDestroyed("chardev".into()),
                HostEvent::ClassUnregistered("chardev".into()),
                HostEvent::IdentityReleased(identity),
            ]
        );
        assert!(!host.has_node("chardev"));
    }

    #[test]
    fn test_drop_tears_down_once() {
        let host = Arc::new(MemoryHost::new());
        {
            let _registered = bring_up(Arc::clone(&host), DeviceConfig::default()).unwrap();
        }
        assert_eq!(host.journal().len(), 8);
        assert_eq!(host.identities_in_use(), 0);
    }

    #[test]
    fn test_invalid_config_touches_nothing() {
        let host = Arc::new(MemoryHost::new());
        let config = DeviceConfig::named("bad/name");
        assert!(matches!(
            bring_up(Arc::clone(&host), config),
            Err(ChardevError::InvalidName(_))
        ));
        assert!(host.journal().is_empty());
    }

    #[test]
    fn test_rollback_pops_newest_first() {
        use std::cell::RefCell;

        let order = RefCell::new(Vec::new());
        {
            let mut rollback = Rollback::new();
            for step in RegistrationStep::ALL {
                let order = &order;
                rollback.push(step, move || {
                    order.borrow_mut().push(step);
                    Ok(())
                });
            }
            assert_eq!(rollback.len(), 4);
        }
        let mut expected = RegistrationStep::ALL.to_vec();
        expected.reverse();
        assert_eq!(order.into_inner(), expected);
    }

    #[test]
    fn test_step_display() {
        assert_eq!(RegistrationStep::CreateNode.to_string(), "3 (create node)");
        assert_eq!(RegistrationStep::AllocateIdentity.number(), 1);
    }
}
