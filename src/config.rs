//! Device configuration

use crate::error::{ChardevError, Result};

/// Name the device appears under in the host namespace
pub const DEFAULT_DEVICE_NAME: &str = "chardev";

/// Name of the device class
pub const DEFAULT_CLASS_NAME: &str = "chardev";

/// Default message buffer size in bytes
pub const DEFAULT_CAPACITY: usize = 256;

/// Longest accepted device or class name
pub const MAX_NAME_LEN: usize = 32;

/// What a write does when the annotated message does not fit the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Refuse the write and leave the buffer untouched
    #[default]
    Reject,
    /// Keep the first `capacity` bytes of the annotated message
    Truncate,
}

/// Device configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Node name, e.g. `dev/chardev`
    pub device_name: String,
    /// Class the node is registered under
    pub class_name: String,
    /// Size of the message buffer in bytes
    pub capacity: usize,
    /// Behaviour of writes that exceed `capacity`
    pub overflow: OverflowPolicy,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            class_name: DEFAULT_CLASS_NAME.to_string(),
            capacity: DEFAULT_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl DeviceConfig {
    /// Config with the given device name and defaults elsewhere
    pub fn named(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
            ..Self::default()
        }
    }

    /// Check names and capacity before anything is registered
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.device_name)?;
        validate_name(&self.class_name)?;
        if self.capacity == 0 {
            return Err(ChardevError::InvalidCapacity(self.capacity));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(ChardevError::NameTooLong {
            max: MAX_NAME_LEN,
            got: name.len(),
        });
    }
    // Names become single path components in the host namespace
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(ChardevError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_reference_device() {
        let config = DeviceConfig::default();
        assert_eq!(config.device_name, "chardev");
        assert_eq!(config.class_name, "chardev");
        assert_eq!(config.capacity, 256);
        assert_eq!(config.overflow, OverflowPolicy::Reject);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_names() {
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            DeviceConfig::named(&long).validate(),
            Err(ChardevError::NameTooLong { got, .. }) if got == MAX_NAME_LEN + 1
        ));
        assert!(matches!(
            DeviceConfig::named("a/b").validate(),
            Err(ChardevError::InvalidName(_))
        ));
        assert!(matches!(
            DeviceConfig::named("").validate(),
            Err(ChardevError::InvalidName(_))
        ));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let config = DeviceConfig {
            capacity: 0,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ChardevError::InvalidCapacity(0))
        ));
    }
}
