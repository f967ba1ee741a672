//! Error types for the chardev device

use crate::host::HostError;
use crate::registrar::RegistrationStep;
use rustix::io::Errno;
use thiserror::Error;

/// Result type for chardev operations
pub type Result<T> = std::result::Result<T, ChardevError>;

/// Errors that can occur while bringing up or using the device
#[derive(Debug, Error)]
pub enum ChardevError {
    /// A session is already open
    #[error("Device busy: another session holds the device")]
    Busy,

    /// A source or destination could not be addressed
    #[error("Bad address: {reason}")]
    Fault { reason: &'static str },

    /// A session operation arrived while the device was closed
    #[error("Device is not open")]
    NotOpen,

    /// Write would exceed the buffer capacity
    #[error("Buffer overflow: max {max} bytes, got {got} bytes")]
    BufferOverflow { max: usize, got: usize },

    /// Device or class name too long
    #[error("Name too long: max {max} chars, got {got}")]
    NameTooLong { max: usize, got: usize },

    /// Device or class name is empty or not a single path component
    #[error("Invalid name '{0}'")]
    InvalidName(String),

    /// Buffer capacity of zero
    #[error("Invalid buffer capacity: {0}")]
    InvalidCapacity(usize),

    /// A bring-up step failed; every earlier step has already been undone
    #[error("Registration failed at step {step}: {source}")]
    RegistrationStepFailed {
        step: RegistrationStep,
        #[source]
        source: HostError,
    },

    /// Undoing a step during teardown failed; the remaining steps still ran
    #[error("Teardown of step {step} failed: {source}")]
    TeardownStepFailed {
        step: RegistrationStep,
        #[source]
        source: HostError,
    },
}

impl ChardevError {
    /// Errno a host should surface for this error
    pub fn errno(&self) -> Errno {
        match self {
            Self::Busy => Errno::BUSY,
            Self::Fault { .. } => Errno::FAULT,
            Self::NotOpen => Errno::BADF,
            Self::BufferOverflow { .. } => Errno::NOSPC,
            Self::NameTooLong { .. } => Errno::NAMETOOLONG,
            Self::InvalidName(_) | Self::InvalidCapacity(_) => Errno::INVAL,
            Self::RegistrationStepFailed { source, .. }
            | Self::TeardownStepFailed { source, .. } => source.errno(),
        }
    }

    /// Negative errno, the form C callers expect from a failed entry point
    pub fn to_neg_errno(&self) -> i32 {
        -self.errno().raw_os_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_errors_map_to_errno() {
        assert_eq!(ChardevError::Busy.errno(), Errno::BUSY);
        assert_eq!(ChardevError::Fault { reason: "null" }.errno(), Errno::FAULT);
        assert_eq!(
            ChardevError::BufferOverflow { max: 256, got: 300 }.errno(),
            Errno::NOSPC
        );
        assert!(ChardevError::Busy.to_neg_errno() < 0);
    }

    #[test]
    fn test_registration_error_names_step() {
        let err = ChardevError::RegistrationStepFailed {
            step: RegistrationStep::CreateNode,
            source: HostError::Injected(RegistrationStep::CreateNode),
        };
        let msg = err.to_string();
        assert!(msg.contains("create node"), "{msg}");
        assert!(std::error::Error::source(&err).is_some());
    }
}
