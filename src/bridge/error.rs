//! Error types crossing the bridge boundary.

use super::exception::GuestException;
use super::handle::ForeignHandle;
use thiserror::Error;

/// The single exception type every fallible bridge entry point returns.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("guest runtime is not running")]
    NotRunning,

    #[error("failed to initialize guest runtime: {0}")]
    Initialization(String),

    /// Host-side argument rejected before the guest was entered.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A guest failure, captured and formatted by the exception translator.
    #[error("{0}")]
    Guest(Box<GuestException>),
}

impl BridgeError {
    /// The translated guest error record, if this error came from the guest.
    pub fn guest(&self) -> Option<&GuestException> {
        match self {
            BridgeError::Guest(record) => Some(record),
            _ => None,
        }
    }

    /// True if the guest raised `StopIteration`, so iteration protocols can be
    /// driven from the host.
    pub fn is_stop_iteration(&self) -> bool {
        self.guest().is_some_and(|record| record.is_stop_iteration)
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Reference-count or lifecycle contract breach.
///
/// Violations are logged as warnings and returned to the caller for
/// inspection; they never become a [`BridgeError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("{op} on handle {handle} while the guest runtime is not running")]
    NotRunning {
        op: &'static str,
        handle: ForeignHandle,
    },

    #[error("reference count underflow on handle {0}: the host holds no reference to it")]
    Underflow(ForeignHandle),

    #[error("handle {0} was never issued to the host")]
    UnknownHandle(ForeignHandle),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_error_accessors() {
        let record = GuestException {
            type_name: Some("<class 'StopIteration'>".to_string()),
            is_stop_iteration: true,
            ..GuestException::default()
        };
        let err = BridgeError::Guest(Box::new(record));
        assert!(err.is_stop_iteration());
        assert!(err.guest().is_some());
        assert!(err.to_string().contains("StopIteration"));

        assert!(!BridgeError::NotRunning.is_stop_iteration());
        assert!(BridgeError::NotRunning.guest().is_none());
    }

    #[test]
    fn test_violation_display() {
        let handle = ForeignHandle::from_raw(0x1000).unwrap();
        let violation = ProtocolViolation::Underflow(handle);
        assert!(violation.to_string().contains("0x1000"));

        let violation = ProtocolViolation::NotRunning {
            op: "decref",
            handle,
        };
        assert!(violation.to_string().starts_with("decref on handle 0x1000"));
    }
}
