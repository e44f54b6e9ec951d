//! Error types for the domain layer.

use std::fmt;
use thiserror::Error;

use super::MachineId;

/// Errors that occur during value object construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    /// Creates an empty field validation error.
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField { field: field.into() }
    }

    /// Creates an invalid format validation error.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failure categories surfaced in [`super::EventResult`].
///
/// Callers branch on the kind: programmer errors (`DuplicateRegistration`,
/// `GroupReleased`) are not retried, transient kinds (`Timeout`,
/// `Backpressure`, `BreakerOpen`) are retried with backoff, `MachineFault`
/// is isolated to the failing turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// The target machine id resolved to nothing.
    TargetNotRegistered,
    /// The response slot was not completed before the deadline.
    Timeout,
    /// The caller cancelled the request before completion.
    Cancelled,
    /// The adapter raised an error while processing the event.
    MachineFault,
    /// The orchestrator (or the target's channel group) is shutting down.
    Shutdown,
    /// A circuit breaker refused the call.
    BreakerOpen,
    /// The target mailbox is at capacity.
    Backpressure,
    /// A machine with the same id already exists in the scope.
    DuplicateRegistration,
    /// The channel group token was already released.
    GroupReleased,
}

impl ErrorKind {
    /// Whether callers may retry after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Backpressure | ErrorKind::BreakerOpen
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TargetNotRegistered => "TARGET_NOT_REGISTERED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::MachineFault => "MACHINE_FAULT",
            ErrorKind::Shutdown => "SHUTDOWN",
            ErrorKind::BreakerOpen => "BREAKER_OPEN",
            ErrorKind::Backpressure => "BACKPRESSURE",
            ErrorKind::DuplicateRegistration => "DUPLICATE_REGISTRATION",
            ErrorKind::GroupReleased => "GROUP_RELEASED",
        };
        write!(f, "{}", s)
    }
}

/// Errors raised by orchestrator operations that return `Result`.
///
/// `send_event` never surfaces this type directly - routing failures fold
/// into [`super::EventResult`] so normal control flow stays exception-free.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("Machine '{machine_id}' is not registered")]
    TargetNotRegistered { machine_id: String },

    #[error("Request to '{machine_id}' timed out after {timeout_ms}ms")]
    Timeout { machine_id: String, timeout_ms: u64 },

    #[error("Request was cancelled before completion")]
    Cancelled,

    #[error("Machine '{machine_id}' faulted: {message}")]
    MachineFault { machine_id: String, message: String },

    #[error("Orchestrator is shut down")]
    Shutdown,

    #[error("Circuit breaker '{name}' is open")]
    BreakerOpen { name: String },

    #[error("Mailbox for '{machine_id}' is at capacity ({capacity})")]
    Backpressure { machine_id: String, capacity: usize },

    #[error("Machine '{machine_id}' is already registered")]
    DuplicateRegistration { machine_id: String },

    #[error("Channel group '{group}' was already released")]
    GroupReleased { group: String },

    #[error("Invalid machine id: {reason}")]
    InvalidMachineId { reason: String },
}

impl OrchestratorError {
    /// Creates a `TargetNotRegistered` error.
    pub fn target_not_registered(machine_id: &MachineId) -> Self {
        OrchestratorError::TargetNotRegistered {
            machine_id: machine_id.to_string(),
        }
    }

    /// Creates a `DuplicateRegistration` error.
    pub fn duplicate_registration(machine_id: &MachineId) -> Self {
        OrchestratorError::DuplicateRegistration {
            machine_id: machine_id.to_string(),
        }
    }

    /// Maps the variant to its [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::TargetNotRegistered { .. } => ErrorKind::TargetNotRegistered,
            OrchestratorError::Timeout { .. } => ErrorKind::Timeout,
            OrchestratorError::Cancelled => ErrorKind::Cancelled,
            OrchestratorError::MachineFault { .. } => ErrorKind::MachineFault,
            OrchestratorError::Shutdown => ErrorKind::Shutdown,
            OrchestratorError::BreakerOpen { .. } => ErrorKind::BreakerOpen,
            OrchestratorError::Backpressure { .. } => ErrorKind::Backpressure,
            OrchestratorError::DuplicateRegistration { .. } => ErrorKind::DuplicateRegistration,
            OrchestratorError::GroupReleased { .. } => ErrorKind::GroupReleased,
            // An unparseable id can never name a registered machine.
            OrchestratorError::InvalidMachineId { .. } => ErrorKind::TargetNotRegistered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::Backpressure.is_retryable());
        assert!(ErrorKind::BreakerOpen.is_retryable());
    }

    #[test]
    fn programmer_errors_are_not_retryable() {
        assert!(!ErrorKind::DuplicateRegistration.is_retryable());
        assert!(!ErrorKind::GroupReleased.is_retryable());
        assert!(!ErrorKind::Shutdown.is_retryable());
        assert!(!ErrorKind::MachineFault.is_retryable());
    }

    #[test]
    fn error_kind_display_is_screaming_snake() {
        assert_eq!(ErrorKind::TargetNotRegistered.to_string(), "TARGET_NOT_REGISTERED");
        assert_eq!(ErrorKind::BreakerOpen.to_string(), "BREAKER_OPEN");
    }

    #[test]
    fn orchestrator_error_maps_to_kind() {
        let id = MachineId::new("m1").unwrap();
        assert_eq!(
            OrchestratorError::target_not_registered(&id).kind(),
            ErrorKind::TargetNotRegistered
        );
        assert_eq!(
            OrchestratorError::duplicate_registration(&id).kind(),
            ErrorKind::DuplicateRegistration
        );
        assert_eq!(OrchestratorError::Shutdown.kind(), ErrorKind::Shutdown);
    }
}
