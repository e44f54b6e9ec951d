//! Typed outcome of a routed event.

use serde::Serialize;

use super::{ErrorKind, OrchestratorError};

/// Error half of an [`EventResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventError {
    /// Failure category; callers branch on this.
    pub kind: ErrorKind,
    /// Human-readable context.
    pub message: String,
}

impl EventError {
    /// Creates a new event error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of `send_event`: either the machine's post-transition state or a
/// typed failure. The orchestrator never throws across the send boundary.
#[derive(Debug, Clone, Serialize)]
pub struct EventResult {
    /// Whether the event was processed to completion.
    pub success: bool,
    /// The machine's state after the transition (dotted path), when known.
    pub new_state: Option<String>,
    /// Failure details when `success` is false.
    pub error: Option<EventError>,
}

impl EventResult {
    /// Creates a successful result carrying the post-transition state.
    pub fn ok(new_state: impl Into<String>) -> Self {
        Self {
            success: true,
            new_state: Some(new_state.into()),
            error: None,
        }
    }

    /// Creates a failed result.
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            new_state: None,
            error: Some(EventError::new(kind, message)),
        }
    }

    /// Folds an [`OrchestratorError`] into a failed result.
    pub fn from_error(err: &OrchestratorError) -> Self {
        Self::failure(err.kind(), err.to_string())
    }

    /// Convenience accessor for the failure kind.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_result_carries_state() {
        let result = EventResult::ok("closed");
        assert!(result.success);
        assert_eq!(result.new_state.as_deref(), Some("closed"));
        assert!(result.error.is_none());
    }

    #[test]
    fn failure_result_carries_kind() {
        let result = EventResult::failure(ErrorKind::Timeout, "no response in 100ms");
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert!(result.new_state.is_none());
    }

    #[test]
    fn from_error_preserves_kind_and_message() {
        let err = OrchestratorError::Shutdown;
        let result = EventResult::from_error(&err);
        assert_eq!(result.error_kind(), Some(ErrorKind::Shutdown));
        assert_eq!(result.error.unwrap().message, err.to_string());
    }
}
