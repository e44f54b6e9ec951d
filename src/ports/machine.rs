//! MachineAdapter port - the contract a hosted statechart must satisfy.
//!
//! The orchestrator treats the transition algorithm inside a machine as a
//! black box: it hands the adapter one event at a time and receives the
//! post-transition state back. The runtime guarantees `process_event` is
//! never invoked concurrently on the same adapter, so implementations need
//! no locking for their own state beyond cheap interior mutability.
//!
//! Actions that want to talk to other machines record sends on the
//! [`OrchestratedContext`] they are given; those sends are applied by the
//! runtime after the transition commits. An action must never await another
//! machine's response - the context makes that unrepresentable.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::foundation::{ErrorKind, EventEnvelope};
use crate::orchestrator::OrchestratedContext;

/// Errors an adapter may raise while processing an event.
#[derive(Debug, Clone, Error)]
pub enum MachineError {
    /// The action or transition panicked-equivalent: the turn failed but the
    /// machine stays registered and keeps accepting events.
    #[error("Machine fault: {0}")]
    Fault(String),

    /// The machine was stopped; no further events are accepted.
    #[error("Machine is stopped")]
    Stopped,

    /// A typed refusal that is not a fault - for example a circuit breaker
    /// rejecting a probe while one is already in flight. The runtime maps
    /// `kind` straight into the caller's result instead of `MachineFault`.
    #[error("Rejected ({kind}): {message}")]
    Rejected { kind: ErrorKind, message: String },
}

impl MachineError {
    /// Creates a fault from any displayable cause.
    pub fn fault(cause: impl std::fmt::Display) -> Self {
        MachineError::Fault(cause.to_string())
    }

    /// Creates a typed rejection.
    pub fn rejected(kind: ErrorKind, message: impl Into<String>) -> Self {
        MachineError::Rejected {
            kind,
            message: message.into(),
        }
    }

    /// The [`ErrorKind`] this error surfaces as in an event result.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MachineError::Fault(_) => ErrorKind::MachineFault,
            MachineError::Stopped => ErrorKind::Shutdown,
            MachineError::Rejected { kind, .. } => *kind,
        }
    }
}

/// Contract for a hosted statechart instance.
///
/// # Execution guarantees
///
/// - `process_event` is serialized per adapter: at no instant do two
///   transitions execute concurrently on the same machine.
/// - A transition is atomic from the mailbox's point of view; the worker
///   only releases ownership at turn boundaries.
/// - Sends requested through the context are applied after the transition
///   commits, never during it.
///
/// # Example
///
/// ```ignore
/// struct PingMachine {
///     state: Mutex<String>,
/// }
///
/// #[async_trait]
/// impl MachineAdapter for PingMachine {
///     async fn process_event(
///         &self,
///         event: &EventEnvelope,
///         ctx: &OrchestratedContext,
///     ) -> Result<String, MachineError> {
///         if event.event_name == "PING" {
///             ctx.request_send("pong-machine", "PONG", None);
///             *self.state.lock().unwrap() = "done".into();
///         }
///         Ok(self.current_state())
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait MachineAdapter: Send + Sync {
    /// Transitions the machine to its initial configuration.
    ///
    /// Idempotent: starting an already-started machine returns the current
    /// state without side effects.
    async fn start(&self) -> Result<String, MachineError>;

    /// Processes one event and returns the post-transition state as a
    /// dotted path (parallel regions joined by the adapter's delimiter).
    ///
    /// Deferred sends go through `ctx`; the runtime applies them once the
    /// transition has committed.
    async fn process_event(
        &self,
        event: &EventEnvelope,
        ctx: &OrchestratedContext,
    ) -> Result<String, MachineError>;

    /// Snapshot of the current state path.
    fn current_state(&self) -> String;

    /// Finalizes the machine; subsequent `process_event` calls must fail
    /// with [`MachineError::Stopped`].
    async fn stop(&self) -> Result<(), MachineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that trait is object-safe
    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn MachineAdapter) {}

    #[test]
    fn fault_maps_to_machine_fault_kind() {
        assert_eq!(MachineError::fault("boom").kind(), ErrorKind::MachineFault);
    }

    #[test]
    fn stopped_maps_to_shutdown_kind() {
        assert_eq!(MachineError::Stopped.kind(), ErrorKind::Shutdown);
    }

    #[test]
    fn rejection_preserves_its_kind() {
        let err = MachineError::rejected(ErrorKind::BreakerOpen, "probe in flight");
        assert_eq!(err.kind(), ErrorKind::BreakerOpen);
    }
}
