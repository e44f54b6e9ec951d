//! Foundation types shared across the crate.
//!
//! - Strongly-typed identifiers ([`MachineId`], [`GroupId`], [`EventId`],
//!   [`CorrelationId`])
//! - [`Timestamp`] value object (always UTC)
//! - [`EventEnvelope`] and [`EventKind`] - the immutable unit of routing
//! - [`EventResult`] / [`EventError`] - the typed outcome of a send
//! - [`ErrorKind`] / [`OrchestratorError`] - the error taxonomy
//! - [`StateMachine`] - validated-transition trait for status enums

mod envelope;
mod errors;
mod ids;
mod result;
mod state_machine;
mod timestamp;

pub use envelope::{EventEnvelope, EventKind};
pub use errors::{ErrorKind, OrchestratorError, ValidationError};
pub use ids::{CorrelationId, EventId, GroupId, MachineId};
pub use result::{EventError, EventResult};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
