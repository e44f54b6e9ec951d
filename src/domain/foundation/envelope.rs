//! Event envelope - the immutable unit of routing.
//!
//! An envelope records who sent what to whom, plus the submission time, an
//! optional processing deadline, and the delivery kind. Envelopes are built
//! once and never mutated; workers and mailboxes only move them around.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Instant;

use super::{CorrelationId, EventId, MachineId, Timestamp};

/// Delivery kind of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    /// Fire-and-forget send from outside a transition.
    External,
    /// Deferred send from a machine to itself; drained before external events.
    SelfSend,
    /// Group-wide fan-out, excluding the source machine.
    Broadcast,
    /// A send whose caller awaits an [`super::EventResult`].
    Request,
    /// Reserved for the wire taxonomy. Responses never travel through a
    /// mailbox: the worker completes the request's reply slot directly
    /// after the transition commits, so no `Response` envelope is routed.
    Response,
}

/// Immutable record of a routed event.
///
/// Invariants, enforced by the constructors:
/// - `kind == SelfSend` implies `source == target`
/// - `kind == Request` implies `correlation_id` is set
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique id of this envelope.
    pub id: EventId,
    /// Machine (or external caller) that submitted the event.
    pub source: MachineId,
    /// Machine the event is routed to.
    pub target: MachineId,
    /// Statechart event name, e.g. `PING` or `done.invoke.fetch`.
    pub event_name: String,
    /// Opaque payload; carriers never interpret it.
    pub payload: Option<JsonValue>,
    /// When the envelope was submitted.
    pub submitted_at: Timestamp,
    /// Processing deadline; expired envelopes are dropped with `Timeout`
    /// before dispatch. Runtime-only, not serialized.
    #[serde(skip)]
    pub deadline: Option<Instant>,
    /// Delivery kind.
    pub kind: EventKind,
    /// Correlates a request with its reply slot.
    pub correlation_id: Option<CorrelationId>,
}

impl EventEnvelope {
    /// Creates a fire-and-forget external envelope.
    pub fn external(
        source: MachineId,
        target: MachineId,
        event_name: impl Into<String>,
        payload: Option<JsonValue>,
    ) -> Self {
        Self::build(source, target, event_name, payload, EventKind::External, None)
    }

    /// Creates a request envelope with a fresh correlation id.
    pub fn request(
        source: MachineId,
        target: MachineId,
        event_name: impl Into<String>,
        payload: Option<JsonValue>,
    ) -> Self {
        Self::build(
            source,
            target,
            event_name,
            payload,
            EventKind::Request,
            Some(CorrelationId::new()),
        )
    }

    /// Creates a self-send envelope; source and target are the same machine
    /// by construction.
    pub fn self_send(
        machine: MachineId,
        event_name: impl Into<String>,
        payload: Option<JsonValue>,
    ) -> Self {
        Self::build(
            machine.clone(),
            machine,
            event_name,
            payload,
            EventKind::SelfSend,
            None,
        )
    }

    /// Creates one recipient's envelope of a group broadcast.
    pub fn broadcast(
        source: MachineId,
        target: MachineId,
        event_name: impl Into<String>,
        payload: Option<JsonValue>,
    ) -> Self {
        Self::build(source, target, event_name, payload, EventKind::Broadcast, None)
    }

    /// Returns a copy carrying the given processing deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Whether the processing deadline has already passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }

    fn build(
        source: MachineId,
        target: MachineId,
        event_name: impl Into<String>,
        payload: Option<JsonValue>,
        kind: EventKind,
        correlation_id: Option<CorrelationId>,
    ) -> Self {
        debug_assert!(
            kind != EventKind::SelfSend || source == target,
            "self-send envelopes must target their source"
        );
        Self {
            id: EventId::new(),
            source,
            target,
            event_name: event_name.into(),
            payload,
            submitted_at: Timestamp::now(),
            deadline: None,
            kind,
            correlation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn id(s: &str) -> MachineId {
        MachineId::new(s).unwrap()
    }

    #[test]
    fn self_send_targets_source() {
        let env = EventEnvelope::self_send(id("m1"), "TICK", None);
        assert_eq!(env.source, env.target);
        assert_eq!(env.kind, EventKind::SelfSend);
        assert!(env.correlation_id.is_none());
    }

    #[test]
    fn request_carries_correlation_id() {
        let env = EventEnvelope::request(id("caller"), id("m1"), "PING", Some(json!({"n": 1})));
        assert_eq!(env.kind, EventKind::Request);
        assert!(env.correlation_id.is_some());
    }

    #[test]
    fn expiry_respects_deadline() {
        let now = Instant::now();
        let env = EventEnvelope::external(id("a"), id("b"), "GO", None)
            .with_deadline(now + Duration::from_millis(50));

        assert!(!env.is_expired(now));
        assert!(env.is_expired(now + Duration::from_millis(51)));
    }

    #[test]
    fn envelope_without_deadline_never_expires() {
        let env = EventEnvelope::external(id("a"), id("b"), "GO", None);
        assert!(!env.is_expired(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn envelope_serializes_without_deadline_field() {
        let env = EventEnvelope::external(id("a"), id("b"), "GO", None);
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("deadline").is_none());
        assert_eq!(json["event_name"], "GO");
    }
}
