//! OrchestratedContext - the only surface an action sees.
//!
//! Actions never send directly. They record intents on the context and the
//! worker applies them after the transition commits: self-sends go back
//! into the machine's own self lane, sends and broadcasts are routed
//! through the orchestrator. Because the context holds no orchestrator
//! handle and exposes nothing awaitable, an action cannot take another
//! mailbox's ownership or block on another machine - the deadlock pattern
//! of re-entrant sends is unrepresentable.

use serde_json::Value as JsonValue;
use std::sync::Mutex;

use crate::domain::foundation::MachineId;

/// A deferred send recorded during a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxEntry {
    /// Fire-and-forget send to another machine, applied post-commit.
    Send {
        target: String,
        event_name: String,
        payload: Option<JsonValue>,
    },
    /// Send to the own machine; drained before the next external event.
    SelfSend {
        event_name: String,
        payload: Option<JsonValue>,
    },
    /// Fan-out to the machine's channel group, excluding itself.
    Broadcast {
        event_name: String,
        payload: Option<JsonValue>,
    },
}

/// Action-side handle that collects deferred sends into an outbox.
///
/// One context exists per processed event; the worker drains it after the
/// adapter returns. All operations are non-blocking records.
#[derive(Debug)]
pub struct OrchestratedContext {
    machine_id: MachineId,
    outbox: Mutex<Vec<OutboxEntry>>,
}

impl OrchestratedContext {
    pub(crate) fn new(machine_id: MachineId) -> Self {
        Self {
            machine_id,
            outbox: Mutex::new(Vec::new()),
        }
    }

    /// Id of the machine whose transition is executing.
    pub fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }

    /// Records a fire-and-forget send to `target`, applied after the
    /// transition commits.
    pub fn request_send(
        &self,
        target: impl Into<String>,
        event_name: impl Into<String>,
        payload: Option<JsonValue>,
    ) {
        self.push(OutboxEntry::Send {
            target: target.into(),
            event_name: event_name.into(),
            payload,
        });
    }

    /// Records a send to the own machine; self-sends drain before any new
    /// external event interleaves.
    pub fn request_self_send(&self, event_name: impl Into<String>, payload: Option<JsonValue>) {
        self.push(OutboxEntry::SelfSend {
            event_name: event_name.into(),
            payload,
        });
    }

    /// Records a broadcast to the machine's channel group (excluding the
    /// machine itself).
    pub fn request_broadcast(&self, event_name: impl Into<String>, payload: Option<JsonValue>) {
        self.push(OutboxEntry::Broadcast {
            event_name: event_name.into(),
            payload,
        });
    }

    /// Drains the recorded entries; called by the worker post-commit.
    pub(crate) fn take_entries(&self) -> Vec<OutboxEntry> {
        std::mem::take(&mut *self.outbox.lock().expect("OrchestratedContext: outbox lock poisoned"))
    }

    fn push(&self, entry: OutboxEntry) {
        self.outbox
            .lock()
            .expect("OrchestratedContext: outbox lock poisoned")
            .push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> OrchestratedContext {
        OrchestratedContext::new(MachineId::new("m1").unwrap())
    }

    #[test]
    fn records_entries_in_order() {
        let ctx = ctx();
        ctx.request_send("m2", "PING", None);
        ctx.request_self_send("STEP", Some(json!({"n": 1})));
        ctx.request_broadcast("NOTIFY", None);

        let entries = ctx.take_entries();
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0], OutboxEntry::Send { .. }));
        assert!(matches!(entries[1], OutboxEntry::SelfSend { .. }));
        assert!(matches!(entries[2], OutboxEntry::Broadcast { .. }));
    }

    #[test]
    fn take_entries_drains_the_outbox() {
        let ctx = ctx();
        ctx.request_self_send("STEP", None);

        assert_eq!(ctx.take_entries().len(), 1);
        assert!(ctx.take_entries().is_empty());
    }

    #[test]
    fn context_exposes_the_executing_machine() {
        let ctx = ctx();
        assert_eq!(ctx.machine_id().as_str(), "m1");
    }
}
