//! Worker loop and turn execution.
//!
//! Workers pull runnable mailboxes off the shared run-queue and execute
//! one turn at a time: a single dequeued event plus the self-send cascade
//! it triggers, capped by `max_micro_steps_per_turn`. A transition is
//! atomic from the mailbox's perspective; the worker releases ownership
//! only at turn boundaries, so awaits inside an action suspend this
//! worker without blocking other machines.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error};

use crate::domain::foundation::{ErrorKind, EventResult};
use crate::ports::MachineError;

use super::context::OrchestratedContext;
use super::mailbox::{complete_reply, TurnDisposition};
use super::registry::MachineRecord;
use super::OrchestratorInner;

pub(crate) async fn worker_loop(
    inner: Arc<OrchestratorInner>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let next = {
            let mut queue = inner.run_queue_rx.lock().await;
            tokio::select! {
                _ = shutdown.changed() => None,
                id = queue.recv() => id,
            }
        };
        // None on shutdown signal or a closed run-queue; both end the loop.
        let Some(machine_id) = next else { break };
        let Some(record) = inner.registry.lookup(&machine_id) else {
            // Unregistered between scheduling and claim (group release).
            continue;
        };
        run_turn(&inner, &record).await;
    }
}

/// Executes one turn: claim the mailbox, process one event and its
/// self-send cascade, apply outboxes, release.
async fn run_turn(inner: &Arc<OrchestratorInner>, record: &Arc<MachineRecord>) {
    if !record.mailbox.begin_turn() {
        return;
    }
    let max_steps = inner.config.max_micro_steps_per_turn;
    let mut steps = 0;
    while steps < max_steps {
        let Some(dispatch) = record.mailbox.dequeue() else { break };
        steps += 1;
        let envelope = dispatch.envelope;
        let reply = dispatch.reply;

        // Pre-dispatch deadline check; expired events are dropped without
        // touching the adapter. A deadline passing *during* processing is
        // observed by the caller's own timeout, after the transition
        // commits - transitions are never interrupted mid-flight.
        if envelope.is_expired(Instant::now()) {
            inner.counters.record_failed();
            record.counters.record_failed();
            if inner.config.enable_logging {
                debug!(machine_id = %record.id, event = %envelope.event_name,
                    "event expired before dispatch");
            }
            complete_reply(
                reply,
                EventResult::failure(
                    ErrorKind::Timeout,
                    format!("event '{}' expired before dispatch", envelope.event_name),
                ),
            );
            continue;
        }

        let ctx = OrchestratedContext::new(record.id.clone());
        let outcome = record.adapter.process_event(&envelope, &ctx).await;
        let entries = ctx.take_entries();
        match outcome {
            Ok(new_state) => {
                inner.apply_outbox(record, entries);
                inner.counters.record_processed();
                record.counters.record_processed();
                if inner.config.enable_logging {
                    debug!(machine_id = %record.id, event = %envelope.event_name,
                        new_state = %new_state, "event processed");
                }
                complete_reply(reply, EventResult::ok(new_state));
            }
            Err(err) => {
                // The transition did not commit; its outbox is discarded.
                inner.counters.record_failed();
                record.counters.record_failed();
                if matches!(err, MachineError::Fault(_)) {
                    error!(machine_id = %record.id, event = %envelope.event_name,
                        error = %err, "machine fault isolated to this turn");
                }
                complete_reply(reply, EventResult::failure(err.kind(), err.to_string()));
            }
        }

        // A turn continues only through its own self-send cascade; new
        // external events wait for the next turn.
        if !record.mailbox.has_pending_self() {
            break;
        }
    }
    if record.mailbox.finish_turn() == TurnDisposition::Reschedule {
        inner.schedule(record.id.clone());
    }
}
