//! Per-machine mailbox with lane-ordered draining.
//!
//! Each hosted machine owns exactly one mailbox with three FIFO lanes:
//!
//! - `self_sends` - deferred sends a machine made to itself; unbounded,
//!   because they originate inside a transition that already owns the
//!   mailbox, and drained before anything else so a micro-step cascade
//!   finishes before new work interleaves.
//! - `priority` - externally submitted events that should overtake the
//!   regular lane (critical control events).
//! - `external` - the regular lane.
//!
//! The priority and external lanes share the bounded capacity; enqueueing
//! past it fails fast so callers see `Backpressure` instead of unbounded
//! memory growth.
//!
//! A mailbox is owned by at most one worker at a time. Ownership is
//! tracked by [`MailboxState`]: a non-empty `Idle` mailbox becomes
//! `Scheduled` (queued on the run-queue), the claiming worker moves it to
//! `Running` for the duration of a turn, and `Closed` mailboxes admit
//! nothing and give their queued dispatches back for failure completion.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::domain::foundation::{EventEnvelope, EventResult, StateMachine};

/// Lifecycle of a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxState {
    /// No queued work and no owner.
    Idle,
    /// Queued on the run-queue, waiting for a worker to claim it.
    Scheduled,
    /// A worker owns the mailbox and is executing a turn.
    Running,
    /// Terminal; admits no new envelopes.
    Closed,
}

impl StateMachine for MailboxState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use MailboxState::*;
        matches!(
            (self, target),
            (Idle, Scheduled)
                | (Scheduled, Running)
                | (Running, Idle)
                | (Running, Scheduled)
                | (Idle, Closed)
                | (Scheduled, Closed)
                | (Running, Closed)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use MailboxState::*;
        match self {
            Idle => vec![Scheduled, Closed],
            Scheduled => vec![Running, Closed],
            Running => vec![Idle, Scheduled, Closed],
            Closed => vec![],
        }
    }
}

/// Which lane an envelope is enqueued on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lane {
    External,
    Priority,
    SelfSend,
}

/// An envelope in flight together with its optional reply slot.
///
/// Responses never travel through a mailbox; completing the slot *is* the
/// response.
pub(crate) struct Dispatch {
    pub envelope: EventEnvelope,
    pub reply: Option<oneshot::Sender<EventResult>>,
}

impl Dispatch {
    pub(crate) fn new(envelope: EventEnvelope, reply: Option<oneshot::Sender<EventResult>>) -> Self {
        Self { envelope, reply }
    }
}

/// Completes a reply slot, ignoring callers that already gave up.
pub(crate) fn complete_reply(reply: Option<oneshot::Sender<EventResult>>, result: EventResult) {
    if let Some(slot) = reply {
        let _ = slot.send(result);
    }
}

/// Outcome of an enqueue attempt.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EnqueueOutcome {
    /// Accepted; the mailbox moved `Idle -> Scheduled` and the caller must
    /// push it onto the run-queue.
    Scheduled,
    /// Accepted; the mailbox was already scheduled or running.
    Queued,
    /// The bounded lanes are at capacity.
    Full,
    /// The mailbox is closed.
    Closed,
}

/// What the worker should do after finishing a turn.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TurnDisposition {
    /// Work remains; put the mailbox back on the run-queue.
    Reschedule,
    /// Empty; the mailbox went back to `Idle`.
    Parked,
    /// The mailbox closed while the turn ran.
    Closed,
}

struct Inner {
    external: VecDeque<Dispatch>,
    priority: VecDeque<Dispatch>,
    self_sends: VecDeque<Dispatch>,
    state: MailboxState,
}

/// Bounded, lane-ordered event buffer for one machine.
pub(crate) struct Mailbox {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Mailbox {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                external: VecDeque::new(),
                priority: VecDeque::new(),
                self_sends: VecDeque::new(),
                state: MailboxState::Idle,
            }),
        }
    }

    /// Enqueues a dispatch on the given lane.
    ///
    /// Self-sends are always admissible; the bounded lanes fail fast at
    /// capacity.
    pub(crate) fn enqueue(&self, dispatch: Dispatch, lane: Lane) -> EnqueueOutcome {
        let mut inner = self.lock();
        if inner.state == MailboxState::Closed {
            return EnqueueOutcome::Closed;
        }
        match lane {
            Lane::SelfSend => inner.self_sends.push_back(dispatch),
            Lane::Priority | Lane::External => {
                if inner.external.len() + inner.priority.len() >= self.capacity {
                    return EnqueueOutcome::Full;
                }
                match lane {
                    Lane::Priority => inner.priority.push_back(dispatch),
                    _ => inner.external.push_back(dispatch),
                }
            }
        }
        if inner.state == MailboxState::Idle {
            inner.state = MailboxState::Scheduled;
            EnqueueOutcome::Scheduled
        } else {
            EnqueueOutcome::Queued
        }
    }

    /// Dequeues the next dispatch: self-sends, then priority, then external.
    pub(crate) fn dequeue(&self) -> Option<Dispatch> {
        let mut inner = self.lock();
        if let Some(dispatch) = inner.self_sends.pop_front() {
            return Some(dispatch);
        }
        if let Some(dispatch) = inner.priority.pop_front() {
            return Some(dispatch);
        }
        inner.external.pop_front()
    }

    /// Whether deferred self-sends are waiting.
    pub(crate) fn has_pending_self(&self) -> bool {
        !self.lock().self_sends.is_empty()
    }

    /// Claims the mailbox for a turn (`Scheduled -> Running`).
    ///
    /// Returns false when the mailbox closed between scheduling and claim,
    /// or on a stale run-queue entry.
    pub(crate) fn begin_turn(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == MailboxState::Scheduled {
            inner.state = MailboxState::Running;
            true
        } else {
            false
        }
    }

    /// Releases the mailbox at the end of a turn.
    pub(crate) fn finish_turn(&self) -> TurnDisposition {
        let mut inner = self.lock();
        match inner.state {
            MailboxState::Closed => TurnDisposition::Closed,
            _ => {
                let has_work = !inner.self_sends.is_empty()
                    || !inner.priority.is_empty()
                    || !inner.external.is_empty();
                if has_work {
                    inner.state = MailboxState::Scheduled;
                    TurnDisposition::Reschedule
                } else {
                    inner.state = MailboxState::Idle;
                    TurnDisposition::Parked
                }
            }
        }
    }

    /// Closes the mailbox and drains everything still queued so the caller
    /// can fail the pending reply slots.
    pub(crate) fn close(&self) -> Vec<Dispatch> {
        let mut inner = self.lock();
        inner.state = MailboxState::Closed;
        let mut drained = Vec::with_capacity(
            inner.self_sends.len() + inner.priority.len() + inner.external.len(),
        );
        drained.extend(inner.self_sends.drain(..));
        drained.extend(inner.priority.drain(..));
        drained.extend(inner.external.drain(..));
        drained
    }

    /// Number of queued dispatches across all lanes.
    pub(crate) fn queued(&self) -> usize {
        let inner = self.lock();
        inner.self_sends.len() + inner.priority.len() + inner.external.len()
    }

    /// Current lifecycle state.
    pub(crate) fn state(&self) -> MailboxState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("Mailbox: inner lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::MachineId;

    fn dispatch(name: &str) -> Dispatch {
        let id = MachineId::new("m1").unwrap();
        Dispatch::new(EventEnvelope::external(id.clone(), id, name, None), None)
    }

    fn self_dispatch(name: &str) -> Dispatch {
        let id = MachineId::new("m1").unwrap();
        Dispatch::new(EventEnvelope::self_send(id, name, None), None)
    }

    #[test]
    fn first_enqueue_schedules_the_mailbox() {
        let mailbox = Mailbox::new(8);
        assert_eq!(mailbox.enqueue(dispatch("A"), Lane::External), EnqueueOutcome::Scheduled);
        assert_eq!(mailbox.enqueue(dispatch("B"), Lane::External), EnqueueOutcome::Queued);
        assert_eq!(mailbox.state(), MailboxState::Scheduled);
    }

    #[test]
    fn dequeue_prefers_self_sends_then_priority() {
        let mailbox = Mailbox::new(8);
        mailbox.enqueue(dispatch("external"), Lane::External);
        mailbox.enqueue(dispatch("critical"), Lane::Priority);
        mailbox.enqueue(self_dispatch("cascade"), Lane::SelfSend);

        assert_eq!(mailbox.dequeue().unwrap().envelope.event_name, "cascade");
        assert_eq!(mailbox.dequeue().unwrap().envelope.event_name, "critical");
        assert_eq!(mailbox.dequeue().unwrap().envelope.event_name, "external");
        assert!(mailbox.dequeue().is_none());
    }

    #[test]
    fn fifo_order_within_a_lane() {
        let mailbox = Mailbox::new(8);
        for name in ["E1", "E2", "E3"] {
            mailbox.enqueue(dispatch(name), Lane::External);
        }
        assert_eq!(mailbox.dequeue().unwrap().envelope.event_name, "E1");
        assert_eq!(mailbox.dequeue().unwrap().envelope.event_name, "E2");
        assert_eq!(mailbox.dequeue().unwrap().envelope.event_name, "E3");
    }

    #[test]
    fn bounded_lanes_fail_fast_at_capacity() {
        let mailbox = Mailbox::new(2);
        assert_eq!(mailbox.enqueue(dispatch("A"), Lane::External), EnqueueOutcome::Scheduled);
        assert_eq!(mailbox.enqueue(dispatch("B"), Lane::Priority), EnqueueOutcome::Queued);
        assert_eq!(mailbox.enqueue(dispatch("C"), Lane::External), EnqueueOutcome::Full);
    }

    #[test]
    fn self_sends_ignore_capacity() {
        let mailbox = Mailbox::new(1);
        mailbox.enqueue(dispatch("A"), Lane::External);
        assert_eq!(mailbox.enqueue(self_dispatch("S1"), Lane::SelfSend), EnqueueOutcome::Queued);
        assert_eq!(mailbox.enqueue(self_dispatch("S2"), Lane::SelfSend), EnqueueOutcome::Queued);
        assert_eq!(mailbox.queued(), 3);
    }

    #[test]
    fn closed_mailbox_admits_nothing() {
        let mailbox = Mailbox::new(8);
        mailbox.enqueue(dispatch("A"), Lane::External);
        let drained = mailbox.close();

        assert_eq!(drained.len(), 1);
        assert_eq!(mailbox.enqueue(dispatch("B"), Lane::External), EnqueueOutcome::Closed);
        assert_eq!(mailbox.state(), MailboxState::Closed);
    }

    #[test]
    fn turn_lifecycle_round_trip() {
        let mailbox = Mailbox::new(8);
        mailbox.enqueue(dispatch("A"), Lane::External);

        assert!(mailbox.begin_turn());
        assert_eq!(mailbox.state(), MailboxState::Running);
        mailbox.dequeue();
        assert_eq!(mailbox.finish_turn(), TurnDisposition::Parked);
        assert_eq!(mailbox.state(), MailboxState::Idle);
    }

    #[test]
    fn finish_turn_reschedules_leftover_work() {
        let mailbox = Mailbox::new(8);
        mailbox.enqueue(dispatch("A"), Lane::External);
        mailbox.enqueue(dispatch("B"), Lane::External);

        assert!(mailbox.begin_turn());
        mailbox.dequeue();
        assert_eq!(mailbox.finish_turn(), TurnDisposition::Reschedule);
        assert_eq!(mailbox.state(), MailboxState::Scheduled);
    }

    #[test]
    fn begin_turn_fails_on_stale_entry() {
        let mailbox = Mailbox::new(8);
        assert!(!mailbox.begin_turn());
    }

    #[test]
    fn mailbox_state_transitions_are_modeled() {
        assert!(MailboxState::Idle.can_transition_to(&MailboxState::Scheduled));
        assert!(MailboxState::Running.can_transition_to(&MailboxState::Idle));
        assert!(!MailboxState::Closed.can_transition_to(&MailboxState::Idle));
        assert!(MailboxState::Closed.is_terminal());
    }
}
