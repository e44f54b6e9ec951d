//! The hosted breaker machine.
//!
//! All breaker state lives here and is mutated exclusively inside
//! `process_event`, which the orchestrator serializes. Fields are atomics
//! so stats reads stay lock-free; plain load/store suffices because the
//! single-writer guarantee removes write races.
//!
//! States form the statechart `closed | open | halfOpen.(ready|probing)`;
//! the probing child state is what admits exactly one probe - a second
//! `PROBE_ATTEMPT` while probing is a typed rejection, not a fault.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use tokio::sync::broadcast;
use tracing::info;

use crate::domain::foundation::{ErrorKind, EventEnvelope, Timestamp};
use crate::orchestrator::OrchestratedContext;
use crate::ports::{MachineAdapter, MachineError};

use super::state::{CircuitBreakerConfig, CircuitBreakerStats, CircuitState, StateTransition};

/// Events the breaker machine understands.
pub(crate) const EVENT_FAILURE: &str = "FAILURE";
pub(crate) const EVENT_SUCCESS: &str = "SUCCESS";
pub(crate) const EVENT_TIMER: &str = "TIMER";
pub(crate) const EVENT_PROBE_ATTEMPT: &str = "PROBE_ATTEMPT";
pub(crate) const EVENT_PROBE_SUCCESS: &str = "PROBE_SUCCESS";
pub(crate) const EVENT_PROBE_FAILURE: &str = "PROBE_FAILURE";
pub(crate) const EVENT_RESET: &str = "RESET";
pub(crate) const EVENT_CONFIGURE: &str = "CONFIGURE";

/// Internal refinement of [`CircuitState`]; `HalfOpen` splits into child
/// states so probe admission is itself a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Closed = 0,
    Open = 1,
    HalfOpenReady = 2,
    HalfOpenProbing = 3,
}

impl Node {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Node::Open,
            2 => Node::HalfOpenReady,
            3 => Node::HalfOpenProbing,
            _ => Node::Closed,
        }
    }

    fn public(self) -> CircuitState {
        match self {
            Node::Closed => CircuitState::Closed,
            Node::Open => CircuitState::Open,
            Node::HalfOpenReady | Node::HalfOpenProbing => CircuitState::HalfOpen,
        }
    }

    fn path(self) -> &'static str {
        match self {
            Node::Closed => "closed",
            Node::Open => "open",
            Node::HalfOpenReady => "halfOpen.ready",
            Node::HalfOpenProbing => "halfOpen.probing",
        }
    }
}

/// Hosted statechart backing an `OrchestratedCircuitBreaker`.
pub(crate) struct BreakerMachine {
    name: String,
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    times_opened: AtomicU64,
    opened_at_ms: AtomicU64,
    failure_threshold: AtomicU32,
    open_duration_ms: AtomicU64,
    stopped: AtomicBool,
    transitions: broadcast::Sender<StateTransition>,
}

impl BreakerMachine {
    pub(crate) fn new(
        name: impl Into<String>,
        config: &CircuitBreakerConfig,
        transitions: broadcast::Sender<StateTransition>,
    ) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(Node::Closed as u8),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            times_opened: AtomicU64::new(0),
            opened_at_ms: AtomicU64::new(0),
            failure_threshold: AtomicU32::new(config.failure_threshold),
            open_duration_ms: AtomicU64::new(config.open_duration.as_millis() as u64),
            stopped: AtomicBool::new(false),
            transitions,
        }
    }

    /// Public state snapshot; lock-free, may trail an in-flight turn.
    pub(crate) fn state(&self) -> CircuitState {
        self.node().public()
    }

    /// Open-cycle counter; doubles as the timer generation so stale
    /// open-duration timers from an earlier cycle are ignored.
    pub(crate) fn times_opened(&self) -> u64 {
        self.times_opened.load(Ordering::Relaxed)
    }

    pub(crate) fn open_duration_ms(&self) -> u64 {
        self.open_duration_ms.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot(&self) -> CircuitBreakerStats {
        let state = self.state();
        let opened_at_ms = self.opened_at_ms.load(Ordering::Relaxed);
        let remaining_open_ms = if state == CircuitState::Open && opened_at_ms > 0 {
            (opened_at_ms + self.open_duration_ms())
                .saturating_sub(Timestamp::now().as_unix_millis())
        } else {
            0
        };
        CircuitBreakerStats {
            name: self.name.clone(),
            state,
            failure_count: self.failure_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            opened_at: (opened_at_ms > 0).then(|| Timestamp::from_unix_millis(opened_at_ms)),
            remaining_open_ms,
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            times_opened: self.times_opened.load(Ordering::Relaxed),
        }
    }

    fn node(&self) -> Node {
        Node::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_node(&self, to: Node, reason: &str) {
        let from = self.node();
        self.state.store(to as u8, Ordering::SeqCst);
        let (old, new) = (from.public(), to.public());
        if old != new {
            info!(breaker = %self.name, from = %old, to = %new, reason, "circuit state changed");
            let _ = self.transitions.send(StateTransition {
                from: old,
                to: new,
                reason: reason.to_string(),
            });
        }
    }

    fn trip_open(&self, reason: &str) {
        self.opened_at_ms
            .store(Timestamp::now().as_unix_millis(), Ordering::Relaxed);
        self.times_opened.fetch_add(1, Ordering::Relaxed);
        self.set_node(Node::Open, reason);
    }

    fn close(&self, reason: &str) {
        self.failure_count.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.opened_at_ms.store(0, Ordering::Relaxed);
        self.set_node(Node::Closed, reason);
    }

    fn on_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        if self.node() != Node::Closed {
            // Late failure report from before a transition; counted, no
            // state change.
            return;
        }
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.failure_threshold.load(Ordering::Relaxed) {
            self.trip_open("failure threshold reached");
        }
    }

    fn on_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        if self.node() == Node::Closed {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_timer(&self, envelope: &EventEnvelope) {
        if self.node() != Node::Open {
            return;
        }
        // Only the timer armed for the current open cycle may half-open
        // the circuit; earlier cycles' timers are stale.
        let cycle = envelope
            .payload
            .as_ref()
            .and_then(|payload| payload.get("cycle"))
            .and_then(|value| value.as_u64());
        if cycle != Some(self.times_opened()) {
            return;
        }
        self.set_node(Node::HalfOpenReady, "open duration elapsed");
    }

    fn on_probe_attempt(&self) -> Result<(), MachineError> {
        match self.node() {
            Node::HalfOpenReady => {
                self.set_node(Node::HalfOpenProbing, "probe admitted");
                Ok(())
            }
            Node::HalfOpenProbing => Err(MachineError::rejected(
                ErrorKind::BreakerOpen,
                format!("circuit breaker '{}' already has a probe in flight", self.name),
            )),
            Node::Open => Err(MachineError::rejected(
                ErrorKind::BreakerOpen,
                format!("circuit breaker '{}' is open", self.name),
            )),
            // A probe attempt racing a close is harmless; admit it as a
            // normal closed-state call.
            Node::Closed => Ok(()),
        }
    }

    fn on_probe_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        if self.node() == Node::HalfOpenProbing {
            self.close("probe succeeded");
        }
    }

    fn on_probe_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        if self.node() == Node::HalfOpenProbing {
            self.trip_open("probe failed");
        }
    }

    fn on_configure(&self, envelope: &EventEnvelope) {
        let Some(payload) = envelope.payload.as_ref() else { return };
        if let Some(threshold) = payload.get("failure_threshold").and_then(|v| v.as_u64()) {
            self.failure_threshold.store(threshold as u32, Ordering::Relaxed);
        }
        if let Some(duration) = payload.get("open_duration_ms").and_then(|v| v.as_u64()) {
            self.open_duration_ms.store(duration, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl MachineAdapter for BreakerMachine {
    async fn start(&self) -> Result<String, MachineError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(MachineError::Stopped);
        }
        Ok(self.node().path().to_string())
    }

    async fn process_event(
        &self,
        event: &EventEnvelope,
        _ctx: &OrchestratedContext,
    ) -> Result<String, MachineError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(MachineError::Stopped);
        }
        match event.event_name.as_str() {
            EVENT_FAILURE => self.on_failure(),
            EVENT_SUCCESS => self.on_success(),
            EVENT_TIMER => self.on_timer(event),
            EVENT_PROBE_ATTEMPT => self.on_probe_attempt()?,
            EVENT_PROBE_SUCCESS => self.on_probe_success(),
            EVENT_PROBE_FAILURE => self.on_probe_failure(),
            EVENT_RESET => self.close("reset requested"),
            EVENT_CONFIGURE => self.on_configure(event),
            // Unknown events select no transition and are ignored.
            _ => {}
        }
        Ok(self.node().path().to_string())
    }

    fn current_state(&self) -> String {
        self.node().path().to_string()
    }

    async fn stop(&self) -> Result<(), MachineError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}
