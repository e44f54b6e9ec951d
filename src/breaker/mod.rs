//! OrchestratedCircuitBreaker - a deadlock-free fault detector hosted as
//! a state machine.
//!
//! The breaker's statechart (`closed | open | halfOpen.(ready|probing)`)
//! runs inside the orchestrator, so every mutation - failures, successes,
//! probe admission, the open-duration timer, even configuration changes -
//! travels as an event and is serialized with everything else touching the
//! machine. There are no read/write locks to order wrongly, and a
//! configuration update is itself an event, so it always takes effect on
//! the next evaluated failure.
//!
//! # Example
//!
//! ```ignore
//! let breaker = OrchestratedCircuitBreaker::with_config(
//!     "payments",
//!     &orchestrator,
//!     CircuitBreakerConfig::default().with_failure_threshold(3),
//! )?;
//! breaker.start().await?;
//!
//! match breaker.execute(charge_card(order)).await {
//!     Ok(receipt) => ...,
//!     Err(ExecuteError::Rejected { .. }) => ...,   // open circuit, backoff
//!     Err(ExecuteError::Operation(err)) => ...,    // failure was recorded
//! }
//! ```

mod machine;
mod state;

pub use state::{CircuitBreakerConfig, CircuitBreakerStats, CircuitState, StateTransition};

use serde_json::{json, Value as JsonValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::foundation::{EventResult, MachineId, OrchestratorError};
use crate::orchestrator::EventBusOrchestrator;

use machine::{
    BreakerMachine, EVENT_CONFIGURE, EVENT_FAILURE, EVENT_PROBE_ATTEMPT, EVENT_PROBE_FAILURE,
    EVENT_PROBE_SUCCESS, EVENT_RESET, EVENT_SUCCESS, EVENT_TIMER,
};

/// Failure of an [`OrchestratedCircuitBreaker::execute`] call.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    /// The breaker refused the call without running the operation.
    #[error("circuit breaker '{name}' is open")]
    Rejected { name: String },

    /// The half-open probe exceeded the configured probe timeout; the
    /// failure was recorded and the circuit re-opened.
    #[error("circuit breaker '{name}' probe timed out")]
    ProbeTimeout { name: String },

    /// The operation ran and failed. The failure was recorded before the
    /// error was handed back.
    #[error("operation failed: {0}")]
    Operation(E),
}

impl<E> ExecuteError<E> {
    /// Whether the call was rejected without running.
    pub fn is_rejected(&self) -> bool {
        matches!(self, ExecuteError::Rejected { .. })
    }
}

/// Three-state fault detector driven entirely through orchestrator events.
///
/// Cheap to clone via `Arc` externally; the breaker itself holds only
/// handles. Dropping the value does not unregister the hosted machine -
/// the orchestrator (or its channel group) owns that lifecycle.
pub struct OrchestratedCircuitBreaker {
    name: String,
    machine_id: MachineId,
    orchestrator: EventBusOrchestrator,
    machine: Arc<BreakerMachine>,
    transitions: broadcast::Sender<StateTransition>,
    probe_timeout: Option<Duration>,
}

impl OrchestratedCircuitBreaker {
    /// Creates a breaker with default configuration and registers its
    /// machine as `breaker-<name>`.
    pub fn new(
        name: &str,
        orchestrator: &EventBusOrchestrator,
    ) -> Result<Self, OrchestratorError> {
        Self::with_config(name, orchestrator, CircuitBreakerConfig::default())
    }

    /// Creates a breaker with explicit configuration.
    pub fn with_config(
        name: &str,
        orchestrator: &EventBusOrchestrator,
        config: CircuitBreakerConfig,
    ) -> Result<Self, OrchestratorError> {
        let (transitions, _) = broadcast::channel(64);
        let machine = Arc::new(BreakerMachine::new(name, &config, transitions.clone()));
        let machine_id =
            orchestrator.register_machine(&format!("breaker-{}", name), machine.clone())?;
        Ok(Self {
            name: name.to_string(),
            machine_id,
            orchestrator: orchestrator.clone(),
            machine,
            transitions,
            probe_timeout: config.half_open_probe_timeout,
        })
    }

    /// Starts the hosted machine (initial state `closed`).
    pub async fn start(&self) -> Result<String, OrchestratorError> {
        self.orchestrator.start_machine(self.machine_id.as_str()).await
    }

    /// The breaker's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the hosted machine.
    pub fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }

    /// Lock-free snapshot of the public state (may trail an in-flight
    /// turn).
    pub fn state(&self) -> CircuitState {
        self.machine.state()
    }

    /// Lock-free counters snapshot.
    pub fn stats(&self) -> CircuitBreakerStats {
        self.machine.snapshot()
    }

    /// Subscribes to public state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// Records a successful call.
    pub async fn record_success(&self) -> EventResult {
        self.drive(EVENT_SUCCESS, None).await
    }

    /// Records a failed call; trips the circuit when the threshold is
    /// reached and arms the open-duration timer.
    pub async fn record_failure(&self) -> EventResult {
        let result = self.drive(EVENT_FAILURE, None).await;
        self.arm_timer_if_opened(&result);
        result
    }

    /// Returns the circuit to `closed` and zeroes the window counters.
    pub async fn reset(&self) -> EventResult {
        self.drive(EVENT_RESET, None).await
    }

    /// Updates configuration through the machine itself, so the change is
    /// serialized with the breaker's other events.
    pub async fn configure(
        &self,
        failure_threshold: Option<u32>,
        open_duration: Option<Duration>,
    ) -> EventResult {
        let mut payload = serde_json::Map::new();
        if let Some(threshold) = failure_threshold {
            payload.insert("failure_threshold".into(), json!(threshold));
        }
        if let Some(duration) = open_duration {
            payload.insert("open_duration_ms".into(), json!(duration.as_millis() as u64));
        }
        self.drive(EVENT_CONFIGURE, Some(JsonValue::Object(payload))).await
    }

    /// Runs `operation` under the breaker.
    ///
    /// - `closed`: the operation runs; its outcome is recorded.
    /// - `open`: rejected immediately with [`ExecuteError::Rejected`].
    /// - `halfOpen`: at most one caller is admitted as the probe (the
    ///   machine serializes admission, so exactly one of any number of
    ///   concurrent callers wins); the probe's outcome closes or re-opens
    ///   the circuit. Everyone else is rejected.
    ///
    /// The operation's own error is always handed back after recording, so
    /// caller-side error handling keeps working.
    pub async fn execute<T, E, Fut>(&self, operation: Fut) -> Result<T, ExecuteError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        match self.machine.state() {
            CircuitState::Open => Err(ExecuteError::Rejected {
                name: self.name.clone(),
            }),
            CircuitState::HalfOpen => {
                let admitted = self.drive(EVENT_PROBE_ATTEMPT, None).await;
                if !admitted.success {
                    return Err(ExecuteError::Rejected {
                        name: self.name.clone(),
                    });
                }
                let outcome = if let Some(timeout) = self.probe_timeout {
                    match tokio::time::timeout(timeout, operation).await {
                        Ok(inner) => inner,
                        Err(_) => {
                            let failed = self.drive(EVENT_PROBE_FAILURE, None).await;
                            self.arm_timer_if_opened(&failed);
                            return Err(ExecuteError::ProbeTimeout {
                                name: self.name.clone(),
                            });
                        }
                    }
                } else {
                    operation.await
                };
                match outcome {
                    Ok(value) => {
                        self.drive(EVENT_PROBE_SUCCESS, None).await;
                        Ok(value)
                    }
                    Err(err) => {
                        let failed = self.drive(EVENT_PROBE_FAILURE, None).await;
                        self.arm_timer_if_opened(&failed);
                        Err(ExecuteError::Operation(err))
                    }
                }
            }
            CircuitState::Closed => match operation.await {
                Ok(value) => {
                    self.record_success().await;
                    Ok(value)
                }
                Err(err) => {
                    self.record_failure().await;
                    Err(ExecuteError::Operation(err))
                }
            },
        }
    }

    async fn drive(&self, event: &str, payload: Option<JsonValue>) -> EventResult {
        self.orchestrator
            .send_event(self.machine_id.as_str(), self.machine_id.as_str(), event, payload)
            .await
    }

    /// Arms the open-duration timer as a delayed self-send carrying the
    /// open-cycle generation, so timers from an earlier cycle are ignored
    /// by the machine.
    fn arm_timer_if_opened(&self, result: &EventResult) {
        if result.new_state.as_deref() != Some("open") {
            return;
        }
        let cycle = self.machine.times_opened();
        let delay = Duration::from_millis(self.machine.open_duration_ms());
        self.orchestrator.send_after(
            delay,
            self.machine_id.as_str(),
            self.machine_id.as_str(),
            EVENT_TIMER,
            Some(json!({ "cycle": cycle })),
        );
    }
}

impl std::fmt::Debug for OrchestratedCircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratedCircuitBreaker")
            .field("name", &self.name)
            .field("machine_id", &self.machine_id)
            .field("state", &self.machine.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;

    async fn breaker(threshold: u32, open_ms: u64) -> (EventBusOrchestrator, OrchestratedCircuitBreaker) {
        let orchestrator = EventBusOrchestrator::new(OrchestratorConfig::default());
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(threshold)
            .with_open_duration(Duration::from_millis(open_ms));
        let breaker = OrchestratedCircuitBreaker::with_config("unit", &orchestrator, config).unwrap();
        breaker.start().await.unwrap();
        (orchestrator, breaker)
    }

    #[tokio::test]
    async fn successes_and_failures_accumulate_while_closed() {
        let (orchestrator, breaker) = breaker(5, 10_000).await;

        breaker.record_success().await;
        breaker.record_failure().await;

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn open_breaker_rejects_execute() {
        let (orchestrator, breaker) = breaker(1, 10_000).await;
        breaker.record_failure().await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let result: Result<(), ExecuteError<String>> =
            breaker.execute(async { Ok(()) }).await;
        assert!(matches!(result, Err(ExecuteError::Rejected { .. })));
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn closed_execute_records_operation_outcome() {
        let (orchestrator, breaker) = breaker(5, 10_000).await;

        let ok: Result<u32, ExecuteError<String>> = breaker.execute(async { Ok(42) }).await;
        assert_eq!(ok.unwrap(), 42);

        let err: Result<u32, ExecuteError<String>> =
            breaker.execute(async { Err("downstream 503".to_string()) }).await;
        assert!(matches!(err, Err(ExecuteError::Operation(ref msg)) if msg == "downstream 503"));

        let stats = breaker.stats();
        assert_eq!(stats.total_successes, 1);
        assert_eq!(stats.total_failures, 1);
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn remaining_open_ms_counts_down() {
        let (orchestrator, breaker) = breaker(1, 5_000).await;
        breaker.record_failure().await;

        let stats = breaker.stats();
        assert!(stats.remaining_open_ms > 0);
        assert!(stats.remaining_open_ms <= 5_000);
        orchestrator.stop().await;
    }
}
