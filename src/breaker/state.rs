//! Circuit breaker value types.
//!
//! ## States
//!
//! - **Closed**: normal operation, calls flow through
//! - **Open**: too many failures, calls rejected immediately
//! - **HalfOpen**: testing recovery, exactly one probe allowed through
//!
//! ## Transitions
//!
//! ```text
//! closed --[failure_threshold reached]--> open
//! open --[open_duration elapsed]--> halfOpen
//! halfOpen --[probe succeeds]--> closed
//! halfOpen --[probe fails]--> open
//! ```

use serde::Serialize;
use std::time::Duration;

use crate::domain::foundation::{StateMachine, Timestamp};

/// Public circuit state. The hosted machine refines `HalfOpen` into
/// `halfOpen.ready` and `halfOpen.probing` child states internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Normal operation - calls flow through to the protected service.
    Closed,
    /// Too many failures - calls rejected without touching the service.
    Open,
    /// Testing recovery - a single probe decides closed or open.
    HalfOpen,
}

impl CircuitState {
    /// Check if the circuit admits calls at all in this state.
    pub fn allows_requests(&self) -> bool {
        matches!(self, CircuitState::Closed | CircuitState::HalfOpen)
    }
}

impl StateMachine for CircuitState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use CircuitState::*;
        matches!(
            (self, target),
            (Closed, Open)
                | (Open, HalfOpen)
                // `reset` returns to closed from anywhere.
                | (Open, Closed)
                | (HalfOpen, Closed)
                | (HalfOpen, Open)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use CircuitState::*;
        match self {
            Closed => vec![Open],
            Open => vec![HalfOpen, Closed],
            HalfOpen => vec![Closed, Open],
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "halfOpen",
        };
        write!(f, "{}", s)
    }
}

/// Configuration for circuit breaker behavior.
///
/// Updates after construction travel as `CONFIGURE` events through the
/// orchestrator, so a new threshold always takes effect on the next
/// evaluated failure.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures (within the current closed window) before opening.
    ///
    /// Default: 5 failures
    pub failure_threshold: u32,

    /// Time to stay open before testing recovery.
    ///
    /// Default: 30 seconds
    pub open_duration: Duration,

    /// Optional cap on how long a half-open probe may run before it is
    /// treated as failed by the caller.
    ///
    /// Default: None (the probe runs to completion)
    pub half_open_probe_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            half_open_probe_timeout: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Sets the failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the open duration.
    pub fn with_open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }

    /// Sets the half-open probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.half_open_probe_timeout = Some(timeout);
        self
    }
}

/// Emitted on every public state change.
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    /// State before the transition.
    pub from: CircuitState,
    /// State after the transition.
    pub to: CircuitState,
    /// What drove the transition, e.g. `failure threshold reached`.
    pub reason: String,
}

/// Lock-free snapshot of a breaker's counters and state.
///
/// Values are read independently; momentarily stale combinations are
/// acceptable.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    /// Breaker name.
    pub name: String,
    /// Current public state.
    pub state: CircuitState,
    /// Failures in the current closed window.
    pub failure_count: u32,
    /// Successes in the current closed window.
    pub success_count: u32,
    /// When the breaker last opened, if it is open.
    pub opened_at: Option<Timestamp>,
    /// Milliseconds until the open window elapses (0 unless open).
    pub remaining_open_ms: u64,
    /// Total successful calls since creation.
    pub total_successes: u64,
    /// Total failed calls since creation.
    pub total_failures: u64,
    /// Times the circuit has opened.
    pub times_opened: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_and_half_open_allow_requests() {
        assert!(CircuitState::Closed.allows_requests());
        assert!(CircuitState::HalfOpen.allows_requests());
        assert!(!CircuitState::Open.allows_requests());
    }

    #[test]
    fn transition_table_matches_design() {
        assert!(CircuitState::Closed.can_transition_to(&CircuitState::Open));
        assert!(CircuitState::Open.can_transition_to(&CircuitState::HalfOpen));
        assert!(CircuitState::HalfOpen.can_transition_to(&CircuitState::Closed));
        assert!(CircuitState::HalfOpen.can_transition_to(&CircuitState::Open));
        assert!(!CircuitState::Closed.can_transition_to(&CircuitState::HalfOpen));
    }

    #[test]
    fn reset_path_back_to_closed_is_valid() {
        assert!(CircuitState::Open.can_transition_to(&CircuitState::Closed));
    }

    #[test]
    fn default_config_values() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.open_duration, Duration::from_secs(30));
        assert!(config.half_open_probe_timeout.is_none());
    }

    #[test]
    fn builder_overrides_apply() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(2)
            .with_open_duration(Duration::from_millis(100))
            .with_probe_timeout(Duration::from_secs(1));
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.open_duration, Duration::from_millis(100));
        assert_eq!(config.half_open_probe_timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn state_display_uses_statechart_names() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::HalfOpen.to_string(), "halfOpen");
    }
}
