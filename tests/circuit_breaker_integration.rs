//! Integration tests for the orchestrated circuit breaker.
//!
//! Every mutation - failures, the open-duration timer, probe admission,
//! reset, reconfiguration - travels as an orchestrator event, so these
//! tests double as a workout for the hosted-machine execution contract.

use futures::future::join_all;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use xstatenet::breaker::{
    CircuitBreakerConfig, CircuitState, ExecuteError, OrchestratedCircuitBreaker,
};
use xstatenet::orchestrator::EventBusOrchestrator;

async fn breaker_with(
    threshold: u32,
    open: Duration,
) -> (EventBusOrchestrator, OrchestratedCircuitBreaker) {
    let orchestrator = EventBusOrchestrator::with_defaults();
    let config = CircuitBreakerConfig::default()
        .with_failure_threshold(threshold)
        .with_open_duration(open);
    let breaker =
        OrchestratedCircuitBreaker::with_config("itest", &orchestrator, config).unwrap();
    breaker.start().await.unwrap();
    (orchestrator, breaker)
}

#[tokio::test]
async fn breaker_walks_open_half_open_closed() {
    let (orchestrator, breaker) = breaker_with(2, Duration::from_millis(100)).await;

    breaker.record_failure().await;
    assert_eq!(breaker.state(), CircuitState::Closed);
    breaker.record_failure().await;
    assert_eq!(breaker.state(), CircuitState::Open);

    // Rejected while open.
    let rejected: Result<u32, ExecuteError<String>> = breaker.execute(async { Ok(1) }).await;
    assert!(matches!(rejected, Err(ExecuteError::Rejected { .. })));

    // The open-duration timer half-opens the circuit.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // A successful probe closes it and zeroes the window counters.
    let probed: Result<u32, ExecuteError<String>> = breaker.execute(async { Ok(7) }).await;
    assert_eq!(probed.unwrap(), 7);
    let stats = breaker.stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.success_count, 0);

    orchestrator.stop().await;
}

#[tokio::test]
async fn failed_probe_reopens_the_circuit() {
    let (orchestrator, breaker) = breaker_with(1, Duration::from_millis(50)).await;

    breaker.record_failure().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let probed: Result<u32, ExecuteError<String>> =
        breaker.execute(async { Err("still down".to_string()) }).await;
    assert!(matches!(probed, Err(ExecuteError::Operation(_))));
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.stats().times_opened, 2);

    // And the re-armed timer half-opens it again.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    orchestrator.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn half_open_admits_exactly_one_probe() {
    let (orchestrator, breaker) = breaker_with(2, Duration::from_millis(50)).await;
    let breaker = Arc::new(breaker);

    breaker.record_failure().await;
    breaker.record_failure().await;
    assert_eq!(breaker.state(), CircuitState::Open);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let executed = Arc::new(AtomicU32::new(0));
    let attempts: Vec<_> = (0..50)
        .map(|_| {
            let breaker = Arc::clone(&breaker);
            let executed = Arc::clone(&executed);
            async move {
                breaker
                    .execute(async {
                        executed.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>(())
                    })
                    .await
            }
        })
        .collect();
    let outcomes = join_all(attempts).await;

    let successes = outcomes.iter().filter(|o| o.is_ok()).count();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, Err(ExecuteError::Rejected { .. })))
        .count();
    assert_eq!(executed.load(Ordering::SeqCst), 1, "exactly one probe may run");
    assert_eq!(successes, 1);
    assert_eq!(rejected, 49);
    assert_eq!(breaker.state(), CircuitState::Closed);

    orchestrator.stop().await;
}

#[tokio::test]
async fn reset_returns_to_closed_from_open() {
    let (orchestrator, breaker) = breaker_with(1, Duration::from_secs(30)).await;

    breaker.record_failure().await;
    assert_eq!(breaker.state(), CircuitState::Open);

    let result = breaker.reset().await;
    assert!(result.success);
    let stats = breaker.stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 0);
    assert!(stats.opened_at.is_none());

    // Calls flow again.
    let ok: Result<u32, ExecuteError<String>> = breaker.execute(async { Ok(5) }).await;
    assert_eq!(ok.unwrap(), 5);

    orchestrator.stop().await;
}

#[tokio::test]
async fn reconfiguration_takes_effect_on_the_next_failure() {
    let (orchestrator, breaker) = breaker_with(5, Duration::from_secs(30)).await;

    breaker.record_failure().await;
    assert_eq!(breaker.state(), CircuitState::Closed);

    // Tighten the threshold through the machine itself.
    let result = breaker.configure(Some(2), Some(Duration::from_millis(50))).await;
    assert!(result.success);

    breaker.record_failure().await;
    assert_eq!(breaker.state(), CircuitState::Open);

    // The shortened open duration is honored by the re-armed timer.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    orchestrator.stop().await;
}

#[tokio::test]
async fn state_transitions_are_observable() {
    let (orchestrator, breaker) = breaker_with(1, Duration::from_millis(50)).await;
    let mut transitions = breaker.subscribe();

    breaker.record_failure().await;

    let opened = tokio::time::timeout(Duration::from_secs(1), transitions.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(opened.from, CircuitState::Closed);
    assert_eq!(opened.to, CircuitState::Open);

    let half_opened = tokio::time::timeout(Duration::from_secs(1), transitions.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(half_opened.from, CircuitState::Open);
    assert_eq!(half_opened.to, CircuitState::HalfOpen);

    orchestrator.stop().await;
}

#[tokio::test]
async fn slow_probe_times_out_and_reopens() {
    let orchestrator = EventBusOrchestrator::with_defaults();
    let config = CircuitBreakerConfig::default()
        .with_failure_threshold(1)
        .with_open_duration(Duration::from_millis(50))
        .with_probe_timeout(Duration::from_millis(50));
    let breaker =
        OrchestratedCircuitBreaker::with_config("slow-probe", &orchestrator, config).unwrap();
    breaker.start().await.unwrap();

    breaker.record_failure().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let result: Result<u32, ExecuteError<String>> = breaker
        .execute(async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(1)
        })
        .await;
    assert!(matches!(result, Err(ExecuteError::ProbeTimeout { .. })));
    assert_eq!(breaker.state(), CircuitState::Open);

    orchestrator.stop().await;
}

#[tokio::test]
async fn totals_accumulate_across_cycles() {
    let (orchestrator, breaker) = breaker_with(2, Duration::from_millis(50)).await;

    breaker.record_success().await;
    breaker.record_failure().await;
    breaker.record_failure().await; // opens
    tokio::time::sleep(Duration::from_millis(100)).await;
    let _: Result<(), ExecuteError<String>> = breaker.execute(async { Ok(()) }).await; // probe closes

    let stats = breaker.stats();
    assert_eq!(stats.total_failures, 2);
    assert_eq!(stats.total_successes, 2);
    assert_eq!(stats.times_opened, 1);

    orchestrator.stop().await;
}
