//! Process-wide orchestrator handle.
//!
//! Some hosts want exactly one orchestrator per process without threading
//! a handle everywhere. Initialization is idempotent; teardown flows
//! through the normal stop path and clears the slot so a later
//! [`global_orchestrator`] call starts fresh.

use once_cell::sync::Lazy;
use std::sync::RwLock;

use crate::config::OrchestratorConfig;

use super::EventBusOrchestrator;

static GLOBAL: Lazy<RwLock<Option<EventBusOrchestrator>>> = Lazy::new(|| RwLock::new(None));

/// Returns the process-wide orchestrator, creating it with default
/// configuration on first use.
///
/// Must be called within a Tokio runtime the first time (the worker pool
/// is spawned then).
pub fn global_orchestrator() -> EventBusOrchestrator {
    if let Some(existing) = GLOBAL
        .read()
        .expect("global orchestrator lock poisoned")
        .as_ref()
    {
        return existing.clone();
    }
    let mut slot = GLOBAL.write().expect("global orchestrator lock poisoned");
    slot.get_or_insert_with(|| EventBusOrchestrator::new(OrchestratorConfig::default()))
        .clone()
}

/// Stops and clears the process-wide orchestrator. Idempotent; a no-op if
/// it was never created.
pub async fn shutdown_global() {
    let taken = GLOBAL
        .write()
        .expect("global orchestrator lock poisoned")
        .take();
    if let Some(orchestrator) = taken {
        orchestrator.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn global_handle_is_idempotent_and_tears_down() {
        let first = global_orchestrator();
        let second = global_orchestrator();
        // Both handles reach the same runtime.
        first.register_machine("global-probe", std::sync::Arc::new(Probe)).unwrap();
        assert!(second.current_state("global-probe").is_some());

        shutdown_global().await;
        assert!(first.is_stopped());

        // After teardown a fresh orchestrator is created on demand.
        let third = global_orchestrator();
        assert!(!third.is_stopped());
        shutdown_global().await;
    }

    struct Probe;

    #[async_trait::async_trait]
    impl crate::ports::MachineAdapter for Probe {
        async fn start(&self) -> Result<String, crate::ports::MachineError> {
            Ok("idle".into())
        }

        async fn process_event(
            &self,
            _event: &crate::domain::foundation::EventEnvelope,
            _ctx: &crate::orchestrator::OrchestratedContext,
        ) -> Result<String, crate::ports::MachineError> {
            Ok("idle".into())
        }

        fn current_state(&self) -> String {
            "idle".into()
        }

        async fn stop(&self) -> Result<(), crate::ports::MachineError> {
            Ok(())
        }
    }
}
