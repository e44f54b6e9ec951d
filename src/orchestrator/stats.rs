//! Lock-free counters and snapshot types.
//!
//! Reads are snapshots of relaxed atomics; slightly stale values are
//! acceptable and documented.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-bus counters, shared by all workers.
#[derive(Debug, Default)]
pub(crate) struct BusCounters {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl BusCounters {
    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub(crate) fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Per-machine success/failure counters.
#[derive(Debug, Default)]
pub(crate) struct MachineCounters {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl MachineCounters {
    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MachineStats {
        MachineStats {
            events_processed: self.processed.load(Ordering::Relaxed),
            events_failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of one machine's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MachineStats {
    /// Events this machine processed to completion.
    pub events_processed: u64,
    /// Turns that ended in a fault or expired before dispatch.
    pub events_failed: u64,
}

/// Point-in-time snapshot of the orchestrator.
///
/// Values come from relaxed atomic loads taken independently; the snapshot
/// is not a consistent cut and may be momentarily stale under load.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    /// Machines currently registered (all groups included).
    pub registered_machines: usize,
    /// Channel groups that have not been released.
    pub active_channel_groups: usize,
    /// Events processed to completion across all machines.
    pub events_processed: u64,
    /// Events that failed (faults, pre-dispatch expiry, dropped outbox
    /// sends).
    pub events_failed: u64,
    /// Dispatches sitting in mailboxes right now.
    pub queued_now: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_counters_accumulate() {
        let counters = BusCounters::default();
        counters.record_processed();
        counters.record_processed();
        counters.record_failed();

        assert_eq!(counters.processed(), 2);
        assert_eq!(counters.failed(), 1);
    }

    #[test]
    fn machine_counters_snapshot() {
        let counters = MachineCounters::default();
        counters.record_processed();
        counters.record_failed();

        let snap = counters.snapshot();
        assert_eq!(snap.events_processed, 1);
        assert_eq!(snap.events_failed, 1);
    }
}
