//! EventBusOrchestrator - the coordination runtime.
//!
//! The orchestrator hosts many state machines, serializes each machine's
//! event processing, and routes inter-machine messages without deadlock:
//!
//! - every machine owns one [`mailbox`](self::mailbox) serviced by at most
//!   one worker at a time, so transitions never run concurrently on the
//!   same machine and adapters need no locks;
//! - actions defer their sends onto an [`OrchestratedContext`] outbox that
//!   is applied only after the transition commits, so no action ever waits
//!   on another machine while holding its own mailbox;
//! - a fixed worker pool pulls runnable mailboxes from a shared run-queue,
//!   bounded self-send cascades keep one machine from capturing a worker.
//!
//! ```text
//! caller ──send_event──> mailbox ──worker──> adapter.process_event
//!    ^                                             │ outbox
//!    └──────── reply slot <──── fan-out <──────────┘
//! ```

mod context;
mod global;
mod mailbox;
mod registry;
mod stats;
mod worker;

pub use context::{OrchestratedContext, OutboxEntry};
pub use global::{global_orchestrator, shutdown_global};
pub use stats::{MachineStats, OrchestratorStats};

use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::domain::foundation::{
    ErrorKind, EventEnvelope, EventResult, GroupId, MachineId, OrchestratorError,
};
use crate::ports::MachineAdapter;

use mailbox::{complete_reply, Dispatch, EnqueueOutcome, Lane};
use registry::{MachineRecord, Registry};
use stats::BusCounters;

/// Scoping namespace for a set of machines with a shared lifecycle.
///
/// Machines registered through a token get ids of the form
/// `<base>_<group_id_hex>_<uuid>`, so the same base name can exist in
/// several groups at once. Releasing the token (explicitly or by dropping
/// it) unregisters every member, closes their mailboxes, and fails queued
/// requests with `Shutdown`.
pub struct ChannelGroupToken {
    group_id: GroupId,
    name: String,
    released: AtomicBool,
    inner: Weak<OrchestratorInner>,
}

impl ChannelGroupToken {
    /// The group's monotonic id.
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// The name the group was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the group has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Builds a scoped machine id for `base` within this group.
    ///
    /// Fails with `GroupReleased` once the token is released.
    pub fn scoped_machine_id(&self, base: &str) -> Result<MachineId, OrchestratorError> {
        if self.is_released() {
            return Err(OrchestratorError::GroupReleased {
                group: format!("{} ({})", self.name, self.group_id),
            });
        }
        MachineId::scoped(base, self.group_id)
            .map_err(|err| OrchestratorError::InvalidMachineId { reason: err.to_string() })
    }

    /// Releases the group: unregisters members, closes mailboxes, fails
    /// queued requests with `Shutdown`. Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.release_group(self.group_id);
        }
    }
}

impl Drop for ChannelGroupToken {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ChannelGroupToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelGroupToken")
            .field("group_id", &self.group_id)
            .field("name", &self.name)
            .field("released", &self.is_released())
            .finish()
    }
}

pub(crate) struct OrchestratorInner {
    pub(crate) config: OrchestratorConfig,
    pub(crate) registry: Registry,
    pub(crate) counters: BusCounters,
    run_queue_tx: mpsc::UnboundedSender<MachineId>,
    pub(crate) run_queue_rx: TokioMutex<mpsc::UnboundedReceiver<MachineId>>,
    shutdown_tx: watch::Sender<bool>,
    stopped: AtomicBool,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

impl OrchestratorInner {
    /// Puts a machine on the run-queue. Fails silently after shutdown.
    pub(crate) fn schedule(&self, id: MachineId) {
        let _ = self.run_queue_tx.send(id);
    }

    /// Applies a committed transition's outbox: self-sends back into the
    /// own self lane, sends and broadcasts routed to their targets.
    pub(crate) fn apply_outbox(&self, record: &Arc<MachineRecord>, entries: Vec<OutboxEntry>) {
        for entry in entries {
            match entry {
                OutboxEntry::SelfSend { event_name, payload } => {
                    let envelope = EventEnvelope::self_send(record.id.clone(), event_name, payload);
                    if record.mailbox.enqueue(Dispatch::new(envelope, None), Lane::SelfSend)
                        == EnqueueOutcome::Closed
                    {
                        debug!(machine_id = %record.id, "self-send dropped: mailbox closed");
                    }
                }
                OutboxEntry::Send {
                    target,
                    event_name,
                    payload,
                } => {
                    self.route_fire_and_forget(&record.id, &target, &event_name, payload, false);
                }
                OutboxEntry::Broadcast { event_name, payload } => {
                    let Some(group) = record.group else {
                        debug!(machine_id = %record.id, event = %event_name,
                            "broadcast from machine outside any channel group dropped");
                        continue;
                    };
                    for member in self.registry.group_members_except(group, &record.id) {
                        self.route_fire_and_forget(
                            &record.id,
                            member.as_str(),
                            &event_name,
                            payload.clone(),
                            true,
                        );
                    }
                }
            }
        }
    }

    /// Routes an envelope nobody awaits. Failures are logged and counted,
    /// never propagated - the sending transition already committed.
    pub(crate) fn route_fire_and_forget(
        &self,
        source: &MachineId,
        target_raw: &str,
        event_name: &str,
        payload: Option<JsonValue>,
        broadcast: bool,
    ) {
        let Ok(target) = MachineId::new(target_raw) else {
            warn!(machine = target_raw, event = event_name, "send to invalid machine id dropped");
            self.counters.record_failed();
            return;
        };
        let Some(record) = self.registry.lookup(&target) else {
            warn!(machine = %target, event = event_name, "send to unregistered machine dropped");
            self.counters.record_failed();
            return;
        };
        let envelope = if broadcast {
            EventEnvelope::broadcast(source.clone(), target, event_name, payload)
        } else {
            EventEnvelope::external(source.clone(), target, event_name, payload)
        };
        match record.mailbox.enqueue(Dispatch::new(envelope, None), Lane::External) {
            EnqueueOutcome::Scheduled => self.schedule(record.id.clone()),
            EnqueueOutcome::Queued => {}
            EnqueueOutcome::Full => {
                warn!(machine = %record.id, event = event_name, "send dropped: mailbox at capacity");
                self.counters.record_failed();
            }
            EnqueueOutcome::Closed => {
                debug!(machine = %record.id, event = event_name, "send dropped: mailbox closed");
                self.counters.record_failed();
            }
        }
    }

    /// Enqueues an awaited dispatch, scheduling the mailbox if needed.
    fn enqueue(
        &self,
        record: &Arc<MachineRecord>,
        dispatch: Dispatch,
        lane: Lane,
    ) -> Result<(), OrchestratorError> {
        match record.mailbox.enqueue(dispatch, lane) {
            EnqueueOutcome::Scheduled => {
                self.schedule(record.id.clone());
                Ok(())
            }
            EnqueueOutcome::Queued => Ok(()),
            EnqueueOutcome::Full => Err(OrchestratorError::Backpressure {
                machine_id: record.id.to_string(),
                capacity: self.config.mailbox_capacity,
            }),
            EnqueueOutcome::Closed => Err(OrchestratorError::Shutdown),
        }
    }

    /// Tears down a channel group's members.
    pub(crate) fn release_group(&self, group: GroupId) {
        let (name, records) = self.registry.release_group(group);
        if records.is_empty() && name.is_empty() {
            return;
        }
        info!(group = %group, name = %name, members = records.len(), "channel group released");
        for record in records {
            for dispatch in record.mailbox.close() {
                self.counters.record_failed();
                complete_reply(
                    dispatch.reply,
                    EventResult::failure(ErrorKind::Shutdown, "channel group released"),
                );
            }
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// The coordination runtime. Cheap to clone; all clones share one pool.
///
/// # Example
///
/// ```ignore
/// let orchestrator = EventBusOrchestrator::with_defaults();
/// orchestrator.register_machine("ping", Arc::new(PingMachine::new()))?;
/// orchestrator.start_machine("ping").await?;
///
/// let result = orchestrator.send_event("app", "ping", "PING", None).await;
/// assert!(result.success);
/// ```
#[derive(Clone)]
pub struct EventBusOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl EventBusOrchestrator {
    /// Creates an orchestrator and spawns its worker pool.
    ///
    /// Must be called within a Tokio runtime. The configuration should
    /// already be validated ([`OrchestratorConfig::validate`]).
    pub fn new(config: OrchestratorConfig) -> Self {
        let (run_queue_tx, run_queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool_size = config.pool_size;
        let inner = Arc::new(OrchestratorInner {
            config,
            registry: Registry::default(),
            counters: BusCounters::default(),
            run_queue_tx,
            run_queue_rx: TokioMutex::new(run_queue_rx),
            shutdown_tx,
            stopped: AtomicBool::new(false),
            workers: StdMutex::new(Vec::new()),
        });
        let handles: Vec<_> = (0..pool_size)
            .map(|_| tokio::spawn(worker::worker_loop(Arc::clone(&inner), shutdown_rx.clone())))
            .collect();
        *inner.workers.lock().expect("EventBusOrchestrator: workers lock poisoned") = handles;
        Self { inner }
    }

    /// Creates an orchestrator with [`OrchestratorConfig::default`].
    pub fn with_defaults() -> Self {
        Self::new(OrchestratorConfig::default())
    }

    /// The configuration this orchestrator runs with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Registers a machine under an unscoped id (a leading `#` is
    /// normalized away). The machine is routable immediately; call
    /// [`start_machine`](Self::start_machine) to move it to its initial
    /// configuration.
    pub fn register_machine(
        &self,
        id: &str,
        adapter: Arc<dyn MachineAdapter>,
    ) -> Result<MachineId, OrchestratorError> {
        let machine_id = MachineId::new(id)
            .map_err(|err| OrchestratorError::InvalidMachineId { reason: err.to_string() })?;
        self.install(machine_id, adapter, None)
    }

    /// Registers a machine scoped to a channel group; the returned id
    /// embeds the group and a uuid, so base names may repeat across groups.
    pub fn register_machine_in_group(
        &self,
        base: &str,
        adapter: Arc<dyn MachineAdapter>,
        group: &ChannelGroupToken,
    ) -> Result<MachineId, OrchestratorError> {
        let machine_id = group.scoped_machine_id(base)?;
        self.install(machine_id, adapter, Some(group.group_id()))
    }

    fn install(
        &self,
        machine_id: MachineId,
        adapter: Arc<dyn MachineAdapter>,
        group: Option<GroupId>,
    ) -> Result<MachineId, OrchestratorError> {
        let record = Arc::new(MachineRecord::new(
            machine_id.clone(),
            adapter,
            self.inner.config.mailbox_capacity,
            group,
        ));
        self.inner.registry.insert(record)?;
        if self.inner.config.enable_logging {
            debug!(machine_id = %machine_id, "machine registered");
        }
        Ok(machine_id)
    }

    /// Moves a registered machine to its initial configuration and returns
    /// the initial state path.
    pub async fn start_machine(&self, id: &str) -> Result<String, OrchestratorError> {
        let machine_id = MachineId::new(id)
            .map_err(|err| OrchestratorError::InvalidMachineId { reason: err.to_string() })?;
        let record = self
            .inner
            .registry
            .lookup(&machine_id)
            .ok_or_else(|| OrchestratorError::target_not_registered(&machine_id))?;
        record
            .adapter
            .start()
            .await
            .map_err(|err| OrchestratorError::MachineFault {
                machine_id: machine_id.to_string(),
                message: err.to_string(),
            })
    }

    /// Sends an event and awaits the result under the default timeout.
    ///
    /// Never returns `Err`: routing failures, faults, and timeouts are
    /// folded into the [`EventResult`].
    pub async fn send_event(
        &self,
        from: &str,
        to: &str,
        event_name: &str,
        payload: Option<JsonValue>,
    ) -> EventResult {
        self.send_on_lane(from, to, event_name, payload, self.inner.config.default_timeout_ms, Lane::External)
            .await
    }

    /// Sends an event with an explicit timeout in milliseconds.
    pub async fn send_event_with_timeout(
        &self,
        from: &str,
        to: &str,
        event_name: &str,
        payload: Option<JsonValue>,
        timeout_ms: u64,
    ) -> EventResult {
        self.send_on_lane(from, to, event_name, payload, timeout_ms, Lane::External)
            .await
    }

    /// Sends a critical event on the priority lane, which drains before the
    /// regular external lane (self-send cascades still finish first).
    pub async fn send_event_prioritized(
        &self,
        from: &str,
        to: &str,
        event_name: &str,
        payload: Option<JsonValue>,
        timeout_ms: u64,
    ) -> EventResult {
        self.send_on_lane(from, to, event_name, payload, timeout_ms, Lane::Priority)
            .await
    }

    /// Schedules a fire-and-forget send after `delay` (delayed transition
    /// support; the circuit breaker's open-duration timer uses this).
    pub fn send_after(
        &self,
        delay: Duration,
        from: &str,
        to: &str,
        event_name: &str,
        payload: Option<JsonValue>,
    ) {
        let inner = Arc::clone(&self.inner);
        let source = MachineId::new(from).unwrap_or_else(|_| MachineId::external_caller());
        let target = to.to_string();
        let event_name = event_name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.is_stopped() {
                return;
            }
            inner.route_fire_and_forget(&source, &target, &event_name, payload, false);
        });
    }

    async fn send_on_lane(
        &self,
        from: &str,
        to: &str,
        event_name: &str,
        payload: Option<JsonValue>,
        timeout_ms: u64,
        lane: Lane,
    ) -> EventResult {
        if self.inner.is_stopped() {
            return EventResult::failure(ErrorKind::Shutdown, "orchestrator stopped");
        }
        let target_id = match MachineId::new(to) {
            Ok(id) => id,
            Err(err) => {
                return EventResult::failure(ErrorKind::TargetNotRegistered, err.to_string())
            }
        };
        let Some(record) = self.inner.registry.lookup(&target_id) else {
            return EventResult::from_error(&OrchestratorError::target_not_registered(&target_id));
        };
        let source = MachineId::new(from).unwrap_or_else(|_| MachineId::external_caller());
        let timeout = Duration::from_millis(timeout_ms);
        let envelope = EventEnvelope::request(source, target_id.clone(), event_name, payload)
            .with_deadline(Instant::now() + timeout);
        if self.inner.config.enable_logging {
            debug!(machine = %target_id, event = event_name, timeout_ms, "event submitted");
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if let Err(err) = self.inner.enqueue(&record, Dispatch::new(envelope, Some(reply_tx)), lane)
        {
            return EventResult::from_error(&err);
        }
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            // The dispatch was dropped without completion; only shutdown
            // paths do that.
            Ok(Err(_)) => EventResult::failure(ErrorKind::Shutdown, "response slot dropped"),
            Err(_) => EventResult::failure(
                ErrorKind::Timeout,
                format!("no response from '{}' within {}ms", target_id, timeout_ms),
            ),
        }
    }

    /// Creates a channel group. Dropping the returned token releases it.
    pub fn create_channel_group(&self, name: &str) -> ChannelGroupToken {
        let group_id = self.inner.registry.create_group(name);
        if self.inner.config.enable_logging {
            debug!(group = %group_id, name, "channel group created");
        }
        ChannelGroupToken {
            group_id,
            name: name.to_string(),
            released: AtomicBool::new(false),
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Releases a channel group explicitly; equivalent to dropping the
    /// token.
    pub fn release_channel_group(&self, token: &ChannelGroupToken) {
        token.release();
    }

    /// Number of channel groups not yet released.
    pub fn active_channel_group_count(&self) -> usize {
        self.inner.registry.group_count()
    }

    /// Lock-free snapshot of bus-wide counters and gauges.
    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            registered_machines: self.inner.registry.machine_count(),
            active_channel_groups: self.inner.registry.group_count(),
            events_processed: self.inner.counters.processed(),
            events_failed: self.inner.counters.failed(),
            queued_now: self.inner.registry.total_queued(),
        }
    }

    /// Per-machine counters, if the machine is registered.
    pub fn machine_stats(&self, id: &str) -> Option<MachineStats> {
        let machine_id = MachineId::new(id).ok()?;
        self.inner
            .registry
            .lookup(&machine_id)
            .map(|record| record.counters.snapshot())
    }

    /// Current state path of a machine, if registered.
    pub fn current_state(&self, id: &str) -> Option<String> {
        let machine_id = MachineId::new(id).ok()?;
        self.inner
            .registry
            .lookup(&machine_id)
            .map(|record| record.adapter.current_state())
    }

    /// Whether `stop` has run.
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Stops the orchestrator: the registry becomes read-only, mailboxes
    /// close (queued requests fail with `Shutdown`), in-flight turns drain
    /// up to the shutdown deadline, and workers are joined (or aborted if
    /// the deadline passes). Idempotent.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.registry.set_read_only();
        let records = self.inner.registry.all_records();
        for record in &records {
            for dispatch in record.mailbox.close() {
                complete_reply(
                    dispatch.reply,
                    EventResult::failure(ErrorKind::Shutdown, "orchestrator stopped"),
                );
            }
        }
        let _ = self.inner.shutdown_tx.send(true);
        for record in &records {
            let _ = record.adapter.stop().await;
        }

        let handles: Vec<JoinHandle<()>> = self
            .inner
            .workers
            .lock()
            .expect("EventBusOrchestrator: workers lock poisoned")
            .drain(..)
            .collect();
        let aborts: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();
        if tokio::time::timeout(self.inner.config.shutdown_timeout(), join_all(handles))
            .await
            .is_err()
        {
            warn!("shutdown deadline exceeded; aborting workers");
            for abort in aborts {
                abort.abort();
            }
        }
        info!("orchestrator stopped");
    }
}

impl std::fmt::Debug for EventBusOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBusOrchestrator")
            .field("registered_machines", &self.inner.registry.machine_count())
            .field("stopped", &self.inner.is_stopped())
            .finish()
    }
}
