//! Reconciler actor owning the mirrored queue.
//!
//! Every push message, timer and pull result arrives as a message, so the
//! store is only ever touched from `handle` and each update runs to
//! completion before the next one starts. Timers and pulls are spawned
//! tasks whose handles live in [`TaskSlot`]s and are aborted on teardown.

use std::sync::Arc;

use chrono::Utc;
use queue_core::{
    AheadBuffer, AheadResolution, CatchupLimiter, DeltaOutcome, JobId, PendingUpdates, PullReason,
    PushEvent, QueueDelta, QueueSnapshot, QueueStore, Residual, SafetyNetCheck, SnapshotOutcome,
    StartupGate, SyncConfig, SyncEvent, plan_bulk_delete, revision::is_advance,
};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::backend::{BackendError, QueueBackend};
use crate::messages::{ReconcilerMessage, SyncError};
use crate::status::SyncStatus;
use crate::timers::{self, TaskSlot};

type PullReply = RpcReplyPort<Result<(), SyncError>>;

/// Everything the actor needs at spawn time.
pub struct ReconcilerArgs {
    pub backend: Arc<dyn QueueBackend>,
    pub config: SyncConfig,
    pub status_tx: watch::Sender<SyncStatus>,
    pub event_tx: broadcast::Sender<SyncEvent>,
}

/// State for the reconciler actor.
pub struct ReconcilerState {
    backend: Arc<dyn QueueBackend>,
    config: SyncConfig,
    store: QueueStore,
    /// Values waiting for the next coalesced flush.
    pending: PendingUpdates,
    /// Deltas whose base snapshot has not arrived.
    ahead: AheadBuffer,
    catchup: CatchupLimiter,
    gate: StartupGate,
    selection: Vec<JobId>,
    /// Monotonic time of the last applied or confirmed snapshot.
    last_snapshot: Option<Instant>,
    polling_only: bool,
    pull_in_flight: bool,
    pull_waiters: Vec<PullReply>,
    /// Pull requested while another was in flight; runs once it lands.
    queued_pull: Option<(PullReason, Vec<PullReply>)>,
    flush_timer: TaskSlot,
    catchup_timer: TaskSlot,
    startup_timer: TaskSlot,
    safety_net: TaskSlot,
    push_listener: TaskSlot,
    pull_task: TaskSlot,
    status_tx: watch::Sender<SyncStatus>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl ReconcilerState {
    fn new(args: ReconcilerArgs) -> Self {
        Self {
            backend: args.backend,
            catchup: CatchupLimiter::new(args.config.catchup_cooldown()),
            config: args.config,
            store: QueueStore::new(),
            pending: PendingUpdates::new(),
            ahead: AheadBuffer::new(),
            gate: StartupGate::default(),
            selection: Vec::new(),
            last_snapshot: None,
            polling_only: false,
            pull_in_flight: false,
            pull_waiters: Vec::new(),
            queued_pull: None,
            flush_timer: TaskSlot::default(),
            catchup_timer: TaskSlot::default(),
            startup_timer: TaskSlot::default(),
            safety_net: TaskSlot::default(),
            push_listener: TaskSlot::default(),
            pull_task: TaskSlot::default(),
            status_tx: args.status_tx,
            event_tx: args.event_tx,
        }
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }

    fn status(&self) -> SyncStatus {
        let sync = self.store.sync_state();
        SyncStatus {
            snapshot_revision: sync.last_applied_snapshot_revision,
            delta_revision: sync.last_applied_delta_revision,
            last_snapshot_at: sync.last_snapshot_at,
            job_count: self.store.len(),
            ahead_base: self.ahead.base(),
            pull_in_flight: self.pull_in_flight,
            polling_only: self.polling_only,
            startup: self.gate,
        }
    }

    fn publish_status(&self) {
        let status = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Queue a push message for the next flush.
    fn accept_push(&mut self, myself: &ActorRef<ReconcilerMessage>, event: PushEvent) {
        if self.gate.cancel() {
            self.startup_timer.cancel();
            tracing::info!("Push message arrived before idle; skipping startup pull");
            self.emit(SyncEvent::StartupPullCancelled {
                timestamp: Utc::now(),
            });
        }

        match event {
            PushEvent::Snapshot(snapshot) => {
                let revision = snapshot.snapshot_revision;
                if !self.pending.offer_snapshot(snapshot) {
                    tracing::trace!("Snapshot r{:?} superseded by a pending one", revision);
                }
            }
            PushEvent::Delta(delta) => {
                let (base, revision) = (delta.base_snapshot_revision, delta.delta_revision);
                if !self.pending.offer_delta(delta) {
                    tracing::trace!("Delta r{}.{} superseded by a newer base", base, revision);
                }
            }
        }

        if !self.flush_timer.is_armed() {
            self.flush_timer.set(timers::after(
                self.config.coalesce_window(),
                myself.clone(),
                ReconcilerMessage::Flush,
            ));
        }
    }

    fn flush(&mut self, myself: &ActorRef<ReconcilerMessage>) {
        // The next push arms a fresh window.
        self.flush_timer.cancel();
        let (snapshot, delta) = self.pending.take();
        if let Some(snapshot) = snapshot {
            self.apply_snapshot(myself, snapshot, false);
        }
        if let Some(delta) = delta {
            self.apply_delta(myself, delta);
        }
    }

    /// `reconcile` lets a same-revision snapshot restore optimistically removed jobs.
    fn apply_snapshot(
        &mut self,
        myself: &ActorRef<ReconcilerMessage>,
        snapshot: QueueSnapshot,
        reconcile: bool,
    ) {
        let now = Utc::now();
        let revision = snapshot.snapshot_revision;
        let outcome = if reconcile {
            self.store.reconcile_snapshot(snapshot, now)
        } else {
            self.store.apply_snapshot(snapshot, now)
        };
        match outcome {
            SnapshotOutcome::Stale { revision, current } => {
                tracing::trace!("Dropping stale snapshot r{} (at r{})", revision, current);
                self.emit(SyncEvent::SnapshotDropped {
                    revision,
                    current,
                    timestamp: now,
                });
                return;
            }
            SnapshotOutcome::Duplicate => {
                tracing::trace!("Snapshot r{:?} already applied", revision);
            }
            SnapshotOutcome::Applied { job_count } => {
                tracing::debug!("Applied snapshot r{:?} with {} jobs", revision, job_count);
                self.emit(SyncEvent::SnapshotApplied {
                    revision,
                    job_count,
                    timestamp: now,
                });
            }
        }
        self.last_snapshot = Some(Instant::now());
        self.resolve_ahead(myself);
    }

    fn resolve_ahead(&mut self, myself: &ActorRef<ReconcilerMessage>) {
        match self.ahead.resolve(self.store.snapshot_revision()) {
            AheadResolution::Empty | AheadResolution::Keep { .. } => {}
            AheadResolution::Flush(delta) => {
                self.catchup_timer.cancel();
                tracing::debug!(
                    "Base r{} arrived; applying buffered deltas",
                    delta.base_snapshot_revision
                );
                self.apply_delta(myself, delta);
            }
            AheadResolution::Discard { base } => {
                self.catchup_timer.cancel();
                tracing::debug!("Snapshot moved past r{}; discarding buffered deltas", base);
                self.emit(SyncEvent::AheadDiscarded {
                    base,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn apply_delta(&mut self, myself: &ActorRef<ReconcilerMessage>, delta: QueueDelta) {
        let now = Utc::now();
        let (base, delta_revision) = (delta.base_snapshot_revision, delta.delta_revision);
        if self.store.classify_delta(&delta) == DeltaOutcome::Ahead {
            self.buffer_ahead(myself, delta);
            return;
        }

        let outcome = self.store.apply_delta(delta);
        if let DeltaOutcome::Applied { patched, created } = outcome {
            tracing::debug!(
                "Applied delta r{}.{} ({} patched, {} created)",
                base,
                delta_revision,
                patched,
                created
            );
            self.emit(SyncEvent::DeltaApplied {
                base,
                delta_revision,
                patched,
                created,
                timestamp: now,
            });
        } else if let Some(reason) = outcome.rejection() {
            tracing::trace!("Dropping delta r{}.{}: {:?}", base, delta_revision, reason);
            self.emit(SyncEvent::DeltaDropped {
                base,
                delta_revision,
                reason,
                timestamp: now,
            });
        }
    }

    fn buffer_ahead(&mut self, myself: &ActorRef<ReconcilerMessage>, delta: QueueDelta) {
        let (base, delta_revision) = (delta.base_snapshot_revision, delta.delta_revision);
        if let Some(replaced) = self.ahead.push(delta) {
            tracing::debug!("Buffered deltas for r{} replaced by r{}", replaced, base);
        }
        tracing::debug!(
            "Delta r{}.{} is ahead of r{:?}; buffering",
            base,
            delta_revision,
            self.store.snapshot_revision()
        );
        self.emit(SyncEvent::DeltaBuffered {
            base,
            delta_revision,
            timestamp: Utc::now(),
        });

        if !self.catchup_timer.is_armed() {
            self.arm_catchup(myself, self.config.ahead_catchup_delay());
        }
    }

    fn arm_catchup(&mut self, myself: &ActorRef<ReconcilerMessage>, delay: std::time::Duration) {
        self.catchup_timer.set(timers::after(
            delay,
            myself.clone(),
            ReconcilerMessage::CatchupDue,
        ));
    }

    fn catchup_due(&mut self, myself: &ActorRef<ReconcilerMessage>) {
        self.catchup_timer.cancel();
        let Some(base) = self.ahead.base() else {
            return;
        };
        // The landing pull re-arms the timer if it is still behind.
        if self.pull_in_flight {
            return;
        }
        match self.catchup.try_acquire(Instant::now().into_std()) {
            Ok(()) => {
                tracing::info!("Snapshot r{} has not arrived; pulling queue state", base);
                self.start_pull(myself, PullReason::CatchUp, None);
            }
            Err(remaining) => {
                tracing::debug!("Catch-up pull cooling down for {:?}", remaining);
                self.arm_catchup(myself, remaining);
            }
        }
    }

    fn start_pull(
        &mut self,
        myself: &ActorRef<ReconcilerMessage>,
        reason: PullReason,
        reply: Option<PullReply>,
    ) {
        if self.pull_in_flight {
            match reply {
                // Waiters need a pull issued after their request.
                Some(reply) => {
                    let (queued, waiters) =
                        self.queued_pull.get_or_insert_with(|| (reason, Vec::new()));
                    if reason == PullReason::DeleteReconcile {
                        *queued = reason;
                    }
                    waiters.push(reply);
                }
                None => tracing::trace!("Pull already in flight; skipping {} pull", reason),
            }
            return;
        }

        self.pull_in_flight = true;
        self.pull_waiters.extend(reply);
        tracing::debug!("Starting full pull ({})", reason);
        self.emit(SyncEvent::PullStarted {
            reason,
            timestamp: Utc::now(),
        });

        let backend = Arc::clone(&self.backend);
        let actor = myself.clone();
        self.pull_task.set(tokio::spawn(async move {
            let result = backend.get_queue_state().await;
            let _ = actor.send_message(ReconcilerMessage::PullCompleted { reason, result });
        }));
    }

    fn finish_pull(
        &mut self,
        myself: &ActorRef<ReconcilerMessage>,
        reason: PullReason,
        result: Result<QueueSnapshot, BackendError>,
    ) {
        self.pull_in_flight = false;
        let waiters = std::mem::take(&mut self.pull_waiters);
        let reply = match result {
            Ok(snapshot) => {
                self.apply_snapshot(myself, snapshot, reason == PullReason::DeleteReconcile);
                Ok(())
            }
            Err(error) => {
                tracing::warn!("Full pull ({}) failed: {}", reason, error);
                self.emit(SyncEvent::PullFailed {
                    reason,
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
                Err(SyncError::Backend(error))
            }
        };
        for waiter in waiters {
            let _ = waiter.send(reply.clone());
        }

        if !self.ahead.is_empty() && !self.catchup_timer.is_armed() {
            self.arm_catchup(myself, self.config.ahead_catchup_delay());
        }

        if let Some((reason, waiters)) = self.queued_pull.take() {
            self.pull_waiters = waiters;
            self.start_pull(myself, reason, None);
        }
    }

    fn safety_net_tick(&mut self, myself: &ActorRef<ReconcilerMessage>) {
        let check = SafetyNetCheck {
            has_jobs: !self.store.is_empty(),
            since_last_snapshot: self.last_snapshot.map(|at| at.elapsed()),
            stale_after: self.config.safety_net_stale_after(),
            polling_only: self.polling_only,
        };
        if check.is_due() {
            tracing::info!(
                "No snapshot since {:?}; safety-net pull",
                self.store.sync_state().last_snapshot_at
            );
            self.start_pull(myself, PullReason::SafetyNet, None);
        }
    }

    /// Cancel every timer and pull and drop buffered state.
    fn teardown(&mut self) {
        for slot in [
            &mut self.flush_timer,
            &mut self.catchup_timer,
            &mut self.startup_timer,
            &mut self.safety_net,
            &mut self.push_listener,
            &mut self.pull_task,
        ] {
            slot.cancel();
        }
        self.pending.clear();
        self.ahead.clear();
        self.pull_in_flight = false;

        let queued = self.queued_pull.take().map(|(_, waiters)| waiters);
        for waiter in self.pull_waiters.drain(..).chain(queued.into_iter().flatten()) {
            let _ = waiter.send(Err(SyncError::ShuttingDown));
        }
    }
}

/// Actor that reconciles the local queue with the backend.
pub struct ReconcilerActor;

impl Actor for ReconcilerActor {
    type Msg = ReconcilerMessage;
    type State = ReconcilerState;
    type Arguments = ReconcilerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue sync engine");
        let mut state = ReconcilerState::new(args);

        // Forward push messages into the mailbox
        let backend = Arc::clone(&state.backend);
        let actor = myself.clone();
        state.push_listener.set(tokio::spawn(async move {
            match backend.subscribe().await {
                Ok(mut rx) => {
                    while let Some(event) = rx.recv().await {
                        if actor.send_message(ReconcilerMessage::Push(event)).is_err() {
                            return;
                        }
                    }
                    let _ = actor.send_message(ReconcilerMessage::PushUnavailable {
                        error: "push channel closed".into(),
                    });
                }
                Err(error) => {
                    let _ = actor.send_message(ReconcilerMessage::PushUnavailable {
                        error: error.to_string(),
                    });
                }
            }
        }));

        state.safety_net.set(timers::every(
            state.config.safety_net_interval(),
            myself.clone(),
            || ReconcilerMessage::SafetyNetTick,
        ));

        if let Some(timeout) = state.config.startup_idle_timeout() {
            state
                .startup_timer
                .set(timers::after(timeout, myself.clone(), ReconcilerMessage::Idle));
        }

        state.publish_status();
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ReconcilerMessage::Push(event) => state.accept_push(&myself, event),

            ReconcilerMessage::Flush => state.flush(&myself),

            ReconcilerMessage::Idle => {
                state.startup_timer.cancel();
                if state.gate.open() {
                    tracing::info!("Startup gate open; pulling queue state");
                    state.start_pull(&myself, PullReason::Startup, None);
                }
            }

            ReconcilerMessage::CatchupDue => state.catchup_due(&myself),

            ReconcilerMessage::SafetyNetTick => state.safety_net_tick(&myself),

            ReconcilerMessage::FullPull { reason, reply } => {
                state.start_pull(&myself, reason, reply);
            }

            ReconcilerMessage::PullCompleted { reason, result } => {
                state.finish_pull(&myself, reason, result);
            }

            ReconcilerMessage::PushUnavailable { error } => {
                if !state.polling_only {
                    state.polling_only = true;
                    tracing::warn!("Push channel unavailable, polling only: {}", error);
                    state.emit(SyncEvent::PushDegraded {
                        error,
                        timestamp: Utc::now(),
                    });
                }
            }

            ReconcilerMessage::GetJobs { reply } => {
                let _ = reply.send(state.store.jobs().to_vec());
            }

            ReconcilerMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.store.job(job_id.as_str()).cloned());
            }

            ReconcilerMessage::GetBatches { reply } => {
                let _ = reply.send(state.store.batches());
            }

            ReconcilerMessage::GetStatus { reply } => {
                let _ = reply.send(state.status());
            }

            ReconcilerMessage::SetSelection { ids } => {
                state.selection = ids;
            }

            ReconcilerMessage::GetSelection { reply } => {
                let _ = reply.send(state.selection.clone());
            }

            ReconcilerMessage::ClearSelection => {
                state.selection.clear();
            }

            ReconcilerMessage::PlanDelete { ids, reply } => {
                let plan = plan_bulk_delete(&state.store, &ids);
                tracing::debug!(
                    "Planned delete: {} batch calls, {} jobs by id, {} active, {} blocked, {} unknown",
                    plan.batches.len(),
                    plan.job_ids.len(),
                    plan.active_ids.len(),
                    plan.blocked_ids.len(),
                    plan.unknown_ids.len()
                );
                let _ = reply.send((plan, state.store.snapshot_revision()));
            }

            ReconcilerMessage::RemoveJobs {
                ids,
                baseline,
                reply,
            } => {
                // A snapshot newer than the plan already holds the backend's answer.
                let removed = if is_advance(state.store.snapshot_revision(), baseline) {
                    tracing::debug!(
                        "Snapshot r{:?} already past r{:?}; skipping optimistic removal",
                        state.store.snapshot_revision(),
                        baseline
                    );
                    Vec::new()
                } else {
                    state.store.remove_jobs(&ids)
                };
                if !removed.is_empty() {
                    tracing::debug!("Removed {} deleted jobs", removed.len());
                    state.emit(SyncEvent::JobsDeleted {
                        ids: removed.clone(),
                        timestamp: Utc::now(),
                    });
                }
                let _ = reply.send(removed);
            }

            ReconcilerMessage::ClassifyResidual { plan, reply } => {
                let _ = reply.send(Residual::classify(&state.store, &plan));
            }

            ReconcilerMessage::Shutdown => {
                tracing::info!("Shutting down queue sync engine");
                state.teardown();
                myself.stop(None);
                return Ok(());
            }
        }

        state.publish_status();
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.teardown();
        Ok(())
    }
}
