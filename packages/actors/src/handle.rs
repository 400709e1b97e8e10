//! Public handle to a running reconciler.

use std::sync::Arc;

use queue_core::{
    BatchRecord, DeletePlan, JobId, JobRecord, PullReason, PushEvent, Residual, Revision,
    SyncConfig, SyncEvent,
};
use ractor::{Actor, ActorRef, RpcReplyPort};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;

use crate::backend::QueueBackend;
use crate::bulk_delete::{self, BulkDeleteError, BulkDeleteOutcome};
use crate::messages::{ReconcilerMessage, SyncError};
use crate::reconciler::{ReconcilerActor, ReconcilerArgs};
use crate::status::SyncStatus;

/// Cloneable handle to the queue sync engine.
#[derive(Clone)]
pub struct QueueSync {
    actor: ActorRef<ReconcilerMessage>,
    backend: Arc<dyn QueueBackend>,
    config: SyncConfig,
    status_rx: watch::Receiver<SyncStatus>,
    event_tx: broadcast::Sender<SyncEvent>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl QueueSync {
    /// Spawn the engine against `backend`.
    pub async fn start(backend: impl QueueBackend, config: SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let backend: Arc<dyn QueueBackend> = Arc::new(backend);
        let (status_tx, status_rx) = watch::channel(SyncStatus::default());
        let (event_tx, _) = broadcast::channel(config.event_capacity);

        let args = ReconcilerArgs {
            backend: Arc::clone(&backend),
            config: config.clone(),
            status_tx,
            event_tx: event_tx.clone(),
        };
        let (actor, handle) = Actor::spawn(None, ReconcilerActor, args)
            .await
            .map_err(|e| SyncError::Actor(format!("Failed to spawn reconciler: {}", e)))?;

        Ok(Self {
            actor,
            backend,
            config,
            status_rx,
            event_tx,
            join: Arc::new(Mutex::new(Some(handle))),
        })
    }

    fn cast(&self, message: ReconcilerMessage) -> Result<(), SyncError> {
        self.actor
            .send_message(message)
            .map_err(|_| SyncError::ShuttingDown)
    }

    async fn call<T>(
        &self,
        message: impl FnOnce(RpcReplyPort<T>) -> ReconcilerMessage,
    ) -> Result<T, SyncError>
    where
        T: Send + 'static,
    {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.cast(message(tx.into()))?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    /// Feed a push message received outside the backend subscription.
    pub fn push(&self, event: impl Into<PushEvent>) -> Result<(), SyncError> {
        self.cast(ReconcilerMessage::Push(event.into()))
    }

    /// The application finished starting up; opens the startup gate.
    pub fn signal_idle(&self) -> Result<(), SyncError> {
        self.cast(ReconcilerMessage::Idle)
    }

    pub async fn jobs(&self) -> Result<Vec<JobRecord>, SyncError> {
        self.call(|reply| ReconcilerMessage::GetJobs { reply }).await
    }

    pub async fn job(&self, id: impl Into<JobId>) -> Result<Option<JobRecord>, SyncError> {
        let job_id = id.into();
        self.call(|reply| ReconcilerMessage::GetJob { job_id, reply })
            .await
    }

    pub async fn batches(&self) -> Result<Vec<BatchRecord>, SyncError> {
        self.call(|reply| ReconcilerMessage::GetBatches { reply })
            .await
    }

    /// Current status, consistent with everything sent before this call.
    pub async fn status(&self) -> Result<SyncStatus, SyncError> {
        self.call(|reply| ReconcilerMessage::GetStatus { reply })
            .await
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Pull the full queue state and wait until it has been applied.
    pub async fn full_pull(&self) -> Result<(), SyncError> {
        self.pull(PullReason::Manual).await
    }

    pub(crate) async fn pull(&self, reason: PullReason) -> Result<(), SyncError> {
        self.call(|reply| ReconcilerMessage::FullPull {
            reason,
            reply: Some(reply),
        })
        .await?
    }

    pub fn set_selection(&self, ids: impl IntoIterator<Item = impl Into<JobId>>) -> Result<(), SyncError> {
        let ids = ids.into_iter().map(Into::into).collect();
        self.cast(ReconcilerMessage::SetSelection { ids })
    }

    pub async fn selection(&self) -> Result<Vec<JobId>, SyncError> {
        self.call(|reply| ReconcilerMessage::GetSelection { reply })
            .await
    }

    pub(crate) fn clear_selection(&self) -> Result<(), SyncError> {
        self.cast(ReconcilerMessage::ClearSelection)
    }

    /// Delete the terminal jobs among `ids`. Clears the selection either way.
    pub async fn bulk_delete(
        &self,
        ids: impl IntoIterator<Item = impl Into<JobId>>,
    ) -> Result<BulkDeleteOutcome, BulkDeleteError> {
        let ids = ids.into_iter().map(Into::into).collect();
        bulk_delete::bulk_delete(self, ids).await
    }

    /// Bulk delete whatever is currently selected.
    pub async fn delete_selection(&self) -> Result<BulkDeleteOutcome, BulkDeleteError> {
        let ids = self.selection().await?;
        bulk_delete::bulk_delete(self, ids).await
    }

    pub(crate) async fn plan_delete(
        &self,
        ids: Vec<JobId>,
    ) -> Result<(DeletePlan, Option<Revision>), SyncError> {
        self.call(|reply| ReconcilerMessage::PlanDelete { ids, reply })
            .await
    }

    pub(crate) async fn remove_jobs(
        &self,
        ids: Vec<JobId>,
        baseline: Option<Revision>,
    ) -> Result<Vec<JobId>, SyncError> {
        self.call(|reply| ReconcilerMessage::RemoveJobs {
            ids,
            baseline,
            reply,
        })
        .await
    }

    pub(crate) async fn classify_residual(&self, plan: DeletePlan) -> Result<Residual, SyncError> {
        self.call(|reply| ReconcilerMessage::ClassifyResidual { plan, reply })
            .await
    }

    pub(crate) fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Cancel timers, drop buffered state and wait for the engine to stop.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        // Already stopping is fine here.
        let _ = self.cast(ReconcilerMessage::Shutdown);
        if let Some(handle) = self.join.lock().await.take() {
            handle
                .await
                .map_err(|e| SyncError::Actor(format!("Reconciler task failed: {}", e)))?;
        }
        Ok(())
    }
}
