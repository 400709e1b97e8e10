//! Message types for the reconciler actor.

use queue_core::{
    BatchRecord, ConfigError, DeletePlan, JobId, JobRecord, PullReason, PushEvent, QueueSnapshot, Residual,
    Revision,
};
use ractor::RpcReplyPort;

use crate::backend::BackendError;
use crate::status::SyncStatus;

/// Messages for the ReconcilerActor.
#[derive(Debug)]
pub enum ReconcilerMessage {
    /// A message from the push channel.
    Push(PushEvent),

    /// The coalescing window elapsed; apply what is pending.
    Flush,

    /// The application is idle; the startup gate may open.
    Idle,

    /// The catch-up delay for buffered deltas elapsed.
    CatchupDue,

    /// Safety-net timer tick.
    SafetyNetTick,

    /// Request a full pull, optionally waiting for it to land.
    FullPull {
        reason: PullReason,
        reply: Option<RpcReplyPort<Result<(), SyncError>>>,
    },

    /// A spawned pull finished.
    PullCompleted {
        reason: PullReason,
        result: Result<QueueSnapshot, BackendError>,
    },

    /// Push registration failed or the channel closed.
    PushUnavailable { error: String },

    /// Get a copy of all jobs.
    GetJobs { reply: RpcReplyPort<Vec<JobRecord>> },

    /// Get a job by ID.
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<Option<JobRecord>>,
    },

    /// Get the derived batches.
    GetBatches { reply: RpcReplyPort<Vec<BatchRecord>> },

    /// Get the sync status.
    GetStatus { reply: RpcReplyPort<SyncStatus> },

    /// Replace the selection.
    SetSelection { ids: Vec<JobId> },

    /// Get the selection.
    GetSelection { reply: RpcReplyPort<Vec<JobId>> },

    /// Clear the selection.
    ClearSelection,

    /// Plan a bulk delete against the current store.
    PlanDelete {
        ids: Vec<JobId>,
        reply: RpcReplyPort<(DeletePlan, Option<Revision>)>,
    },

    /// Remove jobs the backend confirmed as deleted.
    RemoveJobs {
        ids: Vec<JobId>,
        /// Snapshot revision the delete was planned against.
        baseline: Option<Revision>,
        reply: RpcReplyPort<Vec<JobId>>,
    },

    /// Classify what a bulk delete left behind.
    ClassifyResidual {
        plan: DeletePlan,
        reply: RpcReplyPort<Residual>,
    },

    /// Cancel timers, drop buffered state and stop.
    Shutdown,
}

/// Error type for engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("actor error: {0}")]
    Actor(String),

    #[error("queue sync is shutting down")]
    ShuttingDown,
}
