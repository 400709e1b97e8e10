//! Bulk delete orchestration.
//!
//! Planning happens inside the actor so it sees one consistent store. The
//! backend calls and the wait for confirmation run here, on the caller's
//! task, while the actor keeps applying push messages.

use std::time::Duration;

use queue_core::{JobId, PullReason, Revision, revision::is_advance};

use crate::backend::BackendError;
use crate::handle::QueueSync;
use crate::messages::SyncError;

/// How the store was brought back in line after the deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// A pushed snapshot advanced the revision in time.
    PushConfirmed,
    /// No confirmation arrived; a full pull was issued.
    FullPull,
    /// Nothing was deleted.
    NotNeeded,
}

/// Result of a bulk delete that fully succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkDeleteOutcome {
    pub deleted: Vec<JobId>,
    /// Batches removed with a single whole-batch call.
    pub batches_deleted: Vec<String>,
    pub backend_calls: usize,
    pub reconciliation: Reconciliation,
}

/// Error type for bulk deletes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BulkDeleteError {
    #[error("delete request failed: {source}")]
    Backend { source: BackendError },

    #[error("{} jobs were not deleted", .ids.len())]
    DeletionFailed { ids: Vec<JobId> },

    #[error("{} jobs are active and cannot be deleted", .ids.len())]
    NotPermittedOnActive { ids: Vec<JobId> },

    #[error(transparent)]
    Engine(#[from] SyncError),
}

impl BulkDeleteError {
    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            BulkDeleteError::Backend { source } => {
                format!("Deleting the selected jobs failed ({}). Please try again.", source)
            }
            BulkDeleteError::DeletionFailed { ids } => {
                format!("{} job(s) could not be deleted. Please try again.", ids.len())
            }
            BulkDeleteError::NotPermittedOnActive { ids } => format!(
                "{} job(s) are still queued or running and cannot be deleted. Stop them first.",
                ids.len()
            ),
            BulkDeleteError::Engine(e) => format!("Queue sync is not available: {}", e),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            BulkDeleteError::Backend { source } => source.is_retryable(),
            BulkDeleteError::DeletionFailed { .. } => true,
            BulkDeleteError::NotPermittedOnActive { .. } => false,
            BulkDeleteError::Engine(SyncError::Backend(source)) => source.is_retryable(),
            BulkDeleteError::Engine(_) => false,
        }
    }

    /// Ids left behind, for the residual variants.
    pub fn ids(&self) -> &[JobId] {
        match self {
            BulkDeleteError::DeletionFailed { ids } | BulkDeleteError::NotPermittedOnActive { ids } => {
                ids.as_slice()
            }
            _ => &[],
        }
    }
}

pub(crate) async fn bulk_delete(
    sync: &QueueSync,
    ids: Vec<JobId>,
) -> Result<BulkDeleteOutcome, BulkDeleteError> {
    let result = run(sync, ids).await;
    if sync.clear_selection().is_err() {
        tracing::debug!("Engine stopped before the selection could be cleared");
    }
    result
}

async fn run(sync: &QueueSync, ids: Vec<JobId>) -> Result<BulkDeleteOutcome, BulkDeleteError> {
    let (plan, baseline) = sync.plan_delete(ids).await?;
    if plan.is_empty() {
        tracing::debug!("Nothing eligible for deletion");
    } else {
        tracing::info!(
            "Deleting {} batches and {} jobs",
            plan.batches.len(),
            plan.job_ids.len()
        );
    }

    let backend = sync.backend();
    let mut first_error: Option<BackendError> = None;
    let mut confirmed: Vec<JobId> = Vec::new();
    let mut batches_deleted = Vec::new();
    let mut backend_calls = 0;

    for batch in &plan.batches {
        backend_calls += 1;
        match backend.delete_batch(batch.batch_id.clone()).await {
            Ok(true) => {
                confirmed.extend(batch.member_ids.iter().cloned());
                batches_deleted.push(batch.batch_id.clone());
            }
            Ok(false) => {
                tracing::warn!("Backend refused to delete batch {}", batch.batch_id);
                first_error.get_or_insert_with(|| {
                    BackendError::Rejected(format!("batch {} was not deleted", batch.batch_id))
                });
            }
            Err(error) => {
                tracing::warn!("Failed to delete batch {}: {}", batch.batch_id, error);
                first_error.get_or_insert(error);
            }
        }
    }

    if !plan.job_ids.is_empty() {
        backend_calls += 1;
        match backend.delete_jobs(plan.job_ids.clone()).await {
            Ok(true) => confirmed.extend(plan.job_ids.iter().cloned()),
            Ok(false) => {
                tracing::warn!("Backend refused to delete {} jobs", plan.job_ids.len());
                first_error.get_or_insert_with(|| {
                    BackendError::Rejected(format!("{} jobs were not deleted", plan.job_ids.len()))
                });
            }
            Err(error) => {
                tracing::warn!("Failed to delete {} jobs: {}", plan.job_ids.len(), error);
                first_error.get_or_insert(error);
            }
        }
    }

    let mut pull_error = None;
    let reconciliation = if confirmed.is_empty() {
        Reconciliation::NotNeeded
    } else {
        sync.remove_jobs(confirmed.clone(), baseline).await?;
        if wait_for_advance(sync, baseline, sync.config().delete_confirm_timeout()).await {
            Reconciliation::PushConfirmed
        } else {
            tracing::debug!("No confirmation pushed; pulling queue state");
            if let Err(error) = sync.pull(PullReason::DeleteReconcile).await {
                tracing::warn!("Reconciliation pull failed: {}", error);
                pull_error = Some(error);
            }
            Reconciliation::FullPull
        }
    };

    let residual = sync.classify_residual(plan).await?;

    if let Some(source) = first_error {
        return Err(BulkDeleteError::Backend { source });
    }
    if !residual.failed.is_empty() {
        return Err(BulkDeleteError::DeletionFailed {
            ids: residual.failed,
        });
    }
    if !residual.not_permitted.is_empty() {
        return Err(BulkDeleteError::NotPermittedOnActive {
            ids: residual.not_permitted,
        });
    }
    if let Some(error) = pull_error {
        return Err(BulkDeleteError::Engine(error));
    }

    confirmed.sort();
    Ok(BulkDeleteOutcome {
        deleted: confirmed,
        batches_deleted,
        backend_calls,
        reconciliation,
    })
}

/// Wait until a snapshot newer than `baseline` has been applied.
async fn wait_for_advance(sync: &QueueSync, baseline: Option<Revision>, timeout: Duration) -> bool {
    let mut status = sync.watch_status();
    let advanced = status.wait_for(|current| is_advance(current.snapshot_revision, baseline));
    matches!(tokio::time::timeout(timeout, advanced).await, Ok(Ok(_)))
}
