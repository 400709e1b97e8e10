//! The seam to the backend process that owns the real queue.

use futures_util::future::BoxFuture;
use queue_core::{JobId, PushEvent, QueueSnapshot};
use tokio::sync::mpsc;

/// Future type returned by backend calls.
pub type BackendFuture<T> = BoxFuture<'static, Result<T, BackendError>>;

/// Calls the engine makes against the backend.
///
/// Futures are `'static` so the engine can drive them from spawned tasks;
/// implementations clone whatever handle they need into the future.
pub trait QueueBackend: Send + Sync + 'static {
    /// Pull the full, authoritative queue state.
    fn get_queue_state(&self) -> BackendFuture<QueueSnapshot>;

    /// Delete terminal jobs by id. `Ok(false)` means the backend refused.
    fn delete_jobs(&self, ids: Vec<JobId>) -> BackendFuture<bool>;

    /// Delete every member of a batch in one call.
    fn delete_batch(&self, batch_id: String) -> BackendFuture<bool>;

    /// Register a push listener. An error means push is unavailable.
    fn subscribe(&self) -> BackendFuture<mpsc::Receiver<PushEvent>>;
}

/// Failure of a backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Whether trying the same call again may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BackendError::Rejected(_))
    }
}
