#![allow(dead_code)]

use std::time::Duration;

use queue_actors::{InMemoryBackend, QueueSync, SyncError};
use queue_core::{JobRecord, JobStatus, SyncConfig, SyncEvent};
use tokio::sync::broadcast;

/// Defaults, except the startup gate only opens on an explicit idle signal.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        startup_idle_timeout_ms: None,
        ..SyncConfig::default()
    }
}

/// Start the engine and let the push subscription register.
pub async fn start_with(backend: &InMemoryBackend, config: SyncConfig) -> Result<QueueSync, SyncError> {
    let sync = QueueSync::start(backend.clone(), config).await?;
    settle(1).await;
    Ok(sync)
}

pub async fn start(backend: &InMemoryBackend) -> Result<QueueSync, SyncError> {
    start_with(backend, test_config()).await
}

/// Start, open the startup gate and wait for the initial pull to land.
pub async fn start_loaded(backend: &InMemoryBackend) -> Result<QueueSync, SyncError> {
    let sync = start(backend).await?;
    sync.signal_idle()?;
    settle(10).await;
    backend.clear_calls();
    Ok(sync)
}

/// Let the (paused) clock run for `ms` so timers and the mailbox drain.
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

pub fn job(id: &str, status: JobStatus) -> JobRecord {
    JobRecord::new(id, format!("{id}.mkv")).with_status(status)
}

pub fn done(id: &str) -> JobRecord {
    job(id, JobStatus::Completed)
}

pub fn running(id: &str, progress: f64) -> JobRecord {
    job(id, JobStatus::Processing).with_progress(progress)
}

/// Everything currently buffered on an event receiver.
pub fn drain(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
