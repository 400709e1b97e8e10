//! Drives the sync engine against the in-memory backend with bursty,
//! reordered push traffic, then bulk deletes the finished jobs.

use std::error::Error;
use std::time::Duration;

use queue_actors::{InMemoryBackend, QueueSync};
use queue_core::{JobId, JobPatch, JobRecord, JobStatus, QueueDelta, SyncConfig};
use tokio::sync::broadcast::error::RecvError;
use ulid::Ulid;

const JOBS: usize = 8;
const BATCH_SIZE: usize = 3;

fn seed_jobs() -> Vec<JobRecord> {
    let batch_id = Ulid::new().to_string();
    (0..JOBS)
        .map(|i| {
            let id = Ulid::new().to_string();
            let job = JobRecord::new(id, format!("clip-{i:02}.mkv"));
            if i < BATCH_SIZE {
                job.with_batch(batch_id.clone())
            } else {
                job
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = SyncConfig::from_env()?;
    let backend = InMemoryBackend::with_jobs(seed_jobs());
    let sync = QueueSync::start(backend.clone(), config).await?;

    let mut events = sync.subscribe_events();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(
                    "[{}] {}",
                    event.timestamp().format("%H:%M:%S%.3f"),
                    event.description()
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event log fell behind, skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    sync.signal_idle()?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let ids: Vec<JobId> = backend.jobs().into_iter().map(|job| job.id).collect();

    // Progress bursts, well inside one coalescing window.
    for step in 1..=10u32 {
        let patches = ids
            .iter()
            .map(|id| {
                JobPatch::new(id.clone())
                    .with_status(JobStatus::Processing)
                    .with_progress(f64::from(step) * 10.0)
            })
            .collect();
        backend.publish_delta(patches);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Snapshots delivered out of order; the older one is dropped.
    let older = backend.publish_snapshot();
    let newer = backend.publish_snapshot();
    backend.inject(newer);
    backend.inject(older);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A delta for a snapshot that has not arrived yet waits in the ahead buffer.
    let next_base = backend.revision() + 1;
    backend.inject(QueueDelta::new(
        next_base,
        1,
        vec![JobPatch::new(ids[0].clone()).with_elapsed_ms(90_000)],
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    backend.publish_snapshot();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Finish everything but the last job, then delete the whole selection.
    let finished = ids[..ids.len() - 1]
        .iter()
        .map(|id| JobPatch::new(id.clone()).with_status(JobStatus::Completed).with_progress(100.0))
        .collect();
    backend.publish_delta(finished);
    tokio::time::sleep(Duration::from_millis(50)).await;

    sync.set_selection(ids.clone())?;
    match sync.delete_selection().await {
        Ok(outcome) => tracing::info!(
            "Deleted {} jobs with {} calls ({:?})",
            outcome.deleted.len(),
            outcome.backend_calls,
            outcome.reconciliation
        ),
        Err(e) => tracing::warn!("{}", e.user_message()),
    }

    let status = sync.status().await?;
    tracing::info!(
        "Final state: revision {:?}, {} jobs left",
        status.snapshot_revision,
        status.job_count
    );

    sync.shutdown().await?;
    drop(sync);
    logger.abort();
    Ok(())
}
