mod common;

use std::error::Error;

use queue_actors::{BackendError, InMemoryBackend, QueueSync, SyncError};
use queue_core::{
    JobPatch, JobStatus, QueueDelta, QueueSnapshot, StartupGate, SyncConfig, SyncEvent,
};

use common::{done, drain, running, settle, start, start_loaded, start_with, test_config};

#[tokio::test(start_paused = true)]
async fn highest_snapshot_wins_in_any_order() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::new();
    let sync = start(&backend).await?;

    // Same burst, and one message per window.
    sync.push(QueueSnapshot::new(vec![running("c", 30.0)], Some(3)))?;
    sync.push(QueueSnapshot::new(vec![running("a", 10.0)], Some(1)))?;
    sync.push(QueueSnapshot::new(vec![running("b", 20.0)], Some(2)))?;
    settle(50).await;
    sync.push(QueueSnapshot::new(vec![running("a", 10.0)], Some(1)))?;
    settle(50).await;
    sync.push(QueueSnapshot::new(vec![running("b", 20.0)], Some(2)))?;
    settle(50).await;

    let jobs = sync.jobs().await?;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id.as_str(), "c");
    assert_eq!(sync.status().await?.snapshot_revision, Some(3));

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn bursts_coalesce_into_one_apply() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::new();
    let sync = start(&backend).await?;
    sync.push(QueueSnapshot::new(vec![running("a", 0.0)], Some(1)))?;
    settle(50).await;

    let mut events = sync.subscribe_events();
    for rev in 1..=100u64 {
        sync.push(QueueDelta::new(
            1,
            rev,
            vec![JobPatch::new("a").with_progress(rev as f64)],
        ))?;
    }
    settle(50).await;

    let applied = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, SyncEvent::DeltaApplied { .. }))
        .count();
    assert_eq!(applied, 1);
    let job = sync.job("a").await?.ok_or("job missing")?;
    assert_eq!(job.progress, 100.0);
    assert_eq!(sync.status().await?.delta_revision, Some(100));

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_window_flushes_its_own_push() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::new();
    let sync = start(&backend).await?;
    sync.push(QueueSnapshot::new(vec![running("a", 0.0)], Some(1)))?;
    settle(40).await;

    // One push per window, each landing right after the previous flush.
    for rev in 1..=20u64 {
        sync.push(QueueDelta::new(
            1,
            rev,
            vec![JobPatch::new("a").with_progress(rev as f64)],
        ))?;
        settle(40).await;
        let job = sync.job("a").await?.ok_or("job missing")?;
        assert_eq!(job.progress, rev as f64, "push {rev} was not flushed");
    }

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn deltas_merge_field_wise_and_never_regress() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::new();
    let sync = start(&backend).await?;
    sync.push(QueueSnapshot::new(
        vec![running("a", 0.0).with_status(JobStatus::Queued)],
        Some(1),
    ))?;
    settle(50).await;

    // Disjoint fields in one window, newest first.
    sync.push(QueueDelta::new(1, 2, vec![JobPatch::new("a").with_status(JobStatus::Processing)]))?;
    sync.push(QueueDelta::new(1, 1, vec![JobPatch::new("a").with_progress(40.0)]))?;
    settle(50).await;
    let job = sync.job("a").await?.ok_or("job missing")?;
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.progress, 40.0);

    sync.push(QueueDelta::new(1, 4, vec![JobPatch::new("a").with_progress(60.0)]))?;
    settle(50).await;
    sync.push(QueueDelta::new(1, 3, vec![JobPatch::new("a").with_progress(50.0)]))?;
    settle(50).await;
    let job = sync.job("a").await?.ok_or("job missing")?;
    assert_eq!(job.progress, 60.0);

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn delta_can_introduce_a_job_before_any_snapshot() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::new();
    let sync = start(&backend).await?;

    sync.push(QueueDelta::new(4, 1, vec![JobPatch::new("new").with_progress(5.0)]))?;
    settle(50).await;

    let job = sync.job("new").await?.ok_or("job missing")?;
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.progress, 5.0);

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn ahead_delta_waits_for_its_snapshot() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::new();
    let sync = start(&backend).await?;
    sync.push(QueueSnapshot::new(vec![running("a", 10.0)], Some(1)))?;
    settle(50).await;

    sync.push(QueueDelta::new(2, 1, vec![JobPatch::new("a").with_progress(70.0)]))?;
    settle(50).await;
    let job = sync.job("a").await?.ok_or("job missing")?;
    assert_eq!(job.progress, 10.0);
    assert_eq!(sync.status().await?.ahead_base, Some(2));

    sync.push(QueueSnapshot::new(vec![running("a", 20.0)], Some(2)))?;
    settle(50).await;
    let job = sync.job("a").await?.ok_or("job missing")?;
    assert_eq!(job.progress, 70.0);
    let status = sync.status().await?;
    assert_eq!(status.ahead_base, None);
    assert_eq!(status.delta_revision, Some(1));

    // The catch-up pull was cancelled with the buffer.
    settle(5_000).await;
    assert_eq!(backend.pull_count(), 0);

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn newer_snapshot_discards_ahead_buffer() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::new();
    let sync = start(&backend).await?;
    sync.push(QueueSnapshot::new(vec![running("a", 10.0)], Some(1)))?;
    settle(50).await;

    sync.push(QueueDelta::new(2, 1, vec![JobPatch::new("a").with_progress(70.0)]))?;
    settle(50).await;
    sync.push(QueueSnapshot::new(vec![running("a", 80.0)], Some(3)))?;
    settle(50).await;

    let job = sync.job("a").await?.ok_or("job missing")?;
    assert_eq!(job.progress, 80.0);
    assert_eq!(sync.status().await?.ahead_base, None);

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn missing_base_triggers_rate_limited_catchup() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::with_jobs(vec![running("a", 10.0)]);
    let sync = start(&backend).await?;
    sync.push(QueueSnapshot::new(vec![running("a", 10.0)], Some(1)))?;
    sync.push(QueueDelta::new(5, 1, vec![JobPatch::new("a").with_progress(90.0)]))?;

    settle(1_400).await;
    assert_eq!(backend.pull_count(), 0);

    // The pull lands behind the buffered base, so it has to retry.
    settle(200).await;
    assert_eq!(backend.pull_count(), 1);
    settle(10_000).await;
    assert_eq!(backend.pull_count(), 1);
    settle(30_000).await;
    assert_eq!(backend.pull_count(), 2);

    let job = sync.job("a").await?.ok_or("job missing")?;
    assert_eq!(job.progress, 10.0);

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn push_before_idle_cancels_startup_pull() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::with_jobs(vec![running("a", 10.0)]);
    let config = SyncConfig {
        startup_idle_timeout_ms: Some(5_000),
        ..SyncConfig::default()
    };
    let sync = start_with(&backend, config).await?;

    sync.push(QueueSnapshot::new(vec![running("a", 12.0)], Some(1)))?;
    settle(10).await;
    sync.signal_idle()?;
    settle(6_000).await;

    assert_eq!(backend.pull_count(), 0);
    assert_eq!(sync.status().await?.startup, StartupGate::Cancelled);

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn idle_signal_opens_startup_gate() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::with_jobs(vec![running("a", 10.0), done("b")]);
    let sync = start(&backend).await?;
    settle(60_000).await;
    assert_eq!(backend.pull_count(), 0);

    sync.signal_idle()?;
    sync.signal_idle()?;
    settle(10).await;

    assert_eq!(backend.pull_count(), 1);
    assert_eq!(sync.jobs().await?.len(), 2);
    let status = sync.status().await?;
    assert_eq!(status.startup, StartupGate::Fired);
    assert_eq!(status.snapshot_revision, Some(1));

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn idle_timeout_opens_gate_without_signal() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::with_jobs(vec![running("a", 10.0)]);
    let sync = start_with(&backend, SyncConfig::default()).await?;

    settle(4_900).await;
    assert_eq!(backend.pull_count(), 0);
    settle(200).await;
    assert_eq!(backend.pull_count(), 1);

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn safety_net_pulls_when_push_stalls() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::with_jobs(vec![running("a", 10.0)]);
    let sync = start_loaded(&backend).await?;

    // Changes the backend never pushes.
    backend.set_jobs(vec![running("a", 55.0), running("b", 1.0)]);

    settle(59_000).await;
    assert_eq!(backend.pull_count(), 0);
    settle(22_000).await;
    assert_eq!(backend.pull_count(), 1);
    assert_eq!(sync.jobs().await?.len(), 2);

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn safety_net_skips_an_empty_queue() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::new();
    let sync = start_loaded(&backend).await?;

    settle(200_000).await;
    assert_eq!(backend.pull_count(), 0);

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_subscription_degrades_to_polling() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::with_jobs(vec![running("a", 10.0)]);
    backend.fail_subscribe(Some(BackendError::Unavailable("no listener".into())));
    let sync = QueueSync::start(backend.clone(), test_config()).await?;
    settle(1).await;

    assert!(sync.status().await?.polling_only);

    // Never opened the gate and never saw a job, yet the poller still pulls.
    settle(21_000).await;
    assert_eq!(backend.pull_count(), 1);
    assert_eq!(sync.jobs().await?.len(), 1);

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn full_pull_reports_backend_errors() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::with_jobs(vec![running("a", 10.0)]);
    let sync = start(&backend).await?;

    sync.full_pull().await?;
    assert_eq!(sync.jobs().await?.len(), 1);

    backend.fail_pulls(Some(BackendError::Transport("socket closed".into())));
    let err = sync.full_pull().await.unwrap_err();
    assert_eq!(
        err,
        SyncError::Backend(BackendError::Transport("socket closed".into()))
    );
    assert_eq!(sync.jobs().await?.len(), 1);

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn backend_pushes_reach_the_store() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::with_jobs(vec![running("a", 10.0)]);
    let sync = start(&backend).await?;

    backend.publish_snapshot();
    settle(50).await;
    backend.publish_delta(vec![JobPatch::new("a").with_progress(35.0)]);
    settle(50).await;

    let job = sync.job("a").await?.ok_or("job missing")?;
    assert_eq!(job.progress, 35.0);
    let status = sync.status().await?;
    assert_eq!(status.snapshot_revision, Some(2));
    assert_eq!(status.delta_revision, Some(1));
    assert!(status.last_snapshot_at.is_some());

    sync.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_work() -> Result<(), Box<dyn Error>> {
    let backend = InMemoryBackend::with_jobs(vec![running("a", 10.0)]);
    let sync = start(&backend).await?;
    sync.push(QueueSnapshot::new(vec![running("a", 10.0)], Some(1)))?;
    sync.push(QueueDelta::new(9, 1, vec![JobPatch::new("a").with_progress(90.0)]))?;
    settle(50).await;

    sync.shutdown().await?;
    settle(120_000).await;

    assert_eq!(backend.pull_count(), 0);
    assert_eq!(sync.jobs().await.unwrap_err(), SyncError::ShuttingDown);
    assert!(sync.push(QueueSnapshot::default()).is_err());
    Ok(())
}
