//! A scriptable in-process backend.
//!
//! Holds its own copy of the queue, emits snapshots and deltas to
//! subscribers on request, and records every call so tests and the demo
//! binary can observe what the engine did.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use queue_core::{
    JobId, JobPatch, JobRecord, PushEvent, QueueDelta, QueueSnapshot, Revision, batches_of,
};
use tokio::sync::mpsc;

use crate::backend::{BackendError, BackendFuture, QueueBackend};

const PUSH_BUFFER: usize = 256;

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    GetQueueState,
    DeleteJobs(Vec<JobId>),
    DeleteBatch(String),
    Subscribe,
}

#[derive(Debug)]
struct BackendState {
    jobs: Vec<JobRecord>,
    revision: Revision,
    delta_revision: Revision,
    subscribers: Vec<mpsc::Sender<PushEvent>>,
    calls: Vec<BackendCall>,
    pull_error: Option<BackendError>,
    delete_error: Option<BackendError>,
    subscribe_error: Option<BackendError>,
    refuse_deletes: bool,
    lost_deletes: HashSet<JobId>,
    push_on_delete: bool,
    /// Held between performing a delete and answering it.
    delete_reply_delay: Option<Duration>,
}

impl BackendState {
    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot::new(self.jobs.clone(), Some(self.revision))
    }

    fn bump(&mut self) {
        self.revision += 1;
        self.delta_revision = 0;
    }

    fn emit(&mut self, event: PushEvent) {
        self.subscribers
            .retain(|tx| !matches!(tx.try_send(event.clone()), Err(mpsc::error::TrySendError::Closed(_))));
    }

    /// Remove the deletable jobs among `ids` and push the new state.
    fn remove(&mut self, ids: &HashSet<JobId>) {
        let before = self.jobs.len();
        self.jobs
            .retain(|job| !(ids.contains(&job.id) && !self.lost_deletes.contains(&job.id)));
        if self.jobs.len() != before {
            self.bump();
            if self.push_on_delete {
                let snapshot = self.snapshot();
                self.emit(snapshot.into());
            }
        }
    }
}

/// In-memory [`QueueBackend`].
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<BackendState>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BackendState {
                jobs: Vec::new(),
                revision: 1,
                delta_revision: 0,
                subscribers: Vec::new(),
                calls: Vec::new(),
                pull_error: None,
                delete_error: None,
                subscribe_error: None,
                refuse_deletes: false,
                lost_deletes: HashSet::new(),
                push_on_delete: true,
                delete_reply_delay: None,
            })),
        }
    }

    /// Backend seeded with `jobs` at revision 1.
    pub fn with_jobs(jobs: Vec<JobRecord>) -> Self {
        let backend = Self::new();
        backend.lock().jobs = jobs;
        backend
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        self.lock().jobs.clone()
    }

    pub fn revision(&self) -> Revision {
        self.lock().revision
    }

    /// Replace the queue without telling subscribers.
    pub fn set_jobs(&self, jobs: Vec<JobRecord>) {
        let mut state = self.lock();
        state.jobs = jobs;
        state.bump();
    }

    /// Patch one job without telling subscribers.
    pub fn update_job(&self, patch: JobPatch) {
        let mut state = self.lock();
        if let Some(job) = state.jobs.iter_mut().find(|job| job.id == patch.id) {
            patch.apply_to(job);
        }
    }

    /// Emit the current queue as a new snapshot revision.
    pub fn publish_snapshot(&self) -> QueueSnapshot {
        let mut state = self.lock();
        state.bump();
        let snapshot = state.snapshot();
        state.emit(snapshot.clone().into());
        snapshot
    }

    /// Apply `patches` and emit them as the next delta on the current revision.
    pub fn publish_delta(&self, patches: Vec<JobPatch>) -> QueueDelta {
        let mut state = self.lock();
        for patch in &patches {
            match state.jobs.iter_mut().find(|job| job.id == patch.id) {
                Some(job) => patch.clone().apply_to(job),
                None => {
                    let mut job = JobRecord::new(patch.id.clone(), "");
                    patch.clone().apply_to(&mut job);
                    state.jobs.push(job);
                }
            }
        }
        state.delta_revision += 1;
        let delta = QueueDelta::new(state.revision, state.delta_revision, patches);
        state.emit(delta.clone().into());
        delta
    }

    /// Send a raw push message, bypassing the backend's own state.
    pub fn inject(&self, event: impl Into<PushEvent>) {
        self.lock().emit(event.into());
    }

    pub fn fail_pulls(&self, error: Option<BackendError>) {
        self.lock().pull_error = error;
    }

    pub fn fail_deletes(&self, error: Option<BackendError>) {
        self.lock().delete_error = error;
    }

    pub fn fail_subscribe(&self, error: Option<BackendError>) {
        self.lock().subscribe_error = error;
    }

    /// Answer delete calls with `Ok(false)`.
    pub fn refuse_deletes(&self, refuse: bool) {
        self.lock().refuse_deletes = refuse;
    }

    /// Report these ids as deleted but keep them.
    pub fn lose_deletes_of(&self, ids: impl IntoIterator<Item = JobId>) {
        self.lock().lost_deletes.extend(ids);
    }

    /// Whether a successful delete pushes a fresh snapshot (on by default).
    pub fn push_on_delete(&self, enabled: bool) {
        self.lock().push_on_delete = enabled;
    }

    /// Answer delete calls only after `delay`, so their pushes land first.
    pub fn delay_delete_replies(&self, delay: Option<Duration>) {
        self.lock().delete_reply_delay = delay;
    }

    fn delete_reply_delay(&self) -> Option<Duration> {
        self.lock().delete_reply_delay
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    pub fn pull_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, BackendCall::GetQueueState))
            .count()
    }

    pub fn delete_calls(&self) -> Vec<BackendCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, BackendCall::DeleteJobs(_) | BackendCall::DeleteBatch(_)))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn get_queue_state_now(&self) -> Result<QueueSnapshot, BackendError> {
        let mut state = self.lock();
        state.calls.push(BackendCall::GetQueueState);
        match &state.pull_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.snapshot()),
        }
    }

    fn delete_jobs_now(&self, ids: Vec<JobId>) -> Result<bool, BackendError> {
        let mut state = self.lock();
        state.calls.push(BackendCall::DeleteJobs(ids.clone()));
        if let Some(error) = &state.delete_error {
            return Err(error.clone());
        }
        if state.refuse_deletes {
            return Ok(false);
        }

        // Best effort: only terminal jobs go, anything else is skipped.
        let requested: HashSet<JobId> = ids.into_iter().collect();
        let deletable: HashSet<JobId> = state
            .jobs
            .iter()
            .filter(|job| requested.contains(&job.id) && job.is_terminal())
            .map(|job| job.id.clone())
            .collect();
        state.remove(&deletable);
        Ok(true)
    }

    fn delete_batch_now(&self, batch_id: String) -> Result<bool, BackendError> {
        let mut state = self.lock();
        state.calls.push(BackendCall::DeleteBatch(batch_id.clone()));
        if let Some(error) = &state.delete_error {
            return Err(error.clone());
        }
        if state.refuse_deletes {
            return Ok(false);
        }

        // All or nothing: a batch with a live member is not deleted.
        let Some(batch) = batches_of(&state.jobs)
            .into_iter()
            .find(|batch| batch.batch_id == batch_id)
        else {
            return Ok(false);
        };
        if !batch.is_terminal() {
            return Ok(false);
        }
        let members: HashSet<JobId> = batch.member_ids.into_iter().collect();
        state.remove(&members);
        Ok(true)
    }

    fn subscribe_now(&self) -> Result<mpsc::Receiver<PushEvent>, BackendError> {
        let mut state = self.lock();
        state.calls.push(BackendCall::Subscribe);
        if let Some(error) = &state.subscribe_error {
            return Err(error.clone());
        }
        let (tx, rx) = mpsc::channel(PUSH_BUFFER);
        state.subscribers.push(tx);
        Ok(rx)
    }
}

impl QueueBackend for InMemoryBackend {
    fn get_queue_state(&self) -> BackendFuture<QueueSnapshot> {
        let backend = self.clone();
        async move { backend.get_queue_state_now() }.boxed()
    }

    fn delete_jobs(&self, ids: Vec<JobId>) -> BackendFuture<bool> {
        let backend = self.clone();
        async move {
            let result = backend.delete_jobs_now(ids);
            if let Some(delay) = backend.delete_reply_delay() {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed()
    }

    fn delete_batch(&self, batch_id: String) -> BackendFuture<bool> {
        let backend = self.clone();
        async move {
            let result = backend.delete_batch_now(batch_id);
            if let Some(delay) = backend.delete_reply_delay() {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed()
    }

    fn subscribe(&self) -> BackendFuture<mpsc::Receiver<PushEvent>> {
        let backend = self.clone();
        async move { backend.subscribe_now() }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use queue_core::JobStatus;

    use super::*;

    fn done(id: &str) -> JobRecord {
        JobRecord::new(id, id).with_status(JobStatus::Completed)
    }

    #[tokio::test]
    async fn delete_jobs_skips_active() {
        let backend = InMemoryBackend::with_jobs(vec![
            done("a"),
            JobRecord::new("b", "b").with_status(JobStatus::Processing),
        ]);
        let mut rx = backend.subscribe().await.unwrap();

        let ok = backend
            .delete_jobs(vec![JobId::from("a"), JobId::from("b")])
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(backend.jobs().len(), 1);
        assert_eq!(backend.revision(), 2);

        let Some(PushEvent::Snapshot(snapshot)) = rx.recv().await else {
            panic!("expected a snapshot push");
        };
        assert_eq!(snapshot.snapshot_revision, Some(2));
        assert_eq!(snapshot.jobs[0].id.as_str(), "b");
    }

    #[tokio::test]
    async fn batch_with_live_member_is_refused() {
        let backend = InMemoryBackend::with_jobs(vec![
            done("a").with_batch("B"),
            JobRecord::new("b", "b").with_batch("B"),
        ]);
        assert!(!backend.delete_batch("B".into()).await.unwrap());
        assert!(!backend.delete_batch("missing".into()).await.unwrap());
        assert_eq!(backend.jobs().len(), 2);
        assert_eq!(backend.delete_calls().len(), 2);
    }

    #[tokio::test]
    async fn deltas_ride_on_the_current_revision() {
        let backend = InMemoryBackend::with_jobs(vec![done("a")]);
        let first = backend.publish_delta(vec![JobPatch::new("a").with_progress(10.0)]);
        let second = backend.publish_delta(vec![JobPatch::new("n").with_progress(1.0)]);
        assert_eq!((first.base_snapshot_revision, first.delta_revision), (1, 1));
        assert_eq!((second.base_snapshot_revision, second.delta_revision), (1, 2));
        assert_eq!(backend.jobs().len(), 2);

        backend.publish_snapshot();
        let third = backend.publish_delta(vec![JobPatch::new("a").with_progress(20.0)]);
        assert_eq!((third.base_snapshot_revision, third.delta_revision), (2, 1));
    }
}
