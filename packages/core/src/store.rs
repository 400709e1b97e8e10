//! The reconciled job collection and its two apply pipelines.
//!
//! [`QueueStore`] is the single owned structure holding the mirrored queue.
//! It only changes through [`QueueStore::apply_snapshot`],
//! [`QueueStore::reconcile_snapshot`], [`QueueStore::apply_delta`] and
//! [`QueueStore::remove_jobs`], each of which
//! runs to completion synchronously, so a reader never sees a half-applied
//! update.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::{BatchRecord, batches_of};
use crate::revision::{Revision, is_stale};
use crate::{DeltaRejection, JobId, JobRecord, QueueDelta, QueueSnapshot};

/// Revision bookkeeping of the client view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub last_applied_snapshot_revision: Option<Revision>,
    /// Reset whenever the base snapshot changes.
    pub last_applied_delta_revision: Option<Revision>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
}

/// Result of feeding a snapshot to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The collection was replaced.
    Applied { job_count: usize },
    /// Same revision as the one already applied; only the timestamp moved.
    Duplicate,
    /// Older than the applied revision; dropped.
    Stale {
        revision: Revision,
        current: Revision,
    },
}

/// Result of feeding a delta to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    Applied { patched: usize, created: usize },
    /// Based on a snapshot older than the applied one.
    StaleBase,
    /// Same base, but older than the last applied delta.
    StaleRevision,
    /// Same base and same delta revision as the last applied delta.
    Duplicate,
    /// Based on a snapshot the client has not seen yet. Nothing was applied.
    Ahead,
}

impl DeltaOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, DeltaOutcome::Applied { .. })
    }

    /// Why the delta was dropped, if it was.
    pub fn rejection(&self) -> Option<DeltaRejection> {
        match self {
            DeltaOutcome::StaleBase => Some(DeltaRejection::StaleBase),
            DeltaOutcome::StaleRevision => Some(DeltaRejection::StaleRevision),
            DeltaOutcome::Duplicate => Some(DeltaRejection::Duplicate),
            DeltaOutcome::Applied { .. } | DeltaOutcome::Ahead => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueStore {
    jobs: Vec<JobRecord>,
    index: HashMap<JobId, usize>,
    sync: SyncState,
    /// Base of the last applied delta; orders deltas when snapshots carry no revision.
    delta_base: Option<Revision>,
    /// Ids removed locally after a confirmed delete, ignored by deltas until the next snapshot.
    tombstones: HashSet<JobId>,
    /// Jobs were removed locally since the last applied snapshot.
    locally_modified: bool,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs in backend order.
    pub fn jobs(&self) -> &[JobRecord] {
        &self.jobs
    }

    pub fn job(&self, id: &str) -> Option<&JobRecord> {
        self.index.get(id).map(|&i| &self.jobs[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    pub fn snapshot_revision(&self) -> Option<Revision> {
        self.sync.last_applied_snapshot_revision
    }

    /// Batches derived from the current collection.
    pub fn batches(&self) -> Vec<BatchRecord> {
        batches_of(&self.jobs)
    }

    /// Snapshot apply pipeline.
    ///
    /// A snapshot at the applied revision is a duplicate, whatever happened
    /// locally since.
    pub fn apply_snapshot(&mut self, snapshot: QueueSnapshot, now: DateTime<Utc>) -> SnapshotOutcome {
        self.apply(snapshot, now, false)
    }

    /// Apply a snapshot pulled to reconcile optimistic removals.
    ///
    /// Unlike [`apply_snapshot`](Self::apply_snapshot), a snapshot at the
    /// applied revision replaces the collection when jobs were removed
    /// locally, restoring any the backend kept. The delta position is kept.
    pub fn reconcile_snapshot(&mut self, snapshot: QueueSnapshot, now: DateTime<Utc>) -> SnapshotOutcome {
        self.apply(snapshot, now, true)
    }

    fn apply(&mut self, snapshot: QueueSnapshot, now: DateTime<Utc>, restore_removed: bool) -> SnapshotOutcome {
        let current = self.sync.last_applied_snapshot_revision;
        if let (Some(revision), Some(current)) = (snapshot.snapshot_revision, current)
            && is_stale(Some(revision), Some(current))
        {
            return SnapshotOutcome::Stale { revision, current };
        }

        let same_revision = snapshot.snapshot_revision.is_some() && snapshot.snapshot_revision == current;
        if same_revision && !(restore_removed && self.locally_modified) {
            self.sync.last_snapshot_at = Some(now);
            return SnapshotOutcome::Duplicate;
        }

        let mut jobs: Vec<JobRecord> = Vec::with_capacity(snapshot.jobs.len());
        let mut index = HashMap::with_capacity(snapshot.jobs.len());
        for job in snapshot.jobs {
            match index.get(&job.id) {
                Some(&i) => jobs[i] = job,
                None => {
                    index.insert(job.id.clone(), jobs.len());
                    jobs.push(job);
                }
            }
        }

        let last_applied_delta_revision = if same_revision {
            self.sync.last_applied_delta_revision
        } else {
            None
        };

        self.jobs = jobs;
        self.index = index;
        self.tombstones.clear();
        self.locally_modified = false;
        if !same_revision {
            self.delta_base = None;
        }
        self.sync = SyncState {
            last_applied_snapshot_revision: snapshot.snapshot_revision,
            last_applied_delta_revision,
            last_snapshot_at: Some(now),
        };

        SnapshotOutcome::Applied {
            job_count: self.jobs.len(),
        }
    }

    /// Decide what [`apply_delta`](Self::apply_delta) would do, without applying.
    pub fn classify_delta(&self, delta: &QueueDelta) -> DeltaOutcome {
        let current = self.sync.last_applied_snapshot_revision;
        let base = delta.base_snapshot_revision;
        if is_stale(Some(base), current) {
            return DeltaOutcome::StaleBase;
        }
        if current.is_some_and(|current| base > current) {
            return DeltaOutcome::Ahead;
        }

        let ordering_base = current.or(self.delta_base);
        if ordering_base == Some(base) {
            let last = self.sync.last_applied_delta_revision;
            if is_stale(Some(delta.delta_revision), last) {
                return DeltaOutcome::StaleRevision;
            }
            if last == Some(delta.delta_revision) {
                return DeltaOutcome::Duplicate;
            }
        }

        DeltaOutcome::Applied {
            patched: 0,
            created: 0,
        }
    }

    /// Delta apply pipeline.
    pub fn apply_delta(&mut self, delta: QueueDelta) -> DeltaOutcome {
        let verdict = self.classify_delta(&delta);
        if !verdict.is_applied() {
            return verdict;
        }

        let mut patched = 0;
        let mut created = 0;
        for patch in delta.patches {
            if self.tombstones.contains(&patch.id) {
                continue;
            }
            let i = match self.index.get(&patch.id) {
                Some(&i) => i,
                None => {
                    let i = self.jobs.len();
                    self.index.insert(patch.id.clone(), i);
                    self.jobs.push(JobRecord::placeholder(patch.id.clone()));
                    created += 1;
                    i
                }
            };
            patch.apply_to(&mut self.jobs[i]);
            patched += 1;
        }

        if self.sync.last_applied_snapshot_revision.is_none()
            && self.delta_base != Some(delta.base_snapshot_revision)
        {
            self.delta_base = Some(delta.base_snapshot_revision);
        }
        self.sync.last_applied_delta_revision = Some(delta.delta_revision);

        DeltaOutcome::Applied { patched, created }
    }

    /// Remove jobs locally after the backend confirmed their deletion.
    ///
    /// Returns the ids that were actually present.
    pub fn remove_jobs<'a>(&mut self, ids: impl IntoIterator<Item = &'a JobId>) -> Vec<JobId> {
        let mut removed = Vec::new();
        let doomed: HashSet<&JobId> = ids.into_iter().collect();
        for id in &doomed {
            if self.index.contains_key(id.as_str()) {
                removed.push((*id).clone());
            }
            self.tombstones.insert((*id).clone());
        }
        if removed.is_empty() {
            return removed;
        }

        self.jobs.retain(|job| !doomed.contains(&job.id));
        self.locally_modified = true;
        self.index = self
            .jobs
            .iter()
            .enumerate()
            .map(|(i, job)| (job.id.clone(), i))
            .collect();
        removed.sort();
        removed
    }
}
