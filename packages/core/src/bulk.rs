//! Planning and post-reconciliation classification for bulk deletes.
//!
//! Planning turns a selection into the minimal set of backend calls that
//! never touches a non-terminal job and never splits a batch that still has
//! an active member. Classification looks at what is left after the store
//! has been reconciled.

use std::collections::{HashMap, HashSet};

use crate::{BatchRecord, JobId, QueueStore};

/// One whole-batch delete call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDeletion {
    pub batch_id: String,
    pub member_ids: Vec<JobId>,
}

/// The backend calls a bulk delete will issue, plus what it leaves alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletePlan {
    /// Deduplicated selection, in the order given.
    pub selection: Vec<JobId>,
    /// Fully terminal, fully selected batches deleted with one call each.
    pub batches: Vec<BatchDeletion>,
    /// Remaining terminal jobs, deleted with one bulk-by-ids call.
    pub job_ids: Vec<JobId>,
    /// Selected jobs that are not terminal.
    pub active_ids: Vec<JobId>,
    /// Terminal jobs held back because a batch sibling is still active.
    pub blocked_ids: Vec<JobId>,
    /// Selected ids the store does not know.
    pub unknown_ids: Vec<JobId>,
}

impl DeletePlan {
    /// Nothing to send to the backend.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.job_ids.is_empty()
    }

    /// Number of backend calls this plan issues.
    pub fn call_count(&self) -> usize {
        self.batches.len() + usize::from(!self.job_ids.is_empty())
    }

    /// Every id the plan asks the backend to delete.
    pub fn eligible_ids(&self) -> impl Iterator<Item = &JobId> {
        self.batches
            .iter()
            .flat_map(|batch| batch.member_ids.iter())
            .chain(self.job_ids.iter())
    }
}

/// Compute the delete calls for `selection` against the current store.
pub fn plan_bulk_delete(store: &QueueStore, selection: &[JobId]) -> DeletePlan {
    let mut plan = DeletePlan::default();
    let mut seen: HashSet<JobId> = HashSet::new();
    for id in selection {
        if seen.insert(id.clone()) {
            plan.selection.push(id.clone());
        }
    }

    let batches: HashMap<String, BatchRecord> = store
        .batches()
        .into_iter()
        .map(|batch| (batch.batch_id.clone(), batch))
        .collect();
    let mut planned_batches: HashSet<&str> = HashSet::new();

    for id in &plan.selection {
        let Some(job) = store.job(id.as_str()) else {
            plan.unknown_ids.push(id.clone());
            continue;
        };
        if !job.is_terminal() {
            plan.active_ids.push(id.clone());
            continue;
        }

        let batch = job.batch_id.as_deref().and_then(|b| batches.get(b));
        match batch {
            Some(batch) if !batch.is_terminal() => plan.blocked_ids.push(id.clone()),
            Some(batch) if batch.is_fully_selected(&seen) => {
                if planned_batches.insert(batch.batch_id.as_str()) {
                    plan.batches.push(BatchDeletion {
                        batch_id: batch.batch_id.clone(),
                        member_ids: batch.member_ids.clone(),
                    });
                }
            }
            _ => plan.job_ids.push(id.clone()),
        }
    }

    plan
}

/// Selected ids still present once the store has been reconciled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Residual {
    /// Terminal jobs the backend did not delete. Retrying may help.
    pub failed: Vec<JobId>,
    /// Jobs that are active, or held back by an active batch sibling.
    pub not_permitted: Vec<JobId>,
}

impl Residual {
    pub fn classify(store: &QueueStore, plan: &DeletePlan) -> Self {
        let blocked: HashSet<&JobId> = plan.blocked_ids.iter().collect();
        let mut residual = Residual::default();
        for id in &plan.selection {
            let Some(job) = store.job(id.as_str()) else {
                continue;
            };
            if blocked.contains(id) || !job.is_terminal() {
                residual.not_permitted.push(id.clone());
            } else {
                residual.failed.push(id.clone());
            }
        }
        residual
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty() && self.not_permitted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{JobRecord, JobStatus, QueueSnapshot};

    fn ids(list: &[&str]) -> Vec<JobId> {
        list.iter().map(|id| JobId::from(*id)).collect()
    }

    fn store_with(jobs: Vec<JobRecord>) -> QueueStore {
        let mut store = QueueStore::new();
        store.apply_snapshot(QueueSnapshot::new(jobs, Some(1)), Utc::now());
        store
    }

    fn done(id: &str) -> JobRecord {
        JobRecord::new(id, id).with_status(JobStatus::Completed)
    }

    #[test]
    fn never_plans_active_jobs() {
        let store = store_with(vec![
            done("a"),
            JobRecord::new("b", "b").with_status(JobStatus::Processing),
            JobRecord::new("c", "c").with_status(JobStatus::Paused),
        ]);
        let plan = plan_bulk_delete(&store, &ids(&["a", "b", "c", "missing"]));
        assert_eq!(plan.job_ids, ids(&["a"]));
        assert_eq!(plan.active_ids, ids(&["b", "c"]));
        assert_eq!(plan.unknown_ids, ids(&["missing"]));
        assert_eq!(plan.call_count(), 1);
    }

    #[test]
    fn fully_selected_terminal_batch_is_one_call() {
        let store = store_with(vec![
            done("a").with_batch("B"),
            done("b").with_batch("B"),
            JobRecord::new("c", "c").with_batch("B").with_status(JobStatus::Failed),
            done("loose"),
        ]);
        let plan = plan_bulk_delete(&store, &ids(&["a", "b", "c", "loose"]));
        assert_eq!(
            plan.batches,
            vec![BatchDeletion {
                batch_id: "B".into(),
                member_ids: ids(&["a", "b", "c"]),
            }]
        );
        assert_eq!(plan.job_ids, ids(&["loose"]));
        assert_eq!(plan.call_count(), 2);
        assert_eq!(plan.eligible_ids().count(), 4);
    }

    #[test]
    fn batch_with_active_sibling_is_excluded_entirely() {
        let store = store_with(vec![
            done("a").with_batch("B"),
            JobRecord::new("b", "b").with_batch("B").with_status(JobStatus::Processing),
        ]);
        let plan = plan_bulk_delete(&store, &ids(&["a", "b"]));
        assert!(plan.is_empty());
        assert_eq!(plan.blocked_ids, ids(&["a"]));
        assert_eq!(plan.active_ids, ids(&["b"]));
    }

    #[test]
    fn partially_selected_terminal_batch_goes_by_ids() {
        let store = store_with(vec![done("a").with_batch("B"), done("b").with_batch("B")]);
        let plan = plan_bulk_delete(&store, &ids(&["a", "a"]));
        assert!(plan.batches.is_empty());
        assert_eq!(plan.job_ids, ids(&["a"]));
        assert_eq!(plan.selection, ids(&["a"]));
    }

    #[test]
    fn residual_classification() {
        let store = store_with(vec![
            done("a").with_batch("B"),
            JobRecord::new("b", "b").with_batch("B").with_status(JobStatus::Processing),
            done("c"),
            done("d"),
        ]);
        let plan = plan_bulk_delete(&store, &ids(&["a", "b", "c", "d"]));

        let mut reconciled = store.clone();
        reconciled.remove_jobs(&ids(&["d"]));
        let residual = Residual::classify(&reconciled, &plan);
        assert_eq!(residual.failed, ids(&["c"]));
        assert_eq!(residual.not_permitted, ids(&["a", "b"]));
        assert!(!residual.is_empty());
    }
}
