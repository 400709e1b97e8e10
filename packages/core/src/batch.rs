//! Batches derived from jobs sharing a `batch_id`.

use std::collections::{HashMap, HashSet};

use crate::{JobId, JobRecord};

/// A set of jobs sharing a batch id. Computed on read, never transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub batch_id: String,
    pub member_ids: Vec<JobId>,
    /// Members not yet in a terminal status.
    pub active_member_ids: Vec<JobId>,
}

impl BatchRecord {
    /// Every member is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.active_member_ids.is_empty()
    }

    /// Every member is part of `selection`.
    pub fn is_fully_selected(&self, selection: &HashSet<JobId>) -> bool {
        self.member_ids.iter().all(|id| selection.contains(id))
    }

    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }
}

/// Group jobs by batch id, in order of each batch's first member.
pub fn batches_of(jobs: &[JobRecord]) -> Vec<BatchRecord> {
    let mut batches: Vec<BatchRecord> = Vec::new();
    let mut by_id: HashMap<&str, usize> = HashMap::new();

    for job in jobs {
        let Some(batch_id) = job.batch_id.as_deref() else {
            continue;
        };
        let i = *by_id.entry(batch_id).or_insert_with(|| {
            batches.push(BatchRecord {
                batch_id: batch_id.to_string(),
                member_ids: Vec::new(),
                active_member_ids: Vec::new(),
            });
            batches.len() - 1
        });
        let batch = &mut batches[i];
        batch.member_ids.push(job.id.clone());
        if !job.is_terminal() {
            batch.active_member_ids.push(job.id.clone());
        }
    }

    batches
}
