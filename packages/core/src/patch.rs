//! Sparse per-job patches and the field-wise patch accumulator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::revision::Revision;
use crate::{JobId, JobRecord, JobStatus};

/// Changed fields for one job. `None` means "unchanged", never "cleared".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    pub id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_out_time_seconds: Option<f64>,
    #[serde(
        rename = "outputSizeMB",
        alias = "outputSizeMb",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub output_size_mb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_revision: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Changed descriptive fields, merged key by key into the record's `extra`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobPatch {
    /// An empty patch for `id`.
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            status: None,
            progress: None,
            batch_id: None,
            elapsed_ms: None,
            progress_speed: None,
            progress_out_time_seconds: None,
            output_size_mb: None,
            preview_path: None,
            preview_revision: None,
            failure_reason: None,
            extra: Map::new(),
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_preview(mut self, path: impl Into<String>, revision: u64) -> Self {
        self.preview_path = Some(path.into());
        self.preview_revision = Some(revision);
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = Some(elapsed_ms);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// True when the patch carries no field at all.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.progress.is_none()
            && self.batch_id.is_none()
            && self.elapsed_ms.is_none()
            && self.progress_speed.is_none()
            && self.progress_out_time_seconds.is_none()
            && self.output_size_mb.is_none()
            && self.preview_path.is_none()
            && self.preview_revision.is_none()
            && self.failure_reason.is_none()
            && self.extra.is_empty()
    }

    /// Shallow-merge every present field into `record`.
    pub fn apply_to(self, record: &mut JobRecord) {
        debug_assert_eq!(record.id, self.id);
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(progress) = self.progress {
            record.progress = progress;
        }
        if self.batch_id.is_some() {
            record.batch_id = self.batch_id;
        }
        if self.elapsed_ms.is_some() {
            record.elapsed_ms = self.elapsed_ms;
        }
        if self.progress_speed.is_some() {
            record.progress_speed = self.progress_speed;
        }
        if self.progress_out_time_seconds.is_some() {
            record.progress_out_time_seconds = self.progress_out_time_seconds;
        }
        if self.output_size_mb.is_some() {
            record.output_size_mb = self.output_size_mb;
        }
        if self.preview_path.is_some() {
            record.preview_path = self.preview_path;
        }
        if let Some(preview_revision) = self.preview_revision {
            record.preview_revision = preview_revision;
        }
        if self.failure_reason.is_some() {
            record.failure_reason = self.failure_reason;
        }
        record.extra.extend(self.extra);
    }
}

/// Revision that last wrote each field of an accumulated patch.
#[derive(Debug, Clone, Default)]
struct FieldRevisions {
    status: Option<Revision>,
    progress: Option<Revision>,
    batch_id: Option<Revision>,
    elapsed_ms: Option<Revision>,
    progress_speed: Option<Revision>,
    progress_out_time_seconds: Option<Revision>,
    output_size_mb: Option<Revision>,
    preview_path: Option<Revision>,
    preview_revision: Option<Revision>,
    failure_reason: Option<Revision>,
    extra: HashMap<String, Revision>,
}

fn merge_field<T>(
    slot: &mut Option<T>,
    slot_revision: &mut Option<Revision>,
    incoming: Option<T>,
    revision: Revision,
) {
    let Some(value) = incoming else {
        return;
    };
    if slot_revision.is_some_and(|written| written > revision) {
        return;
    }
    *slot = Some(value);
    *slot_revision = Some(revision);
}

#[derive(Debug, Clone)]
struct AccumulatedPatch {
    patch: JobPatch,
    revisions: FieldRevisions,
}

impl AccumulatedPatch {
    fn new(id: JobId) -> Self {
        Self {
            patch: JobPatch::new(id),
            revisions: FieldRevisions::default(),
        }
    }

    fn merge(&mut self, incoming: JobPatch, revision: Revision) {
        let into = &mut self.patch;
        let revs = &mut self.revisions;
        merge_field(&mut into.status, &mut revs.status, incoming.status, revision);
        merge_field(&mut into.progress, &mut revs.progress, incoming.progress, revision);
        merge_field(&mut into.batch_id, &mut revs.batch_id, incoming.batch_id, revision);
        merge_field(
            &mut into.elapsed_ms,
            &mut revs.elapsed_ms,
            incoming.elapsed_ms,
            revision,
        );
        merge_field(
            &mut into.progress_speed,
            &mut revs.progress_speed,
            incoming.progress_speed,
            revision,
        );
        merge_field(
            &mut into.progress_out_time_seconds,
            &mut revs.progress_out_time_seconds,
            incoming.progress_out_time_seconds,
            revision,
        );
        merge_field(
            &mut into.output_size_mb,
            &mut revs.output_size_mb,
            incoming.output_size_mb,
            revision,
        );
        merge_field(
            &mut into.preview_path,
            &mut revs.preview_path,
            incoming.preview_path,
            revision,
        );
        merge_field(
            &mut into.preview_revision,
            &mut revs.preview_revision,
            incoming.preview_revision,
            revision,
        );
        merge_field(
            &mut into.failure_reason,
            &mut revs.failure_reason,
            incoming.failure_reason,
            revision,
        );
        for (key, value) in incoming.extra {
            let written = revs.extra.get(&key).copied();
            if written.is_some_and(|written| written > revision) {
                continue;
            }
            into.extra.insert(key.clone(), value);
            revs.extra.insert(key, revision);
        }
    }
}

/// Merges patches by job id, keeping the highest-revision value per field.
///
/// Arrival order does not matter: a lower-revision patch that shows up late
/// only fills fields no higher revision has written.
#[derive(Debug, Clone, Default)]
pub struct PatchAccumulator {
    entries: HashMap<JobId, AccumulatedPatch>,
    /// First-seen order, so drained patches come out deterministically.
    order: Vec<JobId>,
    max_revision: Option<Revision>,
}

impl PatchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a batch of patches stamped with `revision` into the accumulator.
    pub fn push(&mut self, revision: Revision, patches: impl IntoIterator<Item = JobPatch>) {
        self.max_revision = Some(self.max_revision.map_or(revision, |m| m.max(revision)));
        for patch in patches {
            if !self.entries.contains_key(&patch.id) {
                self.order.push(patch.id.clone());
            }
            let entry = self
                .entries
                .entry(patch.id.clone())
                .or_insert_with(|| AccumulatedPatch::new(patch.id.clone()));
            entry.merge(patch, revision);
        }
    }

    /// Highest revision folded in so far.
    pub fn max_revision(&self) -> Option<Revision> {
        self.max_revision
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct job ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Take the merged patches out, leaving the accumulator empty.
    pub fn drain(&mut self) -> Vec<JobPatch> {
        self.max_revision = None;
        let mut entries = std::mem::take(&mut self.entries);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|id| entries.remove(&id).map(|entry| entry.patch))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.max_revision = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_fields_from_different_revisions_are_kept() {
        let mut acc = PatchAccumulator::new();
        acc.push(
            1,
            [JobPatch::new("job-1")
                .with_status(JobStatus::Processing)
                .with_progress(10.0)],
        );
        acc.push(2, [JobPatch::new("job-1").with_preview("/tmp/x.jpg", 3)]);

        let patches = acc.drain();
        assert_eq!(patches.len(), 1);
        let patch = &patches[0];
        assert_eq!(patch.status, Some(JobStatus::Processing));
        assert_eq!(patch.progress, Some(10.0));
        assert_eq!(patch.preview_path.as_deref(), Some("/tmp/x.jpg"));
        assert_eq!(patch.preview_revision, Some(3));
    }

    #[test]
    fn late_lower_revision_does_not_overwrite_newer_fields() {
        let mut acc = PatchAccumulator::new();
        acc.push(3, [JobPatch::new("job-1").with_progress(80.0)]);
        acc.push(
            1,
            [JobPatch::new("job-1")
                .with_status(JobStatus::Processing)
                .with_progress(10.0)],
        );
        acc.push(2, [JobPatch::new("job-1").with_status(JobStatus::Paused)]);

        let patch = acc.drain().remove(0);
        assert_eq!(patch.progress, Some(80.0));
        assert_eq!(patch.status, Some(JobStatus::Paused));
        assert!(acc.is_empty());
        assert_eq!(acc.max_revision(), None);
    }

    #[test]
    fn drain_keeps_first_seen_order() {
        let mut acc = PatchAccumulator::new();
        acc.push(1, [JobPatch::new("b").with_progress(1.0)]);
        acc.push(1, [JobPatch::new("a").with_progress(2.0)]);
        acc.push(2, [JobPatch::new("b").with_progress(3.0)]);
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.max_revision(), Some(2));

        let ids: Vec<_> = acc.drain().into_iter().map(|p| p.id.0).collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn apply_leaves_unset_fields_alone() {
        let mut record = JobRecord::new("job-1", "movie.mkv")
            .with_status(JobStatus::Processing)
            .with_progress(40.0);
        record.preview_path = Some("/p.jpg".into());

        JobPatch::new("job-1").with_progress(55.0).apply_to(&mut record);

        assert_eq!(record.progress, 55.0);
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.preview_path.as_deref(), Some("/p.jpg"));
        assert_eq!(record.filename, "movie.mkv");
    }

    #[test]
    fn unknown_patch_fields_reach_the_record() {
        let patch: JobPatch = serde_json::from_value(serde_json::json!({
            "id": "job-1",
            "progress": 5.0,
            "progressEpoch": 7,
            "progressUpdatedAtMs": 123
        }))
        .unwrap();
        assert!(!patch.is_empty());

        let mut record = JobRecord::new("job-1", "movie.mkv");
        record.extra.insert("progressEpoch".into(), 6.into());
        record.extra.insert("codec".into(), "hevc".into());
        patch.apply_to(&mut record);

        assert_eq!(record.progress, 5.0);
        assert_eq!(record.extra.get("progressEpoch"), Some(&Value::from(7)));
        assert_eq!(record.extra.get("progressUpdatedAtMs"), Some(&Value::from(123)));
        assert_eq!(record.extra.get("codec"), Some(&Value::from("hevc")));
    }

    #[test]
    fn extra_fields_merge_per_key_by_revision() {
        let mut acc = PatchAccumulator::new();
        acc.push(
            4,
            [JobPatch::new("job-1")
                .with_extra("progressEpoch", 2)
                .with_extra("progressUpdatedAtMs", 400)],
        );
        acc.push(
            3,
            [JobPatch::new("job-1")
                .with_extra("progressEpoch", 1)
                .with_extra("lastLog", "late")],
        );

        let patch = acc.drain().remove(0);
        assert_eq!(patch.extra.get("progressEpoch"), Some(&Value::from(2)));
        assert_eq!(patch.extra.get("progressUpdatedAtMs"), Some(&Value::from(400)));
        assert_eq!(patch.extra.get("lastLog"), Some(&Value::from("late")));
    }

    #[test]
    fn patch_wire_shape_omits_unset_fields() {
        let patch = JobPatch::new("job-1").with_progress(5.0);
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({ "id": "job-1", "progress": 5.0 }));
        assert!(JobPatch::new("job-2").is_empty());
        assert!(!patch.is_empty());
    }
}
