//! Job domain types as seen by the client-side queue view.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable, opaque identifier of a job as assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is in the queue and will be picked up.
    #[default]
    Queued,
    /// Job is parked until its wait request resolves.
    Waiting,
    /// Job was paused mid-run.
    Paused,
    /// Job is being processed by the pipeline.
    Processing,
    /// Job completed successfully.
    Completed,
    /// Job failed.
    Failed,
    /// Job was cancelled before completion.
    Cancelled,
    /// Job was skipped (nothing to do for this input).
    Skipped,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Skipped
        )
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Waiting => "waiting",
            JobStatus::Paused => "paused",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job as mirrored from the backend queue.
///
/// Only `id`, `status`, `progress` and `batch_id` matter to the sync protocol.
/// The remaining fields are carried so patches can update them, and anything
/// the backend sends beyond those lands in `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    #[serde(default)]
    pub filename: String,
    pub status: JobStatus,
    /// Percentage in `0.0..=100.0`.
    #[serde(default)]
    pub progress: f64,
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
    #[serde(default)]
    pub preview_revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Descriptive fields the engine does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobRecord {
    /// Create a queued job with no progress.
    pub fn new(id: impl Into<JobId>, filename: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            status: JobStatus::Queued,
            progress: 0.0,
            batch_id: None,
            elapsed_ms: None,
            progress_speed: None,
            progress_out_time_seconds: None,
            output_size_mb: None,
            preview_path: None,
            preview_revision: 0,
            failure_reason: None,
            extra: Map::new(),
        }
    }

    /// Placeholder for an id first mentioned by a delta.
    pub(crate) fn placeholder(id: JobId) -> Self {
        Self::new(id, String::new())
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
