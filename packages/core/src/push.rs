//! Messages delivered by the backend over the push channel and the pull call.

use serde::{Deserialize, Serialize};

use crate::revision::Revision;
use crate::{JobPatch, JobRecord};

/// Push channel carrying full snapshots.
pub const SNAPSHOT_CHANNEL: &str = "queue-snapshot";
/// Push channel carrying sparse deltas.
pub const DELTA_CHANNEL: &str = "queue-delta";

/// Full, authoritative replacement of the job collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub jobs: Vec<JobRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_revision: Option<Revision>,
}

impl QueueSnapshot {
    pub fn new(jobs: Vec<JobRecord>, snapshot_revision: Option<Revision>) -> Self {
        Self {
            jobs,
            snapshot_revision,
        }
    }
}

/// Sparse update relative to a declared base snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDelta {
    /// The `snapshotRevision` this delta is based on.
    pub base_snapshot_revision: Revision,
    /// Monotonic within one base.
    pub delta_revision: Revision,
    pub patches: Vec<JobPatch>,
}

impl QueueDelta {
    pub fn new(base_snapshot_revision: Revision, delta_revision: Revision, patches: Vec<JobPatch>) -> Self {
        Self {
            base_snapshot_revision,
            delta_revision,
            patches,
        }
    }
}

/// One message from the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload")]
pub enum PushEvent {
    #[serde(rename = "queue-snapshot")]
    Snapshot(QueueSnapshot),
    #[serde(rename = "queue-delta")]
    Delta(QueueDelta),
}

impl PushEvent {
    /// Channel name this event arrived on.
    pub fn channel(&self) -> &'static str {
        match self {
            PushEvent::Snapshot(_) => SNAPSHOT_CHANNEL,
            PushEvent::Delta(_) => DELTA_CHANNEL,
        }
    }
}

impl From<QueueSnapshot> for PushEvent {
    fn from(snapshot: QueueSnapshot) -> Self {
        PushEvent::Snapshot(snapshot)
    }
}

impl From<QueueDelta> for PushEvent {
    fn from(delta: QueueDelta) -> Self {
        PushEvent::Delta(delta)
    }
}
