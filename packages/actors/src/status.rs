//! Read-only view of the engine published through a watch channel.

use chrono::{DateTime, Utc};
use queue_core::{Revision, StartupGate};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    pub snapshot_revision: Option<Revision>,
    pub delta_revision: Option<Revision>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub job_count: usize,
    /// Base revision of buffered deltas waiting for their snapshot.
    pub ahead_base: Option<Revision>,
    pub pull_in_flight: bool,
    /// Push registration failed; only the safety net keeps state fresh.
    pub polling_only: bool,
    pub startup: StartupGate,
}
