//! Event types reporting what the reconciliation engine did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;
use crate::revision::Revision;

/// Why a full pull was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullReason {
    /// Initial pull behind the startup gate.
    Startup,
    /// A buffered delta is still waiting for its base snapshot.
    CatchUp,
    /// The push channel looks stalled.
    SafetyNet,
    /// A bulk delete got no push confirmation in time.
    DeleteReconcile,
    /// Explicit request from a consumer.
    Manual,
}

impl PullReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullReason::Startup => "startup",
            PullReason::CatchUp => "catch_up",
            PullReason::SafetyNet => "safety_net",
            PullReason::DeleteReconcile => "delete_reconcile",
            PullReason::Manual => "manual",
        }
    }
}

impl std::fmt::Display for PullReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a delta was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaRejection {
    StaleBase,
    StaleRevision,
    Duplicate,
}

/// Events emitted by the engine for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A snapshot replaced the job collection.
    SnapshotApplied {
        revision: Option<Revision>,
        job_count: usize,
        timestamp: DateTime<Utc>,
    },
    /// A snapshot older than the applied one was dropped.
    SnapshotDropped {
        revision: Revision,
        current: Revision,
        timestamp: DateTime<Utc>,
    },
    /// A (possibly merged) delta was applied.
    DeltaApplied {
        base: Revision,
        delta_revision: Revision,
        patched: usize,
        created: usize,
        timestamp: DateTime<Utc>,
    },
    /// A delta was dropped by the ordering rules.
    DeltaDropped {
        base: Revision,
        delta_revision: Revision,
        reason: DeltaRejection,
        timestamp: DateTime<Utc>,
    },
    /// A delta references a snapshot not seen yet and was buffered.
    DeltaBuffered {
        base: Revision,
        delta_revision: Revision,
        timestamp: DateTime<Utc>,
    },
    /// Buffered deltas were dropped because a newer snapshot superseded them.
    AheadDiscarded {
        base: Revision,
        timestamp: DateTime<Utc>,
    },
    /// A full pull was issued.
    PullStarted {
        reason: PullReason,
        timestamp: DateTime<Utc>,
    },
    /// A full pull failed.
    PullFailed {
        reason: PullReason,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The initial pull was cancelled by an early push message.
    StartupPullCancelled { timestamp: DateTime<Utc> },
    /// Push registration failed; the engine only polls.
    PushDegraded {
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// Jobs were removed after a confirmed delete.
    JobsDeleted {
        ids: Vec<JobId>,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SyncEvent::SnapshotApplied { timestamp, .. }
            | SyncEvent::SnapshotDropped { timestamp, .. }
            | SyncEvent::DeltaApplied { timestamp, .. }
            | SyncEvent::DeltaDropped { timestamp, .. }
            | SyncEvent::DeltaBuffered { timestamp, .. }
            | SyncEvent::AheadDiscarded { timestamp, .. }
            | SyncEvent::PullStarted { timestamp, .. }
            | SyncEvent::PullFailed { timestamp, .. }
            | SyncEvent::StartupPullCancelled { timestamp }
            | SyncEvent::PushDegraded { timestamp, .. }
            | SyncEvent::JobsDeleted { timestamp, .. } => *timestamp,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            SyncEvent::SnapshotApplied {
                revision,
                job_count,
                ..
            } => match revision {
                Some(revision) => format!("Snapshot r{} applied ({} jobs)", revision, job_count),
                None => format!("Snapshot applied ({} jobs)", job_count),
            },
            SyncEvent::SnapshotDropped {
                revision, current, ..
            } => format!("Snapshot r{} dropped, already at r{}", revision, current),
            SyncEvent::DeltaApplied {
                base,
                delta_revision,
                patched,
                created,
                ..
            } => format!(
                "Delta r{}.{} applied ({} patched, {} created)",
                base, delta_revision, patched, created
            ),
            SyncEvent::DeltaDropped {
                base,
                delta_revision,
                reason,
                ..
            } => format!("Delta r{}.{} dropped: {:?}", base, delta_revision, reason),
            SyncEvent::DeltaBuffered {
                base,
                delta_revision,
                ..
            } => format!("Delta r{}.{} buffered ahead", base, delta_revision),
            SyncEvent::AheadDiscarded { base, .. } => {
                format!("Buffered deltas for r{} discarded", base)
            }
            SyncEvent::PullStarted { reason, .. } => format!("Full pull ({})", reason),
            SyncEvent::PullFailed { reason, error, .. } => {
                format!("Full pull ({}) failed: {}", reason, error)
            }
            SyncEvent::StartupPullCancelled { .. } => "Startup pull cancelled".to_string(),
            SyncEvent::PushDegraded { error, .. } => {
                format!("Push unavailable, polling only: {}", error)
            }
            SyncEvent::JobsDeleted { ids, .. } => format!("{} jobs deleted", ids.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let event = SyncEvent::PullStarted {
            reason: PullReason::CatchUp,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "pull_started");
        assert_eq!(value["reason"], "catch_up");
        assert_eq!(event.description(), "Full pull (catch_up)");
    }
}
