//! Core domain types for queue-state reconciliation.
//!
//! This crate is pure and synchronous. It holds:
//! - JobRecord, JobPatch and the push/pull message shapes
//! - QueueStore with the snapshot and delta apply pipelines
//! - the ahead buffer, coalescing buffer, startup gate and safety-net check
//! - bulk-delete planning and configuration

mod ahead;
mod batch;
mod bulk;
mod config;
mod events;
mod job;
mod patch;
mod pending;
mod polling;
mod push;
pub mod revision;
mod store;

pub use ahead::{AheadBuffer, AheadResolution, CatchupLimiter};
pub use batch::{BatchRecord, batches_of};
pub use bulk::{BatchDeletion, DeletePlan, Residual, plan_bulk_delete};
pub use config::{ConfigError, ENV_PREFIX, SyncConfig};
pub use events::{DeltaRejection, PullReason, SyncEvent};
pub use job::{JobId, JobRecord, JobStatus};
pub use patch::{JobPatch, PatchAccumulator};
pub use pending::PendingUpdates;
pub use polling::{SafetyNetCheck, StartupGate};
pub use push::{DELTA_CHANNEL, PushEvent, QueueDelta, QueueSnapshot, SNAPSHOT_CHANNEL};
pub use revision::Revision;
pub use store::{DeltaOutcome, QueueStore, SnapshotOutcome, SyncState};
