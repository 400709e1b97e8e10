//! Actor-based queue reconciliation engine.
//!
//! This crate runs the pure pipelines from `queue_core` inside a Ractor
//! actor and connects them to a backend.
//!
//! # Architecture
//!
//! - `ReconcilerActor` - Owns the mirrored queue; applies pushes, pulls and timers
//! - `QueueBackend` - The seam to the process that owns the real queue
//! - `QueueSync` - Cloneable handle used by the rest of the application
//!
//! # Usage
//!
//! ```ignore
//! use queue_actors::{InMemoryBackend, QueueSync};
//! use queue_core::SyncConfig;
//!
//! let sync = QueueSync::start(InMemoryBackend::new(), SyncConfig::from_env()?).await?;
//! sync.signal_idle()?;
//! let jobs = sync.jobs().await?;
//! sync.bulk_delete(["job-1", "job-2"]).await?;
//! sync.shutdown().await?;
//! ```

mod backend;
mod bulk_delete;
mod handle;
mod memory_backend;
mod messages;
mod reconciler;
mod status;
mod timers;

pub use backend::{BackendError, BackendFuture, QueueBackend};
pub use bulk_delete::{BulkDeleteError, BulkDeleteOutcome, Reconciliation};
pub use handle::QueueSync;
pub use memory_backend::{BackendCall, InMemoryBackend};
pub use messages::{ReconcilerMessage, SyncError};
pub use reconciler::{ReconcilerActor, ReconcilerArgs, ReconcilerState};
pub use status::SyncStatus;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort};
