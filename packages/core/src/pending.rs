//! Values waiting for the next coalesced flush.

use crate::patch::PatchAccumulator;
use crate::revision::{Revision, is_stale};
use crate::{QueueDelta, QueueSnapshot};

/// At most one snapshot and one merged delta, waiting for the next flush.
#[derive(Debug, Clone, Default)]
pub struct PendingUpdates {
    snapshot: Option<QueueSnapshot>,
    delta_base: Option<Revision>,
    delta: PatchAccumulator,
}

impl PendingUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the highest-revision snapshot. Returns false if `snapshot` lost.
    pub fn offer_snapshot(&mut self, snapshot: QueueSnapshot) -> bool {
        if let Some(pending) = &self.snapshot
            && is_stale(snapshot.snapshot_revision, pending.snapshot_revision)
        {
            return false;
        }
        self.snapshot = Some(snapshot);
        true
    }

    /// Fold a delta into the pending merge. A newer base starts over.
    ///
    /// Returns false if `delta` is based on an older snapshot than the
    /// pending merge and was dropped.
    pub fn offer_delta(&mut self, delta: QueueDelta) -> bool {
        match self.delta_base {
            Some(base) if delta.base_snapshot_revision < base => return false,
            Some(base) if delta.base_snapshot_revision == base => {}
            _ => {
                self.delta.clear();
                self.delta_base = Some(delta.base_snapshot_revision);
            }
        }
        self.delta.push(delta.delta_revision, delta.patches);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none() && self.delta.is_empty()
    }

    /// Take everything pending, snapshot first.
    pub fn take(&mut self) -> (Option<QueueSnapshot>, Option<QueueDelta>) {
        let snapshot = self.snapshot.take();
        let base = self.delta_base.take();
        let delta = match (base, self.delta.max_revision()) {
            (Some(base), Some(delta_revision)) if !self.delta.is_empty() => {
                Some(QueueDelta::new(base, delta_revision, self.delta.drain()))
            }
            _ => None,
        };
        self.delta.clear();
        (snapshot, delta)
    }

    pub fn clear(&mut self) {
        self.snapshot = None;
        self.delta_base = None;
        self.delta.clear();
    }
}
