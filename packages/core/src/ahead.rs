//! Holding area for deltas whose base snapshot has not arrived yet.

use std::time::{Duration, Instant};

use crate::patch::PatchAccumulator;
use crate::revision::Revision;
use crate::QueueDelta;

/// What to do with the ahead buffer once a snapshot has been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum AheadResolution {
    /// Nothing buffered.
    Empty,
    /// Still waiting for the buffered base.
    Keep { base: Revision },
    /// The base arrived; apply this synthesized delta.
    Flush(QueueDelta),
    /// The snapshot moved past the buffered base.
    Discard { base: Revision },
}

/// Deltas accumulated for a single future base revision.
#[derive(Debug, Clone, Default)]
pub struct AheadBuffer {
    base: Option<Revision>,
    patches: PatchAccumulator,
}

impl AheadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a delta. A delta for a different base replaces the buffer.
    ///
    /// Returns the base that was dropped, if any.
    pub fn push(&mut self, delta: QueueDelta) -> Option<Revision> {
        let replaced = self
            .base
            .filter(|base| *base != delta.base_snapshot_revision);
        if replaced.is_some() {
            self.patches.clear();
        }
        self.base = Some(delta.base_snapshot_revision);
        self.patches.push(delta.delta_revision, delta.patches);
        replaced
    }

    pub fn base(&self) -> Option<Revision> {
        self.base
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_none()
    }

    /// Patched job count.
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Re-evaluate against the snapshot revision that is now applied.
    pub fn resolve(&mut self, snapshot_revision: Option<Revision>) -> AheadResolution {
        let Some(base) = self.base else {
            return AheadResolution::Empty;
        };
        match snapshot_revision {
            Some(revision) if revision < base => AheadResolution::Keep { base },
            Some(revision) if revision == base => {
                let delta_revision = self.patches.max_revision().unwrap_or_default();
                let patches = self.patches.drain();
                self.base = None;
                AheadResolution::Flush(QueueDelta::new(base, delta_revision, patches))
            }
            // Newer, or a snapshot without revision: it is authoritative either way.
            _ => {
                self.clear();
                AheadResolution::Discard { base }
            }
        }
    }

    pub fn clear(&mut self) {
        self.base = None;
        self.patches.clear();
    }
}

/// Allows one catch-up pull per cool-down window.
#[derive(Debug, Clone)]
pub struct CatchupLimiter {
    cooldown: Duration,
    last_pull: Option<Instant>,
}

impl CatchupLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_pull: None,
        }
    }

    /// Claim the pull slot at `now`, or get the time left in the window.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        if let Some(last) = self.last_pull {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.cooldown {
                return Err(self.cooldown - elapsed);
            }
        }
        self.last_pull = Some(now);
        Ok(())
    }
}
