//! Decisions about when to fall back to a full pull.

use std::time::Duration;

/// Gate in front of the first full pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartupGate {
    /// Waiting for the idle signal.
    #[default]
    Armed,
    /// A push message arrived first; the initial pull will not happen.
    Cancelled,
    /// The initial pull was requested.
    Fired,
}

impl StartupGate {
    /// The idle signal fired. Returns true if the initial pull should go out now.
    pub fn open(&mut self) -> bool {
        if *self == StartupGate::Armed {
            *self = StartupGate::Fired;
            true
        } else {
            false
        }
    }

    /// A push message arrived. Returns true if this cancelled a pending pull.
    pub fn cancel(&mut self) -> bool {
        if *self == StartupGate::Armed {
            *self = StartupGate::Cancelled;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        *self == StartupGate::Armed
    }
}

/// Inputs to one safety-net tick.
#[derive(Debug, Clone, Copy)]
pub struct SafetyNetCheck {
    pub has_jobs: bool,
    /// Time since the last applied snapshot, `None` if there never was one.
    pub since_last_snapshot: Option<Duration>,
    pub stale_after: Duration,
    /// Push registration failed and polling is all there is.
    pub polling_only: bool,
}

impl SafetyNetCheck {
    /// Whether this tick should force a full pull.
    pub fn is_due(&self) -> bool {
        if !self.has_jobs && !self.polling_only {
            return false;
        }
        self.since_last_snapshot
            .is_none_or(|elapsed| elapsed > self.stale_after)
    }
}
