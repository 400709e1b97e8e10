//! Tuning knobs for the reconciliation engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix of the environment variables read by [`SyncConfig::from_env`].
pub const ENV_PREFIX: &str = "QUEUE_SYNC_";

/// Configuration for queue synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Batching window for coalesced applies (milliseconds).
    pub coalesce_window_ms: u64,
    /// Delay before an ahead-buffered delta triggers a catch-up pull.
    pub ahead_catchup_delay_ms: u64,
    /// Minimum spacing between two catch-up pulls.
    pub catchup_cooldown_ms: u64,
    /// Period of the safety-net poller.
    pub safety_net_interval_ms: u64,
    /// Age of the last snapshot after which the safety net pulls.
    pub safety_net_stale_after_ms: u64,
    /// Open the startup gate on its own if no idle signal arrives in time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_idle_timeout_ms: Option<u64>,
    /// How long a bulk delete waits for a push-confirmed revision advance.
    pub delete_confirm_timeout_ms: u64,
    /// Capacity of the sync event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 16,
            ahead_catchup_delay_ms: 1_500,
            catchup_cooldown_ms: 30_000,
            safety_net_interval_ms: 20_000,
            safety_net_stale_after_ms: 60_000,
            startup_idle_timeout_ms: Some(5_000),
            delete_confirm_timeout_ms: 2_000,
            event_capacity: 1024,
        }
    }
}

impl SyncConfig {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn ahead_catchup_delay(&self) -> Duration {
        Duration::from_millis(self.ahead_catchup_delay_ms)
    }

    pub fn catchup_cooldown(&self) -> Duration {
        Duration::from_millis(self.catchup_cooldown_ms)
    }

    pub fn safety_net_interval(&self) -> Duration {
        Duration::from_millis(self.safety_net_interval_ms)
    }

    pub fn safety_net_stale_after(&self) -> Duration {
        Duration::from_millis(self.safety_net_stale_after_ms)
    }

    pub fn startup_idle_timeout(&self) -> Option<Duration> {
        self.startup_idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn delete_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.delete_confirm_timeout_ms)
    }

    /// Defaults overridden by `QUEUE_SYNC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `QUEUE_SYNC_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let read = |name: &str| -> Result<Option<u64>, ConfigError> {
            let key = format!("{ENV_PREFIX}{name}");
            match lookup(&key) {
                None => Ok(None),
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
            }
        };

        if let Some(v) = read("COALESCE_WINDOW_MS")? {
            config.coalesce_window_ms = v;
        }
        if let Some(v) = read("AHEAD_CATCHUP_DELAY_MS")? {
            config.ahead_catchup_delay_ms = v;
        }
        if let Some(v) = read("CATCHUP_COOLDOWN_MS")? {
            config.catchup_cooldown_ms = v;
        }
        if let Some(v) = read("SAFETY_NET_INTERVAL_MS")? {
            config.safety_net_interval_ms = v;
        }
        if let Some(v) = read("SAFETY_NET_STALE_AFTER_MS")? {
            config.safety_net_stale_after_ms = v;
        }
        // 0 disables the idle timeout.
        if let Some(v) = read("STARTUP_IDLE_TIMEOUT_MS")? {
            config.startup_idle_timeout_ms = (v > 0).then_some(v);
        }
        if let Some(v) = read("DELETE_CONFIRM_TIMEOUT_MS")? {
            config.delete_confirm_timeout_ms = v;
        }
        if let Some(v) = read("EVENT_CAPACITY")? {
            config.event_capacity = usize::try_from(v).unwrap_or(usize::MAX);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.safety_net_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.safety_net_stale_after_ms <= self.safety_net_interval_ms {
            return Err(ConfigError::StalenessBelowInterval {
                stale_after_ms: self.safety_net_stale_after_ms,
                interval_ms: self.safety_net_interval_ms,
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} is not a number: {value:?}")]
    InvalidNumber { key: String, value: String },

    #[error("safety-net interval must be greater than zero")]
    ZeroInterval,

    #[error(
        "safety-net staleness threshold ({stale_after_ms}ms) must exceed its interval ({interval_ms}ms)"
    )]
    StalenessBelowInterval { stale_after_ms: u64, interval_ms: u64 },

    #[error("event capacity must be greater than zero")]
    ZeroCapacity,
}
