//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_MEDIA_RECEIVER_APP_ID, DEFAULT_RECONNECT_TIMEOUT_SECS, EVENT_CHANNEL_CAPACITY,
    MAX_RECONNECT_TIMEOUT_SECS, RECONNECT_BACKOFF_MS,
};

/// Configuration for a [`CastEngine`](crate::CastEngine).
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    // Applications
    /// Receiver application launched when no app id is given.
    pub app_id: String,

    // Session
    /// Bound on automatic reconnection after a transient loss (seconds).
    /// Zero disables automatic reconnection.
    pub reconnect_timeout_secs: u64,

    /// Delays between reconnection attempts (milliseconds); the last one repeats.
    pub reconnect_backoff_ms: Vec<u64>,

    // Discovery
    /// Devices not refreshed for this long are pruned (seconds).
    pub device_stale_after_secs: u64,

    /// How often the registry is checked for stale devices (seconds).
    pub prune_interval_secs: u64,

    // Channels
    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,

    /// Capacity of the session command channel.
    pub command_channel_capacity: usize,

    /// Capacity of the per-session outbound message queue.
    pub outbound_queue_capacity: usize,

    /// Engine log verbosity: 0 = warnings, 1 = debug, 2 = trace.
    /// Left unset, the host's global `log` level is not touched.
    pub log_level: Option<u8>,
}

impl EngineConfig {
    /// Creates a config for the given receiver application with defaults elsewhere.
    pub fn for_app(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Self::default()
        }
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.app_id.trim().is_empty() {
            return Err("app_id must not be empty".to_string());
        }
        if self.reconnect_backoff_ms.is_empty() {
            return Err("reconnect_backoff_ms must contain at least one delay".to_string());
        }
        if self.prune_interval_secs == 0 {
            return Err("prune_interval_secs must be >= 1".to_string());
        }
        if self.device_stale_after_secs == 0 {
            return Err("device_stale_after_secs must be >= 1".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        if self.command_channel_capacity == 0 {
            return Err("command_channel_capacity must be >= 1".to_string());
        }
        if self.outbound_queue_capacity == 0 {
            return Err("outbound_queue_capacity must be >= 1".to_string());
        }
        if self.reconnect_timeout_secs > MAX_RECONNECT_TIMEOUT_SECS {
            return Err(format!(
                "reconnect_timeout_secs must be <= {}",
                MAX_RECONNECT_TIMEOUT_SECS
            ));
        }
        if self.log_level.is_some_and(|level| level > 2) {
            return Err("log_level must be 0, 1 or 2".to_string());
        }
        Ok(())
    }

    /// Maps `log_level` to the filter applied when the engine is created.
    pub fn level_filter(&self) -> Option<log::LevelFilter> {
        self.log_level.map(|level| match level {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.device_stale_after_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_MEDIA_RECEIVER_APP_ID.to_string(),
            reconnect_timeout_secs: DEFAULT_RECONNECT_TIMEOUT_SECS,
            reconnect_backoff_ms: RECONNECT_BACKOFF_MS.to_vec(),
            device_stale_after_secs: 60,
            prune_interval_secs: 10,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
            command_channel_capacity: 32,
            outbound_queue_capacity: 64,
            log_level: None,
        }
    }
}
