//! CLI configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use castlink_core::protocol_constants::GOOGLECAST_SERVICE_TYPE;
use serde::Deserialize;

/// Scan configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Seconds without a refresh before a device is pruned.
    /// Override: `CASTLINK_STALE_AFTER_SECS`
    pub stale_after_secs: u64,

    /// Seconds between prune passes.
    /// Override: `CASTLINK_PRUNE_INTERVAL_SECS`
    pub prune_interval_secs: u64,

    /// mDNS service type to browse.
    /// Override: `CASTLINK_SERVICE_TYPE`
    pub service_type: String,

    /// Stop scanning after this many seconds; runs until Ctrl+C when unset.
    /// Override: `CASTLINK_SCAN_DURATION_SECS`
    pub scan_duration_secs: Option<u64>,
}

impl Default for CliConfig {
    fn default() -> Self {
        let engine = castlink_core::EngineConfig::default();
        Self {
            stale_after_secs: engine.device_stale_after_secs,
            prune_interval_secs: engine.prune_interval_secs,
            service_type: GOOGLECAST_SERVICE_TYPE.to_string(),
            scan_duration_secs: None,
        }
    }
}

impl CliConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CASTLINK_STALE_AFTER_SECS") {
            if let Ok(secs) = val.parse() {
                self.stale_after_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("CASTLINK_PRUNE_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                self.prune_interval_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("CASTLINK_SERVICE_TYPE") {
            if !val.trim().is_empty() {
                self.service_type = val;
            }
        }

        // Note: CASTLINK_LOG_LEVEL is handled by clap via #[arg(env = ...)] in main.rs
        if let Ok(val) = std::env::var("CASTLINK_SCAN_DURATION_SECS") {
            if let Ok(secs) = val.parse() {
                self.scan_duration_secs = Some(secs);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.stale_after_secs == 0 {
            bail!("stale_after_secs must be >= 1");
        }
        if self.prune_interval_secs == 0 {
            bail!("prune_interval_secs must be >= 1");
        }
        if !self.service_type.ends_with(".local.") {
            bail!(
                "service_type must end with \".local.\" (got {:?})",
                self.service_type
            );
        }
        Ok(())
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}
