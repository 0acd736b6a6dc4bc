//! Engine configuration

use crate::error::{PolicyError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Periodic integrity check settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Run the check on a timer
    pub enabled: bool,

    /// Seconds between runs
    pub interval_secs: u64,

    /// Rewrite drifted links and counts instead of only reporting them
    pub repair: bool,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 3600,
            repair: false,
        }
    }
}

/// Policy engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Abort the transaction when a ref count would go negative
    /// (otherwise log and clamp at zero)
    pub strict_ref_counts: bool,

    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Per-subscriber buffer of the service event channel
    pub event_channel_capacity: usize,

    /// Periodic integrity check
    pub integrity: IntegrityConfig,

    /// `tracing` filter directive
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_ref_counts: cfg!(debug_assertions),
            enable_metrics: true,
            event_channel_capacity: 1024,
            integrity: IntegrityConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse a JSON configuration document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PolicyError::Configuration(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("POLICY_STRICT_REF_COUNTS") {
            config.strict_ref_counts = parse_var("POLICY_STRICT_REF_COUNTS", &v)?;
        }
        if let Some(v) = lookup("POLICY_ENABLE_METRICS") {
            config.enable_metrics = parse_var("POLICY_ENABLE_METRICS", &v)?;
        }
        if let Some(v) = lookup("POLICY_EVENT_CAPACITY") {
            config.event_channel_capacity = parse_var("POLICY_EVENT_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("POLICY_INTEGRITY_ENABLED") {
            config.integrity.enabled = parse_var("POLICY_INTEGRITY_ENABLED", &v)?;
        }
        if let Some(v) = lookup("POLICY_INTEGRITY_INTERVAL_SECS") {
            config.integrity.interval_secs = parse_var("POLICY_INTEGRITY_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("POLICY_INTEGRITY_REPAIR") {
            config.integrity.repair = parse_var("POLICY_INTEGRITY_REPAIR", &v)?;
        }
        if let Some(v) = lookup("RUST_LOG") {
            config.log_filter = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.event_channel_capacity == 0 {
            return Err(PolicyError::Configuration(
                "event_channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.integrity.interval_secs == 0 {
            return Err(PolicyError::Configuration(
                "integrity.interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Install a global `tracing` subscriber using `log_filter`
    ///
    /// Falls back to `RUST_LOG` if `log_filter` does not parse. Fails if a
    /// global subscriber is already installed.
    pub fn init_logging(&self) -> Result<()> {
        let filter = EnvFilter::try_new(&self.log_filter)
            .or_else(|_| EnvFilter::try_from_default_env())
            .map_err(|e| PolicyError::Configuration(format!("invalid log filter: {}", e)))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| PolicyError::Configuration(format!("logging already initialized: {}", e)))?;

        info!(filter = %self.log_filter, "logging initialized");
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PolicyError::Configuration(format!("{}: invalid value '{}'", key, value)))
}
