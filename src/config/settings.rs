use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;

use super::defaults;

/// Top-level configuration for the rampart admission core.
/// Deserializes from a TOML configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,

    #[serde(default = "defaults::default_storage_config")]
    pub storage: StorageConfig,

    #[serde(default = "defaults::default_admin_api_config")]
    pub admin_api: AdminApiConfig,

    #[serde(default = "defaults::default_auto_block_config")]
    pub auto_block: AutoBlockConfig,

    #[serde(default = "defaults::default_cache_config")]
    pub cache: CacheConfig,

    #[serde(default = "defaults::default_policies")]
    pub policies: Vec<PolicyConfig>,
}

impl Settings {
    /// Load configuration from a TOML file at the given path.
    /// Invalid limits or windows are rejected here, never at request time.
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.auto_block.violation_threshold == 0 {
            bail!("auto_block.violation_threshold must be at least 1");
        }
        if self.auto_block.block_duration_secs == 0 {
            bail!("auto_block.block_duration_secs must be positive");
        }
        if self.cache.refresh_interval_secs == 0 {
            bail!("cache.refresh_interval_secs must be positive");
        }
        for policy in &self.policies {
            if policy.max_requests == 0 {
                bail!("policy '{}' has a zero request limit", policy.name);
            }
            if policy.window_secs == 0 {
                bail!("policy '{}' has a zero-length window", policy.name);
            }
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: defaults::default_logging_config(),
            storage: defaults::default_storage_config(),
            admin_api: defaults::default_admin_api_config(),
            auto_block: defaults::default_auto_block_config(),
            cache: defaults::default_cache_config(),
            policies: defaults::default_policies(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    pub level: String,

    #[serde(default = "defaults::default_log_file")]
    pub file: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::default_sqlite_path")]
    pub sqlite_path: String,
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminApiConfig {
    #[serde(default = "defaults::default_admin_bind")]
    pub bind: String,

    #[serde(default = "defaults::default_api_key")]
    pub api_key: String,
}

/// Escalation thresholds for repeat offenders.
#[derive(Debug, Clone, Deserialize)]
pub struct AutoBlockConfig {
    /// Lifetime violation count at which an origin is durably blocked.
    #[serde(default = "defaults::default_violation_threshold")]
    pub violation_threshold: u64,

    #[serde(default = "defaults::default_block_duration_secs")]
    pub block_duration_secs: u64,
}

/// Blocked-origin cache tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// How often the snapshot is reloaded from the durable store.
    #[serde(default = "defaults::default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

/// Which dimension of a request a window policy counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyScope {
    User,
    Ip,
    Global,
}

/// One named `(max_requests, window)` pair, grouped under a logical
/// operation. Several policies may share an operation; a request must pass
/// all of them.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    pub name: String,
    pub operation: String,
    pub scope: PolicyScope,
    pub max_requests: u64,
    pub window_secs: u64,
}
