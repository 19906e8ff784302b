//! Configuration management for the backup tool.
//!
//! Loads configuration from a TOML file (or built-in defaults) with
//! environment variable overrides prefixed `ZFS_BACKUP`, e.g.
//! `ZFS_BACKUP__POOLS__SOURCE=tank`.

use crate::utils::errors::BackupError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "ZFS_BACKUP";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pools: PoolConfig,

    #[serde(default)]
    pub snapshots: SnapshotConfig,

    /// Datasets backed up when no `--dataset` is given
    #[serde(default = "default_datasets")]
    pub datasets: Vec<String>,

    #[serde(default)]
    pub cleanup: CleanupConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Parent of the datasets being backed up
    #[serde(default = "default_source_pool")]
    pub source: String,

    /// Parent under which the backup copies are received
    #[serde(default = "default_destination_pool")]
    pub destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshot shared by source and destination
    #[serde(default = "default_origin_snapshot")]
    pub origin: String,

    /// Snapshot taken for the transfer in flight
    #[serde(default = "default_head_snapshot")]
    pub head: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Seconds to wait before any destroy, giving the operator time to hit Ctrl+C
    #[serde(default = "default_cleanup_delay")]
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_source_pool() -> String {
    "lxdzfs".to_string()
}

fn default_destination_pool() -> String {
    "backup/lxdzfs_backup".to_string()
}

fn default_origin_snapshot() -> String {
    "current".to_string()
}

fn default_head_snapshot() -> String {
    "backup".to_string()
}

fn default_datasets() -> Vec<String> {
    ["frigate", "lxd", "private", "libvirt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_cleanup_delay() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            source: default_source_pool(),
            destination: default_destination_pool(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            origin: default_origin_snapshot(),
            head: default_head_snapshot(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_cleanup_delay(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pools: PoolConfig::default(),
            snapshots: SnapshotConfig::default(),
            datasets: default_datasets(),
            cleanup: CleanupConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the file (or defaults), apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let layered: Config = config::Config::builder()
            .add_source(config::Config::try_from(&base)?)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("datasets")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        layered.validate()?;
        Ok(layered)
    }

    /// Reject configurations that would produce ambiguous snapshot identities.
    pub fn validate(&self) -> Result<(), BackupError> {
        for (what, value) in [
            ("pools.source", &self.pools.source),
            ("pools.destination", &self.pools.destination),
            ("snapshots.origin", &self.snapshots.origin),
            ("snapshots.head", &self.snapshots.head),
        ] {
            check_name(what, value)?;
        }

        if self.snapshots.origin == self.snapshots.head {
            return Err(BackupError::Config(format!(
                "origin and head snapshots must differ (both are '{}')",
                self.snapshots.origin
            )));
        }

        if self.pools.source == self.pools.destination {
            return Err(BackupError::Config(format!(
                "source and destination pools must differ (both are '{}')",
                self.pools.source
            )));
        }

        let mut seen = HashSet::new();
        for dataset in &self.datasets {
            check_name("datasets", dataset)?;
            if !seen.insert(dataset.as_str()) {
                return Err(BackupError::Config(format!(
                    "dataset '{}' is listed more than once",
                    dataset
                )));
            }
        }

        Ok(())
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup.delay_secs)
    }
}

fn check_name(what: &str, value: &str) -> Result<(), BackupError> {
    if value.is_empty() {
        return Err(BackupError::Config(format!("{} must not be empty", what)));
    }
    if value.contains('@') || value.chars().any(char::is_whitespace) {
        return Err(BackupError::Config(format!(
            "{} '{}' must not contain '@' or whitespace",
            what, value
        )));
    }
    Ok(())
}
