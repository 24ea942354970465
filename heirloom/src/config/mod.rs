//! Configuration management for heirloom
//!
//! Default config location: ~/.heirloom/config.toml

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Holds the store database, the asset tree and persisted snapshots
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".heirloom")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Limits and tuning for the archive codec.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    /// Maximum compressed archive size accepted by validate/import (default: 100MB)
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: u64,
    /// Maximum decompressed size of all entries together (default: 1GB)
    #[serde(default = "default_max_unpacked_bytes")]
    pub max_unpacked_bytes: u64,
    /// zstd compression level used by export
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

fn default_max_archive_bytes() -> u64 {
    100 * 1024 * 1024 // 100MB
}

fn default_max_unpacked_bytes() -> u64 {
    1024 * 1024 * 1024 // 1GB
}

fn default_compression_level() -> i32 {
    3
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_archive_bytes: default_max_archive_bytes(),
            max_unpacked_bytes: default_max_unpacked_bytes(),
            compression_level: default_compression_level(),
        }
    }
}

/// Defaults applied when a caller does not pass explicit export options.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    #[serde(default = "default_true")]
    pub include_photos: bool,
    #[serde(default)]
    pub include_audit_logs: bool,
    /// How many days of audit history to include; unset means everything
    #[serde(default = "default_audit_log_days")]
    pub audit_log_days: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn default_audit_log_days() -> Option<u32> {
    Some(90)
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            include_photos: default_true(),
            include_audit_logs: false,
            audit_log_days: default_audit_log_days(),
        }
    }
}

/// Minimum spacing between two exports (or two imports) by the same user.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub export_interval_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub import_interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            export_interval_secs: default_interval_secs(),
            import_interval_secs: default_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level filter string
    /// Override with RUST_LOG env var
    #[serde(default = "default_level")]
    pub level: String,
    /// Log output format: "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
    pub file: Option<PathBuf>,
}

fn default_level() -> String {
    "info,heirloom=debug".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

/// Expand ~ to home directory in path
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Config {
    /// Load config from default location (~/.heirloom/config.toml)
    pub fn load() -> Result<Self> {
        let data_dir = default_data_dir();
        Self::load_from(&data_dir)
    }

    /// Load config from specific data directory
    pub fn load_from(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // Override data_dir to the one we loaded from
        config.storage.data_dir = data_dir.to_path_buf();
        config.expand_paths()?;
        config.check()?;
        Ok(config)
    }

    /// Load config from file path, or create default
    pub fn load_or_create(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let mut config: Config = toml::from_str(&content)?;
            config.expand_paths()?;
            config.check()?;
            Ok(config)
        } else {
            let config = Config::default();
            // Try to save default config
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = config.save(config_path);
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Expand ~ in all paths
    fn expand_paths(&mut self) -> Result<()> {
        self.storage.data_dir = expand_tilde(&self.storage.data_dir)?;
        if let Some(ref f) = self.logging.file {
            self.logging.file = Some(expand_tilde(f)?);
        }
        Ok(())
    }

    /// Reject settings the engine cannot work with
    fn check(&self) -> Result<()> {
        if self.archive.max_archive_bytes == 0 {
            return Err(anyhow!("archive.max_archive_bytes must be greater than zero"));
        }
        if self.archive.max_unpacked_bytes < self.archive.max_archive_bytes {
            return Err(anyhow!(
                "archive.max_unpacked_bytes must be at least archive.max_archive_bytes"
            ));
        }
        if !(1..=22).contains(&self.archive.compression_level) {
            return Err(anyhow!(
                "archive.compression_level must be between 1 and 22, got {}",
                self.archive.compression_level
            ));
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(anyhow!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                other
            )),
        }
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.assets_dir())?;
        Ok(())
    }

    /// Get path to the SQLite store database
    pub fn database_path(&self) -> PathBuf {
        self.storage.data_dir.join("heirloom.db")
    }

    /// Get path to the rate limit ledger database
    pub fn rate_ledger_path(&self) -> PathBuf {
        self.storage.data_dir.join("rate-limits.db")
    }

    /// Get root of the asset storage (photos/ and snapshots/)
    pub fn assets_dir(&self) -> PathBuf {
        self.storage.data_dir.join("assets")
    }
}
