use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SyncError};

/// Core configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub ranking: RankingConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

/// Message admission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Received messages with an identical body inside this window are duplicates
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

/// Conversation list bucketing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Offset from UTC used to decide calendar days. Defaults to the
    /// machine's local offset.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

/// Account backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the account backend (without the `/api/v1` suffix)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Maximum number of records sent in one bulk add call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attempts before a queued upload is marked failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Mailbox retention sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Messages older than this many days are removed. 0 keeps everything.
    #[serde(default)]
    pub days: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sync-core")
        .join("mailbox.db")
}

fn default_pool_size() -> u32 {
    8
}

fn default_dedup_window_secs() -> u64 {
    5 * 60
}

fn default_api_url() -> String {
    "https://api.messenger.example".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    5
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl IngestConfig {
    pub fn dedup_window_ms(&self) -> i64 {
        (self.dedup_window_secs as i64) * 1000
    }
}

impl RankingConfig {
    /// The offset used for calendar-day bucketing
    pub fn offset(&self) -> chrono::FixedOffset {
        let local = *chrono::Local::now().offset();
        match self.utc_offset_minutes {
            Some(minutes) => chrono::FixedOffset::east_opt(minutes * 60).unwrap_or(local),
            None => local,
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CoreConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        info!("Loading configuration from: {:?}", path);
        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("Failed to read config: {}", e)))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CoreConfig = toml::from_str(content)
            .map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.pool_size == 0 {
            return Err(SyncError::Config("store.pool_size must be at least 1".into()));
        }
        if self.sync.api_url.trim().is_empty() {
            return Err(SyncError::Config("sync.api_url must not be empty".into()));
        }
        if self.sync.batch_size == 0 {
            return Err(SyncError::Config("sync.batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sync-core").join("config.toml"))
}
