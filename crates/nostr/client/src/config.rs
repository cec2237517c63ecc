//! Client configuration.
//!
//! Stored as camelCase JSON. Every field has a default, so a partial file (or
//! no file at all) yields a usable configuration.
//!
//! ```json
//! {
//!   "database": { "path": "nostr.db", "maxReaderConnections": 4 },
//!   "ingest": { "batchSize": 30 },
//!   "subscriptions": { "staleAfterSecs": 10, "maxAttempts": 3 },
//!   "publishing": { "writeRelays": ["wss://relay.damus.io"], "retryWindowSecs": 432000 }
//! }
//! ```

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub subscriptions: SubscriptionConfig,

    #[serde(default)]
    pub publishing: PublishConfig,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Maximum number of reader connections
    #[serde(default = "default_max_reader_connections")]
    pub max_reader_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_reader_connections: default_max_reader_connections(),
        }
    }
}

/// Ingest worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestConfig {
    /// Events popped from the queue per drain pass
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

/// Subscription lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfig {
    /// Seconds a one-shot subscription may wait for EOSE before it is retried
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// REQ attempts for a one-shot subscription before it is given up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl SubscriptionConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Publishing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishConfig {
    /// Relays the local user's events are published to
    #[serde(default)]
    pub write_relays: Vec<String>,

    /// Events older than this are no longer re-sent
    #[serde(default = "default_retry_window_secs")]
    pub retry_window_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            write_relays: Vec::new(),
            retry_window_secs: default_retry_window_secs(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("nostr.db")
}

fn default_max_reader_connections() -> u32 {
    4
}

fn default_batch_size() -> usize {
    30
}

fn default_stale_after_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_window_secs() -> u64 {
    5 * 24 * 60 * 60
}

/// Load configuration from a JSON file, falling back to defaults if it does
/// not exist.
pub fn load_config(path: impl AsRef<Path>) -> Result<ClientConfig> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ClientConfig::default());
    }

    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))
}

/// Write configuration as pretty-printed JSON, creating parent directories.
pub fn save_config(path: impl AsRef<Path>, config: &ClientConfig) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}
