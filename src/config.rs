// =============================================================================
// Feed Configuration — dashboard-owned settings consumed here as parameters
// =============================================================================
//
// The presentation layer owns these values (symbol, window size, refresh
// cadence); the feed core only consumes them. Persistence uses an atomic
// tmp + rename pattern to prevent corruption on crash, and every field
// carries a serde default so older config files keep loading.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_symbol() -> String {
    "btcusdt".to_string()
}

fn default_poll_limit() -> usize {
    300
}

fn default_buffer_capacity() -> usize {
    500
}

fn default_refresh_secs() -> u64 {
    5
}

fn default_rest_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_ws_base_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

/// Feed settings for a single-symbol session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Trading pair to watch (case-insensitive; normalised per channel).
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Number of trades requested per poll cycle (1..=300).
    #[serde(default = "default_poll_limit")]
    pub poll_limit: usize,

    /// Capacity of the live trade ring buffer.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Seconds between poll cycles.
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,

    /// REST endpoint base.
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    /// WebSocket endpoint base.
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            poll_limit: default_poll_limit(),
            buffer_capacity: default_buffer_capacity(),
            refresh_secs: default_refresh_secs(),
            rest_base_url: default_rest_base_url(),
            ws_base_url: default_ws_base_url(),
        }
    }
}

impl FeedConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read feed config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse feed config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            poll_limit = config.poll_limit,
            "feed config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise feed config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "feed config saved (atomic)");
        Ok(())
    }
}
