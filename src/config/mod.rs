//! Configuration management
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::types::{normalize_symbol, FeedMode};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub store: StoreConfig,
    pub persistence: PersistenceConfig,
    pub api: ApiConfig,
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Feed implementation: "rtds", "chainlink" or "mock"
    pub mode: String,
    /// Push feed WebSocket endpoint
    pub ws_url: String,
    /// JSON-RPC endpoints, tried in order until one answers
    pub rpc_urls: Vec<String>,
    /// Symbol -> Chainlink aggregator address
    pub symbols: BTreeMap<String, String>,
    /// Polling interval in seconds (polling and mock modes)
    pub collection_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// How long points are retained before eviction
    pub data_retention_hours: u64,
    /// Eviction sweep interval in seconds
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding the snapshot file
    pub data_dir: String,
    /// Snapshot interval in seconds
    pub snapshot_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// HTTP listen port
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// First reconnect delay in milliseconds
    pub backoff_base_ms: u64,
    /// Maximum reconnect delay in milliseconds
    pub backoff_cap_ms: u64,
    /// Connected period after which the backoff resets to base
    pub stable_connection_secs: u64,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Feed defaults
            .set_default("feed.mode", "rtds")?
            .set_default("feed.ws_url", "wss://ws-live-data.polymarket.com")?
            .set_default(
                "feed.rpc_urls",
                vec!["https://eth.llamarpc.com", "https://rpc.ankr.com/eth"],
            )?
            // Chainlink mainnet aggregators
            .set_default(
                "feed.symbols.BTC",
                "0xF4030086522a5bEEa4988F8cA5B36dbC97BeE88c",
            )?
            .set_default(
                "feed.symbols.ETH",
                "0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419",
            )?
            .set_default(
                "feed.symbols.SOL",
                "0x4ffC43a60e009B551865A93d232E33Fce9f01507",
            )?
            .set_default("feed.collection_interval_secs", 1)?
            // Store defaults
            .set_default("store.data_retention_hours", 6)?
            .set_default("store.cleanup_interval_secs", 600)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.snapshot_interval_secs", 60)?
            // API defaults
            .set_default("api.port", 8080)?
            // Supervisor defaults
            .set_default("supervisor.backoff_base_ms", 1000)?
            .set_default("supervisor.backoff_cap_ms", 60000)?
            .set_default("supervisor.stable_connection_secs", 60)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PRICED_*)
            .add_source(Environment::with_prefix("PRICED").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Parse the configured feed mode
    pub fn feed_mode(&self) -> Result<FeedMode> {
        FeedMode::from_str(&self.feed.mode)
            .ok_or_else(|| anyhow!("Unknown feed mode: {}", self.feed.mode))
    }

    /// Configured symbols in canonical form, mapped to aggregator addresses.
    /// Config sources may lowercase keys; normalization restores them.
    pub fn symbol_map(&self) -> BTreeMap<String, String> {
        self.feed
            .symbols
            .iter()
            .filter_map(|(raw, address)| normalize_symbol(raw).map(|s| (s, address.clone())))
            .collect()
    }

    /// Retention window as a duration
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.store.data_retention_hours * 3600)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "mode={} symbols={:?} retention_h={} cleanup_s={} snapshot_s={} port={}",
            self.feed.mode,
            self.symbol_map().keys().collect::<Vec<_>>(),
            self.store.data_retention_hours,
            self.store.cleanup_interval_secs,
            self.persistence.snapshot_interval_secs,
            self.api.port
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
