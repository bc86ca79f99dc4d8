//! Core types shared across the collector
//!
//! Defines the price point record, feed mode selection, and canonical symbol
//! normalization.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single oracle price observation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Canonical symbol (e.g. "BTC")
    pub symbol: String,
    /// Price in USD
    pub price: f64,
    /// Oracle-reported timestamp in epoch seconds
    pub timestamp: i64,
    /// Oracle round identifier, when the source reports one
    #[serde(default)]
    pub round_id: Option<u64>,
    /// Local clock at ingestion, epoch seconds
    #[serde(rename = "created_at")]
    pub ingested_at: i64,
}

impl PricePoint {
    /// Build a point stamped with the current local clock.
    pub fn new(
        symbol: impl Into<String>,
        price: f64,
        timestamp: i64,
        round_id: Option<u64>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
            round_id,
            ingested_at: Utc::now().timestamp(),
        }
    }
}

/// Which feed implementation drives the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    /// Poll Chainlink aggregators over JSON-RPC
    Chainlink,
    /// Subscribe to the Polymarket RTDS push feed
    Rtds,
    /// Simulated random-walk feed for development and tests
    Mock,
}

impl FeedMode {
    /// Parse from a config string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "chainlink" => Some(FeedMode::Chainlink),
            "rtds" => Some(FeedMode::Rtds),
            "mock" => Some(FeedMode::Mock),
            _ => None,
        }
    }

    /// Source label reported in API responses
    pub fn label(&self) -> &'static str {
        match self {
            FeedMode::Chainlink => "chainlink",
            FeedMode::Rtds => "polymarket_rtds",
            FeedMode::Mock => "mock",
        }
    }
}

impl fmt::Display for FeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Normalize a wire symbol to the store's canonical form: uppercased base
/// asset with any quote suffix stripped. "btc/usd", "BTCUSDT" and "btcusdc"
/// all normalize to "BTC".
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let compact: String = raw
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    if compact.is_empty() {
        return None;
    }

    for quote in ["USDT", "USDC", "USD"] {
        if let Some(base) = compact.strip_suffix(quote) {
            if !base.is_empty() {
                return Some(base.to_string());
            }
        }
    }

    Some(compact)
}
