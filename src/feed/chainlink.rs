//! Chainlink aggregator polling feed
//!
//! Reads `latestRoundData()` for each configured aggregator over JSON-RPC on
//! a fixed interval. Reads are independent per symbol; a sweep in which every
//! read fails ends the session.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::mpsc::Sender;

use crate::feed::{FeedSource, SourceEvent};
use crate::types::PricePoint;

/// `latestRoundData()` selector
const LATEST_ROUND_DATA: &str = "0xfeaf968c";
/// `decimals()` selector
const DECIMALS: &str = "0x313ce567";
const RPC_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Copy)]
struct RoundData {
    round_id: u64,
    answer: u128,
    updated_at: i64,
}

pub struct ChainlinkPoller {
    client: reqwest::Client,
    rpc_urls: Vec<String>,
    /// Canonical symbol -> aggregator address
    feeds: BTreeMap<String, String>,
    interval: Duration,
    /// Aggregator decimals, fetched once per symbol
    decimals: HashMap<String, u32>,
}

impl ChainlinkPoller {
    pub fn new(
        rpc_urls: Vec<String>,
        feeds: BTreeMap<String, String>,
        interval: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(RPC_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            rpc_urls,
            feeds,
            interval,
            decimals: HashMap::new(),
        })
    }

    /// Try each RPC endpoint in order until one answers the call.
    async fn eth_call(&self, to: &str, data: &str) -> Result<String> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{"to": to, "data": data}, "latest"],
        });

        let mut last_err = None;
        for url in &self.rpc_urls {
            let response = match self.client.post(url).json(&payload).send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "RPC endpoint unreachable, trying next");
                    last_err = Some(anyhow!(e));
                    continue;
                }
            };

            match response.json::<RpcResponse>().await {
                Ok(RpcResponse {
                    result: Some(result),
                    ..
                }) => return Ok(result),
                Ok(RpcResponse {
                    error: Some(err), ..
                }) => {
                    last_err = Some(anyhow!("RPC error {}: {}", err.code, err.message));
                }
                Ok(_) => last_err = Some(anyhow!("empty RPC response from {}", url)),
                Err(e) => {
                    last_err = Some(anyhow!("invalid RPC response from {}: {}", url, e));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("no RPC endpoints configured")))
    }

    async fn fetch_decimals(&self, aggregator: &str) -> Result<u32> {
        let raw = self.eth_call(aggregator, DECIMALS).await?;
        let words = decode_words(&raw, 1)?;
        Ok(u128_from_word(&words[0])? as u32)
    }

    /// latestRoundData() returns (roundId, answer, startedAt, updatedAt,
    /// answeredInRound); only the first, second and fourth words matter here.
    async fn read_round(&self, aggregator: &str) -> Result<RoundData> {
        let raw = self.eth_call(aggregator, LATEST_ROUND_DATA).await?;
        let words = decode_words(&raw, 5)?;

        Ok(RoundData {
            round_id: u128_from_word(&words[0])? as u64,
            answer: u128_from_word(&words[1])?,
            updated_at: u128_from_word(&words[3])? as i64,
        })
    }
}

#[async_trait]
impl FeedSource for ChainlinkPoller {
    fn name(&self) -> &'static str {
        "chainlink"
    }

    async fn run(&mut self, tx: Sender<SourceEvent>) -> Result<()> {
        if self.feeds.is_empty() {
            bail!("no aggregators configured");
        }

        let mut connected = false;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let mut sweep_ok = 0usize;
            for (symbol, aggregator) in &self.feeds {
                let decimals = match self.decimals.get(symbol).copied() {
                    Some(decimals) => decimals,
                    None => match self.fetch_decimals(aggregator).await {
                        Ok(decimals) => {
                            self.decimals.insert(symbol.clone(), decimals);
                            decimals
                        }
                        Err(e) => {
                            tracing::warn!(symbol = %symbol, error = %e, "Failed to read aggregator decimals");
                            continue;
                        }
                    },
                };

                match self.read_round(aggregator).await {
                    Ok(round) => {
                        if !connected {
                            connected = true;
                            let _ = tx.send(SourceEvent::Connected).await;
                        }
                        sweep_ok += 1;

                        let point = PricePoint::new(
                            symbol.clone(),
                            scale_answer(round.answer, decimals),
                            round.updated_at,
                            Some(round.round_id),
                        );
                        let _ = tx.send(SourceEvent::Tick(point)).await;
                    }
                    Err(e) => {
                        tracing::warn!(symbol = %symbol, error = %e, "Aggregator read failed");
                    }
                }
            }

            if sweep_ok == 0 {
                bail!("all {} aggregator reads failed", self.feeds.len());
            }
        }
    }
}

/// Split an `eth_call` hex result into 32-byte ABI words.
fn decode_words(raw: &str, expect: usize) -> Result<Vec<[u8; 32]>> {
    let bytes = hex::decode(raw.trim_start_matches("0x")).context("Invalid hex in RPC result")?;
    if bytes.len() < expect * 32 {
        bail!("short ABI result: {} bytes, expected {}", bytes.len(), expect * 32);
    }

    Ok(bytes
        .chunks_exact(32)
        .take(expect)
        .map(|chunk| {
            let mut word = [0u8; 32];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

/// Interpret a 32-byte ABI word as an unsigned integer. Chainlink answers are
/// positive and fit in the low 16 bytes.
fn u128_from_word(word: &[u8; 32]) -> Result<u128> {
    if word[..16].iter().any(|&b| b != 0) {
        bail!("ABI word out of range");
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

fn scale_answer(answer: u128, decimals: u32) -> f64 {
    answer as f64 / 10f64.powi(decimals as i32)
}
