//! Polymarket RTDS WebSocket feed
//!
//! Subscribes to the Chainlink crypto price topic and forwards each update as
//! a tick. One `run` call is one socket session; the supervisor owns retry.
//! Inbound messages are classified once at the boundary into a tagged variant
//! so nothing downstream probes optional fields.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::feed::{FeedSource, SourceEvent};
use crate::types::{normalize_symbol, PricePoint};

const PRICE_TOPIC: &str = "crypto_prices_chainlink";
const PING_INTERVAL_SECS: u64 = 15;
const WATCHDOG_TICK_SECS: u64 = 5;
const WATCHDOG_SILENCE_SECS: u64 = 60;

fn feed_went_silent(last_update: Instant, silence_secs: u64) -> bool {
    last_update.elapsed().as_secs() >= silence_secs
}

/// RTDS timestamps arrive in milliseconds; older payloads used seconds.
fn normalize_epoch_seconds(ts: i64) -> i64 {
    if ts >= 1_000_000_000_000 {
        ts / 1000
    } else {
        ts
    }
}

#[derive(Debug, Serialize)]
struct SubscribeRequest {
    action: String,
    subscriptions: Vec<Subscription>,
}

#[derive(Debug, Serialize)]
struct Subscription {
    topic: String,
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    topic: Option<String>,
    timestamp: Option<i64>,
    payload: Option<RawPayload>,
    message: Option<String>,
    #[serde(rename = "statusCode")]
    status_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    symbol: Option<String>,
    timestamp: Option<i64>,
    value: Option<f64>,
}

/// Inbound messages, classified once at the boundary
#[derive(Debug, PartialEq)]
enum Inbound {
    PriceUpdate {
        symbol: String,
        price: f64,
        timestamp: i64,
    },
    Heartbeat,
    ServerError {
        status: u16,
        message: String,
    },
    Unknown,
}

fn classify(text: &str) -> Inbound {
    let text = text.trim();
    if text.is_empty() || text == "pong" {
        return Inbound::Heartbeat;
    }

    let msg: RawMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(_) => return Inbound::Unknown,
    };

    if let Some(message) = msg.message {
        return Inbound::ServerError {
            status: msg.status_code.unwrap_or_default(),
            message,
        };
    }

    match msg.topic.as_deref() {
        Some(PRICE_TOPIC) => {}
        _ => return Inbound::Unknown,
    }

    let Some(payload) = msg.payload else {
        return Inbound::Unknown;
    };
    let (Some(symbol), Some(value)) = (payload.symbol, payload.value) else {
        return Inbound::Unknown;
    };
    if value <= 0.0 {
        return Inbound::Unknown;
    }

    let ts = payload
        .timestamp
        .or(msg.timestamp)
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    Inbound::PriceUpdate {
        symbol,
        price: value,
        timestamp: normalize_epoch_seconds(ts),
    }
}

pub struct RtdsFeed {
    url: String,
    /// Canonical symbols accepted from the wire
    symbols: BTreeSet<String>,
}

impl RtdsFeed {
    pub fn new(url: impl Into<String>, symbols: impl IntoIterator<Item = String>) -> Self {
        Self {
            url: url.into(),
            symbols: symbols.into_iter().collect(),
        }
    }

    /// One subscription per symbol on the Chainlink price topic, using the
    /// feed's slash-separated symbol form (btc/usd).
    fn subscribe_request(&self) -> SubscribeRequest {
        let subscriptions = self
            .symbols
            .iter()
            .map(|symbol| {
                let wire = format!("{}/usd", symbol.to_lowercase());
                Subscription {
                    topic: PRICE_TOPIC.to_string(),
                    msg_type: "update".to_string(),
                    filters: Some(format!(r#"{{"symbol":"{}"}}"#, wire)),
                }
            })
            .collect();

        SubscribeRequest {
            action: "subscribe".to_string(),
            subscriptions,
        }
    }
}

#[async_trait]
impl FeedSource for RtdsFeed {
    fn name(&self) -> &'static str {
        "rtds"
    }

    async fn run(&mut self, tx: Sender<SourceEvent>) -> Result<()> {
        let (ws_stream, _) = connect_async(&self.url)
            .await
            .context("WebSocket connect failed")?;
        let (mut write, mut read) = ws_stream.split();

        let request = self.subscribe_request();
        let body = serde_json::to_string(&request)?;
        write
            .send(Message::Text(body))
            .await
            .context("Failed to send subscription")?;

        tracing::info!(
            source = %"rtds",
            url = %self.url,
            symbols = ?self.symbols,
            "Subscribed to price topic"
        );
        let _ = tx.send(SourceEvent::Connected).await;

        let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut watchdog = tokio::time::interval(Duration::from_secs(WATCHDOG_TICK_SECS));
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_update = Instant::now();

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    write
                        .send(Message::Text("ping".to_string()))
                        .await
                        .context("Failed to send ping")?;
                }
                _ = watchdog.tick() => {
                    if feed_went_silent(last_update, WATCHDOG_SILENCE_SECS) {
                        bail!("no price updates for {}s", WATCHDOG_SILENCE_SECS);
                    }
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => match classify(&text) {
                        Inbound::PriceUpdate { symbol, price, timestamp } => {
                            let Some(canonical) = normalize_symbol(&symbol) else {
                                tracing::debug!(source = %"rtds", symbol = %symbol, "Unparseable wire symbol");
                                continue;
                            };
                            if !self.symbols.contains(&canonical) {
                                tracing::debug!(source = %"rtds", symbol = %canonical, "Symbol not configured, dropping");
                                continue;
                            }
                            last_update = Instant::now();
                            let point = PricePoint::new(canonical, price, timestamp, None);
                            let _ = tx.send(SourceEvent::Tick(point)).await;
                        }
                        Inbound::Heartbeat => {}
                        Inbound::ServerError { status, message } => {
                            bail!("server error (status={}): {}", status, message);
                        }
                        Inbound::Unknown => {
                            tracing::debug!(source = %"rtds", "Dropping unrecognized message");
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        bail!("connection closed by server: {:?}", frame);
                    }
                    Some(Err(e)) => return Err(e).context("WebSocket error"),
                    None => bail!("stream ended"),
                    _ => {}
                }
            }
        }
    }
}
