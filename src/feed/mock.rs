//! Simulated feed for development and tests
//!
//! Emits a random walk per configured symbol with incrementing round ids, at
//! the same cadence as the polling feed.

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::Sender;

use crate::feed::{FeedSource, SourceEvent};
use crate::types::PricePoint;

pub struct MockFeed {
    symbols: Vec<String>,
    interval: Duration,
    prices: HashMap<String, f64>,
    rounds: HashMap<String, u64>,
}

impl MockFeed {
    pub fn new(symbols: Vec<String>, interval: Duration) -> Self {
        let prices = symbols
            .iter()
            .map(|s| (s.clone(), base_price(s)))
            .collect();
        let rounds = symbols.iter().map(|s| (s.clone(), 1000)).collect();

        Self {
            symbols,
            interval,
            prices,
            rounds,
        }
    }
}

fn base_price(symbol: &str) -> f64 {
    match symbol {
        "BTC" => 50_000.0,
        "ETH" => 3_000.0,
        "SOL" => 100.0,
        _ => 100.0,
    }
}

#[async_trait]
impl FeedSource for MockFeed {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn run(&mut self, tx: Sender<SourceEvent>) -> Result<()> {
        tracing::info!(symbols = ?self.symbols, "Mock feed started");
        let _ = tx.send(SourceEvent::Connected).await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp();

            for symbol in &self.symbols {
                if let Some(price) = self.prices.get_mut(symbol) {
                    // Random walk, +/- 1% per step
                    let step = rand::thread_rng().gen_range(-1.0..1.0) * *price * 0.01;
                    *price += step;

                    let round = self.rounds.entry(symbol.clone()).or_insert(1000);
                    *round += 1;

                    let point = PricePoint::new(symbol.clone(), *price, now, Some(*round));
                    let _ = tx.send(SourceEvent::Tick(point)).await;
                }
            }
        }
    }
}
