//! Price feed sources
//!
//! Each source drives a single session of ticks over a channel. Reconnect
//! policy lives in the supervisor; a source never restarts itself.

mod chainlink;
mod mock;
mod rtds;

pub use chainlink::ChainlinkPoller;
pub use mock::MockFeed;
pub use rtds::RtdsFeed;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc::Sender;

use crate::config::AppConfig;
use crate::types::{FeedMode, PricePoint};

/// Events emitted by a feed session
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// Handshake confirmed or first successful read
    Connected,
    /// One normalized price observation
    Tick(PricePoint),
}

/// A source of price ticks.
///
/// `run` drives exactly one session: it emits `Connected` once the source is
/// live, then `Tick`s until the session ends. Any I/O failure terminates the
/// session with an error; running again begins a fresh sequence with no
/// replay of prior ticks.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Short source name for logging
    fn name(&self) -> &'static str;

    /// Drive one feed session to completion
    async fn run(&mut self, tx: Sender<SourceEvent>) -> Result<()>;
}

/// Build the configured feed implementation
pub fn build(config: &AppConfig) -> Result<Box<dyn FeedSource>> {
    let symbols = config.symbol_map();
    let interval = Duration::from_secs(config.feed.collection_interval_secs.max(1));

    Ok(match config.feed_mode()? {
        FeedMode::Rtds => Box::new(RtdsFeed::new(
            config.feed.ws_url.clone(),
            symbols.into_keys(),
        )),
        FeedMode::Chainlink => Box::new(ChainlinkPoller::new(
            config.feed.rpc_urls.clone(),
            symbols,
            interval,
        )?),
        FeedMode::Mock => Box::new(MockFeed::new(symbols.into_keys().collect(), interval)),
    })
}
