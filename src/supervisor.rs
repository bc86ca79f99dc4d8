//! Feed session supervision
//!
//! Owns the feed lifecycle as an explicit state machine with bounded
//! exponential backoff. Feed sources never retry on their own; every
//! reconnect decision happens here so liveness is observable and the policy
//! is testable without a network.

use chrono::Utc;
use rand::Rng;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

use crate::feed::{FeedSource, SourceEvent};
use crate::store::PriceStore;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Backoff => "backoff",
        }
    }
}

/// Externally observable supervisor state
#[derive(Debug, Clone)]
pub struct FeedStatus {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub last_transition_at: i64,
}

/// Shared read handle onto the supervisor state
#[derive(Clone)]
pub struct StatusHandle {
    inner: Arc<RwLock<FeedStatus>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(FeedStatus {
                state: ConnectionState::Disconnected,
                last_error: None,
                last_transition_at: Utc::now().timestamp(),
            })),
        }
    }

    /// Record a state change; the transition timestamp only moves when the
    /// state actually changes.
    fn transition(&self, state: ConnectionState) {
        if let Ok(mut status) = self.inner.write() {
            if status.state != state {
                tracing::debug!(from = status.state.label(), to = state.label(), "Feed state changed");
                status.state = state;
                status.last_transition_at = Utc::now().timestamp();
            }
        }
    }

    fn record_error(&self, error: &str) {
        if let Ok(mut status) = self.inner.write() {
            status.last_error = Some(error.to_string());
        }
    }

    pub fn get(&self) -> FeedStatus {
        self.inner
            .read()
            .map(|status| status.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn is_connected(&self) -> bool {
        self.get().state == ConnectionState::Connected
    }
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconnect delay policy: exponential growth to a cap, reset to base after
/// a sustained connected period.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    stable_after: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, stable_after: Duration) -> Self {
        Self {
            base,
            cap,
            stable_after,
        }
    }

    /// Delay before the next retry, given the count of consecutive failures
    /// so far.
    pub fn delay(&self, failures: u32) -> Duration {
        self.base
            .saturating_mul(1u32 << failures.min(16))
            .min(self.cap)
    }

    /// Whether a connected period was long enough to forgive prior failures
    pub fn is_stable(&self, connected_for: Duration) -> bool {
        connected_for >= self.stable_after
    }
}

fn with_jitter(delay: Duration) -> Duration {
    // Up to 20% jitter keeps reconnect storms from synchronizing
    let jitter_cap = delay.as_millis() as u64 / 5;
    if jitter_cap == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap))
}

/// Resolves when shutdown is requested or the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

pub struct ReconnectSupervisor {
    source: Box<dyn FeedSource>,
    store: Arc<PriceStore>,
    policy: BackoffPolicy,
    status: StatusHandle,
    shutdown: watch::Receiver<bool>,
}

impl ReconnectSupervisor {
    pub fn new(
        source: Box<dyn FeedSource>,
        store: Arc<PriceStore>,
        policy: BackoffPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            store,
            policy,
            status: StatusHandle::new(),
            shutdown,
        }
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Supervise feed sessions until shutdown.
    pub async fn run(self) {
        let ReconnectSupervisor {
            mut source,
            store,
            policy,
            status,
            mut shutdown,
        } = self;
        let name = source.name();
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            status.transition(ConnectionState::Connecting);
            tracing::info!(source = %name, consecutive_failures = failures, "Starting feed session");

            let (tx, mut rx) = mpsc::channel::<SourceEvent>(EVENT_CHANNEL_CAPACITY);
            let mut session = source.run(tx);
            let mut connected_at: Option<Instant> = None;

            let session_error: String = loop {
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => {
                        tracing::info!(source = %name, "Shutdown requested, abandoning feed session");
                        status.transition(ConnectionState::Disconnected);
                        return;
                    }
                    event = rx.recv() => match event {
                        Some(SourceEvent::Connected) => {
                            connected_at.get_or_insert_with(Instant::now);
                            status.transition(ConnectionState::Connected);
                        }
                        Some(SourceEvent::Tick(point)) => {
                            // A tick doubles as connection confirmation
                            if connected_at.is_none() {
                                connected_at = Some(Instant::now());
                                status.transition(ConnectionState::Connected);
                            }
                            store.ingest(point);
                        }
                        None => {
                            break match (&mut session).await {
                                Ok(()) => "feed session ended".to_string(),
                                Err(e) => format!("{:#}", e),
                            };
                        }
                    },
                    result = &mut session => {
                        // Drain ticks queued before the session ended
                        while let Ok(event) = rx.try_recv() {
                            if let SourceEvent::Tick(point) = event {
                                store.ingest(point);
                            }
                        }
                        break match result {
                            Ok(()) => "feed session ended".to_string(),
                            Err(e) => format!("{:#}", e),
                        };
                    }
                }
            };

            if let Some(at) = connected_at {
                if policy.is_stable(at.elapsed()) {
                    failures = 0;
                }
            }

            let delay = with_jitter(policy.delay(failures));
            failures = failures.saturating_add(1);
            status.record_error(&session_error);
            status.transition(ConnectionState::Backoff);
            tracing::warn!(
                source = %name,
                error = %session_error,
                delay_ms = delay.as_millis() as u64,
                "Feed session ended, backing off"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        status.transition(ConnectionState::Disconnected);
        tracing::info!(source = %name, "Supervisor stopped");
    }
}
