//! Service entry point
//!
//! Wires the feed supervisor, maintenance timers and HTTP API together and
//! coordinates graceful shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use priced::api::{self, ApiState};
use priced::config::AppConfig;
use priced::feed;
use priced::persister::Persister;
use priced::query::QueryService;
use priced::store::PriceStore;
use priced::supervisor::{BackoffPolicy, ReconnectSupervisor};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(config = %config.digest(), "Starting price collector");

    let store = Arc::new(PriceStore::new(config.retention()));

    let persister = Persister::new(&config.persistence.data_dir)?;
    let restored = persister.load();
    if !restored.is_empty() {
        info!(points = restored.len(), "Restored snapshot");
        store.hydrate(restored);
    }

    let mode = config.feed_mode()?;
    let source = feed::build(&config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let supervisor = ReconnectSupervisor::new(
        source,
        Arc::clone(&store),
        BackoffPolicy::new(
            Duration::from_millis(config.supervisor.backoff_base_ms),
            Duration::from_millis(config.supervisor.backoff_cap_ms),
            Duration::from_secs(config.supervisor.stable_connection_secs),
        ),
        shutdown_rx.clone(),
    );
    let feed_status = supervisor.status_handle();
    let supervisor_task = tokio::spawn(supervisor.run());

    let maintenance_task = tokio::spawn(maintenance_loop(
        Arc::clone(&store),
        persister,
        Duration::from_secs(config.store.cleanup_interval_secs.max(1)),
        Duration::from_secs(config.persistence.snapshot_interval_secs.max(1)),
        shutdown_rx,
    ));

    let query = QueryService::new(Arc::clone(&store), config.symbol_map().into_keys());
    let router = api::create_router(ApiState {
        query,
        feed_status,
        source: mode.label().to_string(),
    });

    let addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, source = %mode, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    let _ = maintenance_task.await;
    let _ = supervisor_task.await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Timer-driven eviction and snapshots. A final snapshot runs on shutdown so
/// the durable artifact reflects the last state seen in memory.
async fn maintenance_loop(
    store: Arc<PriceStore>,
    persister: Persister,
    cleanup_every: Duration,
    snapshot_every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut cleanup = tokio::time::interval(cleanup_every);
    cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut snapshot = tokio::time::interval(snapshot_every);
    snapshot.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cleanup.tick() => {
                store.evict(chrono::Utc::now().timestamp());
            }
            _ = snapshot.tick() => {
                match persister.snapshot(&store) {
                    Ok(points) => tracing::debug!(points, "Snapshot written"),
                    Err(e) => warn!(error = %e, "Snapshot failed, continuing from memory"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    if let Err(e) = persister.snapshot(&store) {
                        warn!(error = %e, "Final snapshot failed");
                    }
                    break;
                }
            }
        }
    }
}
