use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use murmur_bus::{MessageBus, PgBus};
use murmur_common::Config;
use murmur_scheduler::{seed, store, OutboxRelay, PgStore, SchedulerStore, StatusTracker, TaskArranger};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("murmur=info".parse()?))
        .init();

    info!("Murmur scheduler starting...");

    let config = Config::scheduler_from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    // Run migrations (idempotent)
    store::migrate(&pool).await?;
    PgBus::migrate(&pool).await?;

    let pg_store = Arc::new(PgStore::new(pool.clone()));
    let store: Arc<dyn SchedulerStore> = pg_store.clone();
    let bus: Arc<dyn MessageBus> = Arc::new(PgBus::new(pool).with_prefetch(config.bus_prefetch));

    if config.seed_topics {
        seed::seed_if_empty(&store).await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = OutboxRelay::new(pg_store.clone(), bus.clone(), config.outbox_poll_interval);
    let relay_handle = tokio::spawn(relay.run(shutdown_rx.clone()));

    let tracker = StatusTracker::new(store.clone());
    let tracker_handle = tokio::spawn(tracker.run(bus.clone(), shutdown_rx.clone()));

    let arranger = TaskArranger::new(store, config.enabled_platforms.clone());
    let mut interval = tokio::time::interval(config.arrange_interval);
    let mut shutdown = shutdown_rx;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                if let Err(e) = arranger.arrange_and_publish().await {
                    warn!(error = %e, "Arrange cycle failed");
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = relay_handle.await;
    let _ = tracker_handle.await;

    info!("Murmur scheduler stopped");
    Ok(())
}
