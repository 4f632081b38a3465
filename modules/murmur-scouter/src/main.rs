use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bluesky_client::BlueskyClient;
use mastodon_client::MastodonClient;
use murmur_bus::{MessageBus, PgBus};
use murmur_common::{Config, RateLimiter};
use murmur_scouter::listeners::{BlueskyListener, MastodonListener};
use murmur_scouter::{CapabilityRegistry, DispatchPipeline, ResultSink, TaskIngress};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("murmur=info".parse()?))
        .init();

    info!("Murmur scouter starting...");

    let config = Config::scouter_from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    // Run migrations (idempotent)
    PgBus::migrate(&pool).await?;

    let bus: Arc<dyn MessageBus> = Arc::new(PgBus::new(pool).with_prefetch(config.bus_prefetch));

    let registry = Arc::new(CapabilityRegistry::new(vec![
        Arc::new(BlueskyListener::new(BlueskyClient::new(
            &config.bluesky_base_url,
            RateLimiter::new(config.rate_limit_permits, config.rate_limit_window),
        ))),
        Arc::new(MastodonListener::new(MastodonClient::new(
            &config.mastodon_base_url,
            RateLimiter::new(config.rate_limit_permits, config.rate_limit_window),
        ))),
    ])?);
    info!(platforms = ?registry.platforms(), "Capabilities registered");

    // Channels first, then the workers that close over their endpoints.
    // Shutdown cascades through channel closure: ingress exits and drops the
    // task sender, dispatch drains and drops the result sender, the sink
    // drains and exits.
    let (task_tx, task_rx) = mpsc::channel(config.task_channel_capacity);
    let (result_tx, result_rx) = mpsc::channel(config.result_channel_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ingress = TaskIngress::new(bus.clone(), task_tx);
    let dispatch = DispatchPipeline::new(
        registry,
        bus.clone(),
        result_tx,
        config.dispatch_concurrency,
        config.search_timeout,
    );
    let sink = ResultSink::new(bus);

    let ingress_handle = tokio::spawn(ingress.run(shutdown_rx));
    let dispatch_handle = tokio::spawn(dispatch.run(task_rx));
    let sink_handle = tokio::spawn(sink.run(result_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = ingress_handle.await;
    let _ = dispatch_handle.await;
    let _ = sink_handle.await;

    info!("Murmur scouter stopped");
    Ok(())
}
