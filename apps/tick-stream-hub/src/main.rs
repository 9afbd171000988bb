//! Tick Stream Hub Binary
//!
//! Starts the multi-exchange trade stream hub.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tick-stream-hub
//! ```
//!
//! # Environment Variables (all optional)
//!
//! - `TICKHUB_INSTRUMENTS`: Routing table, e.g.
//!   `BTC/USD=coinbase,bitstamp,kraken;BTC/USDT=binance,okx,bitget`
//! - `TICKHUB_TIMEFRAMES`: Comma-separated timeframes (default: `1m,5m,1h`)
//! - `TICKHUB_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `TICKHUB_EMIT_ON_TRADE`: Publish a live snapshot per trade (default: true)
//! - `TICKHUB_SNAPSHOT_CADENCE_MS`: Periodic snapshot cadence (default: 250)
//! - `TICKHUB_SECRET_<VENUE>_API_KEY`: Optional venue API key
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use tick_stream_hub::application::ports::SecretProvider;
use tick_stream_hub::application::services::{AggregationConfig, AggregationService};
use tick_stream_hub::domain::aggregation::Timeframe;
use tick_stream_hub::domain::market_data::now_millis;
use tick_stream_hub::infrastructure::config::AppConfig;
use tick_stream_hub::infrastructure::exchanges::descriptor_for;
use tick_stream_hub::infrastructure::exchanges::heartbeat::KeepaliveConfig;
use tick_stream_hub::infrastructure::exchanges::reconnect::BackoffConfig;
use tick_stream_hub::infrastructure::exchanges::supervisor::{
    ExchangeSupervisor, FeedEvent, SupervisorConfig,
};
use tick_stream_hub::infrastructure::health::{HealthServer, HealthServerState};
use tick_stream_hub::infrastructure::hub::{HubConfig, TickHub};
use tick_stream_hub::infrastructure::secrets::EnvSecretProvider;
use tick_stream_hub::infrastructure::status::FeedRegistry;
use tick_stream_hub::infrastructure::{metrics, telemetry};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Tick Stream Hub");

    // Initialize Prometheus metrics
    let _metrics_handle = metrics::init_metrics();

    let config = AppConfig::from_env()?;
    log_config(&config);

    // Timeframes are a startup-fatal configuration concern.
    let timeframes = config
        .aggregation
        .timeframes
        .iter()
        .map(|label| Timeframe::parse(label))
        .collect::<Result<Vec<_>, _>>()?;

    let shutdown_token = CancellationToken::new();

    // Fan-out hub
    let hub = Arc::new(TickHub::new(HubConfig {
        trades_capacity: config.hub.trades_capacity,
        snapshots_capacity: config.hub.snapshots_capacity,
        status_capacity: config.hub.status_capacity,
    }));

    // Per-venue status registry
    let registry = Arc::new(FeedRegistry::new(config.active_exchanges()));

    // Secret provider: public trade channels need no credentials, but venue
    // API keys raise REST rate limits when provisioned.
    let secrets = EnvSecretProvider::new();
    for exchange in config.active_exchanges() {
        if secrets
            .get_secret(&format!("{exchange}.api_key"))
            .await
            .is_some()
        {
            tracing::info!(exchange = %exchange, "venue API key provisioned");
        }
    }

    // Shared event channel from every supervisor into the router task
    let (event_tx, event_rx) = mpsc::channel::<FeedEvent>(4096);

    // One supervised session per (instrument, venue)
    let supervisor_config = SupervisorConfig {
        connect_timeout: config.websocket.connect_timeout,
        backoff: BackoffConfig {
            base: config.websocket.backoff_base,
            cap_exponent: config.websocket.backoff_cap_exponent,
            max_delay: config.websocket.backoff_max_delay,
            stability_threshold: config.websocket.stability_threshold,
            jitter: true,
        },
        keepalive: KeepaliveConfig::new(
            config.websocket.heartbeat_interval,
            config.websocket.heartbeat_timeout,
        ),
        frame_buffer: config.websocket.frame_buffer,
    };

    let mut session_count = 0usize;
    for route in &config.instruments {
        for exchange in &route.exchanges {
            let spec = descriptor_for(*exchange, &route.symbol);
            let supervisor = ExchangeSupervisor::new(
                supervisor_config,
                spec,
                event_tx.clone(),
                shutdown_token.clone(),
            );
            tokio::spawn(supervisor.run());
            session_count += 1;
        }
    }
    drop(event_tx);
    tracing::info!(sessions = session_count, "exchange supervisors started");

    // Route feed events into the hub and the status registry
    let router_hub = Arc::clone(&hub);
    let router_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        route_feed_events(event_rx, router_hub, router_registry).await;
    });

    // Aggregation service: the single owner of all window state
    let aggregation = AggregationService::new(
        AggregationConfig {
            timeframes,
            ring_capacity: config.aggregation.ring_capacity,
            emit_on_trade: config.aggregation.emit_on_trade,
            snapshot_cadence: config.aggregation.snapshot_cadence,
        },
        Arc::clone(&hub),
        shutdown_token.clone(),
    );
    tokio::spawn(aggregation.run());

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&registry),
        Arc::clone(&hub),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Tick stream hub ready");

    await_shutdown(shutdown_token).await;

    // Give in-flight tasks a moment to observe cancellation.
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!("Tick stream hub stopped");
    Ok(())
}

/// Forward supervisor events into the hub and the status registry.
async fn route_feed_events(
    mut rx: mpsc::Receiver<FeedEvent>,
    hub: Arc<TickHub>,
    registry: Arc<FeedRegistry>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Trade(trade) => {
                if let Some(feed) = registry.feed(trade.exchange) {
                    feed.record_trade();
                }
                let age_ms = (now_millis() - trade.ingest_timestamp_ms).max(0);
                #[allow(clippy::cast_sign_loss)]
                metrics::record_pipeline_latency(Duration::from_millis(age_ms as u64));
                let _ = hub.publish_trade(trade);
            }
            FeedEvent::Status(status) => {
                if let Some(feed) = registry.feed(status.exchange) {
                    feed.apply(&status);
                }
                tracing::debug!(
                    exchange = %status.exchange,
                    symbol = %status.symbol,
                    state = status.state.as_str(),
                    retry_count = status.retry_count,
                    "feed state transition"
                );
                let _ = hub.publish_status(status);
            }
        }
    }
    tracing::info!("feed event channel drained");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        instruments = config.instruments.len(),
        exchanges = config.active_exchanges().len(),
        timeframes = ?config.aggregation.timeframes,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    for route in &config.instruments {
        tracing::debug!(
            symbol = %route.symbol,
            venues = ?route.exchanges.iter().map(|e| e.as_str()).collect::<Vec<_>>(),
            "instrument route"
        );
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
