//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, per-venue connection status, and
//! Prometheus metrics. Used by container orchestrators and monitoring.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (at least one feed delivering)
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! The overall status degrades instead of failing: every feed down reads as
//! `unhealthy` (stale data) while the process keeps serving.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::hub::SharedTickHub;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::status::FeedRegistry;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Hub version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether no venue is currently delivering.
    pub stale: bool,
    /// Per-venue feed status.
    pub feeds: Vec<FeedInfo>,
    /// Subscriber statistics.
    pub subscribers: SubscriberStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every configured feed is connected.
    Healthy,
    /// Some feeds are down but data still flows.
    Degraded,
    /// No feed is delivering: data is stale.
    Unhealthy,
}

/// Individual feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Venue name.
    pub exchange: String,
    /// Connection state name.
    pub state: String,
    /// Whether this feed is connected.
    pub connected: bool,
    /// Trades received over the feed's lifetime.
    pub trades_received: u64,
    /// Reconnect attempts recorded.
    pub reconnect_attempts: u32,
    /// Most recent session error, if any.
    pub last_error: Option<String>,
}

/// Subscriber statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberStatus {
    /// Live trade subscribers.
    pub trade_receivers: usize,
    /// Live snapshot subscribers.
    pub snapshot_receivers: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: Arc<FeedRegistry>,
    hub: SharedTickHub,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, registry: Arc<FeedRegistry>, hub: SharedTickHub) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
            hub,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`HealthServerError`] if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }

    /// Build the router; split out so tests can drive it in-process.
    fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }
}

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Could not bind the listen port.
    #[error("failed to bind health port {0}: {1}")]
    BindFailed(u16, String),
    /// Server failed while running.
    #[error("health server failed: {0}")]
    ServerFailed(String),
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.registry.is_stale() {
        (StatusCode::SERVICE_UNAVAILABLE, "stale")
    } else {
        (StatusCode::OK, "ready")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "metrics not initialized".to_string(),
            )
        },
        |handle| (StatusCode::OK, handle.render()),
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feeds: Vec<FeedInfo> = state
        .registry
        .feeds()
        .map(|feed| FeedInfo {
            exchange: feed.exchange().to_string(),
            state: feed.state().as_str().to_string(),
            connected: feed.is_connected(),
            trades_received: feed.trades_received(),
            reconnect_attempts: feed.reconnect_attempts(),
            last_error: feed.last_error(),
        })
        .collect();

    let connected = feeds.iter().filter(|f| f.connected).count();
    let status = if connected == 0 {
        HealthStatus::Unhealthy
    } else if connected < feeds.len() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let hub_stats = state.hub.stats();

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stale: state.registry.is_stale(),
        feeds,
        subscribers: SubscriberStatus {
            trade_receivers: hub_stats.trade_receivers,
            snapshot_receivers: hub_stats.snapshot_receivers,
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market_data::ExchangeId;
    use crate::infrastructure::exchanges::supervisor::{ConnectionState, ConnectionStatus};
    use crate::infrastructure::hub::TickHub;

    fn state_with(
        connected: &[ExchangeId],
        all: &[ExchangeId],
    ) -> Arc<HealthServerState> {
        let registry = Arc::new(FeedRegistry::new(all.iter().copied()));
        for exchange in connected {
            registry.feed(*exchange).unwrap().apply(&ConnectionStatus {
                exchange: *exchange,
                symbol: "BTC/USD".to_string(),
                state: ConnectionState::Connected,
                retry_count: 0,
                next_retry_in: None,
                last_error: None,
            });
        }
        Arc::new(HealthServerState::new(
            "0.1.0-test".to_string(),
            registry,
            Arc::new(TickHub::with_defaults()),
        ))
    }

    #[test]
    fn all_connected_is_healthy() {
        let state = state_with(
            &[ExchangeId::Kraken, ExchangeId::Coinbase],
            &[ExchangeId::Kraken, ExchangeId::Coinbase],
        );
        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Healthy);
        assert!(!response.stale);
    }

    #[test]
    fn partial_connectivity_is_degraded() {
        let state = state_with(
            &[ExchangeId::Kraken],
            &[ExchangeId::Kraken, ExchangeId::Coinbase],
        );
        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Degraded);
        assert!(!response.stale);
    }

    #[test]
    fn no_connectivity_is_unhealthy_and_stale() {
        let state = state_with(&[], &[ExchangeId::Kraken, ExchangeId::Coinbase]);
        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert!(response.stale);
        assert_eq!(response.feeds.len(), 2);
    }

    #[tokio::test]
    async fn endpoints_respond_over_http() {
        let state = state_with(&[ExchangeId::Kraken], &[ExchangeId::Kraken]);
        let app = HealthServer::router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let health = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(health.status(), 200);
        let body: serde_json::Value = health.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["feeds"][0]["exchange"], "kraken");

        let live = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
        assert_eq!(live.status(), 200);

        let ready = reqwest::get(format!("http://{addr}/readyz")).await.unwrap();
        assert_eq!(ready.status(), 200);
    }
}
