#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Tick Stream Hub - Multi-Exchange Trade Aggregator
//!
//! Maintains resilient WebSocket connections to several crypto exchanges,
//! normalizes their heterogeneous trade feeds into one canonical schema,
//! computes rolling VWAP/volume aggregates per instrument, and fans both
//! raw trades and aggregation snapshots out to in-process subscribers.
//! Historical backfill is served on demand over the venues' REST APIs.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Canonical types with no I/O dependencies
//!   - `market_data`: Trades, venues, sides
//!   - `aggregation`: VWAP windows, snapshots, replay ring
//!   - `subscription`: Consumer ids and instrument filters
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Secret provider and historical data interfaces
//!   - `services`: The serialized aggregation task
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `exchanges`: Generic connector/supervisor plus seven venue mappings
//!   - `hub`: Broadcast fan-out with bounded, drop-oldest delivery
//!   - `history`: REST backfill with a bounded retry budget
//!   - `wire`: Tagged binary schema for cross-process delivery
//!   - `config`, `secrets`, `status`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Binance WS ──┐
//! Kraken WS  ──┤   ┌────────────┐   ┌────────────┐   ┌────────────┐
//!   ...       ├──▶│ Supervisors │──▶│  Tick Hub  │──▶│ Subscribers │
//! Bitget WS ──┘   │ + Normalize │   │  (fan-out) │   └────────────┘
//!                  └────────────┘   └─────▲──────┘
//!                                         │ snapshots
//!                                   ┌─────┴──────┐
//!                                   │ Aggregator │
//!                                   └────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Canonical market data types with no I/O dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::aggregation::{Candle, Timeframe, TimeframeAggregator, WindowSnapshot};
pub use domain::market_data::{ExchangeId, Side, Trade};
pub use domain::subscription::{ConsumerId, InstrumentFilter};

// Application
pub use application::ports::{HistoryProvider, SecretProvider};
pub use application::services::{AggregationConfig, AggregationService, HistoryService};

// Infrastructure config
pub use infrastructure::config::{AppConfig, ConfigError, InstrumentRoute, WebSocketSettings};

// Supervision
pub use infrastructure::exchanges::supervisor::{
    ConnectionState, ConnectionStatus, ExchangeSupervisor, FeedEvent, SupervisorConfig,
};

// Hub (for integration tests)
pub use infrastructure::hub::{HubConfig, SharedTickHub, TickHub};

// Backfill
pub use infrastructure::history::{BackfillClient, FetchError, RetryConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Feed status
pub use infrastructure::status::{FeedRegistry, FeedState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
