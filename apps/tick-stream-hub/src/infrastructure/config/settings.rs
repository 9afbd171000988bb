//! Hub Configuration Settings
//!
//! Configuration types for the stream hub, loaded from environment
//! variables with typed defaults. The instrument routing table defaults to
//! the venues that actually list each pair.

use std::time::Duration;

use crate::domain::market_data::ExchangeId;

/// Which venues feed one instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentRoute {
    /// Canonical instrument symbol.
    pub symbol: String,
    /// Venues to connect for this instrument.
    pub exchanges: Vec<ExchangeId>,
}

/// WebSocket connection settings, shared by every supervised session.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketSettings {
    /// Budget for handshake plus first frame.
    pub connect_timeout: Duration,
    /// Keepalive ping interval.
    pub heartbeat_interval: Duration,
    /// Keepalive idle timeout.
    pub heartbeat_timeout: Duration,
    /// Backoff base delay (also the jitter band width).
    pub backoff_base: Duration,
    /// Backoff exponent ceiling.
    pub backoff_cap_exponent: u32,
    /// Backoff hard ceiling.
    pub backoff_max_delay: Duration,
    /// Connected duration that resets the retry counter.
    pub stability_threshold: Duration,
    /// Raw frame buffer per session.
    pub frame_buffer: usize,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap_exponent: 6,
            backoff_max_delay: Duration::from_secs(60),
            stability_threshold: Duration::from_secs(30),
            frame_buffer: 1024,
        }
    }
}

/// Hub channel capacities.
#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    /// Trade channel capacity.
    pub trades_capacity: usize,
    /// Snapshot channel capacity.
    pub snapshots_capacity: usize,
    /// Status channel capacity.
    pub status_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            trades_capacity: 10_000,
            snapshots_capacity: 1_000,
            status_capacity: 256,
        }
    }
}

/// Aggregation behavior settings.
#[derive(Debug, Clone)]
pub struct AggregationSettings {
    /// Timeframe labels maintained per instrument.
    pub timeframes: Vec<String>,
    /// Completed windows retained per (instrument, timeframe).
    pub ring_capacity: usize,
    /// Publish a live snapshot on every trade.
    pub emit_on_trade: bool,
    /// Cadence for periodic live snapshots.
    pub snapshot_cadence: Duration,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            timeframes: vec!["1m".to_string(), "5m".to_string(), "1h".to_string()],
            ring_capacity: 120,
            emit_on_trade: true,
            snapshot_cadence: Duration::from_millis(250),
        }
    }
}

/// Historical backfill settings.
#[derive(Debug, Clone, Copy)]
pub struct HistorySettings {
    /// Total attempts per call, including the first.
    pub retry_attempts: u32,
    /// Delay before the first retry.
    pub retry_initial_delay: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Default bar limit per call.
    pub default_limit: u32,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_initial_delay: Duration::from_millis(250),
            request_timeout: Duration::from_secs(10),
            default_limit: 1000,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Instrument routing table.
    pub instruments: Vec<InstrumentRoute>,
    /// Shared WebSocket settings.
    pub websocket: WebSocketSettings,
    /// Hub channel capacities.
    pub hub: HubSettings,
    /// Aggregation behavior.
    pub aggregation: AggregationSettings,
    /// Historical backfill behavior.
    pub history: HistorySettings,
    /// Server ports.
    pub server: ServerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instruments: default_routes(),
            websocket: WebSocketSettings::default(),
            hub: HubSettings::default(),
            aggregation: AggregationSettings::default(),
            history: HistorySettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl AppConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the routing table or timeframe list is
    /// present but unparseable. Missing variables fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let instruments = match std::env::var("TICKHUB_INSTRUMENTS") {
            Ok(raw) => parse_routes(&raw)?,
            Err(_) => default_routes(),
        };

        let timeframes = match std::env::var("TICKHUB_TIMEFRAMES") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => AggregationSettings::default().timeframes,
        };

        let websocket_defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            connect_timeout: parse_env_duration_secs(
                "TICKHUB_CONNECT_TIMEOUT_SECS",
                websocket_defaults.connect_timeout,
            ),
            heartbeat_interval: parse_env_duration_secs(
                "TICKHUB_HEARTBEAT_INTERVAL_SECS",
                websocket_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                "TICKHUB_HEARTBEAT_TIMEOUT_SECS",
                websocket_defaults.heartbeat_timeout,
            ),
            backoff_base: parse_env_duration_millis(
                "TICKHUB_BACKOFF_BASE_MS",
                websocket_defaults.backoff_base,
            ),
            backoff_cap_exponent: parse_env_u32(
                "TICKHUB_BACKOFF_CAP_EXPONENT",
                websocket_defaults.backoff_cap_exponent,
            ),
            backoff_max_delay: parse_env_duration_secs(
                "TICKHUB_BACKOFF_MAX_DELAY_SECS",
                websocket_defaults.backoff_max_delay,
            ),
            stability_threshold: parse_env_duration_secs(
                "TICKHUB_STABILITY_THRESHOLD_SECS",
                websocket_defaults.stability_threshold,
            ),
            frame_buffer: parse_env_usize(
                "TICKHUB_FRAME_BUFFER",
                websocket_defaults.frame_buffer,
            ),
        };

        let hub_defaults = HubSettings::default();
        let hub = HubSettings {
            trades_capacity: parse_env_usize(
                "TICKHUB_TRADES_CAPACITY",
                hub_defaults.trades_capacity,
            ),
            snapshots_capacity: parse_env_usize(
                "TICKHUB_SNAPSHOTS_CAPACITY",
                hub_defaults.snapshots_capacity,
            ),
            status_capacity: parse_env_usize(
                "TICKHUB_STATUS_CAPACITY",
                hub_defaults.status_capacity,
            ),
        };

        let aggregation_defaults = AggregationSettings::default();
        let aggregation = AggregationSettings {
            timeframes,
            ring_capacity: parse_env_usize(
                "TICKHUB_WINDOW_RING_CAPACITY",
                aggregation_defaults.ring_capacity,
            ),
            emit_on_trade: parse_env_bool(
                "TICKHUB_EMIT_ON_TRADE",
                aggregation_defaults.emit_on_trade,
            ),
            snapshot_cadence: parse_env_duration_millis(
                "TICKHUB_SNAPSHOT_CADENCE_MS",
                aggregation_defaults.snapshot_cadence,
            ),
        };

        let history_defaults = HistorySettings::default();
        let history = HistorySettings {
            retry_attempts: parse_env_u32(
                "TICKHUB_HISTORY_RETRY_ATTEMPTS",
                history_defaults.retry_attempts,
            ),
            retry_initial_delay: parse_env_duration_millis(
                "TICKHUB_HISTORY_RETRY_DELAY_MS",
                history_defaults.retry_initial_delay,
            ),
            request_timeout: parse_env_duration_secs(
                "TICKHUB_HISTORY_TIMEOUT_SECS",
                history_defaults.request_timeout,
            ),
            default_limit: parse_env_u32(
                "TICKHUB_HISTORY_LIMIT",
                history_defaults.default_limit,
            ),
        };

        let server = ServerSettings {
            health_port: parse_env_u16("TICKHUB_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            instruments,
            websocket,
            hub,
            aggregation,
            history,
            server,
        })
    }

    /// Every venue referenced by the routing table, deduplicated.
    #[must_use]
    pub fn active_exchanges(&self) -> Vec<ExchangeId> {
        let mut seen = Vec::new();
        for route in &self.instruments {
            for exchange in &route.exchanges {
                if !seen.contains(exchange) {
                    seen.push(*exchange);
                }
            }
        }
        seen
    }
}

/// The venues that actually list each default pair.
fn default_routes() -> Vec<InstrumentRoute> {
    vec![
        InstrumentRoute {
            symbol: "BTC/USD".to_string(),
            exchanges: vec![ExchangeId::Coinbase, ExchangeId::Bitstamp, ExchangeId::Kraken],
        },
        InstrumentRoute {
            symbol: "BTC/EUR".to_string(),
            exchanges: vec![ExchangeId::Kraken, ExchangeId::Bitvavo],
        },
        InstrumentRoute {
            symbol: "BTC/USDT".to_string(),
            exchanges: vec![ExchangeId::Binance, ExchangeId::Okx, ExchangeId::Bitget],
        },
    ]
}

/// Parse a routing table of the form
/// `BTC/USD=coinbase,kraken;BTC/USDT=binance,okx`.
fn parse_routes(raw: &str) -> Result<Vec<InstrumentRoute>, ConfigError> {
    let mut routes = Vec::new();

    for entry in raw.split(';').filter(|e| !e.trim().is_empty()) {
        let (symbol, venues) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidRoute(entry.to_string()))?;

        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(ConfigError::InvalidRoute(entry.to_string()));
        }

        let mut exchanges = Vec::new();
        for name in venues.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let exchange = ExchangeId::from_str_case_insensitive(name)
                .ok_or_else(|| ConfigError::UnknownExchange(name.to_string()))?;
            exchanges.push(exchange);
        }
        if exchanges.is_empty() {
            return Err(ConfigError::InvalidRoute(entry.to_string()));
        }

        routes.push(InstrumentRoute {
            symbol: symbol.to_string(),
            exchanges,
        });
    }

    if routes.is_empty() {
        return Err(ConfigError::EmptyRoutingTable);
    }
    Ok(routes)
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A routing table entry was not `SYMBOL=venue,venue`.
    #[error("invalid instrument route: {0:?}")]
    InvalidRoute(String),
    /// A venue name did not match any integrated exchange.
    #[error("unknown exchange: {0:?}")]
    UnknownExchange(String),
    /// The routing table parsed to nothing.
    #[error("instrument routing table is empty")]
    EmptyRoutingTable,
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v.to_lowercase() != "false" && v != "0")
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
