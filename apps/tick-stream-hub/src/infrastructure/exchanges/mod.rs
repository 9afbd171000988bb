//! Exchange Integrations
//!
//! One generic WebSocket connector and reconnection supervisor, parameterized
//! by a per-venue descriptor: endpoint URL, subscribe handshake, heartbeat
//! policy, and a frame normalizer that maps the venue's JSON trade payloads
//! into the canonical [`Trade`] record.
//!
//! Venue modules own nothing but their wire shapes and mappings; the session
//! loop, heartbeating, and backoff live in `connector`/`supervisor`.

use rust_decimal::Decimal;

use crate::domain::market_data::{ExchangeId, Trade, TradeError};

/// Venue wire shapes and normalization: Binance spot.
pub mod binance;
/// Venue wire shapes and normalization: Bitget spot.
pub mod bitget;
/// Venue wire shapes and normalization: Bitstamp.
pub mod bitstamp;
/// Venue wire shapes and normalization: Bitvavo.
pub mod bitvavo;
/// Venue wire shapes and normalization: Coinbase Exchange.
pub mod coinbase;
/// Generic WebSocket session loop.
pub mod connector;
/// Connection liveness monitoring.
pub mod heartbeat;
/// Venue wire shapes and normalization: Kraken.
pub mod kraken;
/// Venue wire shapes and normalization: OKX.
pub mod okx;
/// Exponential backoff policy for reconnects.
pub mod reconnect;
/// Per-exchange connection state machine.
pub mod supervisor;

// =============================================================================
// Exchange Descriptor
// =============================================================================

/// Heartbeat contract of a venue.
///
/// Most venues answer WebSocket protocol pings; OKX and Bitget use literal
/// `ping`/`pong` text frames instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPolicy {
    /// Send WebSocket ping control frames; any inbound frame counts as life.
    ProtocolPing,
    /// Send a text ping and answer the venue's text ping with a text pong.
    TextPing {
        /// Outbound keepalive text.
        ping: &'static str,
        /// Reply expected/owed for a text ping.
        pong: &'static str,
    },
}

/// Everything the generic connector needs to run one venue session for one
/// instrument.
#[derive(Debug, Clone)]
pub struct ExchangeSpec {
    /// Venue identity.
    pub exchange: ExchangeId,
    /// Canonical instrument symbol this session covers.
    pub symbol: String,
    /// WebSocket endpoint, possibly symbol-specific (Binance).
    pub url: String,
    /// JSON subscribe handshake to send after connect, if the venue needs one.
    pub subscribe_payload: Option<String>,
    /// Venue heartbeat contract.
    pub heartbeat: HeartbeatPolicy,
}

/// Build the session descriptor for a venue/instrument pair.
#[must_use]
pub fn descriptor_for(exchange: ExchangeId, symbol: &str) -> ExchangeSpec {
    match exchange {
        ExchangeId::Binance => binance::spec(symbol),
        ExchangeId::Bitget => bitget::spec(symbol),
        ExchangeId::Bitstamp => bitstamp::spec(symbol),
        ExchangeId::Bitvavo => bitvavo::spec(symbol),
        ExchangeId::Coinbase => coinbase::spec(symbol),
        ExchangeId::Kraken => kraken::spec(symbol),
        ExchangeId::Okx => okx::spec(symbol),
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Oldest exchange timestamp accepted, relative to ingest time.
pub const MAX_TIMESTAMP_PAST_MS: i64 = 86_400_000;

/// Furthest-future exchange timestamp accepted, relative to ingest time.
pub const MAX_TIMESTAMP_FUTURE_MS: i64 = 120_000;

/// Normalization failures. Every variant is drop-and-count, never fatal to
/// the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// Frame was not valid JSON.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field was absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A numeric field could not be parsed.
    #[error("field {field} is not numeric: {value:?}")]
    NotNumeric {
        /// Offending field name.
        field: &'static str,
        /// Raw value as received.
        value: String,
    },

    /// Exchange timestamp too far in the past or future.
    #[error("timestamp {timestamp_ms} out of bounds relative to ingest {ingest_ms}")]
    TimestampOutOfBounds {
        /// Exchange-reported timestamp.
        timestamp_ms: i64,
        /// Local ingest timestamp.
        ingest_ms: i64,
    },

    /// Frame shape did not match the venue's trade schema.
    #[error("unexpected frame shape: {0}")]
    UnexpectedShape(String),

    /// Parsed values failed canonical trade validation.
    #[error(transparent)]
    Trade(#[from] TradeError),
}

/// Normalize one raw text frame from `exchange` into zero or more canonical
/// trades.
///
/// Non-trade frames a venue is known to send (subscription acks, heartbeats,
/// system notices) normalize to an empty vec; only genuinely malformed or
/// out-of-contract payloads error. Pure apart from the per-venue mapping
/// tables: the same frame always yields the same result.
///
/// # Errors
///
/// Returns [`NormalizeError`] when required fields are missing, numerics do
/// not parse, or the exchange timestamp is outside the sane bound.
pub fn normalize(
    exchange: ExchangeId,
    symbol: &str,
    frame: &str,
    ingest_ms: i64,
) -> Result<Vec<Trade>, NormalizeError> {
    match exchange {
        ExchangeId::Binance => binance::normalize_frame(symbol, frame, ingest_ms),
        ExchangeId::Bitget => bitget::normalize_frame(symbol, frame, ingest_ms),
        ExchangeId::Bitstamp => bitstamp::normalize_frame(symbol, frame, ingest_ms),
        ExchangeId::Bitvavo => bitvavo::normalize_frame(symbol, frame, ingest_ms),
        ExchangeId::Coinbase => coinbase::normalize_frame(symbol, frame, ingest_ms),
        ExchangeId::Kraken => kraken::normalize_frame(symbol, frame, ingest_ms),
        ExchangeId::Okx => okx::normalize_frame(symbol, frame, ingest_ms),
    }
}

/// Validate an exchange timestamp against the sane-bound window.
pub(crate) fn validate_timestamp(
    timestamp_ms: i64,
    ingest_ms: i64,
) -> Result<i64, NormalizeError> {
    if timestamp_ms < ingest_ms - MAX_TIMESTAMP_PAST_MS
        || timestamp_ms > ingest_ms + MAX_TIMESTAMP_FUTURE_MS
    {
        return Err(NormalizeError::TimestampOutOfBounds {
            timestamp_ms,
            ingest_ms,
        });
    }
    Ok(timestamp_ms)
}

/// Parse a decimal string field, mapping failure to [`NormalizeError::NotNumeric`].
pub(crate) fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, NormalizeError> {
    value
        .parse::<Decimal>()
        .map_err(|_| NormalizeError::NotNumeric {
            field,
            value: value.to_string(),
        })
}

// =============================================================================
// Tests
// =============================================================================
