//! Binary Wire Schema
//!
//! Compact tagged representation of trades, snapshots, and status events for
//! hub delivery and any cross-process boundary. Encoded with `prost`:
//! explicit field tags give forward compatibility, and readers skip tags
//! they do not know.
//!
//! Prices and quantities travel as fixed-point `int64` scaled by `1e8`;
//! conversion from the domain's decimals saturates instead of failing, so
//! encoding a valid domain value is total.

use prost::Message;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::domain::aggregation::WindowSnapshot;
use crate::domain::market_data::{Side, Trade};
use crate::infrastructure::exchanges::supervisor::ConnectionStatus;

/// Fixed-point scale: eight decimal places.
pub const PRICE_SCALE: u32 = 8;

const SCALE_FACTOR: i64 = 100_000_000;

// =============================================================================
// Wire Messages
// =============================================================================

/// Message kind discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum MessageKind {
    /// Unknown; never produced by this writer.
    Unspecified = 0,
    /// A single normalized trade.
    Trade = 1,
    /// An aggregation window snapshot.
    Snapshot = 2,
    /// A connection status transition.
    Status = 3,
}

/// Trade side on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum WireSide {
    /// Unknown; never produced by this writer.
    Unspecified = 0,
    /// Taker bought.
    Buy = 1,
    /// Taker sold.
    Sell = 2,
}

/// Envelope for every item the hub delivers across a process boundary.
#[derive(Clone, PartialEq, Message)]
pub struct WireMessage {
    /// Message kind, see [`MessageKind`].
    #[prost(enumeration = "MessageKind", tag = "1")]
    pub kind: i32,

    /// Canonical instrument symbol.
    #[prost(string, tag = "2")]
    pub instrument: String,

    /// Price, fixed-point scaled by 1e8. Trade messages only.
    #[prost(int64, tag = "3")]
    pub price_e8: i64,

    /// Quantity, fixed-point scaled by 1e8. Trade messages only.
    #[prost(int64, tag = "4")]
    pub quantity_e8: i64,

    /// Trade side, see [`WireSide`]. Trade messages only.
    #[prost(enumeration = "WireSide", tag = "5")]
    pub side: i32,

    /// Source venue name.
    #[prost(string, tag = "6")]
    pub exchange_id: String,

    /// Event time, epoch milliseconds.
    #[prost(int64, tag = "7")]
    pub timestamp_millis: i64,

    /// Snapshot payload, present on [`MessageKind::Snapshot`].
    #[prost(message, optional, tag = "8")]
    pub snapshot: Option<SnapshotBody>,

    /// Status payload, present on [`MessageKind::Status`].
    #[prost(message, optional, tag = "9")]
    pub status: Option<StatusBody>,
}

/// Aggregation snapshot payload.
#[derive(Clone, PartialEq, Message)]
pub struct SnapshotBody {
    /// Timeframe label, e.g. `1m`.
    #[prost(string, tag = "1")]
    pub timeframe: String,

    /// Window start, epoch milliseconds.
    #[prost(int64, tag = "2")]
    pub window_start_ms: i64,

    /// Window end (exclusive), epoch milliseconds.
    #[prost(int64, tag = "3")]
    pub window_end_ms: i64,

    /// VWAP, fixed-point scaled by 1e8.
    #[prost(int64, tag = "4")]
    pub vwap_e8: i64,

    /// Cumulative volume, fixed-point scaled by 1e8.
    #[prost(int64, tag = "5")]
    pub volume_e8: i64,

    /// Last trade price, fixed-point scaled by 1e8.
    #[prost(int64, tag = "6")]
    pub last_price_e8: i64,

    /// Open price, fixed-point scaled by 1e8.
    #[prost(int64, tag = "7")]
    pub open_e8: i64,

    /// High price, fixed-point scaled by 1e8.
    #[prost(int64, tag = "8")]
    pub high_e8: i64,

    /// Low price, fixed-point scaled by 1e8.
    #[prost(int64, tag = "9")]
    pub low_e8: i64,

    /// Trades applied to the window.
    #[prost(uint64, tag = "10")]
    pub trade_count: u64,
}

/// Connection status payload.
#[derive(Clone, PartialEq, Message)]
pub struct StatusBody {
    /// Lifecycle state name.
    #[prost(string, tag = "1")]
    pub state: String,

    /// Consecutive failures since the last stable session.
    #[prost(uint32, tag = "2")]
    pub retry_count: u32,

    /// Most recent error text, empty when none.
    #[prost(string, tag = "3")]
    pub detail: String,
}

// =============================================================================
// Fixed-Point Conversion
// =============================================================================

/// Convert a decimal to fixed-point 1e8, saturating at the `i64` range.
#[must_use]
pub fn to_fixed_e8(value: Decimal) -> i64 {
    value
        .checked_mul(Decimal::from(SCALE_FACTOR))
        .and_then(|scaled| scaled.round().to_i64())
        .unwrap_or(if value.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        })
}

/// Convert a fixed-point 1e8 value back to a decimal.
#[must_use]
pub fn from_fixed_e8(value: i64) -> Decimal {
    Decimal::new(value, PRICE_SCALE)
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a trade. Total: saturating fixed-point conversion, no failure path.
#[must_use]
pub fn encode_trade(trade: &Trade) -> Vec<u8> {
    let side = match trade.side {
        Side::Buy => WireSide::Buy,
        Side::Sell => WireSide::Sell,
    };

    WireMessage {
        kind: MessageKind::Trade as i32,
        instrument: trade.symbol.clone(),
        price_e8: to_fixed_e8(trade.price),
        quantity_e8: to_fixed_e8(trade.quantity),
        side: side as i32,
        exchange_id: trade.exchange.as_str().to_string(),
        timestamp_millis: trade.exchange_timestamp_ms,
        snapshot: None,
        status: None,
    }
    .encode_to_vec()
}

/// Encode an aggregation snapshot.
#[must_use]
pub fn encode_snapshot(snapshot: &WindowSnapshot) -> Vec<u8> {
    WireMessage {
        kind: MessageKind::Snapshot as i32,
        instrument: snapshot.symbol.clone(),
        price_e8: 0,
        quantity_e8: 0,
        side: WireSide::Unspecified as i32,
        exchange_id: String::new(),
        timestamp_millis: snapshot.window_end_ms,
        snapshot: Some(SnapshotBody {
            timeframe: snapshot.timeframe.clone(),
            window_start_ms: snapshot.window_start_ms,
            window_end_ms: snapshot.window_end_ms,
            vwap_e8: to_fixed_e8(snapshot.vwap),
            volume_e8: to_fixed_e8(snapshot.volume),
            last_price_e8: to_fixed_e8(snapshot.last_price),
            open_e8: to_fixed_e8(snapshot.open),
            high_e8: to_fixed_e8(snapshot.high),
            low_e8: to_fixed_e8(snapshot.low),
            trade_count: snapshot.trade_count,
        }),
        status: None,
    }
    .encode_to_vec()
}

/// Encode a connection status transition.
#[must_use]
pub fn encode_status(status: &ConnectionStatus) -> Vec<u8> {
    WireMessage {
        kind: MessageKind::Status as i32,
        instrument: status.symbol.clone(),
        price_e8: 0,
        quantity_e8: 0,
        side: WireSide::Unspecified as i32,
        exchange_id: status.exchange.as_str().to_string(),
        timestamp_millis: 0,
        snapshot: None,
        status: Some(StatusBody {
            state: status.state.as_str().to_string(),
            retry_count: status.retry_count,
            detail: status.last_error.clone().unwrap_or_default(),
        }),
    }
    .encode_to_vec()
}

/// Decode a wire message.
///
/// # Errors
///
/// Returns [`prost::DecodeError`] on truncated or corrupt input. Unknown
/// field tags are skipped, not rejected.
pub fn decode(bytes: &[u8]) -> Result<WireMessage, prost::DecodeError> {
    WireMessage::decode(bytes)
}

// =============================================================================
// Tests
// =============================================================================
