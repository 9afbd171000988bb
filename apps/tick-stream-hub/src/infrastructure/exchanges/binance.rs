//! Binance Spot Integration
//!
//! Binance streams trades on a per-symbol endpoint path, so the session
//! needs no subscribe handshake at all.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {
//!   "e": "trade",
//!   "E": 1700000000123,
//!   "s": "BTCUSDT",
//!   "t": 12345,
//!   "p": "42000.10000000",
//!   "q": "0.00500000",
//!   "T": 1700000000120,
//!   "m": true
//! }
//! ```
//!
//! `m` is "buyer is market maker": the aggressor sold when it is `true`.

use serde::Deserialize;

use super::{ExchangeSpec, HeartbeatPolicy, NormalizeError, parse_decimal, validate_timestamp};
use crate::domain::market_data::{ExchangeId, Side, Trade};
use crate::infrastructure::history::HistoryRequest;

const WS_URL_BASE: &str = "wss://stream.binance.com:9443/ws";
const REST_URL: &str = "https://api.binance.com/api/v3";

/// Binance channel symbol: no separator, lowercase.
#[must_use]
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_lowercase()
}

/// Session descriptor for one instrument.
#[must_use]
pub fn spec(symbol: &str) -> ExchangeSpec {
    ExchangeSpec {
        exchange: ExchangeId::Binance,
        symbol: symbol.to_string(),
        url: format!("{WS_URL_BASE}/{}@trade", exchange_symbol(symbol)),
        subscribe_payload: None,
        heartbeat: HeartbeatPolicy::ProtocolPing,
    }
}

/// Raw trade event payload.
#[derive(Debug, Clone, Deserialize)]
struct TradeEvent {
    /// Trade price as a decimal string.
    #[serde(rename = "p")]
    price: String,
    /// Trade quantity as a decimal string.
    #[serde(rename = "q")]
    quantity: String,
    /// Trade time, epoch milliseconds.
    #[serde(rename = "T")]
    trade_time_ms: i64,
    /// Whether the buyer was the resting (maker) order.
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

/// Normalize one Binance frame.
///
/// Subscribe acknowledgements (`{"result":null,"id":…}`) and any event other
/// than `trade` normalize to nothing.
///
/// # Errors
///
/// Returns [`NormalizeError`] for malformed JSON, missing or non-numeric
/// fields, or an out-of-bounds timestamp.
pub fn normalize_frame(
    symbol: &str,
    frame: &str,
    ingest_ms: i64,
) -> Result<Vec<Trade>, NormalizeError> {
    let value: serde_json::Value = serde_json::from_str(frame)?;

    if value.get("e").and_then(|v| v.as_str()) != Some("trade") {
        return Ok(vec![]);
    }

    let event: TradeEvent = serde_json::from_value(value)?;
    let price = parse_decimal("p", &event.price)?;
    let quantity = parse_decimal("q", &event.quantity)?;
    let timestamp_ms = validate_timestamp(event.trade_time_ms, ingest_ms)?;

    let side = if event.buyer_is_maker {
        Side::Sell
    } else {
        Side::Buy
    };

    let trade = Trade::new(
        ExchangeId::Binance,
        symbol,
        price,
        quantity,
        side,
        timestamp_ms,
        ingest_ms,
    )?;
    Ok(vec![trade])
}

/// Build the klines backfill request, when the timeframe is supported.
#[must_use]
pub(crate) fn history_request(
    symbol: &str,
    timeframe: &str,
    start_ms: i64,
    end_ms: i64,
    limit: u32,
) -> Option<HistoryRequest> {
    const SUPPORTED: &[&str] = &["1m", "5m", "15m", "30m", "1h", "4h", "1d", "1w"];
    if !SUPPORTED.contains(&timeframe) {
        return None;
    }

    Some(HistoryRequest {
        url: format!("{REST_URL}/klines"),
        query: vec![
            ("symbol".to_string(), exchange_symbol(symbol).to_uppercase()),
            ("interval".to_string(), timeframe.to_string()),
            ("startTime".to_string(), start_ms.to_string()),
            ("endTime".to_string(), end_ms.to_string()),
            ("limit".to_string(), limit.to_string()),
        ],
    })
}

/// Parse a klines response: rows of
/// `[openTime, open, high, low, close, volume, …]`.
pub(crate) fn parse_history(
    body: &str,
) -> Result<Vec<crate::infrastructure::history::RawBar>, NormalizeError> {
    use crate::infrastructure::history::{RawBar, value_decimal, value_millis};

    let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(body)?;
    let mut bars = Vec::with_capacity(rows.len());

    for row in &rows {
        if row.len() < 6 {
            return Err(NormalizeError::UnexpectedShape(
                "kline row shorter than 6 elements".to_string(),
            ));
        }
        bars.push(RawBar {
            open_time_ms: value_millis("openTime", &row[0])?,
            open: value_decimal("open", &row[1])?,
            high: value_decimal("high", &row[2])?,
            low: value_decimal("low", &row[3])?,
            close: value_decimal("close", &row[4])?,
            volume: value_decimal("volume", &row[5])?,
        });
    }

    Ok(bars)
}
