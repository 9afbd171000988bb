//! Coinbase Exchange Integration
//!
//! Subscribes to the `matches` channel over the public feed.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {
//!   "type": "match",
//!   "trade_id": 865243,
//!   "time": "2023-11-14T20:46:03.511254Z",
//!   "product_id": "BTC-USD",
//!   "size": "0.00514",
//!   "price": "36735.32",
//!   "side": "sell"
//! }
//! ```

use serde::Deserialize;

use super::{ExchangeSpec, HeartbeatPolicy, NormalizeError, parse_decimal, validate_timestamp};
use crate::domain::market_data::{ExchangeId, Side, Trade};
use crate::infrastructure::history::HistoryRequest;

const WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";
const REST_URL: &str = "https://api.exchange.coinbase.com";

/// Coinbase product id: slash becomes dash.
#[must_use]
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace('/', "-")
}

/// Session descriptor for one instrument.
#[must_use]
pub fn spec(symbol: &str) -> ExchangeSpec {
    let payload = serde_json::json!({
        "type": "subscribe",
        "product_ids": [exchange_symbol(symbol)],
        "channels": ["matches"],
    });

    ExchangeSpec {
        exchange: ExchangeId::Coinbase,
        symbol: symbol.to_string(),
        url: WS_URL.to_string(),
        subscribe_payload: Some(payload.to_string()),
        heartbeat: HeartbeatPolicy::ProtocolPing,
    }
}

/// Raw match message payload.
#[derive(Debug, Clone, Deserialize)]
struct MatchMessage {
    price: String,
    size: String,
    side: String,
    /// RFC-3339 execution time.
    time: String,
}

/// Normalize one Coinbase frame.
///
/// `subscriptions` acks, heartbeats, and every non-match type normalize to
/// nothing; `last_match` (replayed on connect) counts as a trade.
///
/// # Errors
///
/// Returns [`NormalizeError`] for malformed JSON, unparseable numerics, an
/// unknown side, or an out-of-bounds timestamp.
pub fn normalize_frame(
    symbol: &str,
    frame: &str,
    ingest_ms: i64,
) -> Result<Vec<Trade>, NormalizeError> {
    let value: serde_json::Value = serde_json::from_str(frame)?;

    let msg_type = value.get("type").and_then(|v| v.as_str());
    if !matches!(msg_type, Some("match" | "last_match")) {
        return Ok(vec![]);
    }

    let message: MatchMessage = serde_json::from_value(value)?;
    let price = parse_decimal("price", &message.price)?;
    let quantity = parse_decimal("size", &message.size)?;

    let side = match message.side.as_str() {
        "buy" => Side::Buy,
        "sell" => Side::Sell,
        other => {
            return Err(NormalizeError::UnexpectedShape(format!(
                "unknown side {other:?}"
            )));
        }
    };

    let parsed_time = chrono::DateTime::parse_from_rfc3339(&message.time).map_err(|_| {
        NormalizeError::NotNumeric {
            field: "time",
            value: message.time.clone(),
        }
    })?;
    let timestamp_ms = validate_timestamp(parsed_time.timestamp_millis(), ingest_ms)?;

    let trade = Trade::new(
        ExchangeId::Coinbase,
        symbol,
        price,
        quantity,
        side,
        timestamp_ms,
        ingest_ms,
    )?;
    Ok(vec![trade])
}

/// Build the candles backfill request, when the timeframe is supported.
#[must_use]
pub(crate) fn history_request(
    symbol: &str,
    timeframe: &str,
    start_ms: i64,
    end_ms: i64,
    _limit: u32,
) -> Option<HistoryRequest> {
    let granularity: u32 = match timeframe {
        "1m" => 60,
        "5m" => 300,
        "15m" => 900,
        "1h" => 3600,
        "4h" => 14400,
        "1d" => 86400,
        _ => return None,
    };

    Some(HistoryRequest {
        url: format!("{REST_URL}/products/{}/candles", exchange_symbol(symbol)),
        query: vec![
            ("granularity".to_string(), granularity.to_string()),
            ("start".to_string(), (start_ms / 1000).to_string()),
            ("end".to_string(), (end_ms / 1000).to_string()),
        ],
    })
}

/// Parse a candles response: rows of
/// `[time, low, high, open, close, volume]`, newest first.
pub(crate) fn parse_history(
    body: &str,
) -> Result<Vec<crate::infrastructure::history::RawBar>, NormalizeError> {
    use crate::infrastructure::history::{RawBar, value_decimal, value_seconds};

    let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(body)?;
    let mut bars = Vec::with_capacity(rows.len());

    for row in &rows {
        if row.len() < 6 {
            return Err(NormalizeError::UnexpectedShape(
                "candle row shorter than 6 elements".to_string(),
            ));
        }
        bars.push(RawBar {
            open_time_ms: value_seconds("time", &row[0])?,
            low: value_decimal("low", &row[1])?,
            high: value_decimal("high", &row[2])?,
            open: value_decimal("open", &row[3])?,
            close: value_decimal("close", &row[4])?,
            volume: value_decimal("volume", &row[5])?,
        });
    }

    Ok(bars)
}
