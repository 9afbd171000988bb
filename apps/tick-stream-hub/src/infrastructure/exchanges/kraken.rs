//! Kraken Integration
//!
//! Kraken multiplexes channels over one socket and frames trade data as a
//! bare JSON array rather than an object:
//!
//! ```json
//! [337, [["36735.3", "0.00514", "1700000763.511254", "s", "l", ""]], "trade", "XBT/USD"]
//! ```
//!
//! Control traffic (`systemStatus`, `subscriptionStatus`, `heartbeat`) comes
//! as objects with an `event` field and normalizes to nothing.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::{ExchangeSpec, HeartbeatPolicy, NormalizeError, parse_decimal, validate_timestamp};
use crate::domain::market_data::{ExchangeId, Side, Trade};
use crate::infrastructure::history::HistoryRequest;

const WS_URL: &str = "wss://ws.kraken.com";
const REST_URL: &str = "https://api.kraken.com/0/public";

/// Kraken pair notation: uppercase with the slash kept.
#[must_use]
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.to_uppercase()
}

/// Session descriptor for one instrument.
#[must_use]
pub fn spec(symbol: &str) -> ExchangeSpec {
    let payload = serde_json::json!({
        "event": "subscribe",
        "pair": [exchange_symbol(symbol)],
        "subscription": {"name": "trade"},
    });

    ExchangeSpec {
        exchange: ExchangeId::Kraken,
        symbol: symbol.to_string(),
        url: WS_URL.to_string(),
        subscribe_payload: Some(payload.to_string()),
        heartbeat: HeartbeatPolicy::ProtocolPing,
    }
}

/// Normalize one Kraken frame. A single frame can batch several trades.
///
/// # Errors
///
/// Returns [`NormalizeError`] for malformed JSON, short trade rows,
/// unparseable numerics, or an out-of-bounds timestamp.
pub fn normalize_frame(
    symbol: &str,
    frame: &str,
    ingest_ms: i64,
) -> Result<Vec<Trade>, NormalizeError> {
    let value: serde_json::Value = serde_json::from_str(frame)?;

    // Object frames are control traffic.
    let Some(parts) = value.as_array() else {
        return Ok(vec![]);
    };
    if parts.len() < 4 || parts[2].as_str() != Some("trade") {
        return Ok(vec![]);
    }

    let rows = parts[1]
        .as_array()
        .ok_or_else(|| NormalizeError::UnexpectedShape("trade payload not an array".to_string()))?;

    let mut trades = Vec::with_capacity(rows.len());
    for row in rows {
        trades.push(normalize_row(symbol, row, ingest_ms)?);
    }
    Ok(trades)
}

/// One trade row: `[price, volume, time, side, orderType, misc]`.
fn normalize_row(
    symbol: &str,
    row: &serde_json::Value,
    ingest_ms: i64,
) -> Result<Trade, NormalizeError> {
    let fields = row
        .as_array()
        .filter(|f| f.len() >= 4)
        .ok_or_else(|| NormalizeError::UnexpectedShape("trade row too short".to_string()))?;

    let price_str = fields[0]
        .as_str()
        .ok_or(NormalizeError::MissingField("price"))?;
    let volume_str = fields[1]
        .as_str()
        .ok_or(NormalizeError::MissingField("volume"))?;
    let time_str = fields[2]
        .as_str()
        .ok_or(NormalizeError::MissingField("time"))?;
    let side_str = fields[3]
        .as_str()
        .ok_or(NormalizeError::MissingField("side"))?;

    let price = parse_decimal("price", price_str)?;
    let quantity = parse_decimal("volume", volume_str)?;

    // Kraken reports decimal seconds; truncate to milliseconds.
    let seconds = parse_decimal("time", time_str)?;
    let timestamp_ms = (seconds * Decimal::from(1000))
        .trunc()
        .to_i64()
        .ok_or(NormalizeError::NotNumeric {
            field: "time",
            value: time_str.to_string(),
        })?;
    let timestamp_ms = validate_timestamp(timestamp_ms, ingest_ms)?;

    let side = match side_str {
        "b" => Side::Buy,
        "s" => Side::Sell,
        other => {
            return Err(NormalizeError::UnexpectedShape(format!(
                "unknown side {other:?}"
            )));
        }
    };

    Ok(Trade::new(
        ExchangeId::Kraken,
        symbol,
        price,
        quantity,
        side,
        timestamp_ms,
        ingest_ms,
    )?)
}

/// Build the OHLC backfill request, when the timeframe is supported.
#[must_use]
pub(crate) fn history_request(
    symbol: &str,
    timeframe: &str,
    start_ms: i64,
    _end_ms: i64,
    _limit: u32,
) -> Option<HistoryRequest> {
    let interval: u32 = match timeframe {
        "1m" => 1,
        "5m" => 5,
        "15m" => 15,
        "30m" => 30,
        "1h" => 60,
        "4h" => 240,
        "1d" => 1440,
        "1w" => 10080,
        _ => return None,
    };

    Some(HistoryRequest {
        url: format!("{REST_URL}/OHLC"),
        query: vec![
            ("pair".to_string(), exchange_symbol(symbol)),
            ("interval".to_string(), interval.to_string()),
            ("since".to_string(), (start_ms / 1000).to_string()),
        ],
    })
}

/// Parse an OHLC response. The result object keys the rows by Kraken's own
/// pair spelling, so take the one entry that is not the `last` cursor.
/// Rows: `[time, open, high, low, close, vwap, volume, count]`.
pub(crate) fn parse_history(
    body: &str,
) -> Result<Vec<crate::infrastructure::history::RawBar>, NormalizeError> {
    use crate::infrastructure::history::{RawBar, value_decimal, value_seconds};

    let value: serde_json::Value = serde_json::from_str(body)?;

    if let Some(errors) = value.get("error").and_then(|e| e.as_array())
        && !errors.is_empty()
    {
        return Err(NormalizeError::UnexpectedShape(format!(
            "kraken error: {errors:?}"
        )));
    }

    let result = value
        .get("result")
        .and_then(|r| r.as_object())
        .ok_or(NormalizeError::MissingField("result"))?;

    let rows = result
        .iter()
        .find(|(key, _)| key.as_str() != "last")
        .and_then(|(_, v)| v.as_array())
        .ok_or(NormalizeError::MissingField("result pair rows"))?;

    let mut bars = Vec::with_capacity(rows.len());
    for row in rows {
        let fields = row
            .as_array()
            .filter(|f| f.len() >= 7)
            .ok_or_else(|| NormalizeError::UnexpectedShape("ohlc row too short".to_string()))?;
        bars.push(RawBar {
            open_time_ms: value_seconds("time", &fields[0])?,
            open: value_decimal("open", &fields[1])?,
            high: value_decimal("high", &fields[2])?,
            low: value_decimal("low", &fields[3])?,
            close: value_decimal("close", &fields[4])?,
            volume: value_decimal("volume", &fields[6])?,
        });
    }

    Ok(bars)
}
