//! Bitget Spot Integration
//!
//! Subscribes to the spot `trade` channel. Like OKX, Bitget heartbeats with
//! literal `ping`/`pong` text frames.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {
//!   "action": "snapshot",
//!   "arg": {"instType": "SPOT", "channel": "trade", "instId": "BTCUSDT"},
//!   "data": [["1700000763511", "36735.3", "0.00514", "buy"]],
//!   "ts": 1700000763520
//! }
//! ```
//!
//! Trade rows are positional: `[timestamp, price, size, side]`.

use super::{ExchangeSpec, HeartbeatPolicy, NormalizeError, parse_decimal, validate_timestamp};
use crate::domain::market_data::{ExchangeId, Side, Trade};
use crate::infrastructure::history::HistoryRequest;

const WS_URL: &str = "wss://ws.bitget.com/v2/spot/public";
const REST_URL: &str = "https://api.bitget.com/api/v2/spot/market";

/// Bitget instrument id: no separator, uppercase kept as-is.
#[must_use]
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}

/// Session descriptor for one instrument.
#[must_use]
pub fn spec(symbol: &str) -> ExchangeSpec {
    let payload = serde_json::json!({
        "op": "subscribe",
        "args": [{
            "instType": "SPOT",
            "channel": "trade",
            "instId": exchange_symbol(symbol),
        }],
    });

    ExchangeSpec {
        exchange: ExchangeId::Bitget,
        symbol: symbol.to_string(),
        url: WS_URL.to_string(),
        subscribe_payload: Some(payload.to_string()),
        heartbeat: HeartbeatPolicy::TextPing {
            ping: "ping",
            pong: "pong",
        },
    }
}

/// Normalize one Bitget frame. Both `snapshot` (replay on subscribe) and
/// `update` actions carry trades; event frames normalize to nothing.
///
/// # Errors
///
/// Returns [`NormalizeError`] for malformed JSON, short rows, unparseable
/// numerics, an unknown side, or an out-of-bounds timestamp.
pub fn normalize_frame(
    symbol: &str,
    frame: &str,
    ingest_ms: i64,
) -> Result<Vec<Trade>, NormalizeError> {
    let value: serde_json::Value = serde_json::from_str(frame)?;

    let channel = value
        .get("arg")
        .and_then(|a| a.get("channel"))
        .and_then(|c| c.as_str());
    let action = value.get("action").and_then(|a| a.as_str());
    if channel != Some("trade") || !matches!(action, Some("snapshot" | "update")) {
        return Ok(vec![]);
    }

    let rows = value
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or(NormalizeError::MissingField("data"))?;

    let mut trades = Vec::with_capacity(rows.len());
    for row in rows {
        trades.push(normalize_row(symbol, row, ingest_ms)?);
    }
    Ok(trades)
}

fn normalize_row(
    symbol: &str,
    row: &serde_json::Value,
    ingest_ms: i64,
) -> Result<Trade, NormalizeError> {
    let fields = row
        .as_array()
        .filter(|f| f.len() >= 4)
        .ok_or_else(|| NormalizeError::UnexpectedShape("trade row too short".to_string()))?;

    let ts_str = fields[0]
        .as_str()
        .ok_or(NormalizeError::MissingField("ts"))?;
    let price_str = fields[1]
        .as_str()
        .ok_or(NormalizeError::MissingField("price"))?;
    let size_str = fields[2]
        .as_str()
        .ok_or(NormalizeError::MissingField("size"))?;
    let side_str = fields[3]
        .as_str()
        .ok_or(NormalizeError::MissingField("side"))?;

    let ts: i64 = ts_str.parse().map_err(|_| NormalizeError::NotNumeric {
        field: "ts",
        value: ts_str.to_string(),
    })?;
    let timestamp_ms = validate_timestamp(ts, ingest_ms)?;
    let price = parse_decimal("price", price_str)?;
    let quantity = parse_decimal("size", size_str)?;

    let side = match side_str {
        "buy" => Side::Buy,
        "sell" => Side::Sell,
        other => {
            return Err(NormalizeError::UnexpectedShape(format!(
                "unknown side {other:?}"
            )));
        }
    };

    Ok(Trade::new(
        ExchangeId::Bitget,
        symbol,
        price,
        quantity,
        side,
        timestamp_ms,
        ingest_ms,
    )?)
}

/// Build the candles backfill request, when the timeframe is supported.
#[must_use]
pub(crate) fn history_request(
    symbol: &str,
    timeframe: &str,
    start_ms: i64,
    end_ms: i64,
    limit: u32,
) -> Option<HistoryRequest> {
    let granularity = match timeframe {
        "1m" => "60",
        "5m" => "300",
        "15m" => "900",
        "1h" => "3600",
        "4h" => "14400",
        "1d" => "86400",
        _ => return None,
    };

    Some(HistoryRequest {
        url: format!("{REST_URL}/candles"),
        query: vec![
            ("symbol".to_string(), exchange_symbol(symbol)),
            ("granularity".to_string(), granularity.to_string()),
            ("startTime".to_string(), start_ms.to_string()),
            ("endTime".to_string(), end_ms.to_string()),
            ("limit".to_string(), limit.to_string()),
        ],
    })
}

/// Parse a candles response: `data` rows of
/// `[ts, open, high, low, close, baseVolume, …]`.
pub(crate) fn parse_history(
    body: &str,
) -> Result<Vec<crate::infrastructure::history::RawBar>, NormalizeError> {
    use crate::infrastructure::history::{RawBar, value_decimal, value_millis};

    let value: serde_json::Value = serde_json::from_str(body)?;
    let rows = value
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or(NormalizeError::MissingField("data"))?;

    let mut bars = Vec::with_capacity(rows.len());
    for row in rows {
        let fields = row
            .as_array()
            .filter(|f| f.len() >= 6)
            .ok_or_else(|| NormalizeError::UnexpectedShape("candle row too short".to_string()))?;
        bars.push(RawBar {
            open_time_ms: value_millis("ts", &fields[0])?,
            open: value_decimal("open", &fields[1])?,
            high: value_decimal("high", &fields[2])?,
            low: value_decimal("low", &fields[3])?,
            close: value_decimal("close", &fields[4])?,
            volume: value_decimal("baseVolume", &fields[5])?,
        });
    }

    Ok(bars)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::*;

    const NOW: i64 = 1_700_000_763_600;

    #[test]
    fn instrument_mapping_and_heartbeat() {
        assert_eq!(exchange_symbol("BTC/USDT"), "BTCUSDT");
        let spec = spec("BTC/USDT");
        assert!(matches!(spec.heartbeat, HeartbeatPolicy::TextPing { .. }));
    }

    #[test]
    fn normalizes_snapshot_and_update_actions() {
        let snapshot = r#"{"action":"snapshot",
            "arg":{"instType":"SPOT","channel":"trade","instId":"BTCUSDT"},
            "data":[["1700000763511","36735.3","0.00514","buy"]],"ts":1700000763520}"#;
        let update = r#"{"action":"update",
            "arg":{"instType":"SPOT","channel":"trade","instId":"BTCUSDT"},
            "data":[["1700000763512","36735.4","0.1","sell"]],"ts":1700000763521}"#;

        let from_snapshot = normalize_frame("BTC/USDT", snapshot, NOW).unwrap();
        assert_eq!(from_snapshot.len(), 1);
        assert_eq!(from_snapshot[0].price, Decimal::from_str("36735.3").unwrap());
        assert_eq!(from_snapshot[0].side, Side::Buy);

        let from_update = normalize_frame("BTC/USDT", update, NOW).unwrap();
        assert_eq!(from_update[0].side, Side::Sell);
    }

    #[test]
    fn subscribe_ack_normalizes_to_nothing() {
        let frame = r#"{"event":"subscribe","arg":{"instType":"SPOT","channel":"trade","instId":"BTCUSDT"}}"#;
        assert!(normalize_frame("BTC/USDT", frame, NOW).unwrap().is_empty());
    }

    #[test]
    fn short_row_is_an_error() {
        let frame = r#"{"action":"update","arg":{"channel":"trade"},"data":[["1700000763511","1"]]}"#;
        assert!(normalize_frame("BTC/USDT", frame, NOW).is_err());
    }

    #[test]
    fn history_request_uses_granularity_seconds() {
        let request = history_request("BTC/USDT", "1d", 1_000, 2_000, 100).unwrap();
        assert!(request.query.contains(&("granularity".to_string(), "86400".to_string())));
        assert!(request.query.contains(&("symbol".to_string(), "BTCUSDT".to_string())));
    }

    #[test]
    fn parses_candle_rows() {
        let body = r#"{"code":"00000","msg":"success","data":[
            ["1700000760000","36735.0","36740.0","36730.0","36738.0","1.2","44100.5","44100.5"]]}"#;
        let bars = parse_history(body).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].volume, Decimal::from_str("1.2").unwrap());
    }
}
