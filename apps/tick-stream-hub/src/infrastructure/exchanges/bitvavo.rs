//! Bitvavo Integration
//!
//! Subscribes to the `trades` channel for one market.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {
//!   "event": "trade",
//!   "timestamp": 1700000763511,
//!   "market": "BTC-EUR",
//!   "id": "5a6a...",
//!   "amount": "0.00514",
//!   "price": "34210.5",
//!   "side": "buy"
//! }
//! ```

use serde::Deserialize;

use super::{ExchangeSpec, HeartbeatPolicy, NormalizeError, parse_decimal, validate_timestamp};
use crate::domain::market_data::{ExchangeId, Side, Trade};
use crate::infrastructure::history::HistoryRequest;

const WS_URL: &str = "wss://ws.bitvavo.com/v2/";
const REST_URL: &str = "https://api.bitvavo.com/v2";

/// Bitvavo market notation: slash becomes dash.
#[must_use]
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace('/', "-")
}

/// Session descriptor for one instrument.
#[must_use]
pub fn spec(symbol: &str) -> ExchangeSpec {
    let payload = serde_json::json!({
        "action": "subscribe",
        "channels": [{"name": "trades", "markets": [exchange_symbol(symbol)]}],
    });

    ExchangeSpec {
        exchange: ExchangeId::Bitvavo,
        symbol: symbol.to_string(),
        url: WS_URL.to_string(),
        subscribe_payload: Some(payload.to_string()),
        heartbeat: HeartbeatPolicy::ProtocolPing,
    }
}

/// Raw trade event payload.
#[derive(Debug, Clone, Deserialize)]
struct TradeEvent {
    /// Execution time, epoch milliseconds.
    timestamp: i64,
    amount: String,
    price: String,
    side: String,
}

/// Normalize one Bitvavo frame. Non-trade events (`subscribed`, system
/// notices) normalize to nothing.
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

    if value.get("event").and_then(|v| v.as_str()) != Some("trade") {
        return Ok(vec![]);
    }

    let event: TradeEvent = serde_json::from_value(value)?;
    let price = parse_decimal("price", &event.price)?;
    let quantity = parse_decimal("amount", &event.amount)?;
    let timestamp_ms = validate_timestamp(event.timestamp, ingest_ms)?;

    let side = match event.side.as_str() {
        "buy" => Side::Buy,
        "sell" => Side::Sell,
        other => {
            return Err(NormalizeError::UnexpectedShape(format!(
                "unknown side {other:?}"
            )));
        }
    };

    let trade = Trade::new(
        ExchangeId::Bitvavo,
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
    limit: u32,
) -> Option<HistoryRequest> {
    const SUPPORTED: &[&str] = &["1m", "5m", "15m", "30m", "1h", "4h", "1d"];
    if !SUPPORTED.contains(&timeframe) {
        return None;
    }

    Some(HistoryRequest {
        url: format!("{REST_URL}/{}/candles", exchange_symbol(symbol)),
        query: vec![
            ("interval".to_string(), timeframe.to_string()),
            ("start".to_string(), start_ms.to_string()),
            ("end".to_string(), end_ms.to_string()),
            ("limit".to_string(), limit.to_string()),
        ],
    })
}

/// Parse a candles response: rows of
/// `[timestamp, open, high, low, close, volume]` with millisecond times.
pub(crate) fn parse_history(
    body: &str,
) -> Result<Vec<crate::infrastructure::history::RawBar>, NormalizeError> {
    use crate::infrastructure::history::{RawBar, value_decimal, value_millis};

    let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(body)?;
    let mut bars = Vec::with_capacity(rows.len());

    for row in &rows {
        if row.len() < 6 {
            return Err(NormalizeError::UnexpectedShape(
                "candle row shorter than 6 elements".to_string(),
            ));
        }
        bars.push(RawBar {
            open_time_ms: value_millis("timestamp", &row[0])?,
            open: value_decimal("open", &row[1])?,
            high: value_decimal("high", &row[2])?,
            low: value_decimal("low", &row[3])?,
            close: value_decimal("close", &row[4])?,
            volume: value_decimal("volume", &row[5])?,
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
    fn market_mapping_and_payload() {
        assert_eq!(exchange_symbol("BTC/EUR"), "BTC-EUR");
        let spec = spec("BTC/EUR");
        let payload: serde_json::Value =
            serde_json::from_str(spec.subscribe_payload.as_deref().unwrap()).unwrap();
        assert_eq!(payload["action"], "subscribe");
        assert_eq!(payload["channels"][0]["name"], "trades");
        assert_eq!(payload["channels"][0]["markets"][0], "BTC-EUR");
    }

    #[test]
    fn normalizes_a_trade() {
        let frame = r#"{"event":"trade","timestamp":1700000763511,"market":"BTC-EUR",
            "id":"5a6a","amount":"0.00514000","price":"34210.5","side":"buy"}"#;

        let trades = normalize_frame("BTC/EUR", frame, NOW).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, Decimal::from_str("34210.5").unwrap());
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[0].exchange_timestamp_ms, 1_700_000_763_511);
    }

    #[test]
    fn subscribed_ack_normalizes_to_nothing() {
        let frame = r#"{"event":"subscribed","subscriptions":{"trades":["BTC-EUR"]}}"#;
        assert!(normalize_frame("BTC/EUR", frame, NOW).unwrap().is_empty());
    }

    #[test]
    fn parses_candle_rows() {
        let body = r#"[[1700000760000,"34210.5","34220.0","34200.0","34215.0","2.5"]]"#;
        let bars = parse_history(body).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open_time_ms, 1_700_000_760_000);
        assert_eq!(bars[0].high, Decimal::from_str("34220.0").unwrap());
    }

    #[test]
    fn weekly_timeframe_is_unsupported() {
        assert!(history_request("BTC/EUR", "1w", 0, 1, 10).is_none());
    }
}
