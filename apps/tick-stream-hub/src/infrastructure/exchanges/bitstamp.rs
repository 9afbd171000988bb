//! Bitstamp Integration
//!
//! Subscribes to the per-symbol `live_trades_<pair>` channel.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {
//!   "event": "trade",
//!   "channel": "live_trades_btcusd",
//!   "data": {
//!     "id": 297260703,
//!     "timestamp": "1700000763",
//!     "microtimestamp": "1700000763511254",
//!     "amount_str": "0.00514000",
//!     "price_str": "36735.32",
//!     "type": 0
//!   }
//! }
//! ```
//!
//! Bitstamp also sends `amount`/`price` as JSON floats; the `_str` fields
//! are the lossless ones and the only ones read here. `type` is 0 for buy,
//! 1 for sell.

use serde::Deserialize;

use super::{ExchangeSpec, HeartbeatPolicy, NormalizeError, parse_decimal, validate_timestamp};
use crate::domain::market_data::{ExchangeId, Side, Trade};
use crate::infrastructure::history::HistoryRequest;

const WS_URL: &str = "wss://ws.bitstamp.net";
const REST_URL: &str = "https://www.bitstamp.net/api/v2";

/// Bitstamp channel symbol: no separator, lowercase.
#[must_use]
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_lowercase()
}

/// Session descriptor for one instrument.
#[must_use]
pub fn spec(symbol: &str) -> ExchangeSpec {
    let payload = serde_json::json!({
        "event": "bts:subscribe",
        "data": {"channel": format!("live_trades_{}", exchange_symbol(symbol))},
    });

    ExchangeSpec {
        exchange: ExchangeId::Bitstamp,
        symbol: symbol.to_string(),
        url: WS_URL.to_string(),
        subscribe_payload: Some(payload.to_string()),
        heartbeat: HeartbeatPolicy::ProtocolPing,
    }
}

/// Inner trade payload.
#[derive(Debug, Clone, Deserialize)]
struct TradeData {
    /// Execution time in microseconds, as a string.
    microtimestamp: String,
    /// Lossless amount string.
    amount_str: String,
    /// Lossless price string.
    price_str: String,
    /// 0 = buy, 1 = sell.
    #[serde(rename = "type")]
    side: i32,
}

/// Normalize one Bitstamp frame.
///
/// `bts:subscription_succeeded` and other non-trade events normalize to
/// nothing.
///
/// # Errors
///
/// Returns [`NormalizeError`] for malformed JSON, unparseable numerics, an
/// unknown side code, or an out-of-bounds timestamp.
pub fn normalize_frame(
    symbol: &str,
    frame: &str,
    ingest_ms: i64,
) -> Result<Vec<Trade>, NormalizeError> {
    let value: serde_json::Value = serde_json::from_str(frame)?;

    if value.get("event").and_then(|v| v.as_str()) != Some("trade") {
        return Ok(vec![]);
    }

    let data = value
        .get("data")
        .cloned()
        .ok_or(NormalizeError::MissingField("data"))?;
    let data: TradeData = serde_json::from_value(data)?;

    let price = parse_decimal("price_str", &data.price_str)?;
    let quantity = parse_decimal("amount_str", &data.amount_str)?;

    let micros: i64 = data
        .microtimestamp
        .parse()
        .map_err(|_| NormalizeError::NotNumeric {
            field: "microtimestamp",
            value: data.microtimestamp.clone(),
        })?;
    let timestamp_ms = validate_timestamp(micros / 1000, ingest_ms)?;

    let side = match data.side {
        0 => Side::Buy,
        1 => Side::Sell,
        other => {
            return Err(NormalizeError::UnexpectedShape(format!(
                "unknown trade type {other}"
            )));
        }
    };

    let trade = Trade::new(
        ExchangeId::Bitstamp,
        symbol,
        price,
        quantity,
        side,
        timestamp_ms,
        ingest_ms,
    )?;
    Ok(vec![trade])
}

/// Build the OHLC backfill request, when the timeframe is supported.
#[must_use]
pub(crate) fn history_request(
    symbol: &str,
    timeframe: &str,
    start_ms: i64,
    end_ms: i64,
    limit: u32,
) -> Option<HistoryRequest> {
    let step: u32 = match timeframe {
        "1m" => 60,
        "5m" => 300,
        "15m" => 900,
        "30m" => 1800,
        "1h" => 3600,
        "4h" => 14400,
        "1d" => 86400,
        _ => return None,
    };

    Some(HistoryRequest {
        url: format!("{REST_URL}/ohlc/{}/", exchange_symbol(symbol)),
        query: vec![
            ("step".to_string(), step.to_string()),
            ("start".to_string(), (start_ms / 1000).to_string()),
            ("end".to_string(), (end_ms / 1000).to_string()),
            ("limit".to_string(), limit.to_string()),
        ],
    })
}

/// Parse an OHLC response: `data.ohlc` rows keyed by name, all strings.
pub(crate) fn parse_history(
    body: &str,
) -> Result<Vec<crate::infrastructure::history::RawBar>, NormalizeError> {
    use crate::infrastructure::history::{RawBar, value_decimal, value_seconds};

    let value: serde_json::Value = serde_json::from_str(body)?;
    let rows = value
        .get("data")
        .and_then(|d| d.get("ohlc"))
        .and_then(|o| o.as_array())
        .ok_or(NormalizeError::MissingField("data.ohlc"))?;

    let mut bars = Vec::with_capacity(rows.len());
    for row in rows {
        let field = |name: &'static str| {
            row.get(name)
                .cloned()
                .ok_or(NormalizeError::MissingField(name))
        };
        bars.push(RawBar {
            open_time_ms: value_seconds("timestamp", &field("timestamp")?)?,
            open: value_decimal("open", &field("open")?)?,
            high: value_decimal("high", &field("high")?)?,
            low: value_decimal("low", &field("low")?)?,
            close: value_decimal("close", &field("close")?)?,
            volume: value_decimal("volume", &field("volume")?)?,
        });
    }

    Ok(bars)
}
