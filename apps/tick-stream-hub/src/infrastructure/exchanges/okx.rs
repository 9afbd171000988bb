//! OKX Integration
//!
//! Subscribes to the public `trades` channel. OKX heartbeats with literal
//! `ping`/`pong` text frames, not WebSocket control frames.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {
//!   "arg": {"channel": "trades", "instId": "BTC-USDT"},
//!   "data": [
//!     {"instId": "BTC-USDT", "tradeId": "130639474", "px": "42219.9",
//!      "sz": "0.12060306", "side": "buy", "ts": "1700000763511"}
//!   ]
//! }
//! ```

use serde::Deserialize;

use super::{ExchangeSpec, HeartbeatPolicy, NormalizeError, parse_decimal, validate_timestamp};
use crate::domain::market_data::{ExchangeId, Side, Trade};
use crate::infrastructure::history::HistoryRequest;

const WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
const REST_URL: &str = "https://www.okx.com/api/v5/market";

/// OKX instrument id: slash becomes dash.
#[must_use]
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace('/', "-")
}

/// Session descriptor for one instrument.
#[must_use]
pub fn spec(symbol: &str) -> ExchangeSpec {
    let payload = serde_json::json!({
        "op": "subscribe",
        "args": [{"channel": "trades", "instId": exchange_symbol(symbol)}],
    });

    ExchangeSpec {
        exchange: ExchangeId::Okx,
        symbol: symbol.to_string(),
        url: WS_URL.to_string(),
        subscribe_payload: Some(payload.to_string()),
        heartbeat: HeartbeatPolicy::TextPing {
            ping: "ping",
            pong: "pong",
        },
    }
}

/// One entry of the `data` array.
#[derive(Debug, Clone, Deserialize)]
struct TradeEntry {
    px: String,
    sz: String,
    side: String,
    /// Execution time, epoch milliseconds as a string.
    ts: String,
}

/// Normalize one OKX frame. A single push can batch several trades; event
/// frames (`subscribe` acks, errors already surfaced elsewhere) normalize to
/// nothing.
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

    let channel = value
        .get("arg")
        .and_then(|a| a.get("channel"))
        .and_then(|c| c.as_str());
    if channel != Some("trades") {
        return Ok(vec![]);
    }

    let Some(data) = value.get("data").and_then(|d| d.as_array()) else {
        return Ok(vec![]);
    };

    let mut trades = Vec::with_capacity(data.len());
    for entry in data {
        let entry: TradeEntry = serde_json::from_value(entry.clone())?;

        let price = parse_decimal("px", &entry.px)?;
        let quantity = parse_decimal("sz", &entry.sz)?;
        let ts: i64 = entry.ts.parse().map_err(|_| NormalizeError::NotNumeric {
            field: "ts",
            value: entry.ts.clone(),
        })?;
        let timestamp_ms = validate_timestamp(ts, ingest_ms)?;

        let side = match entry.side.as_str() {
            "buy" => Side::Buy,
            "sell" => Side::Sell,
            other => {
                return Err(NormalizeError::UnexpectedShape(format!(
                    "unknown side {other:?}"
                )));
            }
        };

        trades.push(Trade::new(
            ExchangeId::Okx,
            symbol,
            price,
            quantity,
            side,
            timestamp_ms,
            ingest_ms,
        )?);
    }

    Ok(trades)
}

/// Build the candles backfill request, when the timeframe is supported.
#[must_use]
pub(crate) fn history_request(
    symbol: &str,
    timeframe: &str,
    _start_ms: i64,
    end_ms: i64,
    limit: u32,
) -> Option<HistoryRequest> {
    let bar = match timeframe {
        "1m" => "1m",
        "5m" => "5m",
        "15m" => "15m",
        "30m" => "30m",
        "1h" => "1H",
        "4h" => "4H",
        "1d" => "1D",
        "1w" => "1W",
        _ => return None,
    };

    Some(HistoryRequest {
        url: format!("{REST_URL}/candles"),
        query: vec![
            ("instId".to_string(), exchange_symbol(symbol)),
            ("bar".to_string(), bar.to_string()),
            // OKX paginates backward: "after" anchors at the range end.
            ("after".to_string(), end_ms.to_string()),
            ("limit".to_string(), limit.to_string()),
        ],
    })
}

/// Parse a candles response: `data` rows of
/// `[ts, open, high, low, close, volume, …]`, newest first.
pub(crate) fn parse_history(
    body: &str,
) -> Result<Vec<crate::infrastructure::history::RawBar>, NormalizeError> {
    use crate::infrastructure::history::{RawBar, value_decimal, value_millis};

    let value: serde_json::Value = serde_json::from_str(body)?;

    if let Some(code) = value.get("code").and_then(|c| c.as_str())
        && code != "0"
    {
        let msg = value.get("msg").and_then(|m| m.as_str()).unwrap_or("");
        return Err(NormalizeError::UnexpectedShape(format!(
            "okx error {code}: {msg}"
        )));
    }

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
            volume: value_decimal("volume", &fields[5])?,
        });
    }

    Ok(bars)
}
