//! Canonical Market Data Types
//!
//! Exchange-agnostic trade record used across the whole pipeline. Every
//! venue-specific payload is normalized into [`Trade`] before it touches the
//! aggregator or the distribution hub.
//!
//! Prices and quantities are `rust_decimal::Decimal` end to end; the scaled
//! fixed-point representation exists only at the wire boundary.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Exchange Identity
// =============================================================================

/// Identifies one of the integrated exchange venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeId {
    /// Binance spot.
    Binance,
    /// Bitget spot.
    Bitget,
    /// Bitstamp.
    Bitstamp,
    /// Bitvavo.
    Bitvavo,
    /// Coinbase Exchange.
    Coinbase,
    /// Kraken spot.
    Kraken,
    /// OKX public spot.
    Okx,
}

impl ExchangeId {
    /// All integrated venues.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Binance,
            Self::Bitget,
            Self::Bitstamp,
            Self::Bitvavo,
            Self::Coinbase,
            Self::Kraken,
            Self::Okx,
        ]
    }

    /// Stable lowercase name, used in config, logs, and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Bitget => "bitget",
            Self::Bitstamp => "bitstamp",
            Self::Bitvavo => "bitvavo",
            Self::Coinbase => "coinbase",
            Self::Kraken => "kraken",
            Self::Okx => "okx",
        }
    }

    /// Parse a venue name, case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "binance" => Some(Self::Binance),
            "bitget" => Some(Self::Bitget),
            "bitstamp" => Some(Self::Bitstamp),
            "bitvavo" => Some(Self::Bitvavo),
            "coinbase" => Some(Self::Coinbase),
            "kraken" => Some(Self::Kraken),
            "okx" => Some(Self::Okx),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Trade Side
// =============================================================================

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Taker bought.
    Buy,
    /// Taker sold.
    Sell,
}

impl Side {
    /// Stable uppercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

// =============================================================================
// Canonical Trade
// =============================================================================

/// A single normalized trade.
///
/// Immutable once constructed; [`Trade::new`] rejects negative prices or
/// quantities so downstream consumers never have to re-validate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Venue the trade executed on.
    pub exchange: ExchangeId,
    /// Canonical instrument symbol, e.g. `BTC/USD`.
    pub symbol: String,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity (base asset).
    pub quantity: Decimal,
    /// Aggressor side.
    pub side: Side,
    /// Exchange-reported execution time, epoch milliseconds UTC.
    pub exchange_timestamp_ms: i64,
    /// Local ingest time, epoch milliseconds UTC.
    pub ingest_timestamp_ms: i64,
}

impl Trade {
    /// Construct a validated trade.
    ///
    /// # Errors
    ///
    /// Returns [`TradeError`] if price or quantity is negative.
    pub fn new(
        exchange: ExchangeId,
        symbol: impl Into<String>,
        price: Decimal,
        quantity: Decimal,
        side: Side,
        exchange_timestamp_ms: i64,
        ingest_timestamp_ms: i64,
    ) -> Result<Self, TradeError> {
        if price.is_sign_negative() {
            return Err(TradeError::NegativePrice(price));
        }
        if quantity.is_sign_negative() {
            return Err(TradeError::NegativeQuantity(quantity));
        }

        Ok(Self {
            exchange,
            symbol: symbol.into(),
            price,
            quantity,
            side,
            exchange_timestamp_ms,
            ingest_timestamp_ms,
        })
    }

    /// Notional value of the trade (price × quantity).
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Trade construction errors.
#[derive(Debug, thiserror::Error)]
pub enum TradeError {
    /// Price was negative.
    #[error("negative price: {0}")]
    NegativePrice(Decimal),
    /// Quantity was negative.
    #[error("negative quantity: {0}")]
    NegativeQuantity(Decimal),
}

/// Current wall clock as epoch milliseconds UTC.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn exchange_id_roundtrip() {
        for id in ExchangeId::all() {
            assert_eq!(
                ExchangeId::from_str_case_insensitive(id.as_str()),
                Some(*id)
            );
        }
    }

    #[test]
    fn exchange_id_parse_case_insensitive() {
        assert_eq!(
            ExchangeId::from_str_case_insensitive("Kraken"),
            Some(ExchangeId::Kraken)
        );
        assert_eq!(
            ExchangeId::from_str_case_insensitive("BINANCE"),
            Some(ExchangeId::Binance)
        );
        assert_eq!(ExchangeId::from_str_case_insensitive("mtgox"), None);
    }

    #[test]
    fn trade_construction_valid() {
        let trade = Trade::new(
            ExchangeId::Coinbase,
            "BTC/USD",
            dec("50000.12345678"),
            dec("0.5"),
            Side::Buy,
            1_700_000_000_000,
            1_700_000_000_050,
        )
        .unwrap();

        assert_eq!(trade.symbol, "BTC/USD");
        assert_eq!(trade.notional(), dec("25000.06172839"));
    }

    #[test]
    fn trade_rejects_negative_price() {
        let result = Trade::new(
            ExchangeId::Kraken,
            "BTC/EUR",
            dec("-1"),
            dec("1"),
            Side::Sell,
            0,
            0,
        );
        assert!(matches!(result, Err(TradeError::NegativePrice(_))));
    }

    #[test]
    fn trade_rejects_negative_quantity() {
        let result = Trade::new(
            ExchangeId::Kraken,
            "BTC/EUR",
            dec("1"),
            dec("-0.1"),
            Side::Sell,
            0,
            0,
        );
        assert!(matches!(result, Err(TradeError::NegativeQuantity(_))));
    }

    #[test]
    fn zero_quantity_is_allowed() {
        // Some venues report zero-size auction prints; they must not error.
        let trade = Trade::new(
            ExchangeId::Bitstamp,
            "BTC/USD",
            dec("100"),
            Decimal::ZERO,
            Side::Buy,
            0,
            0,
        )
        .unwrap();
        assert_eq!(trade.notional(), Decimal::ZERO);
    }

    #[test]
    fn side_as_str() {
        assert_eq!(Side::Buy.as_str(), "BUY");
        assert_eq!(Side::Sell.as_str(), "SELL");
    }
}
