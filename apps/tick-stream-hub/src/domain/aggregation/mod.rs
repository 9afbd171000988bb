//! Rolling Aggregation Windows
//!
//! Incremental VWAP/volume state per (instrument, timeframe). Each window is
//! a fixed, epoch-aligned time bucket; rollover swaps in a fresh window and
//! pushes the completed one into a bounded ring for short-term replay.
//!
//! All mutation happens on the single aggregator task that owns the state,
//! so rollover is atomic from every reader's point of view: snapshots are
//! cloned values, never references into live accumulators.

use std::collections::VecDeque;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;

use super::market_data::Trade;

// =============================================================================
// Timeframe
// =============================================================================

/// A fixed aggregation bucket size, parsed from the compact `1m`/`4h`/`1d`
/// notation used in config and subscriber requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Timeframe {
    label: String,
    millis: i64,
}

impl Timeframe {
    /// Parse a timeframe string such as `1m`, `15m`, `4h`, `1d`, or `1w`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeframeError`] for empty input, a non-numeric magnitude,
    /// a zero magnitude, or an unknown unit suffix.
    pub fn parse(s: &str) -> Result<Self, TimeframeError> {
        let s = s.trim();
        if s.len() < 2 || !s.is_ascii() {
            return Err(TimeframeError::Invalid(s.to_string()));
        }

        let (value_str, unit) = s.split_at(s.len() - 1);
        let value: i64 = value_str
            .parse()
            .map_err(|_| TimeframeError::Invalid(s.to_string()))?;
        if value <= 0 {
            return Err(TimeframeError::Invalid(s.to_string()));
        }

        let unit_millis = match unit {
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            "w" => 604_800_000,
            _ => return Err(TimeframeError::UnknownUnit(unit.to_string())),
        };

        Ok(Self {
            label: s.to_string(),
            millis: value * unit_millis,
        })
    }

    /// The compact label this timeframe was parsed from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.label
    }

    /// Bucket length in milliseconds.
    #[must_use]
    pub const fn millis(&self) -> i64 {
        self.millis
    }

    /// Bucket length as a [`Duration`].
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.millis as u64)
    }

    /// Start of the bucket containing `timestamp_ms`, epoch-aligned.
    #[must_use]
    pub fn align(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms - timestamp_ms.rem_euclid(self.millis)
    }
}

/// Timeframe parse errors.
#[derive(Debug, thiserror::Error)]
pub enum TimeframeError {
    /// Not of the `<value><unit>` form, or value not a positive integer.
    #[error("invalid timeframe: {0:?}")]
    Invalid(String),
    /// Unit suffix not one of `m`, `h`, `d`, `w`.
    #[error("unknown timeframe unit: {0:?}")]
    UnknownUnit(String),
}

// =============================================================================
// Window Snapshot
// =============================================================================

/// Point-in-time view of one aggregation window, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowSnapshot {
    /// Instrument symbol.
    pub symbol: String,
    /// Timeframe label, e.g. `1m`.
    pub timeframe: String,
    /// Window start, epoch milliseconds.
    pub window_start_ms: i64,
    /// Window end (exclusive), epoch milliseconds.
    pub window_end_ms: i64,
    /// Volume-weighted average price over the window.
    pub vwap: Decimal,
    /// Cumulative base-asset volume.
    pub volume: Decimal,
    /// Price of the most recent trade.
    pub last_price: Decimal,
    /// First trade price in the window.
    pub open: Decimal,
    /// Highest trade price in the window.
    pub high: Decimal,
    /// Lowest trade price in the window.
    pub low: Decimal,
    /// Number of trades applied.
    pub trade_count: u64,
}

/// A pre-aggregated historical bar, as returned by venue backfill APIs.
///
/// Shares the snapshot's shape minus the streaming-only fields; historical
/// providers do not report VWAP uniformly, so bars carry OHLCV only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candle {
    /// Instrument symbol.
    pub symbol: String,
    /// Timeframe label, e.g. `1h`.
    pub timeframe: String,
    /// Bar open time, epoch milliseconds.
    pub open_time_ms: i64,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Base-asset volume.
    pub volume: Decimal,
}

// =============================================================================
// Aggregation Window
// =============================================================================

/// Mutable accumulator state for the current window of one
/// (instrument, timeframe) pair.
#[derive(Debug, Clone)]
pub struct AggregationWindow {
    symbol: String,
    timeframe: Timeframe,
    start_ms: i64,
    pq_sum: Decimal,
    qty_sum: Decimal,
    trade_count: u64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    last_price: Decimal,
}

impl AggregationWindow {
    /// Open a fresh window whose bucket contains `timestamp_ms`, seeded with
    /// the given last-known price.
    #[must_use]
    pub fn open_at(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        timestamp_ms: i64,
        seed_price: Decimal,
    ) -> Self {
        let start_ms = timeframe.align(timestamp_ms);
        Self {
            symbol: symbol.into(),
            timeframe,
            start_ms,
            pq_sum: Decimal::ZERO,
            qty_sum: Decimal::ZERO,
            trade_count: 0,
            open: seed_price,
            high: seed_price,
            low: seed_price,
            last_price: seed_price,
        }
    }

    /// Window start, epoch milliseconds.
    #[must_use]
    pub const fn start_ms(&self) -> i64 {
        self.start_ms
    }

    /// Window end (exclusive), epoch milliseconds.
    #[must_use]
    pub const fn end_ms(&self) -> i64 {
        self.start_ms + self.timeframe.millis()
    }

    /// Whether a trade at `timestamp_ms` belongs to a later bucket.
    #[must_use]
    pub const fn is_expired_by(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.end_ms()
    }

    /// Number of trades applied to this window.
    #[must_use]
    pub const fn trade_count(&self) -> u64 {
        self.trade_count
    }

    /// Apply one trade to the accumulators.
    ///
    /// Cumulative sums only ever grow within a window; callers decide
    /// rollover via [`Self::is_expired_by`] before applying.
    pub fn apply(&mut self, trade: &Trade) {
        if self.trade_count == 0 {
            self.open = trade.price;
            self.high = trade.price;
            self.low = trade.price;
        } else {
            self.high = self.high.max(trade.price);
            self.low = self.low.min(trade.price);
        }

        self.pq_sum += trade.price * trade.quantity;
        self.qty_sum += trade.quantity;
        self.trade_count += 1;
        self.last_price = trade.price;
    }

    /// Volume-weighted average price.
    ///
    /// A zero quantity sum yields the last known price rather than a
    /// division by zero.
    #[must_use]
    pub fn vwap(&self) -> Decimal {
        if self.qty_sum.is_zero() {
            self.last_price
        } else {
            self.pq_sum / self.qty_sum
        }
    }

    /// Clone the current accumulator state into a published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.as_str().to_string(),
            window_start_ms: self.start_ms,
            window_end_ms: self.end_ms(),
            vwap: self.vwap(),
            volume: self.qty_sum,
            last_price: self.last_price,
            open: self.open,
            high: self.high,
            low: self.low,
            trade_count: self.trade_count,
        }
    }
}

// =============================================================================
// Timeframe Aggregator (window + rollover + replay ring)
// =============================================================================

/// Owns the live window for one (instrument, timeframe) pair plus a bounded
/// ring of completed windows.
#[derive(Debug)]
pub struct TimeframeAggregator {
    symbol: String,
    timeframe: Timeframe,
    current: Option<AggregationWindow>,
    completed: VecDeque<WindowSnapshot>,
    ring_capacity: usize,
}

impl TimeframeAggregator {
    /// Create an aggregator with a completed-window ring of the given depth.
    #[must_use]
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, ring_capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            current: None,
            completed: VecDeque::with_capacity(ring_capacity),
            ring_capacity,
        }
    }

    /// Timeframe this aggregator buckets by.
    #[must_use]
    pub const fn timeframe(&self) -> &Timeframe {
        &self.timeframe
    }

    /// Apply a trade, rolling the window over first if the trade falls into
    /// a later bucket. Returns the finalized snapshot when a rollover
    /// completed a non-empty window.
    pub fn apply(&mut self, trade: &Trade) -> Option<WindowSnapshot> {
        let ts = trade.exchange_timestamp_ms;

        let expired = self.current.as_ref().is_some_and(|w| w.is_expired_by(ts));
        let finalized = if expired {
            self.rollover(ts)
        } else {
            if self.current.is_none() {
                self.current = Some(AggregationWindow::open_at(
                    self.symbol.clone(),
                    self.timeframe.clone(),
                    ts,
                    trade.price,
                ));
            }
            None
        };

        if let Some(window) = &mut self.current {
            window.apply(trade);
        }

        finalized
    }

    /// Snapshot of the live window, if any trade has opened one.
    #[must_use]
    pub fn live_snapshot(&self) -> Option<WindowSnapshot> {
        self.current.as_ref().map(AggregationWindow::snapshot)
    }

    /// Completed windows, oldest first.
    #[must_use]
    pub fn completed(&self) -> impl Iterator<Item = &WindowSnapshot> {
        self.completed.iter()
    }

    /// Number of completed windows currently retained.
    #[must_use]
    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// Swap in a fresh window aligned to `ts`; the old window, if it saw any
    /// trades, is finalized into the ring in a single step.
    fn rollover(&mut self, ts: i64) -> Option<WindowSnapshot> {
        let fresh = AggregationWindow::open_at(
            self.symbol.clone(),
            self.timeframe.clone(),
            ts,
            self.current
                .as_ref()
                .map_or(Decimal::ZERO, |w| w.last_price),
        );
        let old = self.current.replace(fresh)?;

        if old.trade_count() == 0 {
            return None;
        }

        let snapshot = old.snapshot();
        if self.completed.len() == self.ring_capacity {
            self.completed.pop_front();
        }
        self.completed.push_back(snapshot.clone());
        Some(snapshot)
    }
}

// =============================================================================
// Tests
// =============================================================================
