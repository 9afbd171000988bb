//! Aggregation Service
//!
//! The single serialized owner of all aggregation state. Trades arrive from
//! the hub in ingest order; no cross-venue reordering happens anywhere.
//! Windows per (instrument, timeframe) are created lazily and only ever
//! touched by this task, so rollover is atomic for every observer.
//!
//! Snapshots go back out through the hub on two triggers: immediately on
//! trade arrival (live tick for chart heads) and on a fixed cadence
//! (keepalive for idle markets). Finalized windows are always published.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::aggregation::{Timeframe, TimeframeAggregator};
use crate::domain::market_data::Trade;
use crate::domain::subscription::InstrumentFilter;
use crate::infrastructure::hub::SharedTickHub;
use crate::infrastructure::metrics;

/// Aggregation behavior knobs.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Timeframes maintained per instrument.
    pub timeframes: Vec<Timeframe>,
    /// Completed windows retained per (instrument, timeframe).
    pub ring_capacity: usize,
    /// Publish a live snapshot on every trade.
    pub emit_on_trade: bool,
    /// Cadence for periodic live snapshots.
    pub snapshot_cadence: Duration,
}

impl Default for AggregationConfig {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        Self {
            timeframes: vec![Timeframe::parse("1m").expect("static timeframe is valid")],
            ring_capacity: 120,
            emit_on_trade: true,
            snapshot_cadence: Duration::from_millis(250),
        }
    }
}

/// Per-instrument aggregation state: one window chain per timeframe.
struct InstrumentState {
    aggregators: Vec<TimeframeAggregator>,
}

impl InstrumentState {
    fn new(symbol: &str, timeframes: &[Timeframe], ring_capacity: usize) -> Self {
        Self {
            aggregators: timeframes
                .iter()
                .map(|tf| TimeframeAggregator::new(symbol, tf.clone(), ring_capacity))
                .collect(),
        }
    }
}

/// Owns all aggregation windows and runs as one serialized task.
pub struct AggregationService {
    config: AggregationConfig,
    hub: SharedTickHub,
    cancel: CancellationToken,
    instruments: HashMap<String, InstrumentState>,
}

impl AggregationService {
    /// Create the service; nothing runs until [`Self::run`].
    #[must_use]
    pub fn new(config: AggregationConfig, hub: SharedTickHub, cancel: CancellationToken) -> Self {
        Self {
            config,
            hub,
            cancel,
            instruments: HashMap::new(),
        }
    }

    /// Consume trades from the hub and publish snapshots until cancelled.
    pub async fn run(mut self) {
        let cancel = self.cancel.clone();
        let mut trades = self.hub.subscribe_trades(InstrumentFilter::All);
        let mut cadence = tokio::time::interval(self.config.snapshot_cadence);
        cadence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("aggregation service cancelled");
                    return;
                }
                trade = trades.next() => {
                    let Some(trade) = trade else {
                        tracing::info!("trade channel closed, aggregation service stopping");
                        return;
                    };
                    self.apply_trade(&trade);
                }
                _ = cadence.tick() => {
                    self.emit_live_snapshots();
                }
            }
        }
    }

    /// Apply one trade to every timeframe window of its instrument.
    fn apply_trade(&mut self, trade: &Trade) {
        let state = self
            .instruments
            .entry(trade.symbol.clone())
            .or_insert_with(|| {
                tracing::debug!(symbol = %trade.symbol, "opening aggregation state");
                InstrumentState::new(
                    &trade.symbol,
                    &self.config.timeframes,
                    self.config.ring_capacity,
                )
            });

        for aggregator in &mut state.aggregators {
            if let Some(finalized) = aggregator.apply(trade) {
                metrics::record_snapshot_published();
                let _ = self.hub.publish_snapshot(finalized);
            }
            if self.config.emit_on_trade
                && let Some(live) = aggregator.live_snapshot()
            {
                metrics::record_snapshot_published();
                let _ = self.hub.publish_snapshot(live);
            }
        }
    }

    /// Publish the live window of every active (instrument, timeframe).
    fn emit_live_snapshots(&self) {
        for state in self.instruments.values() {
            for aggregator in &state.aggregators {
                if let Some(live) = aggregator.live_snapshot() {
                    metrics::record_snapshot_published();
                    let _ = self.hub.publish_snapshot(live);
                }
            }
        }
    }
}

// =============================================================================
// History Service
// =============================================================================

/// Routes a subscriber's backfill request to a venue that serves the
/// instrument, trying its venues in routing-table order until one supports
/// the timeframe.
pub struct HistoryService {
    provider: std::sync::Arc<dyn crate::application::ports::HistoryProvider>,
    routes: Vec<crate::infrastructure::config::InstrumentRoute>,
    default_limit: u32,
}

impl HistoryService {
    /// Create a service over the given provider and routing table.
    #[must_use]
    pub fn new(
        provider: std::sync::Arc<dyn crate::application::ports::HistoryProvider>,
        routes: Vec<crate::infrastructure::config::InstrumentRoute>,
        default_limit: u32,
    ) -> Self {
        Self {
            provider,
            routes,
            default_limit,
        }
    }

    /// Fetch bars for `[start_ms, end_ms)` of one instrument.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::UnknownInstrument`] when no route lists the
    /// symbol, [`FetchError::UnsupportedTimeframe`] when none of its venues
    /// serve the timeframe, and the underlying provider error otherwise.
    /// All-or-nothing: an error from the chosen venue is the call's result.
    pub async fn fetch_history(
        &self,
        symbol: &str,
        timeframe: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<crate::domain::aggregation::Candle>, crate::infrastructure::history::FetchError>
    {
        use crate::infrastructure::history::FetchError;

        let request_id = uuid::Uuid::new_v4();
        tracing::debug!(%request_id, symbol, timeframe, start_ms, end_ms, "backfill requested");

        let route = self
            .routes
            .iter()
            .find(|r| r.symbol == symbol)
            .ok_or_else(|| FetchError::UnknownInstrument(symbol.to_string()))?;

        let mut last_unsupported = None;
        for exchange in &route.exchanges {
            match self
                .provider
                .fetch_bars(*exchange, symbol, timeframe, start_ms, end_ms, self.default_limit)
                .await
            {
                Err(FetchError::UnsupportedTimeframe { exchange, timeframe }) => {
                    last_unsupported = Some(FetchError::UnsupportedTimeframe {
                        exchange,
                        timeframe,
                    });
                }
                other => return other,
            }
        }

        Err(last_unsupported
            .unwrap_or_else(|| FetchError::UnknownInstrument(symbol.to_string())))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::market_data::{ExchangeId, Side};
    use crate::infrastructure::hub::TickHub;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn trade(symbol: &str, price: &str, qty: &str, ts: i64) -> Trade {
        Trade::new(
            ExchangeId::Coinbase,
            symbol,
            dec(price),
            dec(qty),
            Side::Buy,
            ts,
            ts,
        )
        .unwrap()
    }

    fn config(emit_on_trade: bool) -> AggregationConfig {
        AggregationConfig {
            timeframes: vec![Timeframe::parse("1m").unwrap()],
            ring_capacity: 16,
            emit_on_trade,
            snapshot_cadence: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn live_snapshot_is_published_per_trade() {
        let hub = Arc::new(TickHub::with_defaults());
        let cancel = CancellationToken::new();
        let mut snapshots = hub.subscribe_snapshots(InstrumentFilter::All);

        let service = AggregationService::new(config(true), Arc::clone(&hub), cancel.clone());
        let handle = tokio::spawn(service.run());

        // Give the service a beat to subscribe before publishing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = hub.publish_trade(trade("BTC/USD", "100", "2", 1_000));
        let _ = hub.publish_trade(trade("BTC/USD", "200", "1", 2_000));

        let first = snapshots.next().await.unwrap();
        assert_eq!(first.vwap, dec("100"));
        assert_eq!(first.volume, dec("2"));

        let second = snapshots.next().await.unwrap();
        assert_eq!(second.vwap.round_dp(8), dec("133.33333333"));
        assert_eq!(second.volume, dec("3"));
        assert_eq!(second.last_price, dec("200"));

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn rollover_publishes_the_finalized_window() {
        let hub = Arc::new(TickHub::with_defaults());
        let cancel = CancellationToken::new();
        let mut snapshots = hub.subscribe_snapshots(InstrumentFilter::All);

        let service = AggregationService::new(config(false), Arc::clone(&hub), cancel.clone());
        let handle = tokio::spawn(service.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = hub.publish_trade(trade("BTC/USD", "100", "1", 30_000));
        // Next minute bucket: finalizes the first window.
        let _ = hub.publish_trade(trade("BTC/USD", "200", "2", 90_000));

        let finalized = snapshots.next().await.unwrap();
        assert_eq!(finalized.window_start_ms, 0);
        assert_eq!(finalized.window_end_ms, 60_000);
        assert_eq!(finalized.vwap, dec("100"));
        assert_eq!(finalized.trade_count, 1);

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn instruments_do_not_cross_contaminate() {
        let hub = Arc::new(TickHub::with_defaults());
        let cancel = CancellationToken::new();
        let mut btc_snapshots =
            hub.subscribe_snapshots(InstrumentFilter::from_symbols(vec!["BTC/USD".to_string()]));

        let service = AggregationService::new(config(true), Arc::clone(&hub), cancel.clone());
        let handle = tokio::spawn(service.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = hub.publish_trade(trade("ETH/USD", "4000", "10", 1_000));
        let _ = hub.publish_trade(trade("BTC/USD", "36000", "1", 1_000));

        let snapshot = btc_snapshots.next().await.unwrap();
        assert_eq!(snapshot.symbol, "BTC/USD");
        assert_eq!(snapshot.volume, dec("1"));

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn history_service_routes_to_the_first_supporting_venue() {
        use crate::application::ports::MockHistoryProvider;
        use crate::domain::aggregation::Candle;
        use crate::infrastructure::config::InstrumentRoute;
        use crate::infrastructure::history::FetchError;

        let mut provider = MockHistoryProvider::new();
        // Coinbase does not serve weekly bars; Kraken does.
        provider
            .expect_fetch_bars()
            .withf(|exchange, _, _, _, _, _| *exchange == ExchangeId::Coinbase)
            .returning(|exchange, _, timeframe, _, _, _| {
                Err(FetchError::UnsupportedTimeframe {
                    exchange,
                    timeframe: timeframe.to_string(),
                })
            });
        provider
            .expect_fetch_bars()
            .withf(|exchange, _, _, _, _, _| *exchange == ExchangeId::Kraken)
            .returning(|_, symbol, timeframe, start_ms, _, _| {
                Ok(vec![Candle {
                    symbol: symbol.to_string(),
                    timeframe: timeframe.to_string(),
                    open_time_ms: start_ms,
                    open: dec("100"),
                    high: dec("110"),
                    low: dec("90"),
                    close: dec("105"),
                    volume: dec("12"),
                }])
            });

        let service = HistoryService::new(
            Arc::new(provider),
            vec![InstrumentRoute {
                symbol: "BTC/USD".to_string(),
                exchanges: vec![ExchangeId::Coinbase, ExchangeId::Kraken],
            }],
            1000,
        );

        let bars = service
            .fetch_history("BTC/USD", "1w", 0, 604_800_000)
            .await
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].symbol, "BTC/USD");
        assert_eq!(bars[0].close, dec("105"));
    }

    #[tokio::test]
    async fn history_service_rejects_unrouted_instruments() {
        use crate::application::ports::MockHistoryProvider;
        use crate::infrastructure::history::FetchError;

        let service = HistoryService::new(Arc::new(MockHistoryProvider::new()), vec![], 1000);
        let err = service
            .fetch_history("DOGE/USD", "1m", 0, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnknownInstrument(_)));
    }

    #[tokio::test]
    async fn cadence_emits_snapshots_without_trades() {
        let hub = Arc::new(TickHub::with_defaults());
        let cancel = CancellationToken::new();
        let mut snapshots = hub.subscribe_snapshots(InstrumentFilter::All);

        let service_config = AggregationConfig {
            emit_on_trade: false,
            snapshot_cadence: Duration::from_millis(30),
            ..config(false)
        };
        let service = AggregationService::new(service_config, Arc::clone(&hub), cancel.clone());
        let handle = tokio::spawn(service.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = hub.publish_trade(trade("BTC/USD", "100", "1", 1_000));

        // No emit-on-trade: the cadence alone pushes the live window out.
        let snapshot = tokio::time::timeout(Duration::from_secs(2), snapshots.next())
            .await
            .expect("cadence snapshot within timeout")
            .unwrap();
        assert_eq!(snapshot.vwap, dec("100"));

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }
}
