//! Distribution Hub
//!
//! Fan-out of normalized trades, aggregation snapshots, and connection
//! status events to any number of subscribers, built on tokio broadcast
//! channels.
//!
//! # Delivery Policy
//!
//! Every subscriber has a bounded view of the channel. `publish` never
//! blocks and never waits for consumers: when a subscriber falls behind by
//! more than the channel capacity, the oldest items it has not yet seen are
//! dropped (recency wins for a live chart) and its drop counter grows.
//! Absent subscribers get nothing: there is no persistence.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::domain::aggregation::WindowSnapshot;
use crate::domain::market_data::Trade;
use crate::domain::subscription::{ConsumerId, ConsumerIdAllocator, InstrumentFilter};
use crate::infrastructure::exchanges::supervisor::ConnectionStatus;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Capacities for the hub's broadcast channels.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Buffered trades per lagging subscriber.
    pub trades_capacity: usize,
    /// Buffered snapshots per lagging subscriber.
    pub snapshots_capacity: usize,
    /// Buffered status events per lagging subscriber.
    pub status_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            trades_capacity: 10_000,
            snapshots_capacity: 1_000,
            status_capacity: 256,
        }
    }
}

// =============================================================================
// Hub
// =============================================================================

/// Central fan-out point between the pipeline and its subscribers.
#[derive(Debug)]
pub struct TickHub {
    trades_tx: broadcast::Sender<Trade>,
    snapshots_tx: broadcast::Sender<WindowSnapshot>,
    status_tx: broadcast::Sender<ConnectionStatus>,
    ids: ConsumerIdAllocator,
}

/// Shared hub reference.
pub type SharedTickHub = Arc<TickHub>;

impl TickHub {
    /// Create a hub with the given channel capacities.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            trades_tx: broadcast::channel(config.trades_capacity).0,
            snapshots_tx: broadcast::channel(config.snapshots_capacity).0,
            status_tx: broadcast::channel(config.status_capacity).0,
            ids: ConsumerIdAllocator::new(),
        }
    }

    /// Create a hub with default capacities.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(HubConfig::default())
    }

    /// Publish a normalized trade to all live subscribers.
    ///
    /// Returns the number of receivers, or `None` when nobody listens.
    /// Completes immediately regardless of subscriber speed.
    #[must_use]
    pub fn publish_trade(&self, trade: Trade) -> Option<usize> {
        self.trades_tx.send(trade).ok()
    }

    /// Publish an aggregation snapshot to all live subscribers.
    #[must_use]
    pub fn publish_snapshot(&self, snapshot: WindowSnapshot) -> Option<usize> {
        self.snapshots_tx.send(snapshot).ok()
    }

    /// Publish a connection status transition.
    #[must_use]
    pub fn publish_status(&self, status: ConnectionStatus) -> Option<usize> {
        self.status_tx.send(status).ok()
    }

    /// Subscribe to trades matching `filter`.
    #[must_use]
    pub fn subscribe_trades(&self, filter: InstrumentFilter) -> TradeSubscription {
        TradeSubscription {
            consumer_id: self.ids.allocate(),
            filter,
            rx: self.trades_tx.subscribe(),
            dropped: 0,
        }
    }

    /// Subscribe to snapshots matching `filter`.
    #[must_use]
    pub fn subscribe_snapshots(&self, filter: InstrumentFilter) -> SnapshotSubscription {
        SnapshotSubscription {
            consumer_id: self.ids.allocate(),
            filter,
            rx: self.snapshots_tx.subscribe(),
            dropped: 0,
        }
    }

    /// Subscribe to connection status events.
    #[must_use]
    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Number of live trade subscribers.
    #[must_use]
    pub fn trade_receiver_count(&self) -> usize {
        self.trades_tx.receiver_count()
    }

    /// Number of live snapshot subscribers.
    #[must_use]
    pub fn snapshot_receiver_count(&self) -> usize {
        self.snapshots_tx.receiver_count()
    }

    /// Per-channel receiver counts.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            trade_receivers: self.trades_tx.receiver_count(),
            snapshot_receivers: self.snapshots_tx.receiver_count(),
            status_receivers: self.status_tx.receiver_count(),
        }
    }
}

/// Receiver counts across the hub's channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct HubStats {
    /// Live trade subscribers.
    pub trade_receivers: usize,
    /// Live snapshot subscribers.
    pub snapshot_receivers: usize,
    /// Live status subscribers.
    pub status_receivers: usize,
}

impl HubStats {
    /// Total receivers across all channels.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.trade_receivers + self.snapshot_receivers + self.status_receivers
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// A filtered trade subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct TradeSubscription {
    consumer_id: ConsumerId,
    filter: InstrumentFilter,
    rx: broadcast::Receiver<Trade>,
    dropped: u64,
}

impl TradeSubscription {
    /// Next trade passing the filter, or `None` once the hub is gone.
    ///
    /// Items lost to lag are counted in [`Self::dropped`] and skipped.
    pub async fn next(&mut self) -> Option<Trade> {
        loop {
            match self.rx.recv().await {
                Ok(trade) => {
                    if self.filter.matches(&trade.symbol) {
                        return Some(trade);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    metrics::record_subscriber_drops(n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// This subscription's consumer id.
    #[must_use]
    pub const fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    /// Items dropped because this subscriber lagged.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// End the subscription. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Adapt the subscription into a `futures` stream, for consumers built
    /// around stream combinators.
    pub fn into_stream(self) -> impl futures::Stream<Item = Trade> {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .next()
                .await
                .map(|trade| (trade, subscription))
        })
    }
}

/// A filtered snapshot subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SnapshotSubscription {
    consumer_id: ConsumerId,
    filter: InstrumentFilter,
    rx: broadcast::Receiver<WindowSnapshot>,
    dropped: u64,
}

impl SnapshotSubscription {
    /// Next snapshot passing the filter, or `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<WindowSnapshot> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => {
                    if self.filter.matches(&snapshot.symbol) {
                        return Some(snapshot);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    metrics::record_subscriber_drops(n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// This subscription's consumer id.
    #[must_use]
    pub const fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    /// Items dropped because this subscriber lagged.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// End the subscription. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Adapt the subscription into a `futures` stream.
    pub fn into_stream(self) -> impl futures::Stream<Item = WindowSnapshot> {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .next()
                .await
                .map(|snapshot| (snapshot, subscription))
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::time::{Duration, Instant};

    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::market_data::{ExchangeId, Side};

    fn trade(symbol: &str, price: &str) -> Trade {
        Trade::new(
            ExchangeId::Coinbase,
            symbol,
            Decimal::from_str(price).unwrap(),
            Decimal::ONE,
            Side::Buy,
            1_700_000_000_000,
            1_700_000_000_001,
        )
        .unwrap()
    }

    #[test]
    fn publish_without_subscribers_returns_none() {
        let hub = TickHub::with_defaults();
        assert!(hub.publish_trade(trade("BTC/USD", "100")).is_none());
    }

    #[tokio::test]
    async fn subscribers_receive_published_trades() {
        let hub = TickHub::with_defaults();
        let mut sub = hub.subscribe_trades(InstrumentFilter::All);

        assert_eq!(hub.publish_trade(trade("BTC/USD", "100")), Some(1));
        let received = sub.next().await.unwrap();
        assert_eq!(received.symbol, "BTC/USD");
    }

    #[tokio::test]
    async fn filter_excludes_other_instruments() {
        let hub = TickHub::with_defaults();
        let mut sub =
            hub.subscribe_trades(InstrumentFilter::from_symbols(vec!["ETH/USD".to_string()]));

        let _ = hub.publish_trade(trade("BTC/USD", "100"));
        let _ = hub.publish_trade(trade("ETH/USD", "4000"));

        let received = sub.next().await.unwrap();
        assert_eq!(received.symbol, "ETH/USD");
    }

    #[tokio::test]
    async fn multiple_subscribers_see_the_same_trade() {
        let hub = TickHub::with_defaults();
        let mut sub1 = hub.subscribe_trades(InstrumentFilter::All);
        let mut sub2 = hub.subscribe_trades(InstrumentFilter::All);
        assert_ne!(sub1.consumer_id(), sub2.consumer_id());

        assert_eq!(hub.publish_trade(trade("BTC/USD", "100")), Some(2));
        assert_eq!(sub1.next().await.unwrap().symbol, "BTC/USD");
        assert_eq!(sub2.next().await.unwrap().symbol, "BTC/USD");
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_and_counts() {
        let hub = TickHub::new(HubConfig {
            trades_capacity: 4,
            snapshots_capacity: 4,
            status_capacity: 4,
        });
        let mut sub = hub.subscribe_trades(InstrumentFilter::All);

        // Publish far past capacity without the subscriber draining.
        for i in 0..20 {
            let _ = hub.publish_trade(trade("BTC/USD", &format!("{}", 100 + i)));
        }

        // The first item received is a recent one; the overwritten prefix is
        // accounted for in the drop counter.
        let first = sub.next().await.unwrap();
        assert_eq!(first.price, Decimal::from(116));
        assert_eq!(sub.dropped(), 16);
    }

    #[tokio::test]
    async fn publish_to_full_channel_completes_immediately() {
        let hub = TickHub::new(HubConfig {
            trades_capacity: 2,
            snapshots_capacity: 2,
            status_capacity: 2,
        });
        let _sub = hub.subscribe_trades(InstrumentFilter::All);

        let started = Instant::now();
        for i in 0..10_000 {
            let _ = hub.publish_trade(trade("BTC/USD", &format!("{i}")));
        }
        // Publishing never waits on the stalled subscriber.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn dropping_the_handle_unsubscribes() {
        let hub = TickHub::with_defaults();
        let sub = hub.subscribe_trades(InstrumentFilter::All);
        assert_eq!(hub.trade_receiver_count(), 1);

        sub.unsubscribe();
        assert_eq!(hub.trade_receiver_count(), 0);
    }

    #[tokio::test]
    async fn stream_adapter_yields_filtered_trades() {
        use futures::StreamExt;

        let hub = TickHub::with_defaults();
        let stream = hub
            .subscribe_trades(InstrumentFilter::from_symbols(vec!["BTC/USD".to_string()]))
            .into_stream();
        futures::pin_mut!(stream);

        let _ = hub.publish_trade(trade("ETH/USD", "4000"));
        let _ = hub.publish_trade(trade("BTC/USD", "36000"));

        let item = stream.next().await.unwrap();
        assert_eq!(item.symbol, "BTC/USD");
    }

    #[tokio::test]
    async fn snapshot_channel_is_independent() {
        let hub = TickHub::with_defaults();
        let mut sub = hub.subscribe_snapshots(InstrumentFilter::All);

        let snapshot = WindowSnapshot {
            symbol: "BTC/USD".to_string(),
            timeframe: "1m".to_string(),
            window_start_ms: 0,
            window_end_ms: 60_000,
            vwap: Decimal::from(100),
            volume: Decimal::ONE,
            last_price: Decimal::from(100),
            open: Decimal::from(100),
            high: Decimal::from(100),
            low: Decimal::from(100),
            trade_count: 1,
        };
        assert_eq!(hub.publish_snapshot(snapshot), Some(1));
        assert_eq!(sub.next().await.unwrap().timeframe, "1m");

        let stats = hub.stats();
        assert_eq!(stats.snapshot_receivers, 1);
        assert_eq!(stats.total_receivers(), 1);
    }
}
