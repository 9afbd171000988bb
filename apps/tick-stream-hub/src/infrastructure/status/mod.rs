//! Feed Status Registry
//!
//! Per-venue connection status, updated from supervisor events and read by
//! the health server. When every venue is down the hub keeps running and the
//! registry reports the pipeline as stale; nothing here can terminate the
//! process.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::domain::market_data::{ExchangeId, now_millis};
use crate::infrastructure::exchanges::supervisor::{ConnectionState, ConnectionStatus};

/// Live status of one venue feed.
#[derive(Debug)]
pub struct FeedState {
    exchange: ExchangeId,
    state: RwLock<ConnectionState>,
    trades_received: AtomicU64,
    reconnect_attempts: AtomicU32,
    last_trade_at_ms: AtomicI64,
    last_error: RwLock<Option<String>>,
}

impl FeedState {
    /// Fresh state, starting disconnected.
    #[must_use]
    pub fn new(exchange: ExchangeId) -> Self {
        Self {
            exchange,
            state: RwLock::new(ConnectionState::Disconnected),
            trades_received: AtomicU64::new(0),
            reconnect_attempts: AtomicU32::new(0),
            last_trade_at_ms: AtomicI64::new(0),
            last_error: RwLock::new(None),
        }
    }

    /// Venue this state tracks.
    #[must_use]
    pub const fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the feed is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Trades received over the feed's lifetime.
    #[must_use]
    pub fn trades_received(&self) -> u64 {
        self.trades_received.load(Ordering::Relaxed)
    }

    /// Reconnect attempts recorded.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Most recent session error.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Milliseconds since the last trade, or `None` before the first one.
    #[must_use]
    pub fn trade_age_ms(&self) -> Option<i64> {
        let last = self.last_trade_at_ms.load(Ordering::Relaxed);
        (last > 0).then(|| now_millis() - last)
    }

    /// Apply a supervisor status transition.
    pub fn apply(&self, status: &ConnectionStatus) {
        *self.state.write() = status.state;
        if status.state == ConnectionState::Backoff {
            self.reconnect_attempts.store(status.retry_count, Ordering::Relaxed);
        }
        if let Some(error) = &status.last_error {
            *self.last_error.write() = Some(error.clone());
        }
    }

    /// Record one delivered trade.
    pub fn record_trade(&self) {
        self.trades_received.fetch_add(1, Ordering::Relaxed);
        self.last_trade_at_ms.store(now_millis(), Ordering::Relaxed);
    }
}

/// Registry over every supervised venue feed.
#[derive(Debug)]
pub struct FeedRegistry {
    feeds: HashMap<ExchangeId, Arc<FeedState>>,
}

impl FeedRegistry {
    /// Build a registry for the given venues.
    #[must_use]
    pub fn new(exchanges: impl IntoIterator<Item = ExchangeId>) -> Self {
        Self {
            feeds: exchanges
                .into_iter()
                .map(|exchange| (exchange, Arc::new(FeedState::new(exchange))))
                .collect(),
        }
    }

    /// State handle for one venue.
    #[must_use]
    pub fn feed(&self, exchange: ExchangeId) -> Option<Arc<FeedState>> {
        self.feeds.get(&exchange).cloned()
    }

    /// All tracked feeds.
    pub fn feeds(&self) -> impl Iterator<Item = &Arc<FeedState>> {
        self.feeds.values()
    }

    /// Number of currently connected feeds.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.feeds.values().filter(|f| f.is_connected()).count()
    }

    /// True when no venue is delivering: the observable "stale data" state.
    ///
    /// Degraded, not fatal; the pipeline keeps serving whatever it has.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.connected_count() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn status(exchange: ExchangeId, state: ConnectionState, retry: u32) -> ConnectionStatus {
        ConnectionStatus {
            exchange,
            symbol: "BTC/USD".to_string(),
            state,
            retry_count: retry,
            next_retry_in: None,
            last_error: None,
        }
    }

    #[test]
    fn registry_tracks_connected_feeds() {
        let registry = FeedRegistry::new([ExchangeId::Kraken, ExchangeId::Coinbase]);
        assert!(registry.is_stale());

        registry
            .feed(ExchangeId::Kraken)
            .unwrap()
            .apply(&status(ExchangeId::Kraken, ConnectionState::Connected, 0));

        assert_eq!(registry.connected_count(), 1);
        assert!(!registry.is_stale());
    }

    #[test]
    fn all_feeds_down_reads_as_stale_not_dead() {
        let registry = FeedRegistry::new([ExchangeId::Kraken]);
        let feed = registry.feed(ExchangeId::Kraken).unwrap();

        feed.apply(&status(ExchangeId::Kraken, ConnectionState::Connected, 0));
        assert!(!registry.is_stale());

        feed.apply(&status(ExchangeId::Kraken, ConnectionState::Backoff, 3));
        assert!(registry.is_stale());
        assert_eq!(feed.reconnect_attempts(), 3);
    }

    #[test]
    fn trade_counters_accumulate() {
        let feed = FeedState::new(ExchangeId::Binance);
        assert!(feed.trade_age_ms().is_none());

        feed.record_trade();
        feed.record_trade();
        assert_eq!(feed.trades_received(), 2);
        assert!(feed.trade_age_ms().unwrap() >= 0);
    }

    #[test]
    fn errors_are_retained_across_transitions() {
        let feed = FeedState::new(ExchangeId::Okx);
        let mut with_error = status(ExchangeId::Okx, ConnectionState::Disconnected, 1);
        with_error.last_error = Some("keepalive timeout".to_string());
        feed.apply(&with_error);

        feed.apply(&status(ExchangeId::Okx, ConnectionState::Connecting, 1));
        assert_eq!(feed.last_error().as_deref(), Some("keepalive timeout"));
    }

    #[test]
    fn unknown_feed_lookup_is_none() {
        let registry = FeedRegistry::new([ExchangeId::Kraken]);
        assert!(registry.feed(ExchangeId::Bitget).is_none());
    }
}
