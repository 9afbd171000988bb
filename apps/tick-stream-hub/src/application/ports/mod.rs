//! Port Definitions
//!
//! Interfaces to the two external collaborators the core depends on but
//! never owns: a secret store and a historical data provider. The core
//! consumes these behind trait objects; platform-specific implementations
//! live in the infrastructure layer (or outside the process entirely).

use async_trait::async_trait;

use crate::domain::aggregation::Candle;
use crate::domain::market_data::ExchangeId;
use crate::infrastructure::history::FetchError;

/// Opaque secret lookup. The core never persists or logs secret values.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Look up a secret by key. `None` when the key is not provisioned.
    async fn get_secret(&self, key: &str) -> Option<String>;
}

/// On-demand historical bar backfill.
///
/// Implementations are all-or-nothing per call: either the complete ordered
/// sequence for the range, or an error. An empty range is `Ok(vec![])`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Fetch bars for `[start_ms, end_ms)` from one venue.
    async fn fetch_bars(
        &self,
        exchange: ExchangeId,
        symbol: &str,
        timeframe: &str,
        start_ms: i64,
        end_ms: i64,
        limit: u32,
    ) -> Result<Vec<Candle>, FetchError>;
}
