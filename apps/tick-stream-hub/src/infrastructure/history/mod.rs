//! Historical Backfill Client
//!
//! On-demand REST backfill of pre-aggregated bars, independent of the live
//! pipeline. One bounded retry-with-backoff policy covers transient network
//! and server failures; a parse failure or exhausted budget fails the whole
//! call. Results are all-or-nothing: a successful call returns the complete,
//! ascending-ordered bar sequence for the requested range, and an empty
//! range is an empty vec, not an error.

use std::time::Duration;

use reqwest::StatusCode;
use rust_decimal::Decimal;

use crate::domain::aggregation::Candle;
use crate::domain::market_data::ExchangeId;
use crate::infrastructure::exchanges::{
    NormalizeError, binance, bitget, bitstamp, bitvavo, coinbase, kraken, okx,
};

// =============================================================================
// Request / Response Shapes
// =============================================================================

/// A venue backfill request: URL plus query pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Full endpoint URL.
    pub url: String,
    /// Query string parameters.
    pub query: Vec<(String, String)>,
}

/// A venue-agnostic parsed bar, before symbol/timeframe are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBar {
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
// Value Helpers (shared by venue parsers)
// =============================================================================

/// Read a decimal from a JSON value that may be a string or a number.
pub(crate) fn value_decimal(
    field: &'static str,
    value: &serde_json::Value,
) -> Result<Decimal, NormalizeError> {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        other => {
            return Err(NormalizeError::NotNumeric {
                field,
                value: other.to_string(),
            });
        }
    };
    text.parse::<Decimal>()
        .map_err(|_| NormalizeError::NotNumeric { field, value: text })
}

/// Read an epoch-milliseconds timestamp from a string or number value.
pub(crate) fn value_millis(
    field: &'static str,
    value: &serde_json::Value,
) -> Result<i64, NormalizeError> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().ok_or(NormalizeError::NotNumeric {
            field,
            value: n.to_string(),
        }),
        serde_json::Value::String(s) => s.parse().map_err(|_| NormalizeError::NotNumeric {
            field,
            value: s.clone(),
        }),
        other => Err(NormalizeError::NotNumeric {
            field,
            value: other.to_string(),
        }),
    }
}

/// Read an epoch-seconds timestamp and widen it to milliseconds.
pub(crate) fn value_seconds(
    field: &'static str,
    value: &serde_json::Value,
) -> Result<i64, NormalizeError> {
    value_millis(field, value).map(|s| s * 1000)
}

// =============================================================================
// Errors
// =============================================================================

/// Backfill failures surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network-level failure after exhausting the retry budget.
    #[error("backfill request failed after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted {
        /// Attempts made.
        attempts: u32,
        /// Final error text.
        last_error: String,
    },

    /// Provider returned a non-success status that is not retryable.
    #[error("provider returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: StatusCode,
    },

    /// Provider response did not match the venue's documented shape.
    #[error("malformed provider response: {0}")]
    Malformed(#[from] NormalizeError),

    /// The venue does not serve this timeframe.
    #[error("{exchange} does not serve timeframe {timeframe:?}")]
    UnsupportedTimeframe {
        /// Venue asked.
        exchange: ExchangeId,
        /// Timeframe requested.
        timeframe: String,
    },

    /// HTTP client could not be constructed.
    #[error("http client error: {0}")]
    Client(String),

    /// No configured route serves this instrument.
    #[error("no venue routes instrument {0:?}")]
    UnknownInstrument(String),
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded retry policy for backfill calls. Deliberately finite, unlike the
/// live supervisor's endless reconnect loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Delay multiplier per retry.
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            multiplier: 2,
        }
    }
}

/// Iterator-style backoff over a [`RetryConfig`].
#[derive(Debug)]
struct RetryBackoff {
    config: RetryConfig,
    attempt: u32,
    delay: Duration,
}

impl RetryBackoff {
    const fn new(config: RetryConfig) -> Self {
        let delay = config.initial_delay;
        Self {
            config,
            attempt: 1,
            delay,
        }
    }

    /// Delay before the next retry, or `None` when the budget is spent.
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        self.attempt += 1;
        let delay = self.delay;
        self.delay = self.delay.saturating_mul(self.config.multiplier);
        Some(delay)
    }

    const fn attempts(&self) -> u32 {
        self.attempt
    }
}

// =============================================================================
// Backfill Client
// =============================================================================

/// REST backfill client shared by all venues.
#[derive(Debug, Clone)]
pub struct BackfillClient {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl BackfillClient {
    /// Build a client with the given retry policy and request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(retry: RetryConfig, request_timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client, retry })
    }

    /// Fetch bars for `[start_ms, end_ms)` from one venue.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the venue does not serve the timeframe,
    /// the retry budget is exhausted, the provider answers with a terminal
    /// status, or the response body does not parse. Partial results are
    /// never returned.
    pub async fn fetch(
        &self,
        exchange: ExchangeId,
        symbol: &str,
        timeframe: &str,
        start_ms: i64,
        end_ms: i64,
        limit: u32,
    ) -> Result<Vec<Candle>, FetchError> {
        let request = venue_request(exchange, symbol, timeframe, start_ms, end_ms, limit)
            .ok_or_else(|| FetchError::UnsupportedTimeframe {
                exchange,
                timeframe: timeframe.to_string(),
            })?;

        let body = self.execute(&request).await?;
        let raw = venue_parse(exchange, &body)?;

        let mut candles: Vec<Candle> = raw
            .into_iter()
            .filter(|bar| bar.open_time_ms >= start_ms && bar.open_time_ms < end_ms)
            .map(|bar| Candle {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                open_time_ms: bar.open_time_ms,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
            })
            .collect();
        candles.sort_by_key(|c| c.open_time_ms);

        tracing::debug!(
            exchange = %exchange,
            symbol,
            timeframe,
            bars = candles.len(),
            "backfill complete"
        );
        Ok(candles)
    }

    /// Execute one request with the bounded retry policy.
    ///
    /// Retries on network errors, 429, and 5xx; any other non-success status
    /// is terminal.
    async fn execute(&self, request: &HistoryRequest) -> Result<String, FetchError> {
        let mut backoff = RetryBackoff::new(self.retry);

        loop {
            let attempt_result = self
                .client
                .get(&request.url)
                .query(&request.query)
                .send()
                .await;

            let retry_reason = match attempt_result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .text()
                            .await
                            .map_err(|e| FetchError::RetryBudgetExhausted {
                                attempts: backoff.attempts(),
                                last_error: e.to_string(),
                            });
                    }
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        format!("HTTP {status}")
                    } else {
                        return Err(FetchError::Status { status });
                    }
                }
                Err(e) => e.to_string(),
            };

            let Some(delay) = backoff.next_backoff() else {
                return Err(FetchError::RetryBudgetExhausted {
                    attempts: backoff.attempts(),
                    last_error: retry_reason,
                });
            };

            tracing::warn!(
                url = %request.url,
                error = %retry_reason,
                delay_ms = delay.as_millis(),
                attempt = backoff.attempts(),
                "backfill attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl crate::application::ports::HistoryProvider for BackfillClient {
    async fn fetch_bars(
        &self,
        exchange: ExchangeId,
        symbol: &str,
        timeframe: &str,
        start_ms: i64,
        end_ms: i64,
        limit: u32,
    ) -> Result<Vec<Candle>, FetchError> {
        self.fetch(exchange, symbol, timeframe, start_ms, end_ms, limit)
            .await
    }
}

fn venue_request(
    exchange: ExchangeId,
    symbol: &str,
    timeframe: &str,
    start_ms: i64,
    end_ms: i64,
    limit: u32,
) -> Option<HistoryRequest> {
    match exchange {
        ExchangeId::Binance => binance::history_request(symbol, timeframe, start_ms, end_ms, limit),
        ExchangeId::Bitget => bitget::history_request(symbol, timeframe, start_ms, end_ms, limit),
        ExchangeId::Bitstamp => {
            bitstamp::history_request(symbol, timeframe, start_ms, end_ms, limit)
        }
        ExchangeId::Bitvavo => bitvavo::history_request(symbol, timeframe, start_ms, end_ms, limit),
        ExchangeId::Coinbase => {
            coinbase::history_request(symbol, timeframe, start_ms, end_ms, limit)
        }
        ExchangeId::Kraken => kraken::history_request(symbol, timeframe, start_ms, end_ms, limit),
        ExchangeId::Okx => okx::history_request(symbol, timeframe, start_ms, end_ms, limit),
    }
}

fn venue_parse(exchange: ExchangeId, body: &str) -> Result<Vec<RawBar>, NormalizeError> {
    match exchange {
        ExchangeId::Binance => binance::parse_history(body),
        ExchangeId::Bitget => bitget::parse_history(body),
        ExchangeId::Bitstamp => bitstamp::parse_history(body),
        ExchangeId::Bitvavo => bitvavo::parse_history(body),
        ExchangeId::Coinbase => coinbase::parse_history(body),
        ExchangeId::Kraken => kraken::parse_history(body),
        ExchangeId::Okx => okx::parse_history(body),
    }
}

// =============================================================================
// Tests
// =============================================================================
