//! Per-Exchange Connection Supervisor
//!
//! Wraps one [`Connector`] in the `Disconnected → Connecting → Connected →
//! Backoff → Connecting → …` lifecycle. The supervisor is not in the data
//! path in any interesting sense: frames stream through it straight into the
//! normalizer, and only lifecycle decisions (connect timeout, backoff,
//! stability reset, cancellation) live here.
//!
//! Every state transition is published as a structured status event; they
//! are diagnostics, not a correctness dependency.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::connector::Connector;
use super::heartbeat::KeepaliveConfig;
use super::reconnect::{BackoffConfig, BackoffPolicy};
use super::{ExchangeSpec, normalize};
use crate::domain::market_data::{ExchangeId, Trade, now_millis};
use crate::infrastructure::metrics;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of one supervised exchange connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket and no pending attempt.
    Disconnected,
    /// Dialing and awaiting the first frame.
    Connecting,
    /// Live and forwarding frames.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Backoff,
}

impl ConnectionState {
    /// Stable lowercase name for logs and health reporting.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff => "backoff",
        }
    }
}

/// Snapshot of a supervised connection, carried on every status event.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    /// Venue this connection serves.
    pub exchange: ExchangeId,
    /// Instrument the session covers.
    pub symbol: String,
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Consecutive failures since the last stable session.
    pub retry_count: u32,
    /// Delay until the next attempt, when in backoff.
    pub next_retry_in: Option<Duration>,
    /// Most recent session error, if any.
    pub last_error: Option<String>,
}

/// Events a supervisor emits toward the pipeline.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Lifecycle transition.
    Status(ConnectionStatus),
    /// A normalized trade.
    Trade(Trade),
}

// =============================================================================
// Supervisor
// =============================================================================

/// Timing knobs for one supervised connection.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Budget for handshake plus first frame before an attempt counts as
    /// failed.
    pub connect_timeout: Duration,
    /// Reconnection backoff policy.
    pub backoff: BackoffConfig,
    /// Session keepalive policy.
    pub keepalive: KeepaliveConfig,
    /// Raw frame buffer between connector and supervisor.
    pub frame_buffer: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            backoff: BackoffConfig::default(),
            keepalive: KeepaliveConfig::default(),
            frame_buffer: 1024,
        }
    }
}

/// Supervises the connection lifecycle for one venue/instrument pair.
pub struct ExchangeSupervisor {
    config: SupervisorConfig,
    spec: ExchangeSpec,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
    last_error: Option<String>,
}

impl ExchangeSupervisor {
    /// Create a supervisor; nothing connects until [`Self::run`].
    #[must_use]
    pub const fn new(
        config: SupervisorConfig,
        spec: ExchangeSpec,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            spec,
            event_tx,
            cancel,
            last_error: None,
        }
    }

    /// Drive the connection state machine until cancelled.
    pub async fn run(mut self) {
        let mut backoff = BackoffPolicy::new(self.config.backoff);

        loop {
            if self.cancel.is_cancelled() {
                self.emit_status(ConnectionState::Disconnected, backoff.retry_count(), None)
                    .await;
                tracing::info!(exchange = %self.spec.exchange, "supervisor cancelled");
                return;
            }

            self.emit_status(ConnectionState::Connecting, backoff.retry_count(), None)
                .await;

            let connected_for = self.run_one_session(&backoff).await;

            if self.cancel.is_cancelled() {
                self.emit_status(ConnectionState::Disconnected, backoff.retry_count(), None)
                    .await;
                tracing::info!(exchange = %self.spec.exchange, "supervisor cancelled");
                return;
            }

            self.emit_status(ConnectionState::Disconnected, backoff.retry_count(), None)
                .await;

            if let Some(connected_for) = connected_for {
                backoff.note_session_outcome(connected_for);
            }

            let delay = backoff.next_delay();
            metrics::record_reconnect(self.spec.exchange);
            tracing::info!(
                exchange = %self.spec.exchange,
                symbol = %self.spec.symbol,
                attempt = backoff.retry_count(),
                delay_ms = delay.as_millis(),
                "reconnecting after backoff"
            );
            self.emit_status(ConnectionState::Backoff, backoff.retry_count(), Some(delay))
                .await;

            tokio::select! {
                () = self.cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run a single connect attempt and session.
    ///
    /// Returns how long the session was Connected, or `None` when it never
    /// got that far.
    async fn run_one_session(&mut self, backoff: &BackoffPolicy) -> Option<Duration> {
        let (frame_tx, mut frame_rx) = mpsc::channel::<String>(self.config.frame_buffer);
        let session_cancel = self.cancel.child_token();
        let connector = Connector::new(self.spec.clone(), self.config.keepalive);

        let session_cancel_for_task = session_cancel.clone();
        let session = tokio::spawn(async move {
            connector.run_session(frame_tx, session_cancel_for_task).await
        });

        // Connected means handshake done and first frame (data or ack) seen
        // within the connect budget.
        let connected_at = match tokio::time::timeout(self.config.connect_timeout, frame_rx.recv())
            .await
        {
            Ok(Some(first_frame)) => {
                let connected_at = Instant::now();
                self.last_error = None;
                self.emit_status(ConnectionState::Connected, backoff.retry_count(), None)
                    .await;
                metrics::set_feed_connected(self.spec.exchange, true);
                tracing::info!(
                    exchange = %self.spec.exchange,
                    symbol = %self.spec.symbol,
                    "exchange feed connected"
                );

                self.process_frame(&first_frame).await;
                while let Some(frame) = frame_rx.recv().await {
                    self.process_frame(&frame).await;
                }
                Some(connected_at)
            }
            Ok(None) => None,
            Err(_elapsed) => {
                tracing::warn!(
                    exchange = %self.spec.exchange,
                    timeout_secs = self.config.connect_timeout.as_secs(),
                    "no frame within connect timeout"
                );
                self.last_error = Some("connect timeout".to_string());
                session_cancel.cancel();
                None
            }
        };

        metrics::set_feed_connected(self.spec.exchange, false);

        match session.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                metrics::record_transport_error(self.spec.exchange);
                tracing::warn!(exchange = %self.spec.exchange, error = %e, "session ended");
                self.last_error = Some(e.to_string());
            }
            Err(e) => {
                tracing::error!(exchange = %self.spec.exchange, error = %e, "session task panicked");
                self.last_error = Some(e.to_string());
            }
        }

        connected_at.map(|t| t.elapsed())
    }

    /// Normalize one raw frame and forward its trades.
    ///
    /// Bad payloads are dropped and counted; the session keeps running.
    async fn process_frame(&self, frame: &str) {
        let ingest_ms = now_millis();
        match normalize(self.spec.exchange, &self.spec.symbol, frame, ingest_ms) {
            Ok(trades) => {
                for trade in trades {
                    metrics::record_trade_received(self.spec.exchange);
                    if self.event_tx.send(FeedEvent::Trade(trade)).await.is_err() {
                        tracing::debug!("feed event channel closed");
                        return;
                    }
                }
            }
            Err(e) => {
                metrics::record_normalize_error(self.spec.exchange);
                tracing::warn!(
                    exchange = %self.spec.exchange,
                    symbol = %self.spec.symbol,
                    error = %e,
                    "dropping unnormalizable frame"
                );
            }
        }
    }

    async fn emit_status(
        &self,
        state: ConnectionState,
        retry_count: u32,
        next_retry_in: Option<Duration>,
    ) {
        let status = ConnectionStatus {
            exchange: self.spec.exchange,
            symbol: self.spec.symbol.clone(),
            state,
            retry_count,
            next_retry_in,
            last_error: self.last_error.clone(),
        };
        let _ = self.event_tx.send(FeedEvent::Status(status)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::exchanges::HeartbeatPolicy;

    fn unreachable_spec() -> ExchangeSpec {
        ExchangeSpec {
            exchange: ExchangeId::Kraken,
            symbol: "BTC/USD".to_string(),
            // Discard port: connection refused immediately, no network needed.
            url: "ws://127.0.0.1:9/ws".to_string(),
            subscribe_payload: None,
            heartbeat: HeartbeatPolicy::ProtocolPing,
        }
    }

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            connect_timeout: Duration::from_millis(200),
            backoff: BackoffConfig {
                base: Duration::from_millis(10),
                cap_exponent: 3,
                max_delay: Duration::from_millis(100),
                stability_threshold: Duration::from_secs(30),
                jitter: false,
            },
            keepalive: KeepaliveConfig::default(),
            frame_buffer: 16,
        }
    }

    #[tokio::test]
    async fn failed_connects_walk_the_state_machine() {
        let (event_tx, mut event_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let supervisor =
            ExchangeSupervisor::new(fast_config(), unreachable_spec(), event_tx, cancel.clone());
        let handle = tokio::spawn(supervisor.run());

        let mut states = Vec::new();
        while states.len() < 6 {
            match tokio::time::timeout(Duration::from_secs(5), event_rx.recv()).await {
                Ok(Some(FeedEvent::Status(status))) => states.push(status),
                Ok(Some(FeedEvent::Trade(_))) => panic!("no trades expected"),
                _ => break,
            }
        }

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        // Connecting → Disconnected → Backoff, then around again.
        assert_eq!(states[0].state, ConnectionState::Connecting);
        assert_eq!(states[1].state, ConnectionState::Disconnected);
        assert_eq!(states[2].state, ConnectionState::Backoff);
        assert_eq!(states[3].state, ConnectionState::Connecting);

        // The backoff status carries the delay and a climbing retry count.
        assert!(states[2].next_retry_in.is_some());
        assert_eq!(states[2].retry_count, 1);
        assert!(states[1].last_error.is_some());
    }

    #[tokio::test]
    async fn cancellation_stops_the_supervisor() {
        let (event_tx, mut event_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let supervisor =
            ExchangeSupervisor::new(fast_config(), unreachable_spec(), event_tx, cancel.clone());
        let handle = tokio::spawn(supervisor.run());

        // Let it make at least one attempt, then cancel.
        let _ = tokio::time::timeout(Duration::from_millis(500), event_rx.recv()).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok(), "supervisor should exit promptly on cancel");
    }

    #[test]
    fn connection_state_names() {
        assert_eq!(ConnectionState::Disconnected.as_str(), "disconnected");
        assert_eq!(ConnectionState::Connecting.as_str(), "connecting");
        assert_eq!(ConnectionState::Connected.as_str(), "connected");
        assert_eq!(ConnectionState::Backoff.as_str(), "backoff");
    }
}
