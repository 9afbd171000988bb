//! Generic WebSocket Session Loop
//!
//! One [`Connector`] drives one live socket for one venue/instrument pair:
//! connect, send the venue's subscribe handshake, keep the connection alive,
//! and forward raw text frames to the supervisor. No parsing and no retry
//! logic here; a session that fails terminates with a [`TransportError`] and
//! the supervisor decides what happens next.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::heartbeat::{KeepaliveConfig, KeepaliveEvent, KeepaliveMonitor, LivenessState};
use super::{ExchangeSpec, HeartbeatPolicy};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Errors that terminate a transport session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Underlying WebSocket failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Subscribe handshake could not be sent.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Server closed the connection or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// No life sign within the keepalive timeout.
    #[error("keepalive timeout")]
    KeepaliveTimeout,

    /// The supervisor stopped consuming frames.
    #[error("frame channel closed")]
    ChannelClosed,
}

/// Owns one WebSocket session for a venue/instrument pair.
pub struct Connector {
    spec: ExchangeSpec,
    keepalive: KeepaliveConfig,
}

impl Connector {
    /// Create a connector for the given venue descriptor.
    #[must_use]
    pub const fn new(spec: ExchangeSpec, keepalive: KeepaliveConfig) -> Self {
        Self { spec, keepalive }
    }

    /// Run one session until cancellation or terminal failure.
    ///
    /// Raw text frames are forwarded to `frame_tx` in arrival order. Returns
    /// `Ok(())` only when cancelled; every other exit is an error the
    /// supervisor turns into a backoff.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on socket failure, server close, keepalive
    /// timeout, or a closed frame channel.
    pub async fn run_session(
        &self,
        frame_tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        tracing::debug!(
            exchange = %self.spec.exchange,
            symbol = %self.spec.symbol,
            url = %self.spec.url,
            "opening exchange session"
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.spec.url).await?;
        let (mut write, read) = ws_stream.split();

        if let Some(payload) = &self.spec.subscribe_payload {
            write
                .send(Message::Text(payload.clone().into()))
                .await
                .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        }

        let liveness = Arc::new(LivenessState::new());
        let (keepalive_tx, keepalive_rx) = mpsc::channel::<KeepaliveEvent>(8);
        let keepalive_cancel = CancellationToken::new();
        let monitor = KeepaliveMonitor::new(
            self.keepalive,
            Arc::clone(&liveness),
            keepalive_tx,
            keepalive_cancel.clone(),
        );
        let _monitor_handle = tokio::spawn(monitor.run());

        let result = self
            .drive(write, read, frame_tx, &liveness, keepalive_rx, &cancel)
            .await;

        keepalive_cancel.cancel();
        result
    }

    /// Pump frames and keepalive events until the session ends.
    async fn drive(
        &self,
        mut write: WsSink,
        mut read: WsSource,
        frame_tx: mpsc::Sender<String>,
        liveness: &LivenessState,
        mut keepalive_rx: mpsc::Receiver<KeepaliveEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                keepalive_event = keepalive_rx.recv() => {
                    match keepalive_event {
                        Some(KeepaliveEvent::SendPing) => {
                            liveness.mark_ping_sent();
                            self.send_ping(&mut write).await?;
                        }
                        Some(KeepaliveEvent::Dead) => {
                            tracing::warn!(
                                exchange = %self.spec.exchange,
                                "keepalive timeout, tearing session down"
                            );
                            return Err(TransportError::KeepaliveTimeout);
                        }
                        None => {
                            tracing::debug!("keepalive channel closed");
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            liveness.record_activity();

                            if self.handle_text_heartbeat(text.as_str(), &mut write).await? {
                                continue;
                            }

                            if frame_tx.send(text.to_string()).await.is_err() {
                                return Err(TransportError::ChannelClosed);
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            liveness.record_activity();
                        }
                        Some(Ok(Message::Ping(data))) => {
                            liveness.record_activity();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!(
                                exchange = %self.spec.exchange,
                                "server sent close frame"
                            );
                            return Err(TransportError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Binary and other frame types are not part of any
                            // integrated venue's trade contract.
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            tracing::info!(
                                exchange = %self.spec.exchange,
                                "WebSocket stream ended"
                            );
                            return Err(TransportError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Send a keepalive ping in whatever dialect the venue speaks.
    async fn send_ping(&self, write: &mut WsSink) -> Result<(), TransportError> {
        match self.spec.heartbeat {
            HeartbeatPolicy::ProtocolPing => {
                write.send(Message::Ping(vec![].into())).await?;
            }
            HeartbeatPolicy::TextPing { ping, .. } => {
                write.send(Message::Text(ping.into())).await?;
            }
        }
        Ok(())
    }

    /// Absorb venue text-level heartbeat frames.
    ///
    /// Returns `true` when the frame was a heartbeat and must not reach the
    /// normalizer.
    async fn handle_text_heartbeat(
        &self,
        text: &str,
        write: &mut WsSink,
    ) -> Result<bool, TransportError> {
        let HeartbeatPolicy::TextPing { ping, pong } = self.spec.heartbeat else {
            return Ok(false);
        };

        if text == ping {
            // Venue-initiated ping: answer in kind.
            write.send(Message::Text(pong.into())).await?;
            return Ok(true);
        }
        if text == pong {
            return Ok(true);
        }
        Ok(false)
    }
}
