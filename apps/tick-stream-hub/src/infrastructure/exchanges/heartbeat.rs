//! Connection Liveness Monitoring
//!
//! Periodic keepalive for exchange WebSocket sessions. The monitor ticks on
//! a fixed interval, asks the session loop to send a ping, and declares the
//! connection dead when no life sign arrives within the timeout. Whether a
//! "ping" is a WebSocket control frame or a venue-specific text frame is the
//! connector's business; the monitor only tracks timing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Keepalive timing configuration.
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveConfig {
    /// Interval between outbound pings.
    pub ping_interval: Duration,
    /// How long to wait for any life sign after a ping before giving up.
    pub idle_timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl KeepaliveConfig {
    /// Create a configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            ping_interval,
            idle_timeout,
        }
    }
}

/// Events emitted by the liveness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveEvent {
    /// The session loop should send a ping now.
    SendPing,
    /// No life sign within the timeout; the session must be torn down.
    Dead,
}

/// Liveness state shared between the monitor and the session loop.
///
/// The session loop records activity on every inbound frame; the monitor
/// only reads.
#[derive(Debug)]
pub struct LivenessState {
    last_activity: RwLock<Instant>,
    awaiting_reply: AtomicBool,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessState {
    /// Fresh state with activity recorded as "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
            awaiting_reply: AtomicBool::new(false),
        }
    }

    /// Record an inbound frame. Any frame counts: trade data proves the
    /// socket is alive just as well as a pong does.
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
        self.awaiting_reply.store(false, Ordering::SeqCst);
    }

    /// Mark that a ping went out and a reply is owed.
    pub fn mark_ping_sent(&self) {
        self.awaiting_reply.store(true, Ordering::SeqCst);
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_reply.load(Ordering::SeqCst)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }
}

/// Liveness monitor task for one session.
pub struct KeepaliveMonitor {
    config: KeepaliveConfig,
    state: Arc<LivenessState>,
    event_tx: mpsc::Sender<KeepaliveEvent>,
    cancel: CancellationToken,
}

impl KeepaliveMonitor {
    /// Create a monitor bound to shared liveness state.
    #[must_use]
    pub const fn new(
        config: KeepaliveConfig,
        state: Arc<LivenessState>,
        event_tx: mpsc::Sender<KeepaliveEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled or the connection is declared dead.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("keepalive monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check_and_ping().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn check_and_ping(&self) -> Result<(), ()> {
        if self.state.is_awaiting_reply() {
            let idle = self.state.idle_for();
            if idle > self.config.idle_timeout {
                tracing::warn!(
                    idle_secs = idle.as_secs(),
                    timeout_secs = self.config.idle_timeout.as_secs(),
                    "connection idle past timeout"
                );
                let _ = self.event_tx.send(KeepaliveEvent::Dead).await;
                return Err(());
            }
        }

        if self.event_tx.send(KeepaliveEvent::SendPing).await.is_err() {
            tracing::debug!("keepalive channel closed, stopping monitor");
            return Err(());
        }

        Ok(())
    }
}
