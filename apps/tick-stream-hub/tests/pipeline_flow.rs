//! End-to-end pipeline tests against a loopback WebSocket server.
//!
//! A local server plays the exchange: it accepts one session at a time and
//! feeds canned Binance-shaped frames. The real supervisor, normalizer, hub,
//! and aggregation service run in between, and assertions happen at the
//! subscriber end, exactly where a chart head would sit.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tick_stream_hub::application::services::{AggregationConfig, AggregationService};
use tick_stream_hub::domain::aggregation::Timeframe;
use tick_stream_hub::domain::market_data::ExchangeId;
use tick_stream_hub::domain::subscription::InstrumentFilter;
use tick_stream_hub::infrastructure::exchanges::heartbeat::KeepaliveConfig;
use tick_stream_hub::infrastructure::exchanges::reconnect::BackoffConfig;
use tick_stream_hub::infrastructure::exchanges::supervisor::{
    ConnectionState, ExchangeSupervisor, FeedEvent, SupervisorConfig,
};
use tick_stream_hub::infrastructure::exchanges::{ExchangeSpec, HeartbeatPolicy};
use tick_stream_hub::infrastructure::hub::TickHub;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Binance-shaped trade frame with a current timestamp.
fn trade_frame(price: &str, qty: &str) -> String {
    format!(
        r#"{{"e":"trade","E":{ts},"s":"BTCUSDT","t":1,"p":"{price}","q":"{qty}","T":{ts},"m":false}}"#,
        ts = now_ms()
    )
}

/// Serve one WebSocket session that sends `frames` and then idles until the
/// client goes away.
async fn serve_frames(frames: Vec<String>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let frames = frames.clone();
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut write, mut read) = ws.split();

                for frame in frames {
                    if write.send(Message::Text(frame.into())).await.is_err() {
                        return;
                    }
                }

                // Answer pings until the peer disconnects.
                while let Some(Ok(msg)) = read.next().await {
                    if let Message::Ping(data) = msg {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                }
            });
        }
    });

    addr
}

fn test_spec(addr: std::net::SocketAddr) -> ExchangeSpec {
    ExchangeSpec {
        exchange: ExchangeId::Binance,
        symbol: "BTC/USDT".to_string(),
        url: format!("ws://{addr}/ws"),
        subscribe_payload: None,
        heartbeat: HeartbeatPolicy::ProtocolPing,
    }
}

fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        connect_timeout: Duration::from_secs(5),
        backoff: BackoffConfig {
            base: Duration::from_millis(50),
            cap_exponent: 3,
            max_delay: Duration::from_secs(1),
            stability_threshold: Duration::from_secs(30),
            jitter: false,
        },
        keepalive: KeepaliveConfig::new(Duration::from_secs(5), Duration::from_secs(10)),
        frame_buffer: 64,
    }
}

#[tokio::test]
async fn trades_flow_from_socket_to_subscriber() {
    let addr = serve_frames(vec![
        trade_frame("42000.5", "0.25"),
        trade_frame("42001.0", "0.75"),
    ])
    .await;

    let (event_tx, mut event_rx) = mpsc::channel::<FeedEvent>(256);
    let cancel = CancellationToken::new();
    let supervisor =
        ExchangeSupervisor::new(test_config(), test_spec(addr), event_tx, cancel.clone());
    let handle = tokio::spawn(supervisor.run());

    let mut trades = Vec::new();
    let mut connected = false;
    while trades.len() < 2 {
        match tokio::time::timeout(Duration::from_secs(5), event_rx.recv()).await {
            Ok(Some(FeedEvent::Trade(trade))) => trades.push(trade),
            Ok(Some(FeedEvent::Status(status))) => {
                if status.state == ConnectionState::Connected {
                    connected = true;
                }
            }
            _ => panic!("pipeline stalled before delivering both trades"),
        }
    }

    assert!(connected, "supervisor should report Connected");
    assert_eq!(trades[0].exchange, ExchangeId::Binance);
    assert_eq!(trades[0].symbol, "BTC/USDT");
    assert_eq!(trades[0].price, dec("42000.5"));
    assert_eq!(trades[1].quantity, dec("0.75"));

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn malformed_frame_is_dropped_and_pipeline_continues() {
    // Second frame has no price field; third is valid again.
    let addr = serve_frames(vec![
        trade_frame("100.0", "1.0"),
        format!(
            r#"{{"e":"trade","E":{ts},"s":"BTCUSDT","t":2,"q":"1.0","T":{ts},"m":false}}"#,
            ts = now_ms()
        ),
        trade_frame("101.0", "2.0"),
    ])
    .await;

    let (event_tx, mut event_rx) = mpsc::channel::<FeedEvent>(256);
    let cancel = CancellationToken::new();
    let supervisor =
        ExchangeSupervisor::new(test_config(), test_spec(addr), event_tx, cancel.clone());
    let handle = tokio::spawn(supervisor.run());

    let mut trades = Vec::new();
    while trades.len() < 2 {
        match tokio::time::timeout(Duration::from_secs(5), event_rx.recv()).await {
            Ok(Some(FeedEvent::Trade(trade))) => trades.push(trade),
            Ok(Some(FeedEvent::Status(_))) => {}
            _ => panic!("pipeline did not survive the malformed frame"),
        }
    }

    // Both valid trades arrive; the bad one vanished without killing anything.
    assert_eq!(trades[0].price, dec("100.0"));
    assert_eq!(trades[1].price, dec("101.0"));

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn full_path_produces_aggregated_snapshots() {
    let addr = serve_frames(vec![
        trade_frame("100.00000000", "2.00000000"),
        trade_frame("200.00000000", "1.00000000"),
    ])
    .await;

    let hub = Arc::new(TickHub::with_defaults());
    let cancel = CancellationToken::new();

    // Subscribe before anything flows.
    let mut snapshots = hub.subscribe_snapshots(InstrumentFilter::All);

    let aggregation = AggregationService::new(
        AggregationConfig {
            timeframes: vec![Timeframe::parse("1d").unwrap()],
            ring_capacity: 8,
            emit_on_trade: true,
            snapshot_cadence: Duration::from_secs(3600),
        },
        Arc::clone(&hub),
        cancel.clone(),
    );
    tokio::spawn(aggregation.run());
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Bridge supervisor events into the hub, as the binary's router does.
    let (event_tx, mut event_rx) = mpsc::channel::<FeedEvent>(256);
    let bridge_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let FeedEvent::Trade(trade) = event {
                let _ = bridge_hub.publish_trade(trade);
            }
        }
    });

    let supervisor =
        ExchangeSupervisor::new(test_config(), test_spec(addr), event_tx, cancel.clone());
    tokio::spawn(supervisor.run());

    // VWAP over (100×2, 200×1) converges to 133.33333333 with volume 3.
    let mut last = None;
    for _ in 0..2 {
        let snapshot = tokio::time::timeout(Duration::from_secs(5), snapshots.next())
            .await
            .expect("snapshot within timeout")
            .unwrap();
        last = Some(snapshot);
    }

    let last = last.unwrap();
    assert_eq!(last.vwap.round_dp(8), dec("133.33333333"));
    assert_eq!(last.volume, dec("3.00000000"));
    assert_eq!(last.last_price, dec("200.00000000"));
    assert_eq!(last.trade_count, 2);

    cancel.cancel();
}

#[tokio::test]
async fn lost_connection_reaches_backoff_and_reconnects() {
    // The server sends one frame per session; dropping the socket after
    // forces the supervisor through Backoff into a fresh session.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut write, _read) = ws.split();
                let _ = write
                    .send(Message::Text(trade_frame("100.0", "1.0").into()))
                    .await;
                // Socket drops here: terminal for this session.
            });
        }
    });

    let (event_tx, mut event_rx) = mpsc::channel::<FeedEvent>(256);
    let cancel = CancellationToken::new();
    let supervisor =
        ExchangeSupervisor::new(test_config(), test_spec(addr), event_tx, cancel.clone());
    let handle = tokio::spawn(supervisor.run());

    let mut saw_backoff = false;
    let mut connects = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while connects < 2 && tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_secs(5), event_rx.recv()).await {
            Ok(Some(FeedEvent::Status(status))) => match status.state {
                ConnectionState::Backoff => saw_backoff = true,
                ConnectionState::Connected => connects += 1,
                _ => {}
            },
            Ok(Some(FeedEvent::Trade(_))) => {}
            _ => break,
        }
    }

    assert!(saw_backoff, "supervisor should pass through Backoff");
    assert_eq!(connects, 2, "supervisor should reconnect after the drop");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}
