//! Subscriber-facing interface tests: filtered subscriptions, unsubscribe,
//! drop accounting under pressure, and the wire form of delivered items.

use std::str::FromStr;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tick_stream_hub::domain::market_data::{ExchangeId, Side, Trade};
use tick_stream_hub::domain::subscription::InstrumentFilter;
use tick_stream_hub::infrastructure::hub::{HubConfig, TickHub};
use tick_stream_hub::infrastructure::wire;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn trade(symbol: &str, price: &str, qty: &str) -> Trade {
    Trade::new(
        ExchangeId::Kraken,
        symbol,
        dec(price),
        dec(qty),
        Side::Buy,
        1_700_000_000_000,
        1_700_000_000_010,
    )
    .unwrap()
}

#[tokio::test]
async fn filtered_subscribers_see_only_their_instruments() {
    let hub = TickHub::with_defaults();
    let mut btc = hub.subscribe_trades(InstrumentFilter::from_symbols(vec![
        "BTC/USD".to_string(),
    ]));
    let mut all = hub.subscribe_trades(InstrumentFilter::All);

    let _ = hub.publish_trade(trade("ETH/USD", "4000", "1"));
    let _ = hub.publish_trade(trade("BTC/USD", "36000", "0.5"));

    // The filtered subscriber skips straight to its instrument.
    assert_eq!(btc.next().await.unwrap().symbol, "BTC/USD");

    // The unfiltered one sees both, in publish order.
    assert_eq!(all.next().await.unwrap().symbol, "ETH/USD");
    assert_eq!(all.next().await.unwrap().symbol, "BTC/USD");
}

#[tokio::test]
async fn unsubscribe_releases_the_slot_and_publishing_continues() {
    let hub = TickHub::with_defaults();
    let first = hub.subscribe_trades(InstrumentFilter::All);
    let mut second = hub.subscribe_trades(InstrumentFilter::All);
    assert_eq!(hub.trade_receiver_count(), 2);

    first.unsubscribe();
    assert_eq!(hub.trade_receiver_count(), 1);

    let _ = hub.publish_trade(trade("BTC/USD", "36000", "1"));
    assert_eq!(second.next().await.unwrap().price, dec("36000"));
}

#[tokio::test]
async fn publisher_is_never_stalled_by_a_dead_subscriber() {
    let hub = TickHub::new(HubConfig {
        trades_capacity: 8,
        snapshots_capacity: 8,
        status_capacity: 8,
    });
    // Subscribed but never draining.
    let mut stuck = hub.subscribe_trades(InstrumentFilter::All);

    let started = Instant::now();
    for i in 0..50_000 {
        let _ = hub.publish_trade(trade("BTC/USD", "100", &format!("0.{:04}", i % 1000 + 1)));
    }
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "publishing must complete in bounded time regardless of consumers"
    );

    // The stuck subscriber finds recent data and an honest drop count.
    let item = stuck.next().await.unwrap();
    assert_eq!(item.symbol, "BTC/USD");
    assert!(stuck.dropped() > 0);
}

#[test]
fn delivered_trades_encode_to_the_tagged_wire_form() {
    let trade = trade("BTC/USD", "36735.32000000", "0.00514000");
    let bytes = wire::encode_trade(&trade);

    let decoded = wire::decode(&bytes).unwrap();
    assert_eq!(decoded.kind, wire::MessageKind::Trade as i32);
    assert_eq!(decoded.instrument, "BTC/USD");
    assert_eq!(decoded.exchange_id, "kraken");
    // Fixed-point 1e8: 36735.32 → 3_673_532_000_000.
    assert_eq!(decoded.price_e8, 3_673_532_000_000);
    assert_eq!(wire::from_fixed_e8(decoded.quantity_e8), dec("0.00514"));
}
