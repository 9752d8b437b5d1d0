/*
[INPUT]:  Subscribe/unsubscribe and routing scenarios over a mock socket
[OUTPUT]: Wire subscription and fan-out behavior verification
[POS]:    Integration test layer - subscription registry and message router
[UPDATE]: When changing subscription semantics or delivery rules
*/

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rust_decimal::Decimal;
use serde_json::json;
use ticker_feed_adapter::TickerMessage;
use ticker_feed_client::{ConnectionState, TickerCallback};
use tokio_test::assert_ok;

use common::*;

#[tokio::test(start_paused = true)]
async fn test_first_subscriber_sends_single_subscribe() {
    let (manager, _connector, mut sockets) = start_manager(test_config());
    let mut socket = sockets.recv().await.unwrap();
    settle().await;
    assert!(socket.drain_messages().is_empty());

    let first = manager.subscribe_fn("AAPL", |_| {});
    let second = manager.subscribe_fn("AAPL", |_| {});
    settle().await;

    let sent = socket.drain_messages();
    assert_eq!(sent.len(), 1);
    assert!(is_subscription(&sent[0], "AAPL", true));
    assert_eq!(sent[0]["hash"].as_str().map(str::len), Some(32));

    first.unsubscribe();
    settle().await;
    assert!(socket.drain_messages().is_empty());

    second.unsubscribe();
    second.unsubscribe();
    manager.unsubscribe("AAPL", first.callback());
    settle().await;

    let sent = socket.drain_messages();
    assert_eq!(sent.len(), 1);
    assert!(is_subscription(&sent[0], "AAPL", false));
    assert!(!second.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_payload_shape() {
    let (manager, _connector, mut sockets) = start_manager(test_config());
    let mut socket = sockets.recv().await.unwrap();

    let _subscription = manager.subscribe_fn("AAPL", |_| {});
    let message = socket.next_message().await;

    assert_eq!(message["type"], "ticker");
    assert_eq!(
        message["payload"],
        json!({"ticker": "AAPL", "instrumentId": "AAPL", "isSubscribe": true})
    );
    assert!(message["hash"].is_string());
}

#[tokio::test(start_paused = true)]
async fn test_update_fans_out_to_every_subscriber() {
    let (manager, _connector, mut sockets) = start_manager(test_config());
    let socket = sockets.recv().await.unwrap();

    let (first, mut first_rx) = channel_callback();
    let (second, mut second_rx) = channel_callback();
    let (other, mut other_rx) = channel_callback();
    let _a = manager.subscribe("TSLA", first);
    let _b = manager.subscribe("TSLA", second);
    let _c = manager.subscribe("MSFT", other);
    settle().await;

    socket.push_ticker("TSLA", 251.5, 250.0);
    settle().await;

    let a = first_rx.try_recv().unwrap();
    let b = second_rx.try_recv().unwrap();
    assert_eq!(a, b);
    assert_eq!(a.instrument_key(), Some("TSLA"));
    assert_eq!(a.price, Decimal::new(2515, 1));
    assert!(first_rx.try_recv().is_err());
    assert!(other_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_cached_value_replayed_to_late_subscriber() {
    let (manager, _connector, mut sockets) = start_manager(test_config());
    let mut socket = sockets.recv().await.unwrap();

    socket.push_ticker("AAPL", 150.25, 148.0);
    settle().await;
    let cached = manager.cached_data("AAPL").unwrap();
    assert_eq!(cached.price, Decimal::new(15025, 2));
    assert!(socket.drain_messages().is_empty());

    let (callback, mut rx) = channel_callback();
    let _subscription = manager.subscribe("AAPL", callback);
    assert!(rx.try_recv().is_err());

    let replayed = rx.recv().await.unwrap();
    assert_eq!(replayed, cached);
    assert!(is_subscription(&socket.next_message().await, "AAPL", true));
}

#[tokio::test(start_paused = true)]
async fn test_same_callback_registered_once() {
    let (manager, _connector, mut sockets) = start_manager(test_config());
    let mut socket = sockets.recv().await.unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let callback: TickerCallback = Arc::new(move |_: &TickerMessage| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let first = manager.subscribe("AAPL", callback.clone());
    let _second = manager.subscribe("AAPL", callback.clone());
    settle().await;
    assert_eq!(socket.drain_messages().len(), 1);

    socket.push_ticker("AAPL", 1.0, 1.0);
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    first.unsubscribe();
    settle().await;
    let sent = socket.drain_messages();
    assert_eq!(sent.len(), 1);
    assert!(is_subscription(&sent[0], "AAPL", false));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_callback_is_isolated() {
    let (manager, _connector, mut sockets) = start_manager(test_config());
    let socket = sockets.recv().await.unwrap();

    let _bad = manager.subscribe_fn("TSLA", |_| panic!("consumer bug"));
    let (callback, mut rx) = channel_callback();
    let _good = manager.subscribe("TSLA", callback);
    settle().await;

    socket.push_ticker("TSLA", 10.0, 9.0);
    socket.push_ticker("TSLA", 11.0, 9.0);
    settle().await;

    assert_eq!(rx.try_recv().unwrap().price, Decimal::from(10));
    assert_eq!(rx.try_recv().unwrap().price, Decimal::from(11));
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_and_unknown_frames_are_dropped() {
    let (manager, _connector, mut sockets) = start_manager(test_config());
    let socket = sockets.recv().await.unwrap();

    let (callback, mut rx) = channel_callback();
    let _subscription = manager.subscribe("AAPL", callback);
    settle().await;

    socket.push_text("{not json");
    socket.push_text(r#"{"type":"quote","instrumentId":"AAPL"}"#);
    socket.push_text(r#"{"type":"ticker","price":1,"closePrice":1}"#);
    socket.push_ticker("AAPL", 2.0, 1.0);
    settle().await;

    assert_eq!(rx.try_recv().unwrap().price, Decimal::from(2));
    assert!(rx.try_recv().is_err());
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_update_without_subscribers_is_cached() {
    let (manager, _connector, mut sockets) = start_manager(test_config());
    let socket = sockets.recv().await.unwrap();

    socket.push_text(r#"{"type":"ticker","symbol":"MSFT","price":410.1,"closePrice":400}"#);
    settle().await;

    let cached = manager.cached_data("MSFT").unwrap();
    assert_eq!(cached.effective_change_price(), Decimal::new(101, 1));
    assert_eq!(manager.cache().len(), 1);
    assert!(manager.cached_data("AAPL").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_clear_forgets_subscriptions_and_cache() {
    let (manager, _connector, mut sockets) = start_manager(test_config());
    let mut socket = sockets.recv().await.unwrap();

    let (callback, mut rx) = channel_callback();
    let _subscription = manager.subscribe("AAPL", callback.clone());
    socket.push_ticker("AAPL", 5.0, 4.0);
    settle().await;
    assert!(rx.try_recv().is_ok());
    socket.drain_messages();

    manager.clear();
    manager.flush().await;
    assert!(manager.cached_data("AAPL").is_none());

    socket.push_ticker("AAPL", 6.0, 4.0);
    settle().await;
    assert!(rx.try_recv().is_err());

    let _again = manager.subscribe("AAPL", callback);
    settle().await;
    let sent = socket.drain_messages();
    assert_eq!(sent.len(), 1);
    assert!(is_subscription(&sent[0], "AAPL", true));
}

#[tokio::test(start_paused = true)]
async fn test_empty_instrument_id_is_ignored() {
    let (manager, _connector, mut sockets) = start_manager(test_config());
    let mut socket = sockets.recv().await.unwrap();

    let subscription = manager.subscribe_fn("", |_| {});
    assert!(!subscription.is_active());
    settle().await;
    assert!(socket.drain_messages().is_empty());

    assert_ok!(manager.send(&json!({"type": "custom", "value": 1})));
    assert_eq!(socket.next_message().await, json!({"type": "custom", "value": 1}));
}
