/*
[INPUT]:  Test scenarios needing a live WebSocket peer
[OUTPUT]: In-process WebSocket servers and fixtures
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for ticker-feed-adapter tests

use std::future::Future;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use url::Url;

/// Accept a single WebSocket client and hand it to `handler`.
pub async fn serve_once<F, Fut>(handler: F) -> Url
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        handler(ws).await;
    });
    Url::parse(&format!("ws://{addr}/ws/ticker?token=test-token")).unwrap()
}

/// Ticker frame as the market-data service sends it
pub fn ticker_frame(instrument_id: &str, price: f64, close_price: f64) -> String {
    serde_json::json!({
        "type": "ticker",
        "instrumentId": instrument_id,
        "price": price,
        "closePrice": close_price,
    })
    .to_string()
}
