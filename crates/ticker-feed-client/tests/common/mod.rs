/*
[INPUT]:  Manager test scenarios needing a scripted transport
[OUTPUT]: Mock connector/socket, manager builders, recording callbacks
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for ticker-feed-client tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use ticker_feed_adapter::{Connection, Connector, FeedError, Frame, Result, TickerMessage, TransportEvent};
use ticker_feed_client::{ConnectionState, FeedConfig, TickerCallback, TickerManager};
use tokio::sync::mpsc;
use url::Url;

#[derive(Debug, Clone, Copy)]
enum Attempt {
    Fail,
    Hang,
}

#[derive(Debug, Default)]
struct ConnectorState {
    plan: VecDeque<Attempt>,
    urls: Vec<Url>,
}

/// Connector that hands every opened connection to the test as a [`MockSocket`].
///
/// Attempts succeed unless a failure or hang has been scripted for them.
#[derive(Debug)]
pub struct MockConnector {
    state: Mutex<ConnectorState>,
    sockets_tx: mpsc::UnboundedSender<MockSocket>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockSocket>) {
        let (sockets_tx, sockets_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            state: Mutex::new(ConnectorState::default()),
            sockets_tx,
        });
        (connector, sockets_rx)
    }

    pub fn fail_next(&self) {
        self.state.lock().unwrap().plan.push_back(Attempt::Fail);
    }

    pub fn hang_next(&self) {
        self.state.lock().unwrap().plan.push_back(Attempt::Hang);
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().urls.len()
    }

    pub fn last_url(&self) -> Option<Url> {
        self.state.lock().unwrap().urls.last().cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Connection> {
        let attempt = {
            let mut state = self.state.lock().unwrap();
            state.urls.push(url.clone());
            state.plan.pop_front()
        };

        match attempt {
            Some(Attempt::Fail) => Err(FeedError::WebSocket("connection refused".to_string())),
            Some(Attempt::Hang) => std::future::pending().await,
            None => {
                let (connection, peer) = Connection::channel();
                let _ = self.sockets_tx.send(MockSocket {
                    frames: peer.frames,
                    events: peer.events,
                });
                Ok(connection)
            }
        }
    }
}

/// Server side of one mock connection
pub struct MockSocket {
    frames: mpsc::UnboundedReceiver<Frame>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockSocket {
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Next text frame, parsed as JSON
    pub async fn next_message(&mut self) -> Value {
        match self.next_frame().await {
            Some(Frame::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// Text frames already written by the client
    pub fn drain_messages(&mut self) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            match frame {
                Frame::Text(text) => messages.push(serde_json::from_str(&text).unwrap()),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        messages
    }

    pub fn push_text(&self, text: &str) {
        self.events.send(TransportEvent::Text(text.to_string())).unwrap();
    }

    pub fn push_ticker(&self, instrument_id: &str, price: f64, close_price: f64) {
        self.push_text(&ticker_frame(instrument_id, price, close_price));
    }

    pub fn error(&self, reason: &str) {
        self.events.send(TransportEvent::Error(reason.to_string())).unwrap();
    }

    pub fn close(&self, code: u16) {
        self.events
            .send(TransportEvent::Closed {
                code: Some(code),
                reason: "server closed".to_string(),
            })
            .unwrap();
    }
}

pub fn ticker_frame(instrument_id: &str, price: f64, close_price: f64) -> String {
    serde_json::json!({
        "type": "ticker",
        "instrumentId": instrument_id,
        "price": price,
        "closePrice": close_price,
    })
    .to_string()
}

pub fn test_config() -> FeedConfig {
    FeedConfig::default()
}

pub fn start_manager(
    config: FeedConfig,
) -> (
    TickerManager,
    Arc<MockConnector>,
    mpsc::UnboundedReceiver<MockSocket>,
) {
    let (connector, sockets) = MockConnector::new();
    let manager = TickerManager::with_connector(config, connector.clone()).unwrap();
    (manager, connector, sockets)
}

/// Let every ready task run to idle. Time is paused in these tests, so this
/// never advances past a pending feed timer.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn record_states(manager: &TickerManager) -> Arc<Mutex<Vec<ConnectionState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _listener = manager.on_state_change(move |state| sink.lock().unwrap().push(state));
    seen
}

/// Callback that forwards every update into a channel
pub fn channel_callback() -> (TickerCallback, mpsc::UnboundedReceiver<TickerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: TickerCallback = Arc::new(move |message: &TickerMessage| {
        let _ = tx.send(message.clone());
    });
    (callback, rx)
}

pub fn is_subscription(message: &Value, instrument_id: &str, is_subscribe: bool) -> bool {
    message["type"] == "ticker"
        && message["payload"]["ticker"] == instrument_id
        && message["payload"]["instrumentId"] == instrument_id
        && message["payload"]["isSubscribe"] == is_subscribe
}
