/*
[INPUT]:  WebSocket URL (token already embedded) and outbound frames
[OUTPUT]: Connection handles streaming transport events over channels
[POS]:    WebSocket layer - socket lifecycle and frame pumping
[UPDATE]: When changing transport behavior or frame logging
*/

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info};
use url::Url;

use crate::error::{FeedError, Result};
use crate::ws::message::{InboundMessage, OutboundMessage};

/// Close code for an intentional, normal closure
pub const NORMAL_CLOSURE: u16 = 1000;

const SUBSCRIPTION_LOG_LIMIT: usize = 10;
const OTHER_LOG_LIMIT: usize = 3;
const PARSE_FAIL_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static SUBSCRIBE_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static OTHER_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static PARSE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Frames written to the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Events read from the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Binary(Vec<u8>),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

/// One open socket, seen from the client side.
///
/// Dropping the connection closes the socket.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<Frame>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// The transport side of a [`Connection`].
#[derive(Debug)]
pub struct ConnectionPeer {
    pub frames: mpsc::UnboundedReceiver<Frame>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl Connection {
    /// Create a connected pair of channel ends.
    pub fn channel() -> (Connection, ConnectionPeer) {
        let (outbound, frames) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        (
            Connection { outbound, inbound },
            ConnectionPeer { frames, events },
        )
    }

    pub fn send_text(&self, text: String) -> Result<()> {
        self.outbound
            .send(Frame::Text(text))
            .map_err(|_| FeedError::Closed)
    }

    pub fn send_message(&self, message: &OutboundMessage) -> Result<()> {
        self.send_text(message.to_text()?)?;
        if let OutboundMessage::Ticker { .. } = message {
            log_subscription_sent(message);
        }
        Ok(())
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.outbound.send(Frame::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next transport event; `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }
}

/// Opens connections to the market-data service.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(&self, url: &Url) -> Result<Connection>;
}

/// tokio-tungstenite backed connector
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Connection> {
        let (ws_stream, _response) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();
        let (connection, peer) = Connection::channel();
        let ConnectionPeer { mut frames, events } = peer;

        debug!(host = url.host_str().unwrap_or_default(), "ws socket opened");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = frames.recv() => {
                        match outbound {
                            Some(Frame::Text(text)) => {
                                if let Err(err) = write.send(WsMessage::Text(text.into())).await {
                                    let _ = events.send(TransportEvent::Error(err.to_string()));
                                    let _ = events.send(TransportEvent::Closed {
                                        code: None,
                                        reason: err.to_string(),
                                    });
                                    break;
                                }
                            }
                            Some(Frame::Close { code, reason }) => {
                                let frame = CloseFrame {
                                    code: CloseCode::from(code),
                                    reason: reason.clone().into(),
                                };
                                let _ = write.send(WsMessage::Close(Some(frame))).await;
                                let _ = events.send(TransportEvent::Closed {
                                    code: Some(code),
                                    reason,
                                });
                                break;
                            }
                            None => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                        }
                    }
                    incoming = read.next() => {
                        let event = match incoming {
                            Some(Ok(WsMessage::Text(text))) => TransportEvent::Text(text.to_string()),
                            Some(Ok(WsMessage::Binary(bytes))) => TransportEvent::Binary(bytes.to_vec()),
                            Some(Ok(WsMessage::Close(frame))) => {
                                let (code, reason) = match frame {
                                    Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                                    None => (None, String::new()),
                                };
                                let _ = events.send(TransportEvent::Closed { code, reason });
                                break;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(err)) => {
                                let _ = events.send(TransportEvent::Error(err.to_string()));
                                let _ = events.send(TransportEvent::Closed {
                                    code: None,
                                    reason: err.to_string(),
                                });
                                break;
                            }
                            None => {
                                let _ = events.send(TransportEvent::Closed {
                                    code: None,
                                    reason: "stream ended".to_string(),
                                });
                                break;
                            }
                        };

                        if events.send(event).is_err() {
                            let _ = write.send(WsMessage::Close(None)).await;
                            break;
                        }
                    }
                }
            }
        });

        Ok(connection)
    }
}

/// Decode a text frame, logging (sampled) anything that is not a known message.
pub fn parse_text(text: &str) -> Option<InboundMessage> {
    match InboundMessage::decode(text) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            log_undecoded(&err, text);
            None
        }
    }
}

/// Decode a binary frame as UTF-8 JSON.
pub fn parse_binary(bytes: &[u8]) -> Option<InboundMessage> {
    match InboundMessage::decode_bytes(bytes) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            log_undecoded(&err, &String::from_utf8_lossy(bytes));
            None
        }
    }
}

fn log_undecoded(err: &FeedError, raw: &str) {
    if serde_json::from_str::<serde_json::Value>(raw).is_ok() {
        log_other_message_once(raw);
    } else {
        log_parse_fail_once(err, raw);
    }
}

fn log_subscription_sent(message: &OutboundMessage) {
    let count = SUBSCRIBE_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count >= SUBSCRIPTION_LOG_LIMIT {
        return;
    }

    if let OutboundMessage::Ticker { payload, .. } = message {
        let action = if payload.is_subscribe {
            "subscribe"
        } else {
            "unsubscribe"
        };
        info!(
            sample_index = count + 1,
            sample_limit = SUBSCRIPTION_LOG_LIMIT,
            action,
            instrument_id = %payload.instrument_id,
            "ws subscription sent"
        );
    }
}

fn log_other_message_once(raw: &str) {
    let count = OTHER_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < OTHER_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = OTHER_LOG_LIMIT,
            bytes = raw.len(),
            "ws message type unrecognized"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = OTHER_LOG_LIMIT,
            bytes = raw.len(),
            message = %preview,
            "ws message type unrecognized"
        );
    }
}

fn log_parse_fail_once(err: &dyn std::error::Error, raw: &str) {
    let count = PARSE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < PARSE_FAIL_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "ws message parse failed"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            message = %preview,
            "ws message parse failed"
        );
    }
}

fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&value[..end]);
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("abcdef", 3), "abc...");
        assert_eq!(truncate_for_log("ééé", 3), "é...");
    }

    #[test]
    fn parse_text_drops_unknown_and_malformed() {
        assert_eq!(parse_text(r#"{"type":"PING"}"#), Some(InboundMessage::Ping));
        assert_eq!(parse_text(r#"{"type":"news"}"#), None);
        assert_eq!(parse_text("not json"), None);
    }

    #[test]
    fn parse_binary_decodes_utf8() {
        assert_eq!(parse_binary(br#"{"type":"PONG"}"#), Some(InboundMessage::Pong));
        assert_eq!(parse_binary(&[0xff, 0xfe]), None);
        assert_eq!(parse_binary(br#"{"type":"news"}"#), None);
    }

    #[tokio::test]
    async fn connection_channel_round_trip() {
        let (mut connection, mut peer) = Connection::channel();

        connection.send_message(&OutboundMessage::Ping).unwrap();
        assert_eq!(
            peer.frames.recv().await,
            Some(Frame::Text(r#"{"type":"PING"}"#.to_string()))
        );

        peer.events
            .send(TransportEvent::Text("hello".to_string()))
            .unwrap();
        assert_eq!(
            connection.recv().await,
            Some(TransportEvent::Text("hello".to_string()))
        );

        drop(peer);
        assert_eq!(connection.recv().await, None);
        assert!(matches!(
            connection.send_text("late".to_string()),
            Err(FeedError::Closed)
        ));
    }
}
