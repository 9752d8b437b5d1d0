/*
[INPUT]:  WebSocket URL and ticker protocol frames
[OUTPUT]: Typed messages and connection handles
[POS]:    WebSocket layer - real-time data streams
[UPDATE]: When adding message types or changing connection logic
*/

pub mod client;
pub mod message;

pub use client::{
    Connection, ConnectionPeer, Connector, Frame, NORMAL_CLOSURE, TransportEvent, WsConnector,
    parse_binary, parse_text,
};
pub use message::{InboundMessage, OutboundMessage, SubscriptionPayload, TickerMessage};
