/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public ticker feed adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod endpoint;
pub mod error;
pub mod ws;

pub use endpoint::{Endpoint, FeedEnvironment, TOKEN_QUERY_PARAM};
pub use error::{FeedError, Result};

// Re-export commonly used types from ws
pub use ws::{
    Connection,
    ConnectionPeer,
    Connector,
    Frame,
    InboundMessage,
    NORMAL_CLOSURE,
    OutboundMessage,
    SubscriptionPayload,
    TickerMessage,
    TransportEvent,
    WsConnector,
};
