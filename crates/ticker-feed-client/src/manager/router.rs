/*
[INPUT]:  Decoded inbound frames and synthetic ticks
[OUTPUT]: Cache updates, subscriber fan-out, heartbeat classification
[POS]:    Manager layer - inbound message routing
[UPDATE]: When adding inbound message kinds
*/

use ticker_feed_adapter::ws::{parse_binary, parse_text};
use ticker_feed_adapter::{InboundMessage, TickerMessage, TransportEvent};
use tracing::debug;

use super::cache::LastValueCache;
use super::registry::SubscriptionRegistry;

/// What the router did with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Routed {
    /// Server heartbeat; the caller must answer with a pong right away
    PingRequested,
    PongIgnored,
    Ticker {
        instrument_id: String,
        delivered: usize,
    },
    /// Ticker update carrying neither instrument id nor symbol
    Unkeyed,
}

/// Decode a data frame. Parse failures are logged and yield `None`.
pub(crate) fn decode(event: &TransportEvent) -> Option<InboundMessage> {
    match event {
        TransportEvent::Text(text) => parse_text(text),
        TransportEvent::Binary(bytes) => parse_binary(bytes),
        TransportEvent::Error(_) | TransportEvent::Closed { .. } => None,
    }
}

pub(crate) fn route(
    message: InboundMessage,
    cache: &LastValueCache,
    registry: &SubscriptionRegistry,
) -> Routed {
    match message {
        InboundMessage::Ping => Routed::PingRequested,
        InboundMessage::Pong => Routed::PongIgnored,
        InboundMessage::Ticker(ticker) => deliver_ticker(ticker, cache, registry),
    }
}

/// Cache the update, then fan it out to the instrument's current callbacks.
pub(crate) fn deliver_ticker(
    ticker: TickerMessage,
    cache: &LastValueCache,
    registry: &SubscriptionRegistry,
) -> Routed {
    let Some(instrument_id) = ticker.instrument_key().map(str::to_string) else {
        debug!("ticker update without instrument id dropped");
        return Routed::Unkeyed;
    };

    cache.insert(&instrument_id, ticker.clone());
    let delivered = registry.dispatch(&instrument_id, &ticker);
    if delivered == 0 && registry.subscriber_count(&instrument_id) == 0 {
        debug!(%instrument_id, "ticker cached without subscribers");
    }

    Routed::Ticker {
        instrument_id,
        delivered,
    }
}
