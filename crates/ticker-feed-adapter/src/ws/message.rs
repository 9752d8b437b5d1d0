/*
[INPUT]:  Raw WebSocket text frames
[OUTPUT]: Typed inbound/outbound ticker protocol messages
[POS]:    WebSocket layer - message parsing and validation
[UPDATE]: When adding new message types or changing format
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FeedError, Result};

/// Latest price data for one instrument
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub price: Decimal,
    pub close_price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
    /// Milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl TickerMessage {
    /// Identifier the update is keyed under: the explicit instrument id, else the symbol.
    pub fn instrument_key(&self) -> Option<&str> {
        self.instrument_id
            .as_deref()
            .filter(|key| !key.is_empty())
            .or_else(|| self.symbol.as_deref().filter(|key| !key.is_empty()))
    }

    /// Server-provided change, or `price - closePrice` when absent.
    pub fn effective_change_price(&self) -> Decimal {
        self.change_price
            .unwrap_or_else(|| self.price - self.close_price)
    }

    /// Server-provided percent change, or the percent derived from price and close.
    ///
    /// A zero close price yields zero.
    pub fn effective_change_percent(&self) -> Decimal {
        if let Some(percent) = self.change_percent {
            return percent;
        }
        (self.price - self.close_price)
            .checked_div(self.close_price)
            .map(|ratio| ratio * Decimal::ONE_HUNDRED)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Frames received from the market-data service
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "PONG")]
    Pong,
    #[serde(rename = "ticker")]
    Ticker(TickerMessage),
}

impl InboundMessage {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode a binary frame carrying UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|err| FeedError::Decode(format!("binary frame is not UTF-8: {err}")))?;
        Self::decode(text)
    }
}

/// Body of a subscribe/unsubscribe request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPayload {
    pub ticker: String,
    pub instrument_id: String,
    pub is_subscribe: bool,
}

/// Frames sent to the market-data service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "ticker")]
    Ticker {
        payload: SubscriptionPayload,
        hash: String,
    },
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "PONG")]
    Pong,
}

impl OutboundMessage {
    pub fn subscribe(instrument_id: &str) -> Self {
        Self::subscription(instrument_id, true)
    }

    pub fn unsubscribe(instrument_id: &str) -> Self {
        Self::subscription(instrument_id, false)
    }

    fn subscription(instrument_id: &str, is_subscribe: bool) -> Self {
        OutboundMessage::Ticker {
            payload: SubscriptionPayload {
                ticker: instrument_id.to_string(),
                instrument_id: instrument_id.to_string(),
                is_subscribe,
            },
            hash: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
