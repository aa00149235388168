//! JSON-RPC 2.0 envelopes used by the lightstream API
//!
//! Frames are decoded in two steps: the generic envelope first, then the
//! ticker payload only when the method is a channel message.

use super::Tick;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// JSON-RPC protocol version sent and expected
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of channel notifications
pub const CHANNEL_MESSAGE_METHOD: &str = "channelMessage";

/// Errors while decoding a frame
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not a JSON-RPC envelope
    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    /// A channel message without usable params
    #[error("Channel message has no params")]
    MissingParams,
    /// The params did not hold a channel message
    #[error("Malformed channel message: {0}")]
    ChannelMessage(#[source] serde_json::Error),
    /// The nested ticker did not match the wire schema
    #[error("Malformed ticker payload: {0}")]
    Payload(#[source] serde_json::Error),
}

impl DecodeError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Envelope(_) => "envelope",
            DecodeError::MissingParams | DecodeError::ChannelMessage(_) => "channel_message",
            DecodeError::Payload(_) => "payload",
        }
    }
}

/// Outer JSON-RPC frame: method plus opaque params
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "jsonrpc", default)]
    pub version: String,
    /// Absent on responses to our own requests
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// Params of a `channelMessage` notification
#[derive(Debug, Deserialize)]
struct ChannelMessage {
    channel: String,
    message: Value,
}

/// Subscribe request for a single channel
#[derive(Debug, Serialize)]
pub struct SubscribeRequest<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: SubscribeParams<'a>,
}

#[derive(Debug, Serialize)]
struct SubscribeParams<'a> {
    channel: &'a str,
}

impl<'a> SubscribeRequest<'a> {
    pub fn new(channel: &'a str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: "subscribe",
            params: SubscribeParams { channel },
        }
    }
}

/// Decode the generic envelope of a text frame
pub fn decode_envelope(text: &str) -> Result<Envelope, DecodeError> {
    serde_json::from_str(text).map_err(DecodeError::Envelope)
}

impl Envelope {
    /// Check if this is a channel notification
    pub fn is_channel_message(&self) -> bool {
        self.method.as_deref() == Some(CHANNEL_MESSAGE_METHOD)
    }

    /// Extract the ticker carried by a channel notification.
    ///
    /// Returns `Ok(None)` for any other method and for notifications on a
    /// channel other than `channel`. An empty instrument is backfilled with
    /// `instrument`.
    pub fn into_tick(self, channel: &str, instrument: &str) -> Result<Option<Tick>, DecodeError> {
        if !self.is_channel_message() {
            return Ok(None);
        }

        let params = self.params.ok_or(DecodeError::MissingParams)?;
        let message: ChannelMessage =
            serde_json::from_value(params).map_err(DecodeError::ChannelMessage)?;

        if message.channel != channel {
            tracing::debug!(
                channel = %message.channel,
                expected = %channel,
                "Ignoring message for unsubscribed channel"
            );
            return Ok(None);
        }

        let mut tick: Tick =
            serde_json::from_value(message.message).map_err(DecodeError::Payload)?;
        if tick.backfill_instrument(instrument) {
            tracing::trace!(instrument, "Backfilled missing product_code");
        }

        Ok(Some(tick))
    }
}
