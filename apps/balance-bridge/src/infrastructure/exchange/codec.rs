//! Stream Codec
//!
//! Classifies inbound text frames from the user-data stream and encodes
//! outbound requests.

use super::messages::{ChannelEvent, ControlAck, StreamMessage};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON that matches no known frame.
    #[error("unrecognized message: {0}")]
    Unrecognized(String),
}

/// JSON codec for the user-data stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid JSON, non-object frames, or objects that
    /// are neither a ping, an acknowledgement, nor a channel event. A `ping`
    /// of any JSON type is accepted.
    pub fn decode(&self, text: &str) -> Result<StreamMessage, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;

        let Some(object) = value.as_object() else {
            return Err(CodecError::Unrecognized(preview(text)));
        };

        if let Some(ping) = object.get("ping") {
            return Ok(StreamMessage::Ping(ping.clone()));
        }

        if object.contains_key("c") {
            let event: ChannelEvent = serde_json::from_value(value)?;
            return Ok(StreamMessage::Event(event));
        }

        if object.contains_key("code") {
            let ack: ControlAck = serde_json::from_value(value)?;
            return Ok(StreamMessage::Ack(ack));
        }

        Err(CodecError::Unrecognized(preview(text)))
    }

    /// Encode a value to JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}
