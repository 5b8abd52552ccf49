//! MEXC User-Data Stream Message Types
//!
//! Wire format types for the private WebSocket stream.
//!
//! # Outbound
//!
//! ```json
//! {"method": "SUBSCRIBE", "params": ["spot@private.account.v3.api"]}
//! {"method": "PING"}
//! {"pong": 1700000000000}
//! ```
//!
//! # Inbound
//!
//! ```json
//! {"ping": 1700000000000}
//! {"id": 0, "code": 0, "msg": "spot@private.account.v3.api"}
//! {"id": 0, "code": 0, "msg": "PONG"}
//! {"c": "spot@private.account.v3.api", "d": {...}, "t": 1700000000000}
//! ```

use serde::{Deserialize, Serialize};

/// Default private channel carrying account balance changes.
pub const ACCOUNT_CHANNEL: &str = "spot@private.account.v3.api";

// =============================================================================
// Outbound
// =============================================================================

/// Method-style request (`SUBSCRIBE`, `PING`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRequest {
    /// Request method.
    pub method: String,

    /// Channel names, omitted for methods that take none.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
}

impl MethodRequest {
    /// Subscribe to `channels`.
    #[must_use]
    pub fn subscribe(channels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            method: "SUBSCRIBE".to_string(),
            params: channels.into_iter().map(Into::into).collect(),
        }
    }

    /// Liveness ping.
    #[must_use]
    pub fn ping() -> Self {
        Self {
            method: "PING".to_string(),
            params: Vec::new(),
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Reply to an application-level ping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PongReply {
    /// Ping value echoed back unchanged, whatever its JSON type.
    pub pong: serde_json::Value,
}

impl PongReply {
    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Control acknowledgement for a subscribe request or a `PING`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlAck {
    /// Request id, `0` when the request carried none.
    #[serde(default)]
    pub id: i64,

    /// Result code, `0` on success.
    pub code: i64,

    /// Channel name on subscribe, `PONG` on ping.
    #[serde(default)]
    pub msg: String,
}

impl ControlAck {
    /// Whether the exchange accepted the request.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Whether this acknowledges a `PING`.
    #[must_use]
    pub fn is_pong(&self) -> bool {
        self.msg.eq_ignore_ascii_case("PONG")
    }
}

/// Push event on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    /// Channel name.
    #[serde(rename = "c")]
    pub channel: String,

    /// Event payload. Not interpreted; any event triggers a fresh snapshot.
    #[serde(rename = "d", default)]
    pub data: serde_json::Value,

    /// Event time (Unix ms).
    #[serde(rename = "t", default)]
    pub timestamp: Option<i64>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Application ping that must be answered with a pong.
    Ping(serde_json::Value),
    /// Subscribe or `PING` acknowledgement.
    Ack(ControlAck),
    /// Channel push event.
    Event(ChannelEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_wire_format() {
        let json = MethodRequest::subscribe([ACCOUNT_CHANNEL]).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"method":"SUBSCRIBE","params":["spot@private.account.v3.api"]}"#
        );
    }

    #[test]
    fn ping_omits_params() {
        assert_eq!(MethodRequest::ping().to_json().unwrap(), r#"{"method":"PING"}"#);
    }

    #[test]
    fn pong_wire_format() {
        let json = PongReply { pong: 42.into() }.to_json().unwrap();
        assert_eq!(json, r#"{"pong":42}"#);

        let json = PongReply { pong: "abc".into() }.to_json().unwrap();
        assert_eq!(json, r#"{"pong":"abc"}"#);
    }

    #[test]
    fn ack_helpers() {
        let pong: ControlAck = serde_json::from_str(r#"{"id":0,"code":0,"msg":"PONG"}"#).unwrap();
        assert!(pong.is_success());
        assert!(pong.is_pong());

        let rejected: ControlAck =
            serde_json::from_str(r#"{"id":0,"code":1,"msg":"Not Subscribed successfully!"}"#)
                .unwrap();
        assert!(!rejected.is_success());
        assert!(!rejected.is_pong());
    }
}
