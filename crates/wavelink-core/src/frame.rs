//! Frame envelope and handshake wire messages
//!
//! Two message families exist on the wire. Handshake control messages are
//! plaintext JSON text frames exchanged before the session key is
//! established. Everything afterwards is a [`Frame`]: codec-encoded, then
//! encrypted under the session key, then sent as a single binary frame.

use serde::{Deserialize, Serialize};

use crate::codec::{self, Value};
use crate::{Result, WavelinkError};

// ----------------------------------------------------------------------------
// Application Frame
// ----------------------------------------------------------------------------

/// Logical message carried by every post-handshake envelope.
///
/// `category` is the `type` discriminator of the wire format; `action` holds
/// the flattened `resource/verb` path for inbound actions. A frame with no
/// action and no recognized correlation id is malformed and is ignored by
/// both ends, never treated as fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub correlation_id: Option<String>,
    pub category: String,
    pub action: Option<String>,
    pub payload: Option<Value>,
    pub error: Option<ReplyError>,
}

/// Structured error reply body.
///
/// Routing and authorization failures use the reserved codes below; handler
/// domain errors pass through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyError {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

/// Reserved reply error codes emitted by the router itself.
pub mod error_code {
    pub const NO_SUCH_ACTION: &str = "no_such_action";
    pub const NOT_AUTHENTICATED: &str = "not_authenticated";
    pub const FORBIDDEN: &str = "forbidden";
}

impl Frame {
    /// Build an outbound action frame
    pub fn action<C, A>(category: C, action: A, payload: Option<Value>) -> Self
    where
        C: Into<String>,
        A: Into<String>,
    {
        Frame {
            correlation_id: None,
            category: category.into(),
            action: Some(action.into()),
            payload,
            error: None,
        }
    }

    /// Build an unsolicited event frame
    pub fn event<C: Into<String>>(category: C, payload: Value) -> Self {
        Frame {
            correlation_id: None,
            category: category.into(),
            action: None,
            payload: Some(payload),
            error: None,
        }
    }

    /// Build a success reply, tagged with the inbound frame's correlation id
    pub fn reply_to(inbound: &Frame, payload: Value) -> Self {
        Frame {
            correlation_id: inbound.correlation_id.clone(),
            category: inbound.category.clone(),
            action: None,
            payload: Some(payload),
            error: None,
        }
    }

    /// Build an error reply, tagged with the inbound frame's correlation id
    pub fn error_reply_to<C, M>(inbound: &Frame, code: C, message: M) -> Self
    where
        C: Into<String>,
        M: Into<String>,
    {
        Frame {
            correlation_id: inbound.correlation_id.clone(),
            category: inbound.category.clone(),
            action: None,
            payload: None,
            error: Some(ReplyError {
                code: code.into(),
                message: message.into(),
                details: None,
            }),
        }
    }

    /// Flattened router lookup key for an inbound action frame
    pub fn route_key(&self) -> Option<String> {
        self.action
            .as_ref()
            .map(|action| format!("{}/{}", self.category, action))
    }

    /// A frame with neither an action nor a correlation id carries nothing
    /// either side can dispatch.
    pub fn is_malformed(&self) -> bool {
        self.action.is_none() && self.correlation_id.is_none() && self.error.is_none()
    }
}

// ----------------------------------------------------------------------------
// Handshake Wire Messages
// ----------------------------------------------------------------------------

/// Plaintext handshake control message (JSON text frame)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeMessage {
    /// Public key exchange, sent by both sides as their first frame
    KeyExchange { key: String },
}

impl HandshakeMessage {
    /// Parse a handshake control message from a text frame
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| WavelinkError::handshake(format!("malformed control frame: {e}")))
    }

    /// Render this message as a JSON text frame
    pub fn to_json(&self) -> String {
        // Serialization of this enum cannot fail: no non-string map keys,
        // no non-finite floats.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// Sealed Session-Key Offer
// ----------------------------------------------------------------------------
//
// The session key travels as the codec encoding of { type: "aes_key",
// key: <bytes> }, sealed under the receiving side's public key. The same
// encoding, sealed in the opposite direction, serves as the client's ack.

const KEY_OFFER_TYPE: &str = "aes_key";

/// Encode the plaintext of a sealed session-key offer
pub fn encode_key_offer(key: &[u8; 32]) -> Result<Vec<u8>> {
    let offer = Value::map([
        ("type", Value::from(KEY_OFFER_TYPE)),
        ("key", Value::Bytes(key.to_vec())),
    ]);
    codec::encode(&offer)
}

/// Decode the plaintext of a sealed session-key offer
pub fn decode_key_offer(bytes: &[u8]) -> Result<[u8; 32]> {
    let offer: Value = codec::decode(bytes)?;

    match offer.get("type").and_then(Value::as_str) {
        Some(KEY_OFFER_TYPE) => {}
        other => {
            return Err(WavelinkError::handshake(format!(
                "unexpected key offer type: {other:?}"
            )))
        }
    }

    let key_bytes = offer
        .get("key")
        .and_then(Value::as_bytes)
        .ok_or_else(|| WavelinkError::handshake("key offer missing key material"))?;

    let mut key = [0u8; 32];
    if key_bytes.len() != key.len() {
        return Err(WavelinkError::handshake("key offer has wrong key length"));
    }
    key.copy_from_slice(key_bytes);
    Ok(key)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::action(
            "social",
            "posts/load",
            Some(Value::map([("page", Value::Int(2))])),
        );
        let bytes = codec::encode(&frame).unwrap();
        let decoded: Frame = codec::decode(&bytes).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_reply_carries_correlation_id() {
        let mut inbound = Frame::action("social", "posts/load", None);
        inbound.correlation_id = Some("123-abcd".into());

        let reply = Frame::reply_to(&inbound, Value::Null);
        assert_eq!(reply.correlation_id.as_deref(), Some("123-abcd"));

        let err = Frame::error_reply_to(&inbound, error_code::FORBIDDEN, "missing permission");
        assert_eq!(err.correlation_id.as_deref(), Some("123-abcd"));
        assert_eq!(err.error.unwrap().code, error_code::FORBIDDEN);
    }

    #[test]
    fn test_route_key_flattening() {
        let frame = Frame::action("messenger", "dialogs/list", None);
        assert_eq!(frame.route_key().as_deref(), Some("messenger/dialogs/list"));
    }

    #[test]
    fn test_malformed_frame_detection() {
        let frame = Frame {
            correlation_id: None,
            category: "noise".into(),
            action: None,
            payload: None,
            error: None,
        };
        assert!(frame.is_malformed());
        assert!(!Frame::action("social", "posts/load", None).is_malformed());
    }

    #[test]
    fn test_handshake_message_json() {
        let msg = HandshakeMessage::KeyExchange {
            key: "AAAA".into(),
        };
        let text = msg.to_json();
        assert!(text.contains("\"key_exchange\""));
        assert_eq!(HandshakeMessage::from_json(&text).unwrap(), msg);

        assert!(HandshakeMessage::from_json("{\"type\":\"bogus\"}").is_err());
    }

    #[test]
    fn test_key_offer_roundtrip() {
        let key = [7u8; 32];
        let bytes = encode_key_offer(&key).unwrap();
        assert_eq!(decode_key_offer(&bytes).unwrap(), key);
    }

    #[test]
    fn test_key_offer_rejects_wrong_length() {
        let offer = Value::map([
            ("type", Value::from("aes_key")),
            ("key", Value::Bytes(vec![1, 2, 3])),
        ]);
        let bytes = codec::encode(&offer).unwrap();
        assert!(decode_key_offer(&bytes).is_err());
    }
}
