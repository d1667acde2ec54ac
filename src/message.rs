//! Wire message shapes.
//!
//! The protocol multiplexes seven logical message kinds over one JSON object shape keyed by a
//! numeric `type` field. A derived `Serialize`/`Deserialize` doesn't fit well here because which
//! fields are present depends on the `type` value (e.g. a non-blocking `Invocation` omits
//! `invocationId`), so encoding/decoding is done by hand against `serde_json::Value`.

use serde_json::{json, Value};

/// The closed set of message kinds in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
    Close = 7,
}

impl MessageType {
    fn from_u64(n: u64) -> Option<Self> {
        Some(match n {
            1 => MessageType::Invocation,
            2 => MessageType::StreamItem,
            3 => MessageType::Completion,
            4 => MessageType::StreamInvocation,
            5 => MessageType::CancelInvocation,
            6 => MessageType::Ping,
            7 => MessageType::Close,
            _ => return None,
        })
    }
}

/// A decoded protocol message, excluding the handshake (which is a distinct pre-state frame, see
/// [`HandshakeRequest`] and [`HandshakeResponse`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A named method call. `invocation_id` is `None` for a non-blocking send.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    /// One item of a server-to-client stream. Not driven by `Session`'s public API, but decoded
    /// so a batch containing one doesn't break framing for the messages around it.
    StreamItem { invocation_id: String, item: Value },
    /// Terminates a blocking `Invocation`.
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    /// Client-initiated stream invocation. Decoded for completeness; `Session` does not expose a
    /// way to send one.
    StreamInvocation {
        invocation_id: String,
        target: String,
        arguments: Vec<Value>,
    },
    /// Cancels a previously started stream invocation.
    CancelInvocation { invocation_id: String },
    /// Keepalive.
    Ping,
    /// Server (or client) is closing the connection.
    Close { error: Option<String> },
}

impl Message {
    pub fn ping() -> Self {
        Message::Ping
    }

    pub fn invocation(invocation_id: Option<String>, target: &str, arguments: Vec<Value>) -> Self {
        Message::Invocation {
            invocation_id,
            target: target.to_owned(),
            arguments,
        }
    }

    /// Serialize to the wire JSON object (sans record separator, that's the codec's job).
    pub fn to_value(&self) -> Value {
        match self {
            Message::Invocation {
                invocation_id,
                target,
                arguments,
            } => {
                let mut obj = json!({
                    "type": MessageType::Invocation as u8,
                    "target": target,
                    "arguments": arguments,
                });
                if let Some(id) = invocation_id {
                    obj["invocationId"] = json!(id);
                }
                obj
            }
            Message::StreamItem { invocation_id, item } => json!({
                "type": MessageType::StreamItem as u8,
                "invocationId": invocation_id,
                "item": item,
            }),
            Message::Completion {
                invocation_id,
                result,
                error,
            } => {
                let mut obj = json!({
                    "type": MessageType::Completion as u8,
                    "invocationId": invocation_id,
                });
                if let Some(result) = result {
                    obj["result"] = result.clone();
                }
                if let Some(error) = error {
                    obj["error"] = json!(error);
                }
                obj
            }
            Message::StreamInvocation {
                invocation_id,
                target,
                arguments,
            } => json!({
                "type": MessageType::StreamInvocation as u8,
                "invocationId": invocation_id,
                "target": target,
                "arguments": arguments,
            }),
            Message::CancelInvocation { invocation_id } => json!({
                "type": MessageType::CancelInvocation as u8,
                "invocationId": invocation_id,
            }),
            Message::Ping => json!({ "type": MessageType::Ping as u8 }),
            Message::Close { error } => {
                let mut obj = json!({ "type": MessageType::Close as u8 });
                if let Some(error) = error {
                    obj["error"] = json!(error);
                }
                obj
            }
        }
    }

    /// Parse a decoded JSON object into a [`Message`]. Returns `None` for a shape this crate
    /// doesn't recognize (unknown `type`, or a `type` missing/non-numeric) so the caller can skip
    /// it the way an unrecognized frame should be ignored rather than treated as fatal.
    pub fn from_value(value: &Value) -> Option<Self> {
        let ty = value.get("type")?.as_u64().and_then(MessageType::from_u64)?;
        let str_field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_owned);
        let arguments = |value: &Value| {
            value
                .get("arguments")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };
        Some(match ty {
            MessageType::Invocation => Message::Invocation {
                invocation_id: str_field("invocationId"),
                target: str_field("target")?,
                arguments: arguments(value),
            },
            MessageType::StreamItem => Message::StreamItem {
                invocation_id: str_field("invocationId")?,
                item: value.get("item").cloned().unwrap_or(Value::Null),
            },
            MessageType::Completion => Message::Completion {
                invocation_id: str_field("invocationId")?,
                result: value.get("result").cloned(),
                error: str_field("error"),
            },
            MessageType::StreamInvocation => Message::StreamInvocation {
                invocation_id: str_field("invocationId")?,
                target: str_field("target")?,
                arguments: arguments(value),
            },
            MessageType::CancelInvocation => Message::CancelInvocation {
                invocation_id: str_field("invocationId")?,
            },
            MessageType::Ping => Message::Ping,
            MessageType::Close => Message::Close {
                error: str_field("error"),
            },
        })
    }
}

/// The client's first frame on a fresh transport, pinning the codec.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub protocol: &'static str,
    pub version: u32,
}

impl HandshakeRequest {
    pub fn to_value(&self) -> Value {
        json!({ "protocol": self.protocol, "version": self.version })
    }
}

/// The server's reply to the handshake request. Success iff `error` is absent or empty.
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub error: Option<String>,
}

impl HandshakeResponse {
    pub fn is_success(&self) -> bool {
        self.error.as_deref().unwrap_or("").is_empty()
    }

    pub fn from_value(value: &Value) -> Self {
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        HandshakeResponse { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_round_trips_with_id() {
        let msg = Message::invocation(Some("abc".into()), "add", vec![json!(1), json!(2)]);
        let value = msg.to_value();
        assert_eq!(value["invocationId"], json!("abc"));
        assert_eq!(Message::from_value(&value), Some(msg));
    }

    #[test]
    fn invocation_round_trips_without_id() {
        let msg = Message::invocation(None, "log", vec![json!("hi")]);
        let value = msg.to_value();
        assert!(value.get("invocationId").is_none());
        assert_eq!(Message::from_value(&value), Some(msg));
    }

    #[test]
    fn completion_prefers_result_presence_over_error() {
        let msg = Message::Completion {
            invocation_id: "1".into(),
            result: Some(json!(42)),
            error: None,
        };
        assert_eq!(Message::from_value(&msg.to_value()), Some(msg));
    }

    #[test]
    fn unknown_type_is_skipped_not_fatal() {
        assert_eq!(Message::from_value(&json!({ "type": 99 })), None);
    }

    #[test]
    fn handshake_response_treats_empty_error_as_success() {
        assert!(HandshakeResponse::from_value(&json!({ "error": "" })).is_success());
        assert!(HandshakeResponse::from_value(&json!({})).is_success());
        assert!(!HandshakeResponse::from_value(&json!({ "error": "nope" })).is_success());
    }
}
