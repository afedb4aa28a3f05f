//! Application messages carried inside records
//!
//! On the wire every message is a JSON object `{"type": ..., "payload": {...}}`.
//! Known types are parsed into typed payloads that reject unknown or missing
//! fields; an unrecognised `type` decodes to [`Message::Unknown`] so the
//! dispatch loop can skip it without tearing the session down.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{QsTlsError, Result};

pub const MSG_TYPE_CHAT: &str = "chat";
pub const MSG_TYPE_HEARTBEAT: &str = "heartbeat";
pub const MSG_TYPE_HEARTBEAT_ACK: &str = "heartbeat_ack";
pub const MSG_TYPE_QUIT: &str = "quit";

/// One application message
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Chat text
    Chat { text: String },
    /// Liveness probe carrying the sender's UNIX time in seconds
    Heartbeat { timestamp: f64 },
    /// Reply to a heartbeat
    HeartbeatAck {
        /// Timestamp echoed from the heartbeat, if it carried a numeric one
        orig_timestamp: Option<f64>,
        /// Responder's UNIX time when the ack was built
        server_timestamp: f64,
    },
    /// Session termination
    Quit,
    /// A type this implementation does not understand
    Unknown { kind: String },
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChatPayload {
    text: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct HeartbeatPayload {
    timestamp: f64,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct HeartbeatAckPayload {
    #[serde(
        default,
        deserialize_with = "numeric_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    orig_timestamp: Option<f64>,
    server_timestamp: f64,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct QuitPayload {}

/// Accept any JSON value, keeping it only when it is a number
fn numeric_or_none<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_f64())
}

impl Message {
    pub fn chat(text: impl Into<String>) -> Self {
        Message::Chat { text: text.into() }
    }

    /// Wire name of this message's type
    pub fn kind(&self) -> &str {
        match self {
            Message::Chat { .. } => MSG_TYPE_CHAT,
            Message::Heartbeat { .. } => MSG_TYPE_HEARTBEAT,
            Message::HeartbeatAck { .. } => MSG_TYPE_HEARTBEAT_ACK,
            Message::Quit => MSG_TYPE_QUIT,
            Message::Unknown { kind } => kind,
        }
    }

    /// Serialize to canonical UTF-8 JSON
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Message::Chat { text } => to_value(&ChatPayload { text: text.clone() })?,
            Message::Heartbeat { timestamp } => {
                ensure_finite("timestamp", *timestamp)?;
                to_value(&HeartbeatPayload {
                    timestamp: *timestamp,
                })?
            }
            Message::HeartbeatAck {
                orig_timestamp,
                server_timestamp,
            } => {
                if let Some(ts) = orig_timestamp {
                    ensure_finite("orig_timestamp", *ts)?;
                }
                ensure_finite("server_timestamp", *server_timestamp)?;
                to_value(&HeartbeatAckPayload {
                    orig_timestamp: *orig_timestamp,
                    server_timestamp: *server_timestamp,
                })?
            }
            Message::Quit | Message::Unknown { .. } => to_value(&QuitPayload {})?,
        };
        let envelope = Envelope {
            kind: self.kind().to_string(),
            payload,
        };
        serde_json::to_vec(&envelope)
            .map_err(|e| QsTlsError::Format(format!("message encoding failed: {}", e)))
    }

    /// Parse canonical JSON back into a message
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| QsTlsError::Format(format!("malformed message: {}", e)))?;
        let payload = match envelope.payload {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let message = match envelope.kind.as_str() {
            MSG_TYPE_CHAT => {
                let p: ChatPayload = from_value(&envelope.kind, payload)?;
                Message::Chat { text: p.text }
            }
            MSG_TYPE_HEARTBEAT => {
                let p: HeartbeatPayload = from_value(&envelope.kind, payload)?;
                Message::Heartbeat {
                    timestamp: p.timestamp,
                }
            }
            MSG_TYPE_HEARTBEAT_ACK => {
                let p: HeartbeatAckPayload = from_value(&envelope.kind, payload)?;
                Message::HeartbeatAck {
                    orig_timestamp: p.orig_timestamp,
                    server_timestamp: p.server_timestamp,
                }
            }
            MSG_TYPE_QUIT => {
                let _: QuitPayload = from_value(&envelope.kind, payload)?;
                Message::Quit
            }
            _ => Message::Unknown {
                kind: envelope.kind,
            },
        };
        Ok(message)
    }
}

fn to_value<T: Serialize>(payload: &T) -> Result<Value> {
    serde_json::to_value(payload)
        .map_err(|e| QsTlsError::Format(format!("payload encoding failed: {}", e)))
}

fn from_value<T: serde::de::DeserializeOwned>(kind: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| QsTlsError::Format(format!("invalid {} payload: {}", kind, e)))
}

fn ensure_finite(field: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(QsTlsError::Format(format!("{} must be finite", field)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_wire_shape() {
        let json = Message::chat("hello").to_json().unwrap();
        assert_eq!(
            std::str::from_utf8(&json).unwrap(),
            r#"{"type":"chat","payload":{"text":"hello"}}"#
        );
    }

    #[test]
    fn quit_has_empty_payload() {
        let json = Message::Quit.to_json().unwrap();
        assert_eq!(
            std::str::from_utf8(&json).unwrap(),
            r#"{"type":"quit","payload":{}}"#
        );
    }

    #[test]
    fn parses_messages_from_other_implementations() {
        // Spacing as produced by a default `json.dumps`.
        let heartbeat = br#"{"type": "heartbeat", "payload": {"timestamp": 1700000000.25}}"#;
        assert_eq!(
            Message::from_json(heartbeat).unwrap(),
            Message::Heartbeat {
                timestamp: 1700000000.25
            }
        );

        let ack = br#"{"type": "heartbeat_ack", "payload": {"orig_timestamp": null, "server_timestamp": 2.5}}"#;
        assert_eq!(
            Message::from_json(ack).unwrap(),
            Message::HeartbeatAck {
                orig_timestamp: None,
                server_timestamp: 2.5
            }
        );
    }

    #[test]
    fn non_numeric_orig_timestamp_is_absent() {
        let ack = br#"{"type":"heartbeat_ack","payload":{"orig_timestamp":"soon","server_timestamp":1.0}}"#;
        assert_eq!(
            Message::from_json(ack).unwrap(),
            Message::HeartbeatAck {
                orig_timestamp: None,
                server_timestamp: 1.0
            }
        );
    }

    #[test]
    fn unknown_type_is_preserved() {
        let msg = Message::from_json(br#"{"type":"file","payload":{"name":"x"}}"#).unwrap();
        assert_eq!(
            msg,
            Message::Unknown {
                kind: "file".to_string()
            }
        );
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let result = Message::from_json(br#"{"type":"chat","payload":{}}"#);
        assert!(matches!(result, Err(QsTlsError::Format(_))));

        let result = Message::from_json(br#"{"type":"heartbeat_ack","payload":{"orig_timestamp":1.0}}"#);
        assert!(matches!(result, Err(QsTlsError::Format(_))));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let result = Message::from_json(br#"{"type":"chat","payload":{"text":"hi","extra":1}}"#);
        assert!(matches!(result, Err(QsTlsError::Format(_))));
    }

    #[test]
    fn wrong_field_type_is_rejected() {
        let result = Message::from_json(br#"{"type":"heartbeat","payload":{"timestamp":"now"}}"#);
        assert!(matches!(result, Err(QsTlsError::Format(_))));
    }

    #[test]
    fn non_json_is_rejected() {
        assert!(matches!(
            Message::from_json(b"\xff\xfe not json"),
            Err(QsTlsError::Format(_))
        ));
        assert!(matches!(
            Message::from_json(br#"{"payload":{}}"#),
            Err(QsTlsError::Format(_))
        ));
    }

    #[test]
    fn non_finite_timestamp_cannot_be_encoded() {
        let result = Message::Heartbeat {
            timestamp: f64::NAN,
        }
        .to_json();
        assert!(matches!(result, Err(QsTlsError::Format(_))));
    }
}
