//! DAP wire model: message envelopes and typed request/event bodies.
//!
//! Envelopes keep `serde_json::Value` bodies. The DAP specification allows
//! responses with no `body` field at all; an untyped envelope keeps the frame
//! stable and defers decoding to the typed layer in [`requests`] and
//! [`events`].

pub mod events;
pub mod requests;
pub mod types;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Any framed DAP message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
    Event(EventEnvelope),
}

/// DAP request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub seq: i64,
    pub command: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
}

/// DAP response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub seq: i64,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// DAP event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq: i64,
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

impl ProtocolMessage {
    pub fn request(seq: i64, command: impl Into<String>, arguments: Value) -> ProtocolMessage {
        ProtocolMessage::Request(RequestEnvelope {
            seq,
            command: command.into(),
            arguments,
        })
    }

    pub fn response(
        seq: i64,
        request_seq: i64,
        command: impl Into<String>,
        result: Result<Option<Value>, String>,
    ) -> ProtocolMessage {
        let (success, message, body) = match result {
            Ok(body) => (true, None, body),
            Err(message) => (false, Some(message), None),
        };
        ProtocolMessage::Response(ResponseEnvelope {
            seq,
            request_seq,
            success,
            command: command.into(),
            message,
            body,
        })
    }

    pub fn event(seq: i64, event: impl Into<String>, body: Value) -> ProtocolMessage {
        ProtocolMessage::Event(EventEnvelope {
            seq,
            event: event.into(),
            body,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_round_trip() {
        let msg = ProtocolMessage::request(3, "stackTrace", json!({"threadId": 1}));
        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(encoded["type"], "request");
        assert_eq!(encoded["command"], "stackTrace");
        assert_eq!(encoded["arguments"]["threadId"], 1);

        let decoded: ProtocolMessage = serde_json::from_value(encoded).unwrap();
        match decoded {
            ProtocolMessage::Request(req) => assert_eq!(req.seq, 3),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_response_without_body() {
        let raw = json!({
            "type": "response",
            "seq": 10,
            "request_seq": 4,
            "success": true,
            "command": "configurationDone",
        });
        let decoded: ProtocolMessage = serde_json::from_value(raw).unwrap();
        match decoded {
            ProtocolMessage::Response(resp) => {
                assert!(resp.success);
                assert!(resp.body.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_error_response_carries_message() {
        let msg = ProtocolMessage::response(5, 2, "launch", Err("no such file".to_string()));
        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(encoded["success"], false);
        assert_eq!(encoded["message"], "no such file");
        assert!(encoded.get("body").is_none());
    }
}
