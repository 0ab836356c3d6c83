//! JSON wire codec.
//!
//! Inbound:
//! - `{"type":"frame","image":"<data-URL>"}`
//! - `{"type":"chat","query":"<text>"}`
//!
//! Outbound:
//! - `{"type":"recognition"|"chat_response","payload":<backend JSON>}`
//! - `{"type":"recognition"|"chat_response","error":"<message>"}`

use serde_json::{Map, Value, json};

use crate::errors::DecodeError;
use crate::messages::{InboundRequest, Outcome, OutboundResult};

/// Decode a raw frame into a validated request.
pub fn decode(raw: &[u8]) -> Result<InboundRequest, DecodeError> {
    let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotUtf8)?;
    decode_str(text)
}

/// Decode a text frame into a validated request.
pub fn decode_str(text: &str) -> Result<InboundRequest, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let message_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;

    match message_type {
        "frame" => {
            let image = required_str(&obj, "frame", "image")?;
            Ok(InboundRequest::Frame { image })
        }
        "chat" => {
            let query = required_str(&obj, "chat", "query")?;
            Ok(InboundRequest::ChatQuery { query })
        }
        other => Err(DecodeError::UnknownType(other.to_owned())),
    }
}

fn required_str(
    obj: &Map<String, Value>,
    message_type: &'static str,
    field: &'static str,
) -> Result<String, DecodeError> {
    match obj.get(field).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_owned()),
        _ => Err(DecodeError::MissingField {
            message_type,
            field,
        }),
    }
}

/// Encode a result into its wire form. Total: never fails.
pub fn encode(result: &OutboundResult) -> String {
    let response_type = result.kind.response_type();
    let value = match &result.outcome {
        Outcome::Payload(payload) => json!({ "type": response_type, "payload": payload }),
        Outcome::Failure(failure) => json!({ "type": response_type, "error": failure.message }),
    };
    value.to_string()
}
