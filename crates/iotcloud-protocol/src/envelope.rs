//! The `{mid, name, payload}` envelope shared by every session.

use serde_json::{Map, Value, json};
use thiserror::Error;

/// Message id carried by unsolicited events. Never correlated.
pub const UNSOLICITED: i64 = -1;

/// Errors produced by the envelope codec.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The raw text could not be parsed into an envelope. When a usable
    /// message id could still be recovered from the text it is carried here
    /// for diagnostics.
    #[error("malformed envelope (mid {mid:?}): {reason}")]
    MalformedEnvelope { mid: Option<i64>, reason: String },
}

/// One wire message.
///
/// `mid >= 0` means the message is a request awaiting a response or the
/// response to a prior request. `mid == UNSOLICITED` marks an event that is
/// never correlated.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub mid: i64,
    pub name: Option<String>,
    pub payload: Value,
}

impl Envelope {
    /// Build a request/response envelope carrying a message id.
    pub fn request(mid: i64, name: &str, payload: Value) -> Self {
        Self {
            mid,
            name: Some(name.to_string()),
            payload,
        }
    }

    /// Build an unsolicited event envelope.
    pub fn event(name: &str, payload: Value) -> Self {
        Self::request(UNSOLICITED, name, payload)
    }

    /// Encode to the JSON wire form.
    pub fn encode(&self) -> String {
        let mut obj = Map::new();
        obj.insert("mid".to_string(), json!(self.mid));
        if let Some(ref name) = self.name {
            obj.insert("name".to_string(), json!(name));
        }
        obj.insert("payload".to_string(), self.payload.clone());
        Value::Object(obj).to_string()
    }

    /// Decode a wire message.
    ///
    /// Decoding is deliberately permissive: `mid` may be a number or a
    /// numeric string, `name` is dropped when it is not a string, and a
    /// missing payload becomes `Value::Null`. Only input that is not a JSON
    /// object at all fails, and even then the mid is recovered from the raw
    /// text when possible so the reader loop can log something useful.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(err) => {
                return Err(ProtocolError::MalformedEnvelope {
                    mid: scan_mid(text),
                    reason: err.to_string(),
                });
            }
        };

        let obj = match value {
            Value::Object(obj) => obj,
            other => {
                return Err(ProtocolError::MalformedEnvelope {
                    mid: extract_mid(other.get("mid")),
                    reason: "not a JSON object".to_string(),
                });
            }
        };

        Ok(Self {
            mid: extract_mid(obj.get("mid")).unwrap_or(UNSOLICITED),
            name: obj
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
            payload: obj.get("payload").cloned().unwrap_or(Value::Null),
        })
    }

    /// Whether this envelope expects (or answers) a correlated exchange.
    pub fn is_correlated(&self) -> bool {
        self.mid >= 0
    }
}

/// Permissive numeric extraction for the `mid` field.
fn extract_mid(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Last-resort mid recovery from text that failed JSON parsing.
fn scan_mid(text: &str) -> Option<i64> {
    let idx = text.find("\"mid\"")?;
    let rest = text[idx + 5..].trim_start().strip_prefix(':')?.trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_digit() && c != '-')
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}
