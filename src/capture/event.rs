//! Inbound capture messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CaptureError;

/// Which half of an exchange a message describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Request,
    Response,
}

/// A discrete message from the capture script.
///
/// On the wire the correlation token travels in the `nonce` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CaptureEvent {
    Request {
        #[serde(rename = "nonce")]
        token: String,
        method: String,
        route: String,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ssecurity: Option<String>,
    },
    Response {
        #[serde(rename = "nonce")]
        token: String,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ssecurity: Option<String>,
    },
}

impl CaptureEvent {
    /// Parse a raw message.
    ///
    /// Accepts either the bare event object or the agent envelope
    /// `{"type": "send", "payload": "<event json>"}`.
    pub fn parse(raw: &str) -> Result<Self, CaptureError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| CaptureError::malformed(format!("invalid JSON: {}", e)))?;

        let value = unwrap_envelope(value)?;

        serde_json::from_value(value).map_err(|e| CaptureError::malformed(e.to_string()))
    }

    pub fn kind(&self) -> EventKind {
        match self {
            CaptureEvent::Request { .. } => EventKind::Request,
            CaptureEvent::Response { .. } => EventKind::Response,
        }
    }

    pub fn token(&self) -> &str {
        match self {
            CaptureEvent::Request { token, .. } | CaptureEvent::Response { token, .. } => token,
        }
    }
}

fn unwrap_envelope(value: Value) -> Result<Value, CaptureError> {
    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);

    match kind.as_deref() {
        Some("send") => match value.get("payload") {
            Some(Value::String(payload)) => serde_json::from_str(payload)
                .map_err(|e| CaptureError::malformed(format!("invalid payload JSON: {}", e))),
            Some(payload @ Value::Object(_)) => Ok(payload.clone()),
            _ => Err(CaptureError::malformed("envelope without payload")),
        },
        Some("error") => {
            let description = value
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown agent error");
            Err(CaptureError::malformed(format!("agent error: {}", description)))
        }
        _ => Ok(value),
    }
}
