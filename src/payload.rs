use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Request-level payload failures. Any of these rejects the whole request
/// before per-event processing starts.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("empty request body")]
    EmptyPayload,
    #[error("failed to parse webhook payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("payload has neither an events list nor a type/data pair")]
    UnrecognizedShape,
}

/// One webhook event as delivered on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

impl WebhookEvent {
    /// Typed view of one raw payload element. Fails when `type` or `data`
    /// is missing or malformed.
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw)
    }
}

/// Typed view of the event `data` object. Every field the pipeline consumes
/// is optional on the wire; which ones are present depends on the event type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    pub from: Option<String>,
    pub reason: Option<String>,
    pub details: Option<Details>,
    pub hostname: Option<String>,
    #[serde(rename = "remoteIp")]
    pub remote_ip: Option<String>,
    pub result: Option<String>,
}

/// DSN diagnostic details arrive as either a single string or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Details {
    One(String),
    Many(Vec<String>),
}

impl Details {
    /// Flatten to a single diagnostic message.
    pub fn join(&self) -> String {
        match self {
            Details::One(detail) => detail.clone(),
            Details::Many(details) => details.join("; "),
        }
    }
}

/// Split a raw request body into the ordered list of raw events.
///
/// Accepts the batch shape `{"events": [...]}` and the single-event shape
/// `{"id": ..., "type": ..., "data": ...}`.
pub fn parse_payload(body: &[u8]) -> Result<Vec<Value>, PayloadError> {
    if body.is_empty() {
        return Err(PayloadError::EmptyPayload);
    }

    let payload: Value = serde_json::from_slice(body)?;

    if let Some(events) = payload.get("events").and_then(Value::as_array) {
        return Ok(events.clone());
    }

    if payload.get("type").is_some() && payload.get("data").is_some() {
        return Ok(vec![payload]);
    }

    Err(PayloadError::UnrecognizedShape)
}
