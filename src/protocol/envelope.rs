//! Inbound envelope parsing and outbound message shapes
//!
//! Every inbound frame must satisfy the base envelope `{id, type, ...}`.
//! Extra fields are permitted and passed through to handlers, which may
//! apply stricter sub-schemas of their own.

use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Envelope contract violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `id` must be an integer")]
    InvalidId,

    #[error("field `type` must be a string")]
    InvalidType,
}

/// A parsed inbound message.
///
/// `id` correlates replies with requests and doubles as the subscription id
/// for `subscribe_event`/`unsubscribe_event`.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: i64,
    pub msg_type: String,
    body: Map<String, Value>,
}

impl Envelope {
    /// Validate the base envelope contract against a decoded JSON value.
    pub fn parse(value: Value) -> Result<Self, EnvelopeError> {
        let body = match value {
            Value::Object(map) => map,
            _ => return Err(EnvelopeError::NotAnObject),
        };

        let id = match body.get("id") {
            Some(v) => coerce_id(v).ok_or(EnvelopeError::InvalidId)?,
            None => return Err(EnvelopeError::MissingField("id")),
        };

        let msg_type = match body.get("type") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(EnvelopeError::InvalidType),
            None => return Err(EnvelopeError::MissingField("type")),
        };

        Ok(Self { id, msg_type, body })
    }

    /// Best-effort extraction of the `id` field from an arbitrary value,
    /// used to correlate a diagnostic reply with a malformed message.
    pub fn peek_id(value: &Value) -> Option<i64> {
        value.get("id").and_then(coerce_id)
    }

    /// A top-level field of the message, beyond `id` and `type`.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    /// The `data` object of the message, or an empty map if absent.
    pub fn data(&self) -> Map<String, Value> {
        match self.body.get("data") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    /// The full message body, including extra fields.
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }
}

// The original contract coerces ids, so integer-valued strings are accepted.
fn coerce_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Error reply shape: `{id, success: false, error: {message}}`.
pub fn error_message(id: i64, message: &str) -> Value {
    json!({
        "id": id,
        "success": false,
        "error": { "message": message },
    })
}

/// Event notification shape: `{id, type: "event", ...event fields}`.
///
/// `id` is the subscription id the event is delivered for.
pub fn event_message(id: i64, event_fields: Value) -> Value {
    let mut body = Map::new();
    body.insert("id".into(), json!(id));
    body.insert("type".into(), json!("event"));
    if let Value::Object(fields) = event_fields {
        body.extend(fields);
    }
    Value::Object(body)
}

/// Connection announcement, sent once directly on the wire right after the
/// handshake completes.
pub fn client_id_announcement(client_id: Uuid) -> Value {
    json!({
        "event_type": "client_id",
        "client_id": client_id,
    })
}
