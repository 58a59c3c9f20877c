//! Backend message envelope exchanged over the work queue.
//!
//! # Wire format
//!
//! Every request published to the backend queue is a JSON object with exactly
//! three fields:
//!
//! ```json
//! { "message_type": "Short", "data": "<payload>", "id": null }
//! { "message_type": "Long",  "data": "<payload>", "id": "6f0c…" }
//! ```
//!
//! Field names and the `Short` / `Long` spellings are a compatibility contract
//! with the backend workers and must not change for a running deployment.
//!
//! Replies (the bounded-wait reply body, or the value a worker stores in the
//! result cache) are parsed leniently by [`parse_backend_output`].

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors produced while encoding or decoding backend messages.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Failed to encode backend message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Backend output is not valid UTF-8")]
    InvalidUtf8,
    #[error("{0} message must {1} an id")]
    InvalidId(MessageKind, &'static str),
}

/// Delivery mode requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// The caller waits for a reply on the shared reply destination.
    #[serde(rename = "Short")]
    BoundedWait,
    /// The backend stores its result in the result cache under the message id.
    #[serde(rename = "Long")]
    FireAndForget,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::BoundedWait => "Short",
            MessageKind::FireAndForget => "Long",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single request for the backend workers.
///
/// `id` is present if and only if the kind is [`MessageKind::FireAndForget`];
/// the constructors and the deserializer both enforce this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBackendMessage")]
pub struct BackendMessage {
    message_type: MessageKind,
    data: String,
    id: Option<Uuid>,
}

#[derive(Deserialize)]
struct RawBackendMessage {
    message_type: MessageKind,
    data: String,
    #[serde(default)]
    id: Option<Uuid>,
}

impl TryFrom<RawBackendMessage> for BackendMessage {
    type Error = EnvelopeError;

    fn try_from(raw: RawBackendMessage) -> Result<Self, Self::Error> {
        match (raw.message_type, raw.id) {
            (MessageKind::BoundedWait, Some(_)) => {
                Err(EnvelopeError::InvalidId(MessageKind::BoundedWait, "not carry"))
            }
            (MessageKind::FireAndForget, None) => {
                Err(EnvelopeError::InvalidId(MessageKind::FireAndForget, "carry"))
            }
            (message_type, id) => Ok(Self {
                message_type,
                data: raw.data,
                id,
            }),
        }
    }
}

impl BackendMessage {
    /// Build a bounded-wait message. Replies are matched by transport-level tags.
    pub fn bounded(data: impl Into<String>) -> Self {
        Self {
            message_type: MessageKind::BoundedWait,
            data: data.into(),
            id: None,
        }
    }

    /// Build a fire-and-forget message whose result will be cached under `id`.
    pub fn deferred(data: impl Into<String>, id: Uuid) -> Self {
        Self {
            message_type: MessageKind::FireAndForget,
            data: data.into(),
            id: Some(id),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.message_type
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    /// Serialize to the canonical JSON body published on the queue.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Reply object shape; any field other than `data` is ignored.
#[derive(Deserialize)]
struct BackendReply {
    #[serde(default)]
    data: serde_json::Value,
}

/// Extract the raw output string from a backend reply body.
///
/// Accepted shapes: bare text (`1`), a JSON string (`"1"`), a JSON number, or a
/// JSON object with a `data` field holding a string or number. Any other shape
/// is returned as trimmed text so the output preprocessor can classify it.
/// Only a body that is not UTF-8 is rejected.
pub fn parse_backend_output(body: &[u8]) -> Result<String, EnvelopeError> {
    let text = std::str::from_utf8(body).map_err(|_| EnvelopeError::InvalidUtf8)?;
    let trimmed = text.trim();

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(serde_json::Value::Number(n)) => Ok(n.to_string()),
        Ok(value @ serde_json::Value::Object(_)) => {
            let data = serde_json::from_value::<BackendReply>(value)
                .ok()
                .and_then(|reply| scalar_to_string(reply.data));
            Ok(data.unwrap_or_else(|| trimmed.to_string()))
        }
        // Anything else is plain text written by the worker as-is.
        _ => Ok(trimmed.to_string()),
    }
}

fn scalar_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
