//! Message serialization: envelope and raw codecs.
//!
//! Two interchangeable strategies turn a [`SendContext`] into a
//! [`TransportMessage`] and back, selected by the `content_type` header:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────────┐
//! │ Envelope (default)   │ application/vnd.sourced.bus-envelope+json    │
//! │                      │ application/vnd.sourced.bus+json (legacy)    │
//! │                      │ payload + full metadata in a JSON envelope   │
//! ├──────────────────────┼──────────────────────────────────────────────┤
//! │ Raw JSON             │ application/json                             │
//! │                      │ body is the payload; metadata in sb-* headers│
//! └──────────────────────┴──────────────────────────────────────────────┘
//! ```

mod batch;
mod envelope;
mod raw;

pub use batch::Batch;
pub use envelope::{EnvelopeSerializer, MessageEnvelope};
pub use raw::RawJsonSerializer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::context::{headers, Headers, HostInfo, SendContext};
use crate::transport::{Address, TransportMessage};

/// Content type of the envelope codec.
pub const ENVELOPE_CONTENT_TYPE: &str = "application/vnd.sourced.bus-envelope+json";
/// Legacy-compatible alias accepted by the envelope codec.
pub const LEGACY_ENVELOPE_CONTENT_TYPE: &str = "application/vnd.sourced.bus+json";
/// Content type of the raw JSON codec.
pub const RAW_JSON_CONTENT_TYPE: &str = "application/json";

/// Error type for encoding and decoding messages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SerializationError {
    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame carries no `content_type` header and no default applies.
    #[error("frame has no content type")]
    MissingContentType,
    /// No codec handles the frame's content type.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    /// A loosely-typed initializer could not be mapped onto the message.
    #[error("message initializer failed: {0}")]
    Initializer(String),
    /// The payload does not decode as the requested type.
    #[error("payload is not a {type_name}: {reason}")]
    PayloadMismatch {
        type_name: &'static str,
        reason: String,
    },
}

/// Codec selection for outbound messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializerKind {
    /// Payload wrapped in a metadata envelope.
    #[default]
    Envelope,
    /// Payload only; metadata travels in transport headers.
    RawJson,
}

impl SerializerKind {
    /// The serializer implementing this codec.
    pub fn serializer(self) -> &'static dyn MessageSerializer {
        match self {
            SerializerKind::Envelope => &EnvelopeSerializer,
            SerializerKind::RawJson => &RawJsonSerializer,
        }
    }

    /// Content type written by this codec.
    pub fn content_type(self) -> &'static str {
        self.serializer().content_type()
    }
}

/// Encodes an outbound send context into a transport frame.
pub trait MessageSerializer: Send + Sync {
    /// Content type stamped into the frame's headers.
    fn content_type(&self) -> &'static str;

    /// Encode the context's message and metadata.
    fn serialize(&self, context: &SendContext) -> Result<TransportMessage, SerializationError>;
}

/// Decodes an inbound transport frame.
pub trait MessageDeserializer: Send + Sync {
    /// Whether this codec handles `content_type`.
    fn accepts(&self, content_type: &str) -> bool;

    /// Decode the frame into metadata plus an untyped payload.
    fn deserialize(&self, frame: &TransportMessage) -> Result<DecodedMessage, SerializationError>;
}

/// Pick the deserializer for a frame.
///
/// Uses the frame's `content_type` header, falling back to `default` when the
/// header is absent. Real transports pass `None` so a missing content type is
/// an error; the in-memory transport defaults to the envelope codec.
pub fn deserializer_for(
    frame: &TransportMessage,
    default: Option<SerializerKind>,
) -> Result<&'static dyn MessageDeserializer, SerializationError> {
    let content_type = match frame.headers.get(headers::CONTENT_TYPE) {
        Some(content_type) => content_type,
        None => {
            return default
                .map(|kind| -> &'static dyn MessageDeserializer {
                    match kind {
                        SerializerKind::Envelope => &EnvelopeSerializer,
                        SerializerKind::RawJson => &RawJsonSerializer,
                    }
                })
                .ok_or(SerializationError::MissingContentType)
        }
    };

    // Parameters such as `; charset=utf-8` do not affect codec selection
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if EnvelopeSerializer.accepts(&essence) {
        Ok(&EnvelopeSerializer)
    } else if RawJsonSerializer.accepts(&essence) {
        Ok(&RawJsonSerializer)
    } else {
        Err(SerializationError::UnsupportedContentType(
            content_type.to_string(),
        ))
    }
}

/// Decode a frame with the codec its content type selects.
pub fn decode(
    frame: &TransportMessage,
    default: Option<SerializerKind>,
) -> Result<DecodedMessage, SerializationError> {
    deserializer_for(frame, default)?.deserialize(frame)
}

/// A decoded inbound frame: metadata plus the untyped payload.
///
/// `message_types` may be empty when the producer did not declare a type;
/// such frames are routed to the skipped path.
#[derive(Debug, Clone, Default)]
pub struct DecodedMessage {
    pub message_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
    pub source_address: Option<Address>,
    pub destination_address: Option<Address>,
    pub response_address: Option<Address>,
    pub fault_address: Option<Address>,
    pub message_types: Vec<String>,
    pub payload: Value,
    pub headers: Headers,
    pub sent_time: Option<DateTime<Utc>>,
    pub host: Option<HostInfo>,
    pub content_type: String,
}

/// Parse an optional address, dropping values that are not valid addresses.
fn lenient_address(text: Option<&str>) -> Option<Address> {
    text.and_then(|t| Address::parse(t).ok())
}

/// Parse an optional UUID, dropping malformed values.
fn lenient_uuid(text: Option<&str>) -> Option<Uuid> {
    text.and_then(|t| Uuid::parse_str(t.trim()).ok())
}
