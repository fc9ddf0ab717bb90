//! Envelope codec: payload plus full metadata in one JSON document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{
    lenient_address, DecodedMessage, MessageDeserializer, MessageSerializer, SerializationError,
    ENVELOPE_CONTENT_TYPE, LEGACY_ENVELOPE_CONTENT_TYPE,
};
use crate::context::{headers, Headers, HostInfo, SendContext};
use crate::transport::TransportMessage;

/// Wire shape of an enveloped message. Keys are camelCase; absent optional
/// fields are omitted.
///
/// ```json
/// {
///   "messageId": "…",
///   "correlationId": "…",
///   "conversationId": "…",
///   "sourceAddress": "queue:orders",
///   "destinationAddress": "exchange:Orders.Contracts:SubmitOrder",
///   "responseAddress": "queue:reply",
///   "faultAddress": "queue:reply",
///   "messageType": ["urn:message:Orders.Contracts:SubmitOrder"],
///   "message": { "orderId": "…" },
///   "sentTime": "2024-01-01T00:00:00Z",
///   "headers": { "tenant": "acme" },
///   "host": { "machineName": "…", … },
///   "contentType": "application/vnd.sourced.bus-envelope+json"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_address: Option<String>,
    #[serde(default)]
    pub message_type: Vec<String>,
    #[serde(default)]
    pub message: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl MessageEnvelope {
    /// Build the envelope for an outbound context.
    ///
    /// Host-prefixed headers are stripped so origin metadata picked up from
    /// an inbound message does not leak downstream.
    pub fn from_context(context: &SendContext) -> Self {
        let mut envelope_headers = context.headers().clone();
        envelope_headers.strip_prefix(headers::HOST_PREFIX);
        envelope_headers.remove(headers::CONTENT_TYPE);

        Self {
            message_id: Some(context.message_id()),
            correlation_id: context.correlation_id(),
            conversation_id: context.conversation_id(),
            source_address: context.source_address().map(|a| a.to_string()),
            destination_address: context.destination_address().map(|a| a.to_string()),
            response_address: context.response_address().map(|a| a.to_string()),
            fault_address: context.fault_address().map(|a| a.to_string()),
            message_type: context.message_types().to_vec(),
            message: context.message().clone(),
            sent_time: Some(context.sent_time()),
            headers: envelope_headers,
            host: context.host().cloned(),
            content_type: Some(ENVELOPE_CONTENT_TYPE.to_string()),
        }
    }
}

/// Envelope codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeSerializer;

impl MessageSerializer for EnvelopeSerializer {
    fn content_type(&self) -> &'static str {
        ENVELOPE_CONTENT_TYPE
    }

    fn serialize(&self, context: &SendContext) -> Result<TransportMessage, SerializationError> {
        let envelope = MessageEnvelope::from_context(context);
        let body = serde_json::to_vec(&envelope)?;

        // Host metadata travels in the envelope's `host` field only
        let mut frame_headers = context.headers().clone();
        frame_headers.strip_prefix(headers::HOST_PREFIX);
        frame_headers.set(headers::CONTENT_TYPE, ENVELOPE_CONTENT_TYPE);
        frame_headers.set(headers::MESSAGE_ID, context.message_id().to_string());
        Ok(TransportMessage::new(body, frame_headers))
    }
}

impl MessageDeserializer for EnvelopeSerializer {
    fn accepts(&self, content_type: &str) -> bool {
        content_type.eq_ignore_ascii_case(ENVELOPE_CONTENT_TYPE)
            || content_type.eq_ignore_ascii_case(LEGACY_ENVELOPE_CONTENT_TYPE)
    }

    fn deserialize(&self, frame: &TransportMessage) -> Result<DecodedMessage, SerializationError> {
        let envelope: MessageEnvelope = serde_json::from_slice(&frame.body)?;

        // Transport headers (error annotations, redelivery) overlay envelope headers
        let mut merged = envelope.headers;
        merged.extend(&frame.headers);

        Ok(DecodedMessage {
            message_id: envelope.message_id,
            correlation_id: envelope.correlation_id,
            conversation_id: envelope.conversation_id,
            source_address: lenient_address(envelope.source_address.as_deref()),
            destination_address: lenient_address(envelope.destination_address.as_deref()),
            response_address: lenient_address(envelope.response_address.as_deref()),
            fault_address: lenient_address(envelope.fault_address.as_deref()),
            message_types: envelope.message_type,
            payload: envelope.message,
            headers: merged,
            sent_time: envelope.sent_time,
            host: envelope.host,
            content_type: envelope
                .content_type
                .unwrap_or_else(|| ENVELOPE_CONTENT_TYPE.to_string()),
        })
    }
}
