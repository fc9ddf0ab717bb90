//! Raw JSON codec: the body is the bare payload.
//!
//! Metadata the envelope would carry travels as `sb-*` transport headers,
//! so a raw message produced by this runtime still routes by type. Raw
//! frames from foreign producers without `sb-message-type` decode with an
//! empty type list.

use serde_json::Value;

use super::{
    lenient_address, lenient_uuid, DecodedMessage, MessageDeserializer, MessageSerializer,
    SerializationError, RAW_JSON_CONTENT_TYPE,
};
use crate::context::{headers, SendContext};
use crate::transport::TransportMessage;

/// Separator between URNs in the `sb-message-type` header.
const TYPE_SEPARATOR: char = ';';

/// Raw JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawJsonSerializer;

impl MessageSerializer for RawJsonSerializer {
    fn content_type(&self) -> &'static str {
        RAW_JSON_CONTENT_TYPE
    }

    fn serialize(&self, context: &SendContext) -> Result<TransportMessage, SerializationError> {
        let body = serde_json::to_vec(context.message())?;

        let mut frame_headers = context.headers().clone();
        frame_headers.set(headers::CONTENT_TYPE, RAW_JSON_CONTENT_TYPE);
        frame_headers.set(headers::MESSAGE_ID, context.message_id().to_string());
        frame_headers.set(
            headers::MESSAGE_TYPE,
            context.message_types().join(&TYPE_SEPARATOR.to_string()),
        );
        if let Some(id) = context.correlation_id() {
            frame_headers.set(headers::CORRELATION_ID, id.to_string());
        }
        if let Some(id) = context.conversation_id() {
            frame_headers.set(headers::CONVERSATION_ID, id.to_string());
        }
        if let Some(address) = context.response_address() {
            frame_headers.set(headers::RESPONSE_ADDRESS, address.to_string());
        }
        if let Some(address) = context.fault_address() {
            frame_headers.set(headers::FAULT_ADDRESS, address.to_string());
        }
        Ok(TransportMessage::new(body, frame_headers))
    }
}

impl MessageDeserializer for RawJsonSerializer {
    fn accepts(&self, content_type: &str) -> bool {
        content_type.eq_ignore_ascii_case(RAW_JSON_CONTENT_TYPE)
    }

    fn deserialize(&self, frame: &TransportMessage) -> Result<DecodedMessage, SerializationError> {
        let payload: Value = serde_json::from_slice(&frame.body)?;
        let h = &frame.headers;

        let message_types = h
            .get(headers::MESSAGE_TYPE)
            .map(|types| {
                types
                    .split(TYPE_SEPARATOR)
                    .map(str::trim)
                    .filter(|urn| !urn.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(DecodedMessage {
            message_id: lenient_uuid(h.get(headers::MESSAGE_ID)),
            correlation_id: lenient_uuid(h.get(headers::CORRELATION_ID)),
            conversation_id: lenient_uuid(h.get(headers::CONVERSATION_ID)),
            source_address: None,
            destination_address: None,
            response_address: lenient_address(h.get(headers::RESPONSE_ADDRESS)),
            fault_address: lenient_address(h.get(headers::FAULT_ADDRESS)),
            message_types,
            payload,
            headers: h.clone(),
            sent_time: None,
            host: None,
            content_type: RAW_JSON_CONTENT_TYPE.to_string(),
        })
    }
}
