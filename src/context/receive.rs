use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Headers, HostInfo, PipeContext};
use crate::message::Message;
use crate::serialization::{DecodedMessage, SerializationError};
use crate::transport::{Address, ReceiveEndpointDefinition, TransportMessage};

type CachedMessage = Arc<dyn Any + Send + Sync>;

/// Read-only view over one decoded inbound frame.
///
/// Built once per frame by the transport's delivery routine and shared
/// (behind an `Arc`) by every pipe the frame is dispatched to. Typed payload
/// extraction is lazy and cached per requested type.
pub struct ReceiveContext {
    frame: TransportMessage,
    decoded: DecodedMessage,
    input_address: Address,
    endpoint_fault_address: Option<Address>,
    error_address: Option<Address>,
    skipped_address: Option<Address>,
    redelivery_count: u32,
    cache: Mutex<HashMap<TypeId, CachedMessage>>,
    cancellation: CancellationToken,
}

impl ReceiveContext {
    /// Wrap a decoded frame received on `endpoint`.
    pub fn new(
        frame: TransportMessage,
        decoded: DecodedMessage,
        input_address: Address,
        endpoint: &ReceiveEndpointDefinition,
        cancellation: CancellationToken,
    ) -> Self {
        let redelivery_count = decoded.headers.redelivery_count();
        Self {
            frame,
            decoded,
            input_address,
            endpoint_fault_address: endpoint.fault_address(),
            error_address: endpoint.error_address(),
            skipped_address: endpoint.skipped_address(),
            redelivery_count,
            cache: Mutex::new(HashMap::new()),
            cancellation,
        }
    }

    /// Decode the payload as `T`, caching the result for later calls.
    pub fn try_get_message<T: Message>(&self) -> Result<Arc<T>, SerializationError> {
        let key = TypeId::of::<T>();
        if let Some(cached) = self.cache.lock().get(&key).cloned() {
            if let Ok(message) = cached.downcast::<T>() {
                return Ok(message);
            }
        }

        let message: Arc<T> = Arc::new(
            serde_json::from_value(self.decoded.payload.clone()).map_err(|e| {
                SerializationError::PayloadMismatch {
                    type_name: std::any::type_name::<T>(),
                    reason: e.to_string(),
                }
            })?,
        );
        self.cache
            .lock()
            .entry(key)
            .or_insert_with(|| message.clone() as CachedMessage);
        Ok(message)
    }

    /// Whether the frame declares `urn` among its types.
    pub fn has_message_type(&self, urn: &str) -> bool {
        self.decoded.message_types.iter().any(|t| t == urn)
    }

    pub fn message_id(&self) -> Option<Uuid> {
        self.decoded.message_id
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.decoded.correlation_id
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        self.decoded.conversation_id
    }

    /// Type URNs, most-derived first. May be empty.
    pub fn message_types(&self) -> &[String] {
        &self.decoded.message_types
    }

    /// Untyped payload.
    pub fn payload(&self) -> &Value {
        &self.decoded.payload
    }

    /// Envelope headers overlaid with transport headers.
    pub fn headers(&self) -> &Headers {
        &self.decoded.headers
    }

    pub fn sent_time(&self) -> Option<DateTime<Utc>> {
        self.decoded.sent_time
    }

    pub fn host(&self) -> Option<&HostInfo> {
        self.decoded.host.as_ref()
    }

    pub fn content_type(&self) -> &str {
        &self.decoded.content_type
    }

    pub fn source_address(&self) -> Option<&Address> {
        self.decoded.source_address.as_ref()
    }

    pub fn destination_address(&self) -> Option<&Address> {
        self.decoded.destination_address.as_ref()
    }

    pub fn response_address(&self) -> Option<&Address> {
        self.decoded.response_address.as_ref()
    }

    /// Where a fault record for this message goes: the address the sender
    /// asked for, otherwise the endpoint's fault queue.
    pub fn fault_address(&self) -> Option<&Address> {
        self.decoded
            .fault_address
            .as_ref()
            .or(self.endpoint_fault_address.as_ref())
    }

    /// Fault address declared by the sender, without the endpoint fallback.
    pub fn decoded_fault_address(&self) -> Option<&Address> {
        self.decoded.fault_address.as_ref()
    }

    pub fn error_address(&self) -> Option<&Address> {
        self.error_address.as_ref()
    }

    pub fn skipped_address(&self) -> Option<&Address> {
        self.skipped_address.as_ref()
    }

    /// Queue the frame arrived on.
    pub fn input_address(&self) -> &Address {
        &self.input_address
    }

    /// Redelivery count from headers; malformed values read as zero.
    pub fn redelivery_count(&self) -> u32 {
        self.redelivery_count
    }

    /// The frame exactly as the transport delivered it.
    pub fn transport_message(&self) -> &TransportMessage {
        &self.frame
    }
}

impl PipeContext for ReceiveContext {
    fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

impl std::fmt::Debug for ReceiveContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveContext")
            .field("message_id", &self.decoded.message_id)
            .field("message_types", &self.decoded.message_types)
            .field("input_address", &self.input_address)
            .field("redelivery_count", &self.redelivery_count)
            .finish()
    }
}
