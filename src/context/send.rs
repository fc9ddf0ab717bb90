use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Headers, HostInfo, PipeContext};
use crate::message::Message;
use crate::serialization::{SerializationError, SerializerKind};
use crate::transport::{Address, TransportMessage};

/// Whether an outbound message is sent to an explicit address or published
/// by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    Send,
    Publish,
}

/// Mutable state for one outbound send or publish.
///
/// Created per call, passed through the outbound filter chain, serialized by
/// the send transport and then discarded. The payload is held as JSON so
/// filters and transports need no knowledge of the message type.
#[derive(Debug, Clone)]
pub struct SendContext {
    message: Value,
    message_types: Vec<String>,
    message_id: Uuid,
    correlation_id: Option<Uuid>,
    conversation_id: Option<Uuid>,
    routing_key: Option<String>,
    headers: Headers,
    source_address: Option<Address>,
    destination_address: Option<Address>,
    response_address: Option<Address>,
    fault_address: Option<Address>,
    sent_time: DateTime<Utc>,
    host: Option<HostInfo>,
    serializer: SerializerKind,
    kind: SendKind,
    cancellation: CancellationToken,
    retry_attempt: u32,
}

/// A publish is a send whose destination comes from the message type.
pub type PublishContext = SendContext;

impl SendContext {
    /// Context for a typed message. A fresh message id is assigned.
    pub fn new<M: Message>(message: &M) -> Result<Self, SerializationError> {
        Ok(Self::from_value(
            serde_json::to_value(message)?,
            M::message_types(),
        ))
    }

    /// Context for an already-encoded payload with explicit type URNs.
    pub fn from_value(message: Value, message_types: Vec<String>) -> Self {
        Self {
            message,
            message_types,
            message_id: Uuid::new_v4(),
            correlation_id: None,
            conversation_id: None,
            routing_key: None,
            headers: Headers::new(),
            source_address: None,
            destination_address: None,
            response_address: None,
            fault_address: None,
            sent_time: Utc::now(),
            host: None,
            serializer: SerializerKind::default(),
            kind: SendKind::Send,
            cancellation: CancellationToken::new(),
            retry_attempt: 0,
        }
    }

    /// Encode this context into a transport frame with its codec.
    pub fn serialize(&self) -> Result<TransportMessage, SerializationError> {
        self.serializer.serializer().serialize(self)
    }

    // ========================================================================
    // Payload
    // ========================================================================

    pub fn message(&self) -> &Value {
        &self.message
    }

    /// Type URNs, most-derived first.
    pub fn message_types(&self) -> &[String] {
        &self.message_types
    }

    // ========================================================================
    // Identity
    // ========================================================================

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn set_message_id(&mut self, id: Uuid) {
        self.message_id = id;
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    pub fn set_correlation_id(&mut self, id: Uuid) {
        self.correlation_id = Some(id);
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        self.conversation_id
    }

    pub fn set_conversation_id(&mut self, id: Uuid) {
        self.conversation_id = Some(id);
    }

    /// Broker routing key, for transports that route by key.
    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }

    pub fn set_routing_key(&mut self, key: impl Into<String>) {
        self.routing_key = Some(key.into());
    }

    // ========================================================================
    // Headers
    // ========================================================================

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    // ========================================================================
    // Addresses
    // ========================================================================

    pub fn source_address(&self) -> Option<&Address> {
        self.source_address.as_ref()
    }

    pub fn set_source_address(&mut self, address: Address) {
        self.source_address = Some(address);
    }

    pub fn destination_address(&self) -> Option<&Address> {
        self.destination_address.as_ref()
    }

    pub fn set_destination_address(&mut self, address: Address) {
        self.destination_address = Some(address);
    }

    pub fn response_address(&self) -> Option<&Address> {
        self.response_address.as_ref()
    }

    pub fn set_response_address(&mut self, address: Address) {
        self.response_address = Some(address);
    }

    pub fn fault_address(&self) -> Option<&Address> {
        self.fault_address.as_ref()
    }

    pub fn set_fault_address(&mut self, address: Address) {
        self.fault_address = Some(address);
    }

    // ========================================================================
    // Origin and encoding
    // ========================================================================

    pub fn sent_time(&self) -> DateTime<Utc> {
        self.sent_time
    }

    pub fn host(&self) -> Option<&HostInfo> {
        self.host.as_ref()
    }

    pub fn set_host(&mut self, host: HostInfo) {
        self.host = Some(host);
    }

    pub fn serializer(&self) -> SerializerKind {
        self.serializer
    }

    pub fn set_serializer(&mut self, serializer: SerializerKind) {
        self.serializer = serializer;
    }

    /// Builder form of [`set_serializer`](Self::set_serializer).
    pub fn with_serializer(mut self, serializer: SerializerKind) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn kind(&self) -> SendKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: SendKind) {
        self.kind = kind;
    }

    /// Replace the cancellation signal, typically with a caller's token.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    /// Builder form of [`set_cancellation`](Self::set_cancellation).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

impl PipeContext for SendContext {
    fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    fn set_retry_attempt(&mut self, attempt: u32) {
        self.retry_attempt = attempt;
    }
}
