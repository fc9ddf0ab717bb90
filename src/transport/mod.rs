//! Transport abstraction.
//!
//! Concrete brokers plug in by implementing [`Transport`]:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ Transport                                                      │
//! │   send_transport(address)            → SendTransport (cached)  │
//! │   create_receive_transport(endpoint, handler) → ReceiveTransport│
//! └────────────────────────────────────────────────────────────────┘
//!          │                                        │
//!          ▼                                        ▼
//!   SendTransport.dispatch(frame)        ReceiveTransport.start()/stop()
//!                                                   │ per frame
//!                                                   ▼
//!                                      deliver() → ReceiveHandler.handle()
//! ```
//!
//! Every non-auto-delete endpoint gets three sibling queues: `{queue}_error`
//! (original message after terminal failure), `{queue}_fault` (fault records)
//! and `{queue}_skipped` (messages with no resolvable type).

mod address;
mod cache;
mod in_memory;

pub use address::{Address, AddressKind};
pub use cache::SendTransportCache;
pub use in_memory::InMemoryTransport;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::context::{headers, Headers, PipeContext, ReceiveContext, SendContext};
use crate::error::BusError;
use crate::serialization::{decode, SerializerKind};

/// Default number of frames an endpoint handles concurrently.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 16;

/// Error type for transport operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("unsupported address: {0}")]
    UnsupportedAddress(String),
    #[error("queue not found: {0}")]
    QueueNotFound(String),
    #[error("transport closed")]
    Closed,
    #[error("transport error: {0}")]
    Other(String),
}

/// Bytes plus headers: the unit a transport moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub body: Vec<u8>,
    pub headers: Headers,
}

impl TransportMessage {
    pub fn new(body: Vec<u8>, headers: Headers) -> Self {
        Self { body, headers }
    }
}

/// A broker connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Sender for `address`, reused across calls.
    async fn send_transport(&self, address: &Address) -> Result<Arc<dyn SendTransport>, TransportError>;

    /// Receiver for `endpoint` delivering frames to `handler`. Not started.
    async fn create_receive_transport(
        &self,
        endpoint: ReceiveEndpointDefinition,
        handler: Arc<dyn ReceiveHandler>,
    ) -> Result<Arc<dyn ReceiveTransport>, TransportError>;
}

/// Places frames on one address.
#[async_trait]
pub trait SendTransport: Send + Sync {
    fn address(&self) -> &Address;

    /// Place an encoded frame on the wire.
    async fn dispatch(&self, frame: TransportMessage) -> Result<(), TransportError>;

    /// Serialize with the context's codec, then dispatch.
    async fn send(&self, context: &SendContext) -> Result<(), BusError> {
        if context.cancellation().is_cancelled() {
            return Err(BusError::Cancelled);
        }
        let frame = context.serialize()?;
        self.dispatch(frame).await?;
        Ok(())
    }
}

/// A controllable receive loop on one endpoint.
///
/// `start` and `stop` are idempotent; starting twice never registers the
/// handler twice.
#[async_trait]
pub trait ReceiveTransport: Send + Sync {
    fn input_address(&self) -> &Address;

    async fn start(&self) -> Result<(), TransportError>;

    async fn stop(&self) -> Result<(), TransportError>;

    fn is_running(&self) -> bool;
}

/// Consumes frames delivered by a receive transport.
#[async_trait]
pub trait ReceiveHandler: Send + Sync {
    /// Whether a frame whose first type is `urn` can be handled at all.
    fn is_registered(&self, urn: &str) -> bool;

    async fn handle(&self, context: ReceiveContext) -> Result<(), BusError>;
}

/// Queue, bindings and entity flags of one receive endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveEndpointDefinition {
    queue: String,
    bindings: Vec<String>,
    concurrency_limit: usize,
    durable: bool,
    auto_delete: bool,
}

impl ReceiveEndpointDefinition {
    /// Durable endpoint on `queue`.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            bindings: Vec::new(),
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            durable: true,
            auto_delete: false,
        }
    }

    /// Non-durable, auto-deleting endpoint.
    pub fn temporary(queue: impl Into<String>) -> Self {
        Self {
            durable: false,
            auto_delete: true,
            ..Self::new(queue)
        }
    }

    /// Bind an exchange so messages published to it reach this queue.
    pub fn with_binding(mut self, entity: impl Into<String>) -> Self {
        self.add_binding(entity);
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.set_concurrency_limit(limit);
        self
    }

    pub fn add_binding(&mut self, entity: impl Into<String>) {
        let entity = entity.into();
        if !self.bindings.contains(&entity) {
            self.bindings.push(entity);
        }
    }

    /// Limit is clamped to at least one.
    pub fn set_concurrency_limit(&mut self, limit: usize) {
        self.concurrency_limit = limit.max(1);
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn bindings(&self) -> &[String] {
        &self.bindings
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn durable(&self) -> bool {
        self.durable
    }

    pub fn auto_delete(&self) -> bool {
        self.auto_delete
    }

    /// Address of the endpoint's own queue.
    pub fn input_address(&self) -> Result<Address, TransportError> {
        if self.durable && !self.auto_delete {
            Address::queue(&self.queue)
        } else {
            Address::parse(&format!(
                "queue:{}?durable={}&autodelete={}",
                self.queue, self.durable, self.auto_delete
            ))
        }
    }

    /// Whether error, fault and skipped queues are provisioned.
    pub fn provisions_dead_letters(&self) -> bool {
        !self.auto_delete
    }

    pub fn error_queue(&self) -> String {
        format!("{}_error", self.queue)
    }

    pub fn fault_queue(&self) -> String {
        format!("{}_fault", self.queue)
    }

    pub fn skipped_queue(&self) -> String {
        format!("{}_skipped", self.queue)
    }

    pub fn error_address(&self) -> Option<Address> {
        self.dead_letter(self.error_queue())
    }

    pub fn fault_address(&self) -> Option<Address> {
        self.dead_letter(self.fault_queue())
    }

    pub fn skipped_address(&self) -> Option<Address> {
        self.dead_letter(self.skipped_queue())
    }

    fn dead_letter(&self, queue: String) -> Option<Address> {
        if self.provisions_dead_letters() {
            Address::queue(&queue).ok()
        } else {
            None
        }
    }
}

/// What happened to one delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The handler completed.
    Consumed,
    /// No consumer could take the frame; it went to the skipped path.
    Skipped,
    /// The handler failed. Error and fault routing already ran.
    Faulted,
}

/// Deliver one frame received on `endpoint` to `handler`.
///
/// Shared by every transport: decodes the frame, routes frames that cannot
/// be decoded or whose first type is not registered to the skipped queue,
/// then invokes the handler. Never returns an error; the outcome is for the
/// transport's acknowledgment decision.
pub async fn deliver(
    frame: TransportMessage,
    endpoint: &ReceiveEndpointDefinition,
    input_address: &Address,
    handler: &dyn ReceiveHandler,
    transport: &dyn Transport,
    default_codec: Option<SerializerKind>,
    cancellation: CancellationToken,
) -> Delivery {
    let decoded = match decode(&frame, default_codec) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(queue = endpoint.queue(), error = %err, "undecodable frame");
            skip(frame, endpoint, transport).await;
            return Delivery::Skipped;
        }
    };

    let registered = decoded
        .message_types
        .first()
        .is_some_and(|urn| handler.is_registered(urn));
    if !registered {
        warn!(
            queue = endpoint.queue(),
            urn = decoded.message_types.first().map(String::as_str).unwrap_or("<none>"),
            message_id = ?decoded.message_id,
            "unknown message type"
        );
        skip(frame, endpoint, transport).await;
        return Delivery::Skipped;
    }

    let message_id = decoded.message_id;
    trace!(queue = endpoint.queue(), message_id = ?message_id, "received");
    let context = ReceiveContext::new(
        frame.clone(),
        decoded,
        input_address.clone(),
        endpoint,
        cancellation,
    );

    match handler.handle(context).await {
        Ok(()) => {
            debug!(queue = endpoint.queue(), message_id = ?message_id, "consumed");
            Delivery::Consumed
        }
        Err(err) if err.is_unknown_message_type() => {
            warn!(queue = endpoint.queue(), message_id = ?message_id, error = %err, "unknown message type");
            skip(frame, endpoint, transport).await;
            Delivery::Skipped
        }
        Err(err) => {
            debug!(queue = endpoint.queue(), message_id = ?message_id, error = %err, "faulted");
            Delivery::Faulted
        }
    }
}

async fn skip(mut frame: TransportMessage, endpoint: &ReceiveEndpointDefinition, transport: &dyn Transport) {
    let Some(address) = endpoint.skipped_address() else {
        debug!(queue = endpoint.queue(), "no skipped queue; dropping frame");
        return;
    };
    frame.headers.set(headers::REASON, headers::REASON_SKIPPED);

    let result = match transport.send_transport(&address).await {
        Ok(sender) => sender.dispatch(frame).await,
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        warn!(address = %address, error = %err, "failed to move frame to skipped queue");
    }
}
