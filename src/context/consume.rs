use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{headers, Headers, PipeContext, ReceiveContext, SendContext};
use crate::bus::Bus;
use crate::error::BusError;
use crate::message::Message;
use crate::transport::Address;

/// Typed view of an inbound message handed to consumers.
///
/// Wraps the shared [`ReceiveContext`] and a handle to the bus that received
/// it. Messages published, sent or responded from here carry the inbound
/// message's conversation so a chain of messages can be followed.
pub struct ConsumeContext<M> {
    message: Arc<M>,
    receive: Arc<ReceiveContext>,
    bus: Bus,
    cancellation: CancellationToken,
    retry_attempt: u32,
}

impl<M> Clone for ConsumeContext<M> {
    fn clone(&self) -> Self {
        Self {
            message: Arc::clone(&self.message),
            receive: Arc::clone(&self.receive),
            bus: self.bus.clone(),
            cancellation: self.cancellation.clone(),
            retry_attempt: self.retry_attempt,
        }
    }
}

impl<M: Message> ConsumeContext<M> {
    pub(crate) fn new(message: Arc<M>, receive: Arc<ReceiveContext>, bus: Bus) -> Self {
        let cancellation = receive.cancellation().child_token();
        Self {
            message,
            receive,
            bus,
            cancellation,
            retry_attempt: 0,
        }
    }

    /// The typed message.
    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn receive_context(&self) -> &ReceiveContext {
        &self.receive
    }

    pub fn headers(&self) -> &Headers {
        self.receive.headers()
    }

    pub fn message_id(&self) -> Option<Uuid> {
        self.receive.message_id()
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.receive.correlation_id()
    }

    /// The bus this message was received on.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Publish a message in the inbound message's conversation.
    pub async fn publish<T: Message>(&self, message: &T) -> Result<(), BusError> {
        self.publish_with(message, |_| {}).await
    }

    /// Publish with a callback that adjusts the outbound context.
    pub async fn publish_with<T, F>(&self, message: &T, configure: F) -> Result<(), BusError>
    where
        T: Message,
        F: FnOnce(&mut SendContext) + Send,
    {
        self.bus
            .publish_with(message, |context| {
                self.propagate(context);
                configure(context);
            })
            .await
    }

    /// Send a message to an explicit address in the inbound message's conversation.
    pub async fn send<T: Message>(&self, address: &Address, message: &T) -> Result<(), BusError> {
        self.bus
            .send_with(address, message, |context| self.propagate(context))
            .await
    }

    /// Send the inbound message, unchanged, to another address.
    ///
    /// Identity, addresses and application headers are preserved; host
    /// metadata and error annotations are not. `sb-forwarder-address`
    /// records the queue the message was forwarded from.
    pub async fn forward(&self, address: &Address) -> Result<(), BusError> {
        let receive = &self.receive;
        let mut context = SendContext::from_value(
            receive.payload().clone(),
            receive.message_types().to_vec(),
        );
        if let Some(id) = receive.message_id() {
            context.set_message_id(id);
        }
        if let Some(id) = receive.correlation_id() {
            context.set_correlation_id(id);
        }
        if let Some(id) = receive.conversation_id() {
            context.set_conversation_id(id);
        }
        if let Some(response) = receive.response_address() {
            context.set_response_address(response.clone());
        }
        if let Some(fault) = receive.decoded_fault_address() {
            context.set_fault_address(fault.clone());
        }
        if let Some(source) = receive.source_address() {
            context.set_source_address(source.clone());
        }
        context.headers_mut().extend(receive.headers());
        let outbound = context.headers_mut();
        outbound.strip_prefix(headers::HOST_PREFIX);
        for annotation in [
            headers::CONTENT_TYPE,
            headers::EXCEPTION_TYPE,
            headers::EXCEPTION_MESSAGE,
            headers::EXCEPTION_STACKTRACE,
            headers::REASON,
        ] {
            outbound.remove(annotation);
        }
        context
            .headers_mut()
            .set(headers::FORWARDER_ADDRESS, receive.input_address().to_string());
        context.set_cancellation(self.cancellation.clone());
        context.set_destination_address(address.clone());

        self.bus.send_context(context).await
    }

    /// Reply to the message's response address.
    ///
    /// Fails with [`BusError::NoResponseAddress`] when the sender did not ask
    /// for a response.
    pub async fn respond<T: Message>(&self, message: &T) -> Result<(), BusError> {
        let address = self.receive.response_address().cloned().ok_or_else(|| {
            BusError::NoResponseAddress(
                self.receive
                    .message_id()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| M::message_urn()),
            )
        })?;

        self.bus
            .send_with(&address, message, |context| {
                self.propagate(context);
                if let Some(id) = self.receive.correlation_id().or(self.receive.message_id()) {
                    context.set_correlation_id(id);
                }
                if let Some(request_id) = self.receive.headers().get(headers::REQUEST_ID) {
                    context.headers_mut().set(headers::REQUEST_ID, request_id);
                }
            })
            .await
    }

    fn propagate(&self, context: &mut SendContext) {
        if let Some(id) = self
            .receive
            .conversation_id()
            .or(self.receive.message_id())
        {
            context.set_conversation_id(id);
        }
        if let Some(id) = self.receive.correlation_id() {
            context.set_correlation_id(id);
        }
        context.set_source_address(self.receive.input_address().clone());
        context.set_cancellation(self.cancellation.clone());
    }
}

impl<M: Send + Sync> PipeContext for ConsumeContext<M> {
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
