//! Request/response over any transport.
//!
//! Each request opens its own temporary reply queue, sends the request with
//! response and fault addresses pointing at it, and waits for the first
//! matching reply, a fault, cancellation or the timeout. The reply queue is
//! stopped and removed whatever the outcome.
//!
//! ```ignore
//! let client = bus.create_request_client::<CheckOrder>();
//! let response = client.get_response::<OrderStatus>(&CheckOrder { order_id }).await?;
//! println!("{}", response.message().status);
//! ```

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::Bus;
use crate::context::{headers, ReceiveContext, SendContext};
use crate::error::{BusError, RequestError};
use crate::fault::{fault_urn, Fault};
use crate::message::Message;
use crate::serialization::SerializationError;
use crate::transport::{
    Address, ReceiveEndpointDefinition, ReceiveHandler, ReceiveTransport, TransportError,
};

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// A typed reply and the context it arrived with.
#[derive(Debug, Clone)]
pub struct Response<T> {
    message: Arc<T>,
    context: Arc<ReceiveContext>,
}

impl<T> Response<T> {
    pub fn message(&self) -> &T {
        &self.message
    }

    pub fn context(&self) -> &ReceiveContext {
        &self.context
    }

    pub fn headers(&self) -> &headers::Headers {
        self.context.headers()
    }
}

/// Reply to a request that accepts either of two types.
#[derive(Debug, Clone)]
pub enum Response2<T1, T2> {
    First(Response<T1>),
    Second(Response<T2>),
}

/// Sends `TReq` and waits for a correlated reply.
///
/// Created by [`Bus::create_request_client`] (publishes the request) or
/// [`Bus::create_request_client_for`] (sends it to one address).
pub struct RequestClient<TReq> {
    bus: Bus,
    destination: Option<Address>,
    timeout: Duration,
    _request: PhantomData<fn(TReq)>,
}

impl<TReq> Clone for RequestClient<TReq> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            destination: self.destination.clone(),
            timeout: self.timeout,
            _request: PhantomData,
        }
    }
}

impl<TReq: Message> RequestClient<TReq> {
    pub(crate) fn new(bus: Bus, destination: Option<Address>) -> Self {
        let timeout = bus.config().request_timeout;
        Self {
            bus,
            destination,
            timeout,
            _request: PhantomData,
        }
    }

    /// Default timeout for calls that do not set their own.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn get_response<T: Message>(&self, request: &TReq) -> Result<Response<T>, RequestError> {
        self.get_response_with(request, RequestOptions::default()).await
    }

    pub async fn get_response_with<T: Message>(
        &self,
        request: &TReq,
        options: RequestOptions,
    ) -> Result<Response<T>, RequestError> {
        let context = self.exchange(request, vec![T::message_urn()], options).await?;
        typed(context)
    }

    /// Wait for whichever of `T1` or `T2` arrives.
    pub async fn get_response2<T1: Message, T2: Message>(
        &self,
        request: &TReq,
        options: RequestOptions,
    ) -> Result<Response2<T1, T2>, RequestError> {
        let first = T1::message_urn();
        let context = self
            .exchange(request, vec![first.clone(), T2::message_urn()], options)
            .await?;
        if context.has_message_type(&first) {
            Ok(Response2::First(typed(context)?))
        } else {
            Ok(Response2::Second(typed(context)?))
        }
    }

    async fn exchange(
        &self,
        request: &TReq,
        accepted: Vec<String>,
        options: RequestOptions,
    ) -> Result<Arc<ReceiveContext>, RequestError> {
        let timeout = options.timeout.unwrap_or(self.timeout);
        let cancellation = options.cancellation.unwrap_or_default();
        if cancellation.is_cancelled() {
            return Err(RequestError::Cancelled);
        }

        let context = self.bus.create_context(request)?;
        let request_id = context.message_id();

        let host = self.bus.host();
        let queue = self.bus.topology().endpoint_formatter().temporary_queue_name(
            &host.machine_name,
            &host.process_name,
            &Uuid::new_v4().simple().to_string(),
        );
        let endpoint = ReceiveEndpointDefinition::temporary(queue).with_concurrency_limit(1);
        let reply_address = endpoint.input_address().map_err(BusError::from)?;

        let mut listening = accepted.iter().cloned().collect::<HashSet<_>>();
        listening.insert(Fault::<TReq>::message_urn());
        listening.insert(fault_urn());
        let (sender, receiver) = oneshot::channel();
        let handler = Arc::new(ResponseHandler {
            request_id,
            accepted: listening,
            reply: Mutex::new(Some(sender)),
        });

        let reply_endpoint = ReplyEndpoint::new(
            self.bus
                .transport()
                .create_receive_transport(endpoint, handler)
                .await
                .map_err(BusError::from)?,
        );
        reply_endpoint.start().await?;

        let outcome = self
            .send_and_wait(context, reply_address, receiver, timeout, &cancellation)
            .await;
        reply_endpoint.stop().await;

        let reply = outcome?;
        if accepted.iter().any(|urn| reply.has_message_type(urn)) {
            return Ok(reply);
        }
        let fault: Fault<Value> = serde_json::from_value(reply.payload().clone())
            .map_err(|err| BusError::from(SerializationError::from(err)))?;
        Err(RequestError::Faulted(Box::new(fault)))
    }

    async fn send_and_wait(
        &self,
        mut context: SendContext,
        reply_address: Address,
        receiver: oneshot::Receiver<Arc<ReceiveContext>>,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> Result<Arc<ReceiveContext>, RequestError> {
        let request_id = context.message_id();
        context.set_response_address(reply_address.clone());
        context.set_fault_address(reply_address);
        context
            .headers_mut()
            .set(headers::REQUEST_ID, request_id.to_string());
        context.set_cancellation(cancellation.clone());

        let sent = match &self.destination {
            Some(address) => {
                context.set_destination_address(address.clone());
                self.bus.send_context(context).await
            }
            None => {
                let address = self
                    .bus
                    .topology()
                    .publish_address::<TReq>()
                    .map_err(BusError::from)?;
                context.set_destination_address(address);
                self.bus.publish_context(context).await
            }
        };
        match sent {
            Err(BusError::Cancelled) => return Err(RequestError::Cancelled),
            other => other?,
        }
        debug!(request_id = %request_id, urn = %TReq::message_urn(), "request sent");

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(RequestError::Cancelled),
            reply = tokio::time::timeout(timeout, receiver) => match reply {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(_)) => Err(BusError::from(TransportError::Closed).into()),
                Err(_) => Err(RequestError::Timeout(timeout)),
            },
        }
    }
}

/// Owns a request's reply endpoint and stops it exactly once.
///
/// A request future dropped before completion never reaches the explicit
/// `stop`, so dropping the guard stops the endpoint on a spawned task.
struct ReplyEndpoint {
    endpoint: Option<Arc<dyn ReceiveTransport>>,
}

impl ReplyEndpoint {
    fn new(endpoint: Arc<dyn ReceiveTransport>) -> Self {
        Self {
            endpoint: Some(endpoint),
        }
    }

    async fn start(&self) -> Result<(), BusError> {
        match &self.endpoint {
            Some(endpoint) => Ok(endpoint.start().await?),
            None => Ok(()),
        }
    }

    async fn stop(mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            stop_reply_endpoint(endpoint).await;
        }
    }
}

impl Drop for ReplyEndpoint {
    fn drop(&mut self) {
        let Some(endpoint) = self.endpoint.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(address = %endpoint.input_address(), "request abandoned; stopping reply endpoint");
                runtime.spawn(stop_reply_endpoint(endpoint));
            }
            Err(_) => {
                warn!(address = %endpoint.input_address(), "reply endpoint dropped outside a runtime");
            }
        }
    }
}

async fn stop_reply_endpoint(endpoint: Arc<dyn ReceiveTransport>) {
    if let Err(err) = endpoint.stop().await {
        warn!(address = %endpoint.input_address(), error = %err, "failed to stop reply endpoint");
    }
}

fn typed<T: Message>(context: Arc<ReceiveContext>) -> Result<Response<T>, RequestError> {
    let message = context.try_get_message::<T>().map_err(BusError::from)?;
    Ok(Response { message, context })
}

/// Receives on a request's reply queue and completes the pending request
/// with the first correlated reply.
struct ResponseHandler {
    request_id: Uuid,
    accepted: HashSet<String>,
    reply: Mutex<Option<oneshot::Sender<Arc<ReceiveContext>>>>,
}

impl ResponseHandler {
    fn correlates(&self, context: &ReceiveContext) -> bool {
        let request_id = context
            .headers()
            .get_parsed::<Uuid>(headers::REQUEST_ID)
            .or(context.correlation_id());
        request_id == Some(self.request_id)
    }
}

#[async_trait]
impl ReceiveHandler for ResponseHandler {
    /// Replies may list the awaited type anywhere in their type list, so
    /// every frame is offered to `handle`.
    fn is_registered(&self, _urn: &str) -> bool {
        true
    }

    async fn handle(&self, context: ReceiveContext) -> Result<(), BusError> {
        let types = context.message_types();
        if !types.iter().any(|urn| self.accepted.contains(urn)) {
            let first = types.first().cloned().unwrap_or_default();
            return Err(BusError::UnknownMessageType(first));
        }
        if !self.correlates(&context) {
            debug!(request_id = %self.request_id, message_id = ?context.message_id(), "ignoring uncorrelated reply");
            return Ok(());
        }

        if let Some(reply) = self.reply.lock().take() {
            // The requester may already have given up
            let _ = reply.send(Arc::new(context));
        }
        Ok(())
    }
}
