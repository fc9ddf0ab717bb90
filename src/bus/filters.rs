//! Filters the bus places around every consumer.
//!
//! ```text
//! TracingFilter → ErrorRoutingFilter → FaultFilter → [options] → ConsumerFilter
//! ```
//!
//! A failure travels back out through the fault and error filters, each of
//! which does its side effect and re-raises, so the transport still sees the
//! failure.

use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

use super::consumer::ConsumerSource;
use super::Bus;
use crate::context::{headers, ConsumeContext, ReceiveContext};
use crate::error::BusError;
use crate::fault::{ExceptionInfo, Fault};
use crate::message::Message;
use crate::pipeline::{Filter, Pipe};

/// Wraps consumption in a `consume` span and logs the outcome.
pub(crate) struct TracingFilter;

#[async_trait]
impl<M: Message> Filter<ConsumeContext<M>> for TracingFilter {
    async fn send(
        &self,
        context: &mut ConsumeContext<M>,
        next: &dyn Pipe<ConsumeContext<M>>,
    ) -> Result<(), BusError> {
        let span = info_span!(
            "consume",
            urn = %M::message_urn(),
            message_id = ?context.message_id(),
            queue = context.receive_context().input_address().name(),
        );
        let started = Instant::now();
        let result = next.send(context).instrument(span.clone()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        span.in_scope(|| match &result {
            Ok(()) => debug!(elapsed_ms, "consumed"),
            Err(err) => error!(elapsed_ms, error = %err, "consumer failed"),
        });
        result
    }
}

/// Moves the original frame to the endpoint's error queue on failure.
pub(crate) struct ErrorRoutingFilter;

#[async_trait]
impl<M: Message> Filter<ConsumeContext<M>> for ErrorRoutingFilter {
    async fn send(
        &self,
        context: &mut ConsumeContext<M>,
        next: &dyn Pipe<ConsumeContext<M>>,
    ) -> Result<(), BusError> {
        let result = next.send(context).await;
        if let Err(err) = &result {
            forward_to_error(context.bus(), context.receive_context(), err).await;
        }
        result
    }
}

/// Publishes a [`Fault`] record on failure.
pub(crate) struct FaultFilter;

#[async_trait]
impl<M: Message> Filter<ConsumeContext<M>> for FaultFilter {
    async fn send(
        &self,
        context: &mut ConsumeContext<M>,
        next: &dyn Pipe<ConsumeContext<M>>,
    ) -> Result<(), BusError> {
        let result = next.send(context).await;
        if let Err(err) = &result {
            send_fault::<M>(context.bus(), context.receive_context(), err).await;
        }
        result
    }
}

/// Invokes the consumer, then the rest of the pipe.
pub(crate) struct ConsumerFilter<M> {
    source: ConsumerSource<M>,
}

impl<M> ConsumerFilter<M> {
    pub(crate) fn new(source: ConsumerSource<M>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<M: Message> Filter<ConsumeContext<M>> for ConsumerFilter<M> {
    async fn send(
        &self,
        context: &mut ConsumeContext<M>,
        next: &dyn Pipe<ConsumeContext<M>>,
    ) -> Result<(), BusError> {
        self.source.invoke(context).await?;
        next.send(context).await
    }
}

/// Copy the received frame, annotated with the failure, to the error queue.
///
/// Failures here are logged, never raised: the original error is what the
/// caller reports.
pub(crate) async fn forward_to_error(bus: &Bus, receive: &ReceiveContext, err: &BusError) {
    let Some(address) = receive.error_address() else {
        warn!(queue = receive.input_address().name(), error = %err, "no error queue; message dropped");
        return;
    };

    let exception = ExceptionInfo::from_bus_error(err);
    let mut frame = receive.transport_message().clone();
    let target = &mut frame.headers;
    target.set(headers::EXCEPTION_TYPE, &exception.exception_type);
    target.set(headers::EXCEPTION_MESSAGE, &exception.message);
    if let Some(trace) = &exception.stack_trace {
        target.set(headers::EXCEPTION_STACKTRACE, trace);
    }
    target.set(headers::REASON, headers::REASON_FAULT);
    target.set(headers::REDELIVERY_COUNT, receive.redelivery_count().to_string());
    bus.host().write_headers(target);

    if let Err(dispatch_err) = bus.dispatch_frame(address, frame).await {
        error!(address = %address, error = %dispatch_err, "failed to move message to error queue");
    }
}

async fn send_fault<M: Message>(bus: &Bus, receive: &ReceiveContext, err: &BusError) {
    let Some(address) = receive.fault_address().cloned() else {
        debug!(queue = receive.input_address().name(), "no fault address; fault not sent");
        return;
    };

    let fault = Fault {
        fault_id: Uuid::new_v4(),
        fault_message_id: receive.message_id(),
        correlation_id: receive.correlation_id(),
        fault_message_types: receive.message_types().to_vec(),
        exceptions: vec![ExceptionInfo::from_bus_error(err)],
        host: Some(bus.host().clone()),
        timestamp: Utc::now(),
        message: receive.payload().clone(),
    };
    let payload = match serde_json::to_value(&fault) {
        Ok(payload) => payload,
        Err(encode_err) => {
            error!(error = %encode_err, "failed to encode fault");
            return;
        }
    };

    let mut context = bus.context_from_value(payload, Fault::<M>::message_types());
    if let Some(id) = receive.correlation_id().or(receive.message_id()) {
        context.set_correlation_id(id);
    }
    if let Some(id) = receive.conversation_id() {
        context.set_conversation_id(id);
    }
    if let Some(request_id) = receive.headers().get(headers::REQUEST_ID) {
        context.headers_mut().set(headers::REQUEST_ID, request_id);
    }
    context.set_source_address(receive.input_address().clone());
    context.set_destination_address(address.clone());

    if let Err(send_err) = bus.send_context(context).await {
        error!(address = %address, error = %send_err, "failed to send fault");
    }
}
