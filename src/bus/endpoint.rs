//! Inbound dispatch: from a receive endpoint to the consumer pipes.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, error};

use super::filters::forward_to_error;
use super::{Bus, BusInner};
use crate::context::{ConsumeContext, ReceiveContext};
use crate::error::BusError;
use crate::message::Message;
use crate::pipeline::Pipe;
use crate::transport::ReceiveHandler;

/// A registered consumer pipe, erased over its message type.
#[async_trait]
pub(crate) trait ConsumerRoute: Send + Sync {
    /// Topology name of the consumer behind the route.
    fn consumer(&self) -> &str;

    async fn dispatch(&self, receive: Arc<ReceiveContext>, bus: Bus) -> Result<(), BusError>;
}

pub(crate) struct TypedRoute<M: Message> {
    consumer: String,
    pipe: Arc<dyn Pipe<ConsumeContext<M>>>,
}

impl<M: Message> TypedRoute<M> {
    pub(crate) fn new(consumer: String, pipe: Arc<dyn Pipe<ConsumeContext<M>>>) -> Self {
        Self { consumer, pipe }
    }
}

#[async_trait]
impl<M: Message> ConsumerRoute for TypedRoute<M> {
    fn consumer(&self) -> &str {
        &self.consumer
    }

    async fn dispatch(&self, receive: Arc<ReceiveContext>, bus: Bus) -> Result<(), BusError> {
        let message = match receive.try_get_message::<M>() {
            Ok(message) => message,
            Err(err) => {
                let err = BusError::from(err);
                error!(
                    urn = %M::message_urn(),
                    message_id = ?receive.message_id(),
                    error = %err,
                    "payload does not match message type"
                );
                forward_to_error(&bus, &receive, &err).await;
                return Err(err);
            }
        };

        let mut context = ConsumeContext::new(message, receive, bus);
        self.pipe.send(&mut context).await
    }
}

/// Receive handler for one endpoint.
///
/// Holds the bus weakly: receive transports live inside the bus, so a strong
/// handle here would keep a dropped bus alive.
pub(crate) struct EndpointHandler {
    bus: Weak<BusInner>,
    queue: String,
    consumers: HashSet<String>,
}

impl EndpointHandler {
    pub(crate) fn new(bus: Weak<BusInner>, queue: String, consumers: HashSet<String>) -> Self {
        Self {
            bus,
            queue,
            consumers,
        }
    }
}

#[async_trait]
impl ReceiveHandler for EndpointHandler {
    fn is_registered(&self, urn: &str) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|inner| inner.routes.contains_key(urn))
    }

    /// Dispatch to the pipe of the first message type, plus the pipes of any
    /// other listed type whose consumer lives on this endpoint. Each pipe
    /// runs in isolation; the first failure is returned.
    async fn handle(&self, receive: ReceiveContext) -> Result<(), BusError> {
        let inner = self.bus.upgrade().ok_or(BusError::InvalidState {
            operation: "consume",
            state: "dropped",
        })?;
        let bus = Bus { inner };

        let types = receive.message_types();
        let first = types
            .first()
            .ok_or_else(|| BusError::UnknownMessageType("<none>".to_string()))?;
        let primary = bus
            .route(first)
            .ok_or_else(|| BusError::UnknownMessageType(first.clone()))?;

        let mut routes = vec![primary];
        for urn in &types[1..] {
            let Some(route) = bus.route(urn) else { continue };
            let local = self.consumers.contains(route.consumer());
            if local && !routes.iter().any(|known| Arc::ptr_eq(known, &route)) {
                routes.push(route);
            }
        }

        let receive = Arc::new(receive);
        let results = join_all(
            routes
                .iter()
                .map(|route| route.dispatch(Arc::clone(&receive), bus.clone())),
        )
        .await;

        match results.into_iter().find_map(Result::err) {
            Some(err) => {
                debug!(queue = %self.queue, error = %err, "dispatch failed");
                Err(err)
            }
            None => Ok(()),
        }
    }
}
