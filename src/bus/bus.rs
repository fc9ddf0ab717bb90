//! The bus: consumer registration, lifecycle and outbound messaging.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use super::consumer::{Consumer, ConsumerOptions, ConsumerSource};
use super::endpoint::{ConsumerRoute, EndpointHandler, TypedRoute};
use super::filters::{ConsumerFilter, ErrorRoutingFilter, FaultFilter, TracingFilter};
use crate::config::BusConfig;
use crate::context::{ConsumeContext, HostInfo, SendContext, SendKind};
use crate::error::{BusError, ConsumeError};
use crate::message::{self, Initialized, Message};
use crate::pipeline::{Filter, FilterPipe, Pipe, PipeBuilder};
use crate::request::RequestClient;
use crate::resolver::DependencyResolver;
use crate::topology::{DefaultEntityNameFormatter, KebabCaseEndpointNameFormatter, TopologyRegistry};
use crate::transport::{
    Address, ReceiveEndpointDefinition, ReceiveTransport, Transport, TransportMessage,
};

/// Lifecycle state of a [`Bus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Accepting consumer registrations.
    Configured,
    /// Receive endpoints are running.
    Started,
    /// Stopped after running. Can be started again.
    Stopped,
}

impl BusState {
    pub fn as_str(self) -> &'static str {
        match self {
            BusState::Configured => "configured",
            BusState::Started => "started",
            BusState::Stopped => "stopped",
        }
    }
}

/// Builder for a [`Bus`] with non-default configuration.
///
/// ```ignore
/// let bus = Bus::builder(InMemoryTransport::new())
///     .with_config(BusConfig::from_path("bus.toml")?)
///     .with_resolver(registry)
///     .with_send_filter(AuditFilter::default())
///     .build();
/// ```
pub struct BusBuilder {
    transport: Arc<dyn Transport>,
    config: BusConfig,
    resolver: Option<Arc<dyn DependencyResolver>>,
    topology: Option<Arc<TopologyRegistry>>,
    send_filters: Vec<Arc<dyn Filter<SendContext>>>,
    publish_filters: Vec<Arc<dyn Filter<SendContext>>>,
}

impl BusBuilder {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
            config: BusConfig::default(),
            resolver: None,
            topology: None,
            send_filters: Vec::new(),
            publish_filters: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolver used for factory consumers and resolved filters.
    pub fn with_resolver(mut self, resolver: impl DependencyResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Use a prepared topology instead of one derived from the config.
    pub fn with_topology(mut self, topology: TopologyRegistry) -> Self {
        self.topology = Some(Arc::new(topology));
        self
    }

    /// Filter run for every outbound message, sent or published.
    pub fn with_send_filter(mut self, filter: impl Filter<SendContext> + 'static) -> Self {
        self.send_filters.push(Arc::new(filter));
        self
    }

    /// Filter run for published messages only, before the send filters.
    pub fn with_publish_filter(mut self, filter: impl Filter<SendContext> + 'static) -> Self {
        self.publish_filters.push(Arc::new(filter));
        self
    }

    pub fn build(self) -> Bus {
        let topology = self.topology.unwrap_or_else(|| {
            let endpoint_formatter = match &self.config.namespace {
                Some(namespace) => KebabCaseEndpointNameFormatter::with_prefix(namespace.as_str()),
                None => KebabCaseEndpointNameFormatter::new(),
            };
            Arc::new(TopologyRegistry::new(DefaultEntityNameFormatter, endpoint_formatter))
        });
        let host = HostInfo::current(
            self.config.application_name.as_deref(),
            self.config.host_name.as_deref(),
        );

        let terminal: Arc<dyn Pipe<SendContext>> = Arc::new(TransportPipe {
            transport: Arc::clone(&self.transport),
        });
        let send_pipe = chain(&self.send_filters, terminal);
        let publish_pipe = chain(&self.publish_filters, Arc::clone(&send_pipe));

        Bus {
            inner: Arc::new(BusInner {
                transport: self.transport,
                topology,
                config: self.config,
                host,
                resolver: self.resolver,
                routes: DashMap::new(),
                registration: SyncMutex::new(()),
                state: RwLock::new(BusState::Configured),
                receivers: Mutex::new(Vec::new()),
                send_pipe,
                publish_pipe,
            }),
        }
    }
}

fn chain(
    filters: &[Arc<dyn Filter<SendContext>>],
    terminal: Arc<dyn Pipe<SendContext>>,
) -> Arc<dyn Pipe<SendContext>> {
    filters.iter().rev().fold(terminal, |next, filter| {
        Arc::new(FilterPipe::new(Arc::clone(filter), next))
    })
}

/// Terminal outbound pipe: hands the context to the destination's sender.
struct TransportPipe {
    transport: Arc<dyn Transport>,
}

#[async_trait]
impl Pipe<SendContext> for TransportPipe {
    async fn send(&self, context: &mut SendContext) -> Result<(), BusError> {
        let address = context.destination_address().cloned().ok_or_else(|| {
            BusError::Configuration("outbound message has no destination address".to_string())
        })?;
        let sender = self.transport.send_transport(&address).await?;
        sender.send(context).await?;
        trace!(address = %address, message_id = %context.message_id(), "dispatched");
        Ok(())
    }
}

pub(crate) struct BusInner {
    transport: Arc<dyn Transport>,
    topology: Arc<TopologyRegistry>,
    config: BusConfig,
    host: HostInfo,
    resolver: Option<Arc<dyn DependencyResolver>>,
    pub(super) routes: DashMap<String, Arc<dyn ConsumerRoute>>,
    /// Held for a whole registration so topology and routes change together.
    registration: SyncMutex<()>,
    state: RwLock<BusState>,
    receivers: Mutex<Vec<Arc<dyn ReceiveTransport>>>,
    send_pipe: Arc<dyn Pipe<SendContext>>,
    publish_pipe: Arc<dyn Pipe<SendContext>>,
}

/// A message bus over one transport.
///
/// Cheap to clone; clones share the same registrations and endpoints.
///
/// ## Example
///
/// ```ignore
/// let transport = InMemoryTransport::new();
/// let bus = Bus::new(transport.clone());
///
/// bus.add_consumer::<SubmitOrder, SubmitOrderConsumer>(|_| {})?;
/// bus.start().await?;
///
/// bus.publish(&SubmitOrder { order_id: "o-1".into() }).await?;
///
/// bus.stop().await?;
/// ```
#[derive(Clone)]
pub struct Bus {
    pub(super) inner: Arc<BusInner>,
}

impl Bus {
    /// Bus with default configuration.
    pub fn new(transport: impl Transport + 'static) -> Self {
        BusBuilder::new(transport).build()
    }

    pub fn builder(transport: impl Transport + 'static) -> BusBuilder {
        BusBuilder::new(transport)
    }

    pub fn state(&self) -> BusState {
        *self.inner.state.read()
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Host metadata stamped on outbound messages and faults.
    pub fn host(&self) -> &HostInfo {
        &self.inner.host
    }

    pub fn topology(&self) -> &TopologyRegistry {
        &self.inner.topology
    }

    pub fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    /// Whether a consumer is registered for `urn`.
    pub fn is_registered(&self, urn: &str) -> bool {
        self.inner.routes.contains_key(urn)
    }

    /// URNs with a registered consumer, sorted.
    pub fn registered_message_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.inner.routes.iter().map(|r| r.key().clone()).collect();
        types.sort();
        types
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register consumer `C` for `M`, creating a fresh `C` per message.
    ///
    /// Registering a second consumer for the same message type is ignored.
    /// `configure` must not register consumers on this bus.
    pub fn add_consumer<M, C>(
        &self,
        configure: impl FnOnce(&mut ConsumerOptions<M>),
    ) -> Result<(), BusError>
    where
        M: Message,
        C: Consumer<M> + Default,
    {
        self.register(
            std::any::type_name::<C>().to_string(),
            ConsumerSource::fresh::<C>(),
            configure,
        )
    }

    /// Register consumer `C` for `M`, resolving `C` from a new resolver
    /// scope per message.
    pub fn add_consumer_factory<M, C>(
        &self,
        configure: impl FnOnce(&mut ConsumerOptions<M>),
    ) -> Result<(), BusError>
    where
        M: Message,
        C: Consumer<M>,
    {
        let resolver = self.inner.resolver.clone().ok_or_else(|| {
            BusError::Configuration(format!(
                "consumer {} is resolved but the bus has no dependency resolver",
                std::any::type_name::<C>()
            ))
        })?;
        self.register(
            std::any::type_name::<C>().to_string(),
            ConsumerSource::resolved::<C>(resolver),
            configure,
        )
    }

    /// Register an async closure as the consumer of `M`.
    pub fn add_handler<M, F, Fut>(&self, handler: F) -> Result<(), BusError>
    where
        M: Message,
        F: Fn(ConsumeContext<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ConsumeError>> + Send + 'static,
    {
        self.add_handler_with(handler, |_| {})
    }

    pub fn add_handler_with<M, F, Fut>(
        &self,
        handler: F,
        configure: impl FnOnce(&mut ConsumerOptions<M>),
    ) -> Result<(), BusError>
    where
        M: Message,
        F: Fn(ConsumeContext<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ConsumeError>> + Send + 'static,
    {
        self.register(
            format!("handler:{}", M::message_urn()),
            ConsumerSource::handler(handler),
            configure,
        )
    }

    fn register<M: Message>(
        &self,
        consumer: String,
        source: ConsumerSource<M>,
        configure: impl FnOnce(&mut ConsumerOptions<M>),
    ) -> Result<(), BusError> {
        let _registering = self.inner.registration.lock();
        let state = self.state();
        if state != BusState::Configured {
            return Err(BusError::InvalidState {
                operation: "register a consumer",
                state: state.as_str(),
            });
        }

        let urn = M::message_urn();
        if self.inner.routes.contains_key(&urn) {
            debug!(urn = %urn, consumer = %consumer, "message type already registered");
            return Ok(());
        }

        let mut options = ConsumerOptions::new(self.inner.config.retry.map(|retry| retry.policy()));
        configure(&mut options);

        let topology = &self.inner.topology;
        topology.register_consumer::<M>(&consumer, options.queue.as_deref())?;
        if let Some(limit) = options.concurrency_limit {
            topology.configure_endpoint(&consumer, move |endpoint| {
                endpoint.set_concurrency_limit(limit)
            })?;
        }

        let ConsumerOptions { retry, filters, .. } = options;
        let mut builder = PipeBuilder::new()
            .with_filter(TracingFilter)
            .with_filter(ErrorRoutingFilter)
            .with_filter(FaultFilter);
        if let Some(policy) = retry {
            builder = builder.with_retry(policy);
        }
        builder.extend(filters);
        let builder = builder.with_filter(ConsumerFilter::new(source));

        let scope = self.inner.resolver.as_ref().map(|resolver| resolver.create_scope());
        let pipe = builder.build(scope.as_deref())?;

        info!(urn = %urn, consumer = %consumer, "consumer registered");
        self.inner
            .routes
            .insert(urn, Arc::new(TypedRoute::new(consumer, pipe)));
        Ok(())
    }

    pub(super) fn route(&self, urn: &str) -> Option<Arc<dyn ConsumerRoute>> {
        self.inner.routes.get(urn).map(|route| Arc::clone(route.value()))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Freeze the topology and start one receive endpoint per queue.
    ///
    /// Starting a started bus does nothing. If any endpoint fails to start,
    /// the ones already started are stopped and the error is returned.
    pub async fn start(&self) -> Result<(), BusError> {
        let mut receivers = self.inner.receivers.lock().await;
        if self.state() == BusState::Started {
            return Ok(());
        }

        self.inner.topology.freeze();
        if receivers.is_empty() {
            *receivers = self.create_receivers().await?;
        }

        let results = join_all(receivers.iter().map(|receiver| receiver.start())).await;
        if let Some(err) = results.into_iter().find_map(Result::err) {
            for receiver in receivers.iter() {
                if let Err(stop_err) = receiver.stop().await {
                    warn!(address = %receiver.input_address(), error = %stop_err, "failed to stop endpoint");
                }
            }
            return Err(err.into());
        }

        *self.inner.state.write() = BusState::Started;
        info!(
            transport = self.inner.transport.name(),
            endpoints = receivers.len(),
            "bus started"
        );
        Ok(())
    }

    /// Stop every receive endpoint, waiting for in-flight messages.
    ///
    /// Stopping a bus that is not running does nothing. Must not be awaited
    /// from inside a consumer of this bus.
    pub async fn stop(&self) -> Result<(), BusError> {
        let receivers = self.inner.receivers.lock().await;
        if self.state() != BusState::Started {
            return Ok(());
        }

        let results = join_all(receivers.iter().map(|receiver| receiver.stop())).await;
        *self.inner.state.write() = BusState::Stopped;
        info!(endpoints = receivers.len(), "bus stopped");

        match results.into_iter().find_map(Result::err) {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    async fn create_receivers(&self) -> Result<Vec<Arc<dyn ReceiveTransport>>, BusError> {
        let mut endpoints: BTreeMap<String, (ReceiveEndpointDefinition, HashSet<String>)> =
            BTreeMap::new();
        for topology in self.inner.topology.consumers() {
            let (endpoint, consumers) = endpoints
                .entry(topology.queue().to_string())
                .or_insert_with(|| {
                    let endpoint = ReceiveEndpointDefinition::new(topology.queue())
                        .with_concurrency_limit(self.inner.config.concurrency_limit);
                    (endpoint, HashSet::new())
                });
            for binding in topology.bindings() {
                endpoint.add_binding(binding.entity_name.as_str());
            }
            topology.configure_endpoint(endpoint);
            consumers.insert(topology.consumer().to_string());
        }

        let mut receivers = Vec::with_capacity(endpoints.len());
        for (queue, (endpoint, consumers)) in endpoints {
            let handler = Arc::new(EndpointHandler::new(Arc::downgrade(&self.inner), queue, consumers));
            receivers.push(self.inner.transport.create_receive_transport(endpoint, handler).await?);
        }
        Ok(receivers)
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Publish to every consumer of `M`.
    pub async fn publish<M: Message>(&self, message: &M) -> Result<(), BusError> {
        self.publish_with(message, |_| {}).await
    }

    /// Publish with a callback that adjusts the outbound context.
    pub async fn publish_with<M, F>(&self, message: &M, configure: F) -> Result<(), BusError>
    where
        M: Message,
        F: FnOnce(&mut SendContext) + Send,
    {
        let mut context = self.create_context(message)?;
        context.set_destination_address(self.inner.topology.publish_address::<M>()?);
        configure(&mut context);
        self.publish_context(context).await
    }

    /// Build `M` from a loosely-typed object and publish it. `__Header_*`
    /// keys become headers on the outbound message.
    pub async fn publish_init<M: Message>(&self, source: Value) -> Result<(), BusError> {
        let Initialized { message, headers } = message::init::<M>(source)?;
        self.publish_with(&message, |context| context.headers_mut().extend(&headers))
            .await
    }

    /// Send to one explicit address.
    pub async fn send<M: Message>(&self, address: &Address, message: &M) -> Result<(), BusError> {
        self.send_with(address, message, |_| {}).await
    }

    pub async fn send_with<M, F>(
        &self,
        address: &Address,
        message: &M,
        configure: F,
    ) -> Result<(), BusError>
    where
        M: Message,
        F: FnOnce(&mut SendContext) + Send,
    {
        let mut context = self.create_context(message)?;
        context.set_destination_address(address.clone());
        configure(&mut context);
        self.send_context(context).await
    }

    /// Send a prepared context to its destination address through the send
    /// filters.
    pub async fn send_context(&self, mut context: SendContext) -> Result<(), BusError> {
        context.set_kind(SendKind::Send);
        self.inner.send_pipe.send(&mut context).await
    }

    /// Publish a prepared context through the publish and send filters.
    pub async fn publish_context(&self, mut context: SendContext) -> Result<(), BusError> {
        context.set_kind(SendKind::Publish);
        self.inner.publish_pipe.send(&mut context).await
    }

    /// Request client that publishes `TReq`.
    pub fn create_request_client<TReq: Message>(&self) -> RequestClient<TReq> {
        RequestClient::new(self.clone(), None)
    }

    /// Request client that sends `TReq` to `address`.
    pub fn create_request_client_for<TReq: Message>(&self, address: Address) -> RequestClient<TReq> {
        RequestClient::new(self.clone(), Some(address))
    }

    /// Outbound context for `message` with this bus's host and codec.
    pub(crate) fn create_context<M: Message>(&self, message: &M) -> Result<SendContext, BusError> {
        let mut context = SendContext::new(message)?;
        context.set_host(self.inner.host.clone());
        context.set_serializer(self.inner.config.default_content_type);
        Ok(context)
    }

    pub(crate) fn context_from_value(&self, message: Value, message_types: Vec<String>) -> SendContext {
        let mut context = SendContext::from_value(message, message_types);
        context.set_host(self.inner.host.clone());
        context.set_serializer(self.inner.config.default_content_type);
        context
    }

    /// Place an already-encoded frame on `address`, bypassing the filters.
    pub(crate) async fn dispatch_frame(
        &self,
        address: &Address,
        frame: TransportMessage,
    ) -> Result<(), BusError> {
        let sender = self.inner.transport.send_transport(address).await?;
        sender.dispatch(frame).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("transport", &self.inner.transport.name())
            .field("state", &self.state())
            .field("routes", &self.inner.routes.len())
            .finish()
    }
}
