//! In-process reference transport.
//!
//! Exchanges fan out to every bound queue; queues hold frames until a
//! receive loop takes them. Useful for:
//! - Unit and integration testing without a broker
//! - Single-process applications
//! - Inspecting exactly what landed on error, fault and skipped queues

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use super::{
    deliver, Address, AddressKind, ReceiveEndpointDefinition, ReceiveHandler, ReceiveTransport,
    SendTransport, SendTransportCache, Transport, TransportError, TransportMessage,
};
use crate::serialization::SerializerKind;

/// In-process broker implementing [`Transport`].
///
/// Cheap to clone; clones share the same queues and exchanges.
///
/// ## Example
///
/// ```ignore
/// let transport = InMemoryTransport::new();
/// let bus = Bus::new(transport.clone());
/// bus.add_consumer::<SubmitOrder, SubmitOrderConsumer>(|_| {})?;
/// bus.start().await?;
///
/// bus.publish(&SubmitOrder { order_id: "o-1".into() }).await?;
/// let errors = transport
///     .wait_for_messages("submit-order-consumer_error", 1, Duration::from_secs(1))
///     .await;
/// ```
#[derive(Clone)]
pub struct InMemoryTransport {
    broker: Arc<Broker>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// Create a transport whose frames default to the envelope codec when
    /// they carry no content type.
    pub fn new() -> Self {
        Self::with_default_codec(Some(SerializerKind::Envelope))
    }

    /// Create a transport with an explicit codec for frames without a
    /// content type. `None` makes a missing content type an error, as on a
    /// real broker.
    pub fn with_default_codec(codec: Option<SerializerKind>) -> Self {
        Self {
            broker: Arc::new(Broker {
                queues: DashMap::new(),
                exchanges: DashMap::new(),
                senders: SendTransportCache::new(),
                default_codec: codec,
            }),
        }
    }

    // ========================================================================
    // Provisioning
    // ========================================================================

    /// Declare a durable queue.
    pub fn declare_queue(&self, queue: &str) {
        self.broker.declare_queue(queue, true, false);
    }

    /// Bind `queue` to `exchange`, declaring both.
    pub fn bind(&self, exchange: &str, queue: &str) {
        self.declare_queue(queue);
        self.broker.bind(exchange, queue);
    }

    /// Place a raw frame directly on a queue, declaring it if needed.
    pub fn inject(&self, queue: &str, frame: TransportMessage) {
        self.broker.declare_queue(queue, true, false).push(frame);
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Frames currently waiting on `queue`, oldest first.
    pub fn messages(&self, queue: &str) -> Vec<TransportMessage> {
        self.broker
            .queue(queue)
            .map(|q| q.snapshot())
            .unwrap_or_default()
    }

    /// Number of frames waiting on `queue`.
    pub fn message_count(&self, queue: &str) -> usize {
        self.broker.queue(queue).map_or(0, |q| q.len())
    }

    /// Wait until `queue` holds at least `count` frames or `timeout` elapses,
    /// then return what it holds.
    pub async fn wait_for_messages(
        &self,
        queue: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<TransportMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            let messages = self.messages(queue);
            if messages.len() >= count || Instant::now() >= deadline {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Drop every frame waiting on `queue`.
    pub fn purge(&self, queue: &str) {
        if let Some(q) = self.broker.queue(queue) {
            q.messages.lock().clear();
        }
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.broker.queues.contains_key(queue)
    }

    /// Declared queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.broker.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Declared exchanges, sorted.
    pub fn exchange_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .broker
            .exchanges
            .iter()
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Number of senders held in the address cache.
    pub fn cached_senders(&self) -> usize {
        self.broker.senders.len()
    }

    /// Queues bound to `exchange`, sorted.
    pub fn bindings(&self, exchange: &str) -> Vec<String> {
        self.broker
            .exchanges
            .get(exchange)
            .map(|bound| bound.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn send_transport(&self, address: &Address) -> Result<Arc<dyn SendTransport>, TransportError> {
        if address.kind()? == AddressKind::Http {
            return Err(TransportError::UnsupportedAddress(format!(
                "in-memory transport cannot reach {address}"
            )));
        }
        let create = || -> Result<Arc<dyn SendTransport>, TransportError> {
            Ok(Arc::new(InMemorySendTransport {
                address: address.clone(),
                broker: Arc::downgrade(&self.broker),
            }))
        };
        // Auto-delete queues live for one receiver; caching them would keep
        // a sender per reply queue forever
        if address.auto_delete() {
            return create();
        }
        self.broker.senders.get_or_try_insert(address, create)
    }

    async fn create_receive_transport(
        &self,
        endpoint: ReceiveEndpointDefinition,
        handler: Arc<dyn ReceiveHandler>,
    ) -> Result<Arc<dyn ReceiveTransport>, TransportError> {
        let input_address = endpoint.input_address()?;
        Ok(Arc::new(InMemoryReceiveTransport {
            transport: self.clone(),
            endpoint: Arc::new(endpoint),
            input_address,
            handler,
            running: Mutex::new(None),
        }))
    }
}

// ============================================================================
// Broker state
// ============================================================================

struct Broker {
    queues: DashMap<String, Arc<MemoryQueue>>,
    exchanges: DashMap<String, BTreeSet<String>>,
    senders: SendTransportCache,
    default_codec: Option<SerializerKind>,
}

impl Broker {
    fn queue(&self, name: &str) -> Option<Arc<MemoryQueue>> {
        self.queues.get(name).map(|q| Arc::clone(q.value()))
    }

    fn declare_queue(&self, name: &str, durable: bool, auto_delete: bool) -> Arc<MemoryQueue> {
        Arc::clone(
            self.queues
                .entry(name.to_string())
                .or_insert_with(|| {
                    debug!(queue = name, durable, auto_delete, "queue declared");
                    Arc::new(MemoryQueue::new())
                })
                .value(),
        )
    }

    fn bind(&self, exchange: &str, queue: &str) {
        self.exchanges
            .entry(exchange.to_string())
            .or_default()
            .insert(queue.to_string());
    }

    fn delete_queue(&self, name: &str) {
        self.queues.remove(name);
        self.senders.retain(|address| {
            !(matches!(address.kind(), Ok(AddressKind::Queue)) && address.name() == name)
        });
        for mut bound in self.exchanges.iter_mut() {
            bound.remove(name);
        }
        debug!(queue = name, "queue deleted");
    }

    fn dispatch(&self, address: &Address, frame: TransportMessage) -> Result<(), TransportError> {
        match address.kind()? {
            AddressKind::Queue => {
                let name = address.name();
                let queue = match self.queue(name) {
                    Some(queue) => queue,
                    // Temporary queues vanish with their receiver; late frames are refused
                    None if address.auto_delete() => {
                        return Err(TransportError::QueueNotFound(name.to_string()))
                    }
                    None => self.declare_queue(name, address.durable(), false),
                };
                queue.push(frame);
                Ok(())
            }
            AddressKind::Exchange => {
                let bound: Vec<String> = self
                    .exchanges
                    .entry(address.name().to_string())
                    .or_default()
                    .iter()
                    .cloned()
                    .collect();
                if bound.is_empty() {
                    trace!(exchange = address.name(), "no bound queues; frame dropped");
                }
                for queue in bound.iter().filter_map(|name| self.queue(name)) {
                    queue.push(frame.clone());
                }
                Ok(())
            }
            AddressKind::Http => Err(TransportError::UnsupportedAddress(address.to_string())),
        }
    }
}

struct MemoryQueue {
    messages: Mutex<VecDeque<TransportMessage>>,
    notify: Notify,
}

impl MemoryQueue {
    fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, frame: TransportMessage) {
        self.messages.lock().push_back(frame);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<TransportMessage> {
        self.messages.lock().pop_front()
    }

    /// Wait for the next frame. Registers interest before checking the queue
    /// so a push between the check and the wait is never missed.
    async fn pop(&self) -> TransportMessage {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(frame) = self.try_pop() {
                return frame;
            }
            notified.await;
        }
    }

    fn snapshot(&self) -> Vec<TransportMessage> {
        self.messages.lock().iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.messages.lock().len()
    }
}

// ============================================================================
// Send
// ============================================================================

struct InMemorySendTransport {
    address: Address,
    broker: Weak<Broker>,
}

#[async_trait]
impl SendTransport for InMemorySendTransport {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn dispatch(&self, frame: TransportMessage) -> Result<(), TransportError> {
        let broker = self.broker.upgrade().ok_or(TransportError::Closed)?;
        broker.dispatch(&self.address, frame)
    }
}

// ============================================================================
// Receive
// ============================================================================

struct ReceiveLoop {
    cancellation: CancellationToken,
    tracker: TaskTracker,
}

struct InMemoryReceiveTransport {
    transport: InMemoryTransport,
    endpoint: Arc<ReceiveEndpointDefinition>,
    input_address: Address,
    handler: Arc<dyn ReceiveHandler>,
    running: Mutex<Option<ReceiveLoop>>,
}

#[async_trait]
impl ReceiveTransport for InMemoryReceiveTransport {
    fn input_address(&self) -> &Address {
        &self.input_address
    }

    async fn start(&self) -> Result<(), TransportError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let broker = &self.transport.broker;
        let endpoint = &self.endpoint;
        let queue = broker.declare_queue(endpoint.queue(), endpoint.durable(), endpoint.auto_delete());
        if endpoint.provisions_dead_letters() {
            for dead_letter in [endpoint.error_queue(), endpoint.fault_queue(), endpoint.skipped_queue()] {
                broker.declare_queue(&dead_letter, true, false);
            }
        }
        for exchange in endpoint.bindings() {
            broker.bind(exchange, endpoint.queue());
        }

        let cancellation = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(receive_loop(
            queue,
            Arc::new(Semaphore::new(endpoint.concurrency_limit())),
            tracker.clone(),
            cancellation.clone(),
            self.transport.clone(),
            Arc::clone(endpoint),
            self.input_address.clone(),
            Arc::clone(&self.handler),
        ));
        *running = Some(ReceiveLoop {
            cancellation,
            tracker,
        });

        info!(queue = endpoint.queue(), bindings = ?endpoint.bindings(), "receive endpoint started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let Some(receive_loop) = self.running.lock().take() else {
            return Ok(());
        };

        receive_loop.cancellation.cancel();
        receive_loop.tracker.close();
        receive_loop.tracker.wait().await;

        if self.endpoint.auto_delete() {
            self.transport.broker.delete_queue(self.endpoint.queue());
        }
        info!(queue = self.endpoint.queue(), "receive endpoint stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

#[allow(clippy::too_many_arguments)]
async fn receive_loop(
    queue: Arc<MemoryQueue>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancellation: CancellationToken,
    transport: InMemoryTransport,
    endpoint: Arc<ReceiveEndpointDefinition>,
    input_address: Address,
    handler: Arc<dyn ReceiveHandler>,
) {
    let default_codec = transport.broker.default_codec;
    loop {
        // Take a permit first so frames stay queued while the endpoint is saturated
        let permit = tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let frame = tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            frame = queue.pop() => frame,
        };

        let transport = transport.clone();
        let endpoint = Arc::clone(&endpoint);
        let input_address = input_address.clone();
        let handler = Arc::clone(&handler);
        let token = cancellation.child_token();
        tracker.spawn(async move {
            let _permit = permit;
            deliver(
                frame,
                &endpoint,
                &input_address,
                handler.as_ref(),
                &transport,
                default_codec,
                token,
            )
            .await;
        });
    }
    trace!(queue = endpoint.queue(), "receive loop exited");
}
