//! Topology registry: message types and consumers bound to broker entities.
//!
//! ```text
//!  message type ──(entity formatter)──▶ exchange  "Orders.Contracts:SubmitOrder"
//!                                          │ binding
//!  consumer     ──(endpoint formatter)─▶ queue     "submit-order-consumer"
//! ```
//!
//! Queue names and entity names may each be overridden exactly once, and
//! only until the registry is frozen, which the bus does when it starts.

mod naming;

pub use naming::{
    kebab_case, DefaultEntityNameFormatter, EndpointNameFormatter, EntityNameFormatter,
    KebabCaseEndpointNameFormatter,
};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;

use crate::message::Message;
use crate::transport::{Address, ReceiveEndpointDefinition, TransportError};

/// Error type for topology registration and overrides.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TopologyError {
    /// The name was already overridden once.
    #[error("{kind} name for {key} was already overridden")]
    AlreadyOverridden { kind: &'static str, key: String },
    /// The registry is frozen; the bus has started.
    #[error("topology is frozen; {0} cannot change after the bus starts")]
    Frozen(String),
    /// No message type with this URN is registered.
    #[error("message type not registered: {0}")]
    UnknownMessage(String),
    /// No consumer with this name is registered.
    #[error("consumer not registered: {0}")]
    UnknownConsumer(String),
    /// A derived name is not a valid address.
    #[error("invalid entity name: {0}")]
    InvalidName(#[from] TransportError),
}

/// Message type URN bound to its exchange/topic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBinding {
    pub message_urn: String,
    pub entity_name: String,
}

type EndpointCallback = Arc<dyn Fn(&mut ReceiveEndpointDefinition) + Send + Sync>;

/// A consumer type, its queue and the message bindings it consumes.
#[derive(Clone)]
pub struct ConsumerTopology {
    consumer: String,
    queue: String,
    bindings: Vec<MessageBinding>,
    configure_endpoint: Option<EndpointCallback>,
    queue_overridden: bool,
}

impl ConsumerTopology {
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn bindings(&self) -> &[MessageBinding] {
        &self.bindings
    }

    /// Apply this consumer's endpoint callback, if any.
    pub fn configure_endpoint(&self, endpoint: &mut ReceiveEndpointDefinition) {
        if let Some(callback) = &self.configure_endpoint {
            callback(endpoint);
        }
    }
}

impl fmt::Debug for ConsumerTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerTopology")
            .field("consumer", &self.consumer)
            .field("queue", &self.queue)
            .field("bindings", &self.bindings)
            .field("configure_endpoint", &self.configure_endpoint.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
struct MessageEntry {
    entity_name: String,
    overridden: bool,
}

/// Process-lifetime registry of bindings between message types, consumers
/// and broker entities.
pub struct TopologyRegistry {
    entity_formatter: Arc<dyn EntityNameFormatter>,
    endpoint_formatter: Arc<dyn EndpointNameFormatter>,
    messages: DashMap<String, MessageEntry>,
    consumers: RwLock<BTreeMap<String, ConsumerTopology>>,
    frozen: AtomicBool,
}

impl Default for TopologyRegistry {
    /// `{namespace}:{typeName}` exchanges and kebab-case `-consumer` queues.
    fn default() -> Self {
        Self::new(
            DefaultEntityNameFormatter,
            KebabCaseEndpointNameFormatter::new(),
        )
    }
}

impl TopologyRegistry {
    pub fn new(
        entity_formatter: impl EntityNameFormatter + 'static,
        endpoint_formatter: impl EndpointNameFormatter + 'static,
    ) -> Self {
        Self {
            entity_formatter: Arc::new(entity_formatter),
            endpoint_formatter: Arc::new(endpoint_formatter),
            messages: DashMap::new(),
            consumers: RwLock::new(BTreeMap::new()),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn endpoint_formatter(&self) -> &dyn EndpointNameFormatter {
        self.endpoint_formatter.as_ref()
    }

    // ========================================================================
    // Message types
    // ========================================================================

    /// Register `M`, returning its binding. Registering twice returns the
    /// existing binding.
    pub fn register_message<M: Message>(&self) -> MessageBinding {
        let urn = M::message_urn();
        let entry = self
            .messages
            .entry(urn.clone())
            .or_insert_with(|| MessageEntry {
                entity_name: M::entity_name().unwrap_or_else(|| {
                    self.entity_formatter
                        .format_entity_name(&M::message_namespace(), &M::message_name())
                }),
                overridden: false,
            });
        MessageBinding {
            message_urn: urn,
            entity_name: entry.entity_name.clone(),
        }
    }

    /// Exchange name of `M`, registering it if needed.
    pub fn entity_name<M: Message>(&self) -> String {
        self.register_message::<M>().entity_name
    }

    /// Exchange name of a registered URN.
    pub fn entity_name_for(&self, urn: &str) -> Option<String> {
        self.messages.get(urn).map(|entry| entry.entity_name.clone())
    }

    /// Address messages of type `M` are published to.
    pub fn publish_address<M: Message>(&self) -> Result<Address, TopologyError> {
        Ok(Address::exchange(&self.entity_name::<M>())?)
    }

    /// Replace the exchange name of a registered message type, once.
    pub fn override_entity_name(&self, urn: &str, name: impl Into<String>) -> Result<(), TopologyError> {
        self.ensure_not_frozen("entity name")?;
        let mut entry = self
            .messages
            .get_mut(urn)
            .ok_or_else(|| TopologyError::UnknownMessage(urn.to_string()))?;
        if entry.overridden {
            return Err(TopologyError::AlreadyOverridden {
                kind: "entity",
                key: urn.to_string(),
            });
        }
        let name = name.into();
        entry.entity_name = name.clone();
        entry.overridden = true;
        drop(entry);

        // Keep consumer bindings in step with the new name
        for topology in self.consumers.write().values_mut() {
            for binding in topology.bindings.iter_mut().filter(|b| b.message_urn == urn) {
                binding.entity_name = name.clone();
            }
        }
        Ok(())
    }

    // ========================================================================
    // Consumers
    // ========================================================================

    /// Bind consumer `consumer` to message type `M`.
    ///
    /// The first registration of a consumer fixes its queue: `queue` when
    /// given, otherwise the endpoint formatter's name for `M`. Later
    /// registrations add bindings to the same queue.
    pub fn register_consumer<M: Message>(
        &self,
        consumer: &str,
        queue: Option<&str>,
    ) -> Result<ConsumerTopology, TopologyError> {
        self.ensure_not_frozen("consumer registration")?;
        let binding = self.register_message::<M>();

        let mut consumers = self.consumers.write();
        let topology = consumers
            .entry(consumer.to_string())
            .or_insert_with(|| ConsumerTopology {
                consumer: consumer.to_string(),
                queue: queue.map(str::to_string).unwrap_or_else(|| {
                    self.endpoint_formatter
                        .consumer_queue_name(&M::message_name())
                }),
                bindings: Vec::new(),
                configure_endpoint: None,
                queue_overridden: false,
            });
        if !topology.bindings.contains(&binding) {
            topology.bindings.push(binding);
        }
        Ok(topology.clone())
    }

    /// Attach an endpoint configuration callback to a consumer.
    pub fn configure_endpoint<F>(&self, consumer: &str, callback: F) -> Result<(), TopologyError>
    where
        F: Fn(&mut ReceiveEndpointDefinition) + Send + Sync + 'static,
    {
        self.ensure_not_frozen("endpoint configuration")?;
        let mut consumers = self.consumers.write();
        let topology = consumers
            .get_mut(consumer)
            .ok_or_else(|| TopologyError::UnknownConsumer(consumer.to_string()))?;
        topology.configure_endpoint = Some(Arc::new(callback));
        Ok(())
    }

    /// Replace a consumer's queue name, once.
    pub fn override_queue_name(&self, consumer: &str, queue: impl Into<String>) -> Result<(), TopologyError> {
        self.ensure_not_frozen("queue name")?;
        let mut consumers = self.consumers.write();
        let topology = consumers
            .get_mut(consumer)
            .ok_or_else(|| TopologyError::UnknownConsumer(consumer.to_string()))?;
        if topology.queue_overridden {
            return Err(TopologyError::AlreadyOverridden {
                kind: "queue",
                key: consumer.to_string(),
            });
        }
        topology.queue = queue.into();
        topology.queue_overridden = true;
        Ok(())
    }

    pub fn consumer(&self, consumer: &str) -> Option<ConsumerTopology> {
        self.consumers.read().get(consumer).cloned()
    }

    /// Every registered consumer, ordered by name.
    pub fn consumers(&self) -> Vec<ConsumerTopology> {
        self.consumers.read().values().cloned().collect()
    }

    // ========================================================================
    // Freezing
    // ========================================================================

    /// Reject further overrides and registrations.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    fn ensure_not_frozen(&self, what: &str) -> Result<(), TopologyError> {
        if self.is_frozen() {
            Err(TopologyError::Frozen(what.to_string()))
        } else {
            Ok(())
        }
    }
}
