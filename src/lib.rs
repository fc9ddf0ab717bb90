//! Broker-agnostic message bus.
//!
//! Typed messages are published to every interested consumer or sent to one
//! address, consumed through composable filter pipelines, retried in-process,
//! and routed to fault and error queues when consumers fail. Request/response
//! works over any transport through temporary reply queues.
//!
//! ```ignore
//! use sourced_bus::{Bus, ConsumeContext, ConsumeError, InMemoryTransport, Message};
//!
//! #[derive(Serialize, Deserialize, Message)]
//! #[message(namespace = "Orders.Contracts")]
//! struct SubmitOrder { order_id: String }
//!
//! let bus = Bus::new(InMemoryTransport::new());
//! bus.add_handler(|context: ConsumeContext<SubmitOrder>| async move {
//!     tracing::info!(order_id = %context.message().order_id, "order submitted");
//!     Ok::<_, ConsumeError>(())
//! })?;
//! bus.start().await?;
//! bus.publish(&SubmitOrder { order_id: "o-1".into() }).await?;
//! ```

// The derive macro refers to `::sourced_bus::Message`
extern crate self as sourced_bus;

pub mod bus;
pub mod config;
pub mod context;
mod error;
pub mod fault;
pub mod logging;
pub mod message;
pub mod pipeline;
pub mod request;
pub mod resolver;
pub mod serialization;
pub mod topology;
pub mod transport;

pub use bus::{Bus, BusBuilder, BusState, Consumer, ConsumerOptions};
pub use config::{BusConfig, RetryConfig};
pub use context::{
    ConsumeContext, Headers, HostInfo, PipeContext, PublishContext, ReceiveContext, SendContext,
};
pub use error::{BusError, ConfigError, ConsumeError, RequestError};
pub use fault::{ExceptionInfo, Fault};
pub use message::Message;
pub use pipeline::{Filter, Pipe, PipeBuilder, RetryPolicy};
pub use request::{RequestClient, RequestOptions, Response, Response2};
pub use resolver::{DependencyResolver, ResolverScope, ServiceRegistry};
pub use serialization::{Batch, SerializationError, SerializerKind};
pub use topology::{TopologyError, TopologyRegistry};
pub use transport::{Address, InMemoryTransport, Transport, TransportError, TransportMessage};

// Derive macro, same name as the trait
pub use sourced_bus_macros::Message;

// Re-exported so callers and derived code share one version
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
