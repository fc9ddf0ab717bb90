//! Message bus: typed publish, send and consume over a pluggable transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Bus (per service)                        │
//! │  - add_consumer / add_handler (before start)                │
//! │  - publish / send / request                                 │
//! │  - start / stop                                             │
//! └─────────────────────────────────────────────────────────────┘
//!        │ outbound                              ▲ inbound
//!        ▼                                       │
//! ┌──────────────────────┐        ┌─────────────────────────────┐
//! │ publish filters      │        │ EndpointHandler (per queue) │
//! │ send filters         │        │  → consumer pipe per type   │
//! │ SendTransport        │        │    tracing → error → fault  │
//! └──────────────────────┘        │    → options → consumer     │
//!        │                        └─────────────────────────────┘
//!        ▼                                       ▲
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Transport (InMemoryTransport or a broker)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure handling
//!
//! When a consumer fails after any configured retries:
//!
//! 1. a [`Fault`](crate::fault::Fault) is sent to the message's fault address
//!    (the sender's, else the endpoint's `_fault` queue)
//! 2. the original frame goes to the endpoint's `_error` queue, annotated
//!    with `sb-exception-*`, `sb-reason: fault` and host headers
//!
//! Frames whose first type has no consumer go to the `_skipped` queue.

#[allow(clippy::module_inception)]
mod bus;
mod consumer;
mod endpoint;
mod filters;

pub use bus::{Bus, BusBuilder, BusState};
pub(crate) use bus::BusInner;
pub use consumer::{Consumer, ConsumerOptions};
