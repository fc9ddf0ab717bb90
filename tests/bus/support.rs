//! Test domain: order contracts and helpers shared by the bus tests.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sourced_bus::{Bus, BusConfig, InMemoryTransport, Message};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Message)]
#[message(namespace = "Orders.Contracts")]
pub struct SubmitOrder {
    pub order_id: String,
    pub quantity: u32,
}

impl SubmitOrder {
    pub fn new(order_id: &str) -> Self {
        Self {
            order_id: order_id.to_string(),
            quantity: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Message)]
#[message(namespace = "Orders.Contracts")]
pub struct OrderSubmitted {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Message)]
#[message(namespace = "Orders.Contracts")]
pub struct CheckOrder {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Message)]
#[message(namespace = "Orders.Contracts")]
pub struct OrderStatus {
    pub order_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Message)]
#[message(namespace = "Orders.Contracts")]
pub struct OrderNotFound {
    pub order_id: String,
}

/// Queue the default formatter derives for `SubmitOrder` consumers.
pub const SUBMIT_ORDER_QUEUE: &str = "submit-order-consumer";

/// A bus over a fresh in-memory broker, plus a handle for inspection.
pub fn bus() -> (Bus, InMemoryTransport) {
    bus_with(BusConfig::default())
}

pub fn bus_with(config: BusConfig) -> (Bus, InMemoryTransport) {
    let transport = InMemoryTransport::new();
    let bus = Bus::builder(transport.clone()).with_config(config).build();
    (bus, transport)
}

/// Poll `condition` for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Whether any request reply queue is still declared.
pub fn has_reply_queues(transport: &InMemoryTransport) -> bool {
    transport.queue_names().iter().any(|queue| queue.contains("_bus_"))
}
