//! Start/stop, registration rules and resolved consumers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sourced_bus::{
    Bus, BusError, BusState, ConsumeContext, ConsumeError, Consumer, InMemoryTransport,
    ServiceRegistry,
};

use crate::support::{bus, eventually, SubmitOrder, SUBMIT_ORDER_QUEUE};

#[derive(Default)]
struct NoopConsumer;

#[async_trait]
impl Consumer<SubmitOrder> for NoopConsumer {
    async fn consume(&self, _context: &ConsumeContext<SubmitOrder>) -> Result<(), ConsumeError> {
        Ok(())
    }
}

#[derive(Default)]
struct AuditConsumer;

#[async_trait]
impl Consumer<SubmitOrder> for AuditConsumer {
    async fn consume(&self, _context: &ConsumeContext<SubmitOrder>) -> Result<(), ConsumeError> {
        Ok(())
    }
}

/// Counts messages into a shared counter; built by the resolver.
struct CountingConsumer {
    handled: Arc<AtomicUsize>,
}

#[async_trait]
impl Consumer<SubmitOrder> for CountingConsumer {
    async fn consume(&self, _context: &ConsumeContext<SubmitOrder>) -> Result<(), ConsumeError> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let (bus, transport) = bus();
    bus.add_consumer::<SubmitOrder, NoopConsumer>(|_| {}).unwrap();
    assert_eq!(bus.state(), BusState::Configured);

    bus.start().await.unwrap();
    bus.start().await.unwrap();
    assert_eq!(bus.state(), BusState::Started);
    assert!(bus.topology().is_frozen());
    for queue in ["", "_error", "_fault", "_skipped"] {
        let name = format!("{SUBMIT_ORDER_QUEUE}{queue}");
        assert!(transport.queue_exists(&name), "{name} missing");
    }

    bus.stop().await.unwrap();
    bus.stop().await.unwrap();
    assert_eq!(bus.state(), BusState::Stopped);
}

#[tokio::test]
async fn stopped_bus_can_restart() {
    let (bus, _transport) = bus();
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    bus.add_handler(move |_context: ConsumeContext<SubmitOrder>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .unwrap();

    bus.start().await.unwrap();
    bus.stop().await.unwrap();
    bus.publish(&SubmitOrder::new("queued-while-stopped")).await.unwrap();
    bus.start().await.unwrap();

    assert!(eventually(|| handled.load(Ordering::SeqCst) == 1).await);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn registration_after_start_is_rejected() {
    let (bus, _transport) = bus();
    bus.start().await.unwrap();

    let result = bus.add_consumer::<SubmitOrder, NoopConsumer>(|_| {});
    assert!(matches!(
        result,
        Err(BusError::InvalidState { state: "started", .. })
    ));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn factory_consumer_needs_a_resolver() {
    let bus = Bus::new(InMemoryTransport::new());
    let result = bus.add_consumer_factory::<SubmitOrder, CountingConsumer>(|_| {});
    assert!(matches!(result, Err(BusError::Configuration(_))));
    assert!(bus.registered_message_types().is_empty());
}

#[tokio::test]
async fn factory_consumer_is_resolved_per_message() {
    let handled = Arc::new(AtomicUsize::new(0));
    let created = Arc::new(AtomicUsize::new(0));

    let registry = {
        let handled = handled.clone();
        let created = created.clone();
        ServiceRegistry::new().with_scoped(move |_scope| {
            created.fetch_add(1, Ordering::SeqCst);
            CountingConsumer {
                handled: handled.clone(),
            }
        })
    };
    let bus = Bus::builder(InMemoryTransport::new())
        .with_resolver(registry)
        .build();
    bus.add_consumer_factory::<SubmitOrder, CountingConsumer>(|_| {})
        .unwrap();
    bus.start().await.unwrap();

    bus.publish(&SubmitOrder::new("o-1")).await.unwrap();
    bus.publish(&SubmitOrder::new("o-2")).await.unwrap();

    assert!(eventually(|| handled.load(Ordering::SeqCst) == 2).await);
    assert_eq!(created.load(Ordering::SeqCst), 2);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn explicit_queue_and_concurrency_are_honored() {
    let (bus, transport) = bus();
    bus.add_consumer::<SubmitOrder, NoopConsumer>(|options| {
        options.queue("orders-intake").concurrency_limit(2);
    })
    .unwrap();
    bus.start().await.unwrap();

    assert!(transport.queue_exists("orders-intake"));
    assert!(!transport.queue_exists(SUBMIT_ORDER_QUEUE));
    assert_eq!(
        transport.bindings("Orders.Contracts:SubmitOrder"),
        vec!["orders-intake".to_string()]
    );
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_registration_keeps_one_consumer_per_type() {
    let (bus, transport) = bus();

    std::thread::scope(|scope| {
        for n in 0..8 {
            let bus = bus.clone();
            scope.spawn(move || {
                if n % 2 == 0 {
                    bus.add_consumer::<SubmitOrder, NoopConsumer>(|_| {}).unwrap();
                } else {
                    bus.add_consumer::<SubmitOrder, AuditConsumer>(|_| {}).unwrap();
                }
            });
        }
    });

    assert_eq!(bus.topology().consumers().len(), 1);
    bus.start().await.unwrap();
    assert_eq!(transport.bindings("Orders.Contracts:SubmitOrder").len(), 1);
    bus.stop().await.unwrap();
}

#[test]
fn logging_init_installs_once() {
    sourced_bus::logging::init_with_filter("sourced_bus=warn");
    assert!(!sourced_bus::logging::init());
    assert!(!sourced_bus::logging::init_with_filter("debug"));
}
