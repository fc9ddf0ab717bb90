//! Publish, send and consume.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use sourced_bus::context::headers;
use sourced_bus::{Address, BusError, ConsumeContext, ConsumeError, Message, SendContext};

use crate::support::{bus, eventually, SubmitOrder, SUBMIT_ORDER_QUEUE};

#[tokio::test]
async fn published_message_reaches_handler() {
    let (bus, transport) = bus();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    bus.add_handler(move |context: ConsumeContext<SubmitOrder>| {
        let sink = sink.clone();
        async move {
            sink.lock().push(context.message().clone());
            Ok(())
        }
    })
    .unwrap();
    bus.start().await.unwrap();

    assert_eq!(
        transport.bindings("Orders.Contracts:SubmitOrder"),
        vec![SUBMIT_ORDER_QUEUE.to_string()]
    );

    bus.publish(&SubmitOrder::new("o-1")).await.unwrap();

    assert!(eventually(|| seen.lock().len() == 1).await);
    assert_eq!(seen.lock()[0], SubmitOrder::new("o-1"));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn second_registration_for_a_type_is_ignored() {
    let (bus, _transport) = bus();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    for counter in [first.clone(), second.clone()] {
        bus.add_handler(move |_context: ConsumeContext<SubmitOrder>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();
    }
    assert_eq!(bus.registered_message_types(), vec![SubmitOrder::message_urn()]);

    bus.start().await.unwrap();
    bus.publish(&SubmitOrder::new("o-1")).await.unwrap();

    assert!(eventually(|| first.load(Ordering::SeqCst) == 1).await);
    assert_eq!(second.load(Ordering::SeqCst), 0);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn send_targets_one_queue() {
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

    let address = Address::queue(SUBMIT_ORDER_QUEUE).unwrap();
    bus.send(&address, &SubmitOrder::new("o-2")).await.unwrap();

    assert!(eventually(|| handled.load(Ordering::SeqCst) == 1).await);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn publish_init_lifts_header_keys() {
    let (bus, _transport) = bus();
    let seen = Arc::new(Mutex::new(None));

    let sink = seen.clone();
    bus.add_handler(move |context: ConsumeContext<SubmitOrder>| {
        let sink = sink.clone();
        async move {
            let tenant = context.headers().get("Tenant").map(str::to_string);
            *sink.lock() = Some((context.message().clone(), tenant));
            Ok(())
        }
    })
    .unwrap();
    bus.start().await.unwrap();

    bus.publish_init::<SubmitOrder>(json!({
        "order_id": "o-3",
        "quantity": 4,
        "__Header_Tenant": "acme",
    }))
    .await
    .unwrap();

    assert!(eventually(|| seen.lock().is_some()).await);
    let (message, tenant) = seen.lock().clone().unwrap();
    assert_eq!(message.quantity, 4);
    assert_eq!(tenant.as_deref(), Some("acme"));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn forward_preserves_identity() {
    let (bus, transport) = bus();
    transport.declare_queue("audit");

    bus.add_handler(|context: ConsumeContext<SubmitOrder>| async move {
        let audit = Address::queue("audit").map_err(BusError::from)?;
        context.forward(&audit).await?;
        Ok::<_, ConsumeError>(())
    })
    .unwrap();
    bus.start().await.unwrap();

    let message_id = uuid::Uuid::new_v4();
    bus.publish_with(&SubmitOrder::new("o-4"), |context| {
        context.set_message_id(message_id);
    })
    .await
    .unwrap();

    let forwarded = transport
        .wait_for_messages("audit", 1, std::time::Duration::from_secs(2))
        .await;
    assert_eq!(forwarded.len(), 1);
    let decoded = sourced_bus::serialization::decode(&forwarded[0], None).unwrap();
    assert_eq!(decoded.message_id, Some(message_id));
    assert_eq!(
        decoded.headers.get(headers::FORWARDER_ADDRESS),
        Some("queue:submit-order-consumer")
    );
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn forward_drops_host_and_error_annotations() {
    let (bus, transport) = bus();
    transport.declare_queue("audit");

    bus.add_handler(|context: ConsumeContext<SubmitOrder>| async move {
        let audit = Address::queue("audit").map_err(BusError::from)?;
        context.forward(&audit).await?;
        Ok::<_, ConsumeError>(())
    })
    .unwrap();
    bus.start().await.unwrap();

    // A frame replayed from an error queue still carries its annotations
    let mut frame = SendContext::new(&SubmitOrder::new("o-6"))
        .unwrap()
        .serialize()
        .unwrap();
    frame.headers.set(headers::EXCEPTION_TYPE, "InventoryUnavailable");
    frame.headers.set(headers::EXCEPTION_MESSAGE, "inventory service unavailable");
    frame.headers.set(headers::REASON, headers::REASON_FAULT);
    frame.headers.set(headers::HOST_MACHINE_NAME, "upstream");
    frame.headers.set("Tenant", "acme");
    transport.inject(SUBMIT_ORDER_QUEUE, frame);

    let forwarded = transport
        .wait_for_messages("audit", 1, std::time::Duration::from_secs(2))
        .await;
    assert_eq!(forwarded.len(), 1);
    let outbound = &forwarded[0].headers;
    assert!(!outbound.contains(headers::HOST_MACHINE_NAME));
    assert!(!outbound.contains(headers::EXCEPTION_TYPE));
    assert!(!outbound.contains(headers::EXCEPTION_MESSAGE));
    assert!(!outbound.contains(headers::REASON));

    let decoded = sourced_bus::serialization::decode(&forwarded[0], None).unwrap();
    assert_eq!(decoded.headers.get("Tenant"), Some("acme"));
    assert!(!decoded.headers.contains(headers::HOST_MACHINE_NAME));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn respond_without_response_address_fails() {
    let (bus, _transport) = bus();
    let outcome = Arc::new(Mutex::new(None));

    let sink = outcome.clone();
    bus.add_handler(move |context: ConsumeContext<SubmitOrder>| {
        let sink = sink.clone();
        async move {
            let result = context.respond(&SubmitOrder::new("echo")).await;
            *sink.lock() = Some(matches!(result, Err(BusError::NoResponseAddress(_))));
            Ok(())
        }
    })
    .unwrap();
    bus.start().await.unwrap();
    bus.publish(&SubmitOrder::new("o-5")).await.unwrap();

    assert!(eventually(|| outcome.lock().is_some()).await);
    assert_eq!(*outcome.lock(), Some(true));
    bus.stop().await.unwrap();
}
