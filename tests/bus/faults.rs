//! Fault records and error-queue routing.

use std::time::Duration;

use serde_json::{json, Value};
use sourced_bus::context::headers;
use sourced_bus::serialization::decode;
use sourced_bus::{ConsumeContext, ConsumeError, Fault, Message, SendContext};

use crate::support::{bus, SubmitOrder, SUBMIT_ORDER_QUEUE};

#[derive(Debug, thiserror::Error)]
#[error("inventory service unavailable")]
struct InventoryUnavailable;

fn error_queue() -> String {
    format!("{SUBMIT_ORDER_QUEUE}_error")
}

fn fault_queue() -> String {
    format!("{SUBMIT_ORDER_QUEUE}_fault")
}

async fn failing_bus() -> (sourced_bus::Bus, sourced_bus::InMemoryTransport) {
    let (bus, transport) = bus();
    bus.add_handler(|_context: ConsumeContext<SubmitOrder>| async {
        Err::<(), _>(ConsumeError::other(InventoryUnavailable))
    })
    .unwrap();
    bus.start().await.unwrap();
    (bus, transport)
}

#[tokio::test]
async fn terminal_failure_moves_original_to_error_queue() {
    let (bus, transport) = failing_bus().await;
    let message_id = uuid::Uuid::new_v4();
    bus.publish_with(&SubmitOrder::new("o-1"), |context| {
        context.set_message_id(message_id);
    })
    .await
    .unwrap();

    let errors = transport
        .wait_for_messages(&error_queue(), 1, Duration::from_secs(2))
        .await;
    assert_eq!(errors.len(), 1);

    let frame = &errors[0];
    let exception_type = frame.headers.get(headers::EXCEPTION_TYPE).unwrap();
    assert!(exception_type.ends_with("InventoryUnavailable"), "{exception_type}");
    assert_eq!(
        frame.headers.get(headers::EXCEPTION_MESSAGE),
        Some("inventory service unavailable")
    );
    assert!(frame.headers.contains(headers::EXCEPTION_STACKTRACE));
    assert_eq!(frame.headers.get(headers::REASON), Some(headers::REASON_FAULT));
    assert_eq!(frame.headers.get(headers::REDELIVERY_COUNT), Some("0"));
    assert_eq!(
        frame.headers.get(headers::HOST_MACHINE_NAME),
        Some(bus.host().machine_name.as_str())
    );

    let original = decode(frame, None).unwrap();
    assert_eq!(original.message_id, Some(message_id));
    assert_eq!(original.payload, json!({ "order_id": "o-1", "quantity": 1 }));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn terminal_failure_sends_fault_record() {
    let (bus, transport) = failing_bus().await;
    let message_id = uuid::Uuid::new_v4();
    bus.publish_with(&SubmitOrder::new("o-2"), |context| {
        context.set_message_id(message_id);
    })
    .await
    .unwrap();

    let faults = transport
        .wait_for_messages(&fault_queue(), 1, Duration::from_secs(2))
        .await;
    assert_eq!(faults.len(), 1);

    let decoded = decode(&faults[0], None).unwrap();
    assert_eq!(decoded.message_types, Fault::<SubmitOrder>::message_types());
    assert_eq!(decoded.correlation_id, Some(message_id));

    let fault: Fault<Value> = serde_json::from_value(decoded.payload).unwrap();
    assert_eq!(fault.fault_message_id, Some(message_id));
    assert_eq!(fault.fault_message_types, vec![SubmitOrder::message_urn()]);
    assert_eq!(fault.exceptions[0].message, "inventory service unavailable");
    assert!(fault.host.is_some());

    let typed = fault.into_typed::<SubmitOrder>().unwrap();
    assert_eq!(typed.message, SubmitOrder::new("o-2"));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_redelivery_count_is_reset() {
    let (bus, transport) = failing_bus().await;

    let mut context = SendContext::new(&SubmitOrder::new("o-3")).unwrap();
    context.headers_mut().set(headers::REDELIVERY_COUNT, "many");
    transport.inject(SUBMIT_ORDER_QUEUE, context.serialize().unwrap());

    let errors = transport
        .wait_for_messages(&error_queue(), 1, Duration::from_secs(2))
        .await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].headers.get(headers::REDELIVERY_COUNT), Some("0"));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn undecodable_payload_goes_to_error_queue() {
    let (bus, transport) = bus();
    bus.add_handler(|_context: ConsumeContext<SubmitOrder>| async { Ok(()) })
        .unwrap();
    bus.start().await.unwrap();

    let context = SendContext::from_value(json!({ "sku": 42 }), SubmitOrder::message_types());
    transport.inject(SUBMIT_ORDER_QUEUE, context.serialize().unwrap());

    let errors = transport
        .wait_for_messages(&error_queue(), 1, Duration::from_secs(2))
        .await;
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].headers.get(headers::EXCEPTION_TYPE),
        Some("sourced_bus::BusError::Serialization")
    );
    assert_eq!(transport.message_count(&fault_queue()), 0);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn unregistered_type_on_endpoint_is_skipped() {
    let (bus, transport) = bus();
    bus.add_handler(|_context: ConsumeContext<SubmitOrder>| async { Ok(()) })
        .unwrap();
    bus.start().await.unwrap();

    let stray = SendContext::from_value(json!({}), vec!["urn:message:Orders.Contracts:Unknown".into()]);
    transport.inject(SUBMIT_ORDER_QUEUE, stray.serialize().unwrap());

    let skipped = transport
        .wait_for_messages(&format!("{SUBMIT_ORDER_QUEUE}_skipped"), 1, Duration::from_secs(2))
        .await;
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].headers.get(headers::REASON), Some(headers::REASON_SKIPPED));
    assert_eq!(transport.message_count(&error_queue()), 0);
    bus.stop().await.unwrap();
}
