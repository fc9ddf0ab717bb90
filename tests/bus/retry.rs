//! In-process retry.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sourced_bus::{BusConfig, ConsumeContext, ConsumeError, RetryPolicy};

use crate::support::{bus, bus_with, eventually, SubmitOrder, SUBMIT_ORDER_QUEUE};

fn error_queue() -> String {
    format!("{SUBMIT_ORDER_QUEUE}_error")
}

#[tokio::test]
async fn exhausted_retry_invokes_consumer_limit_plus_one_times() {
    let (bus, transport) = bus();
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    bus.add_handler_with(
        move |_context: ConsumeContext<SubmitOrder>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ConsumeError::Rejected("always".into()))
            }
        },
        |options| {
            options.use_retry(RetryPolicy::immediate(2));
        },
    )
    .unwrap();
    bus.start().await.unwrap();
    bus.publish(&SubmitOrder::new("o-1")).await.unwrap();

    let errors = transport
        .wait_for_messages(&error_queue(), 1, Duration::from_secs(2))
        .await;
    assert_eq!(errors.len(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn transient_failure_recovers_without_fault() {
    let (bus, transport) = bus();
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    bus.add_handler_with(
        move |_context: ConsumeContext<SubmitOrder>| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(ConsumeError::Rejected("warming up".into()));
                }
                Ok(())
            }
        },
        |options| {
            options.use_retry(RetryPolicy::interval(3, Duration::from_millis(5)));
        },
    )
    .unwrap();
    bus.start().await.unwrap();
    bus.publish(&SubmitOrder::new("o-2")).await.unwrap();

    assert!(eventually(|| attempts.load(Ordering::SeqCst) == 3).await);
    bus.stop().await.unwrap();

    assert_eq!(transport.message_count(&error_queue()), 0);
    assert_eq!(transport.message_count(&format!("{SUBMIT_ORDER_QUEUE}_fault")), 0);
}

#[tokio::test]
async fn configured_retry_applies_to_every_consumer() {
    let (bus, transport) = bus_with(BusConfig::new().with_retry(1, Duration::ZERO));
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    bus.add_handler(move |_context: ConsumeContext<SubmitOrder>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ConsumeError::NotFound("order".into()))
        }
    })
    .unwrap();
    bus.start().await.unwrap();
    bus.publish(&SubmitOrder::new("o-3")).await.unwrap();

    transport
        .wait_for_messages(&error_queue(), 1, Duration::from_secs(2))
        .await;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    bus.stop().await.unwrap();
}
