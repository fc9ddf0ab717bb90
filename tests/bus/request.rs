//! Request/response through temporary reply queues.

use std::time::Duration;

use sourced_bus::{
    Address, Bus, CancellationToken, ConsumeContext, ConsumeError, InMemoryTransport, RequestError,
    RequestOptions, Response2,
};

use crate::support::{bus, eventually, has_reply_queues, CheckOrder, OrderNotFound, OrderStatus};

fn check(order_id: &str) -> CheckOrder {
    CheckOrder {
        order_id: order_id.to_string(),
    }
}

/// Replies `OrderNotFound` for `missing`, fails for `broken`, and
/// `OrderStatus` otherwise.
async fn order_desk() -> (Bus, InMemoryTransport) {
    let (bus, transport) = bus();
    bus.add_handler(|context: ConsumeContext<CheckOrder>| async move {
        let order_id = context.message().order_id.clone();
        match order_id.as_str() {
            "missing" => context.respond(&OrderNotFound { order_id }).await?,
            "broken" => return Err(ConsumeError::Rejected("order ledger corrupt".into())),
            "silent" => {}
            _ => {
                context
                    .respond(&OrderStatus {
                        order_id,
                        status: "accepted".into(),
                    })
                    .await?
            }
        }
        Ok::<_, ConsumeError>(())
    })
    .unwrap();
    bus.start().await.unwrap();
    (bus, transport)
}

#[tokio::test]
async fn request_returns_response() {
    let (bus, transport) = order_desk().await;
    let client = bus.create_request_client::<CheckOrder>();

    let response = client
        .get_response::<OrderStatus>(&check("o-1"))
        .await
        .unwrap();

    assert_eq!(response.message().status, "accepted");
    assert!(response.context().correlation_id().is_some());
    assert!(!has_reply_queues(&transport));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn request_to_explicit_address() {
    let (bus, _transport) = order_desk().await;
    let client = bus.create_request_client_for::<CheckOrder>(
        Address::queue("check-order-consumer").unwrap(),
    );

    let response = client
        .get_response::<OrderStatus>(&check("o-2"))
        .await
        .unwrap();
    assert_eq!(response.message().order_id, "o-2");
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn either_of_two_response_types() {
    let (bus, _transport) = order_desk().await;
    let client = bus.create_request_client::<CheckOrder>();

    let found = client
        .get_response2::<OrderStatus, OrderNotFound>(&check("o-3"), RequestOptions::new())
        .await
        .unwrap();
    assert!(matches!(found, Response2::First(ref r) if r.message().order_id == "o-3"));

    let missing = client
        .get_response2::<OrderStatus, OrderNotFound>(&check("missing"), RequestOptions::new())
        .await
        .unwrap();
    assert!(matches!(missing, Response2::Second(_)));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn faulting_consumer_fails_the_request() {
    let (bus, transport) = order_desk().await;
    let client = bus.create_request_client::<CheckOrder>();

    let err = client
        .get_response::<OrderStatus>(&check("broken"))
        .await
        .unwrap_err();

    let fault = err.fault().expect("fault record");
    assert_eq!(
        fault.exception_type(),
        Some("sourced_bus::ConsumeError::Rejected")
    );
    assert_eq!(fault.exceptions[0].message, "rejected: order ledger corrupt");
    assert!(!has_reply_queues(&transport));
    assert_eq!(transport.message_count("check-order-consumer_fault"), 0);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn request_times_out_and_tears_down_reply_queue() {
    let (bus, transport) = order_desk().await;
    let client = bus
        .create_request_client::<CheckOrder>()
        .with_timeout(Duration::from_millis(100));

    let err = client
        .get_response::<OrderStatus>(&check("silent"))
        .await
        .unwrap_err();

    assert!(matches!(err, RequestError::Timeout(timeout) if timeout == Duration::from_millis(100)));
    assert!(!has_reply_queues(&transport));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn cancelled_request_releases_reply_queue() {
    let (bus, transport) = order_desk().await;
    let client = bus.create_request_client::<CheckOrder>();
    let token = CancellationToken::new();

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let options = RequestOptions::new()
        .with_timeout(Duration::from_secs(10))
        .with_cancellation(token);
    let err = client
        .get_response_with::<OrderStatus>(&check("silent"), options)
        .await
        .unwrap_err();

    assert!(matches!(err, RequestError::Cancelled));
    assert!(!has_reply_queues(&transport));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn dropped_request_future_releases_reply_queue() {
    let (bus, transport) = order_desk().await;
    let client = bus.create_request_client::<CheckOrder>();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        client.get_response::<OrderStatus>(&check("silent")),
    )
    .await;

    assert!(abandoned.is_err());
    assert!(eventually(|| !has_reply_queues(&transport)).await);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn repeated_requests_do_not_grow_sender_cache() {
    let (bus, transport) = order_desk().await;
    let client = bus.create_request_client::<CheckOrder>();

    client.get_response::<OrderStatus>(&check("o-0")).await.unwrap();
    let warmed = transport.cached_senders();

    for n in 1..=25 {
        client
            .get_response::<OrderStatus>(&check(&format!("o-{n}")))
            .await
            .unwrap();
    }
    assert_eq!(transport.cached_senders(), warmed);
    assert!(!has_reply_queues(&transport));
    bus.stop().await.unwrap();
}
