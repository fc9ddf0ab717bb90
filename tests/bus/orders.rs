//! A consumer that publishes follow-up events.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sourced_bus::{ConsumeContext, ConsumeError, Consumer};
use uuid::Uuid;

use crate::support::{bus, eventually, OrderSubmitted, SubmitOrder, SUBMIT_ORDER_QUEUE};

#[derive(Default)]
struct SubmitOrderConsumer;

#[async_trait]
impl Consumer<SubmitOrder> for SubmitOrderConsumer {
    async fn consume(&self, context: &ConsumeContext<SubmitOrder>) -> Result<(), ConsumeError> {
        if context.message().quantity == 0 {
            return Err(ConsumeError::Rejected("empty order".into()));
        }
        context
            .publish(&OrderSubmitted {
                order_id: context.message().order_id.clone(),
            })
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Observed {
    event: OrderSubmitted,
    conversation_id: Option<Uuid>,
    source: Option<String>,
}

#[tokio::test]
async fn follow_up_event_joins_the_order_conversation() {
    let (bus, _transport) = bus();
    let observed = Arc::new(Mutex::new(Vec::new()));

    bus.add_consumer::<SubmitOrder, SubmitOrderConsumer>(|_| {})
        .unwrap();
    let sink = observed.clone();
    bus.add_handler(move |context: ConsumeContext<OrderSubmitted>| {
        let sink = sink.clone();
        async move {
            let receive = context.receive_context();
            sink.lock().push(Observed {
                event: context.message().clone(),
                conversation_id: receive.conversation_id(),
                source: receive.source_address().map(|address| address.to_string()),
            });
            Ok(())
        }
    })
    .unwrap();
    bus.start().await.unwrap();

    let message_id = Uuid::new_v4();
    bus.publish_with(&SubmitOrder::new("o-9"), |context| {
        context.set_message_id(message_id);
    })
    .await
    .unwrap();

    assert!(eventually(|| observed.lock().len() == 1).await);
    let seen = observed.lock()[0].clone();
    assert_eq!(seen.event.order_id, "o-9");
    assert_eq!(seen.conversation_id, Some(message_id));
    assert_eq!(
        seen.source.as_deref(),
        Some(format!("queue:{SUBMIT_ORDER_QUEUE}").as_str())
    );
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn rejected_order_publishes_nothing() {
    let (bus, transport) = bus();
    bus.add_consumer::<SubmitOrder, SubmitOrderConsumer>(|_| {})
        .unwrap();
    bus.start().await.unwrap();

    let mut order = SubmitOrder::new("o-10");
    order.quantity = 0;
    bus.publish(&order).await.unwrap();

    let errors = transport
        .wait_for_messages(
            &format!("{SUBMIT_ORDER_QUEUE}_error"),
            1,
            std::time::Duration::from_secs(2),
        )
        .await;
    assert_eq!(errors.len(), 1);
    assert!(transport
        .exchange_names()
        .iter()
        .all(|exchange| exchange != "Orders.Contracts:OrderSubmitted"));
    bus.stop().await.unwrap();
}
