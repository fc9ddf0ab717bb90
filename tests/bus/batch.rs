//! Batch messages.

use std::sync::Arc;

use parking_lot::Mutex;
use sourced_bus::serialization::decode;
use sourced_bus::{Batch, ConsumeContext, Message};

use crate::support::{bus, eventually, SubmitOrder};

#[tokio::test]
async fn batch_is_consumed_as_one_message() {
    let (bus, transport) = bus();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    bus.add_handler(move |context: ConsumeContext<Batch<SubmitOrder>>| {
        let sink = sink.clone();
        async move {
            let ids: Vec<String> = context.message().iter().map(|o| o.order_id.clone()).collect();
            sink.lock().push(ids);
            Ok(())
        }
    })
    .unwrap();
    bus.start().await.unwrap();

    let entity = bus.topology().entity_name::<Batch<SubmitOrder>>();
    assert_eq!(entity, "SourcedBus:Batch[[Orders.Contracts:SubmitOrder]]");
    assert_eq!(transport.bindings(&entity).len(), 1);

    let batch = Batch::new(vec![SubmitOrder::new("o-1"), SubmitOrder::new("o-2")]);
    bus.publish(&batch).await.unwrap();

    assert!(eventually(|| seen.lock().len() == 1).await);
    assert_eq!(seen.lock()[0], vec!["o-1".to_string(), "o-2".to_string()]);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn batch_frame_lists_batch_then_element_type() {
    let (bus, transport) = bus();
    let entity = bus.topology().entity_name::<Batch<SubmitOrder>>();
    transport.declare_queue("batch-audit");
    transport.bind(&entity, "batch-audit");

    bus.publish(&Batch::new(vec![SubmitOrder::new("o-3")])).await.unwrap();

    let frames = transport.messages("batch-audit");
    assert_eq!(frames.len(), 1);
    let decoded = decode(&frames[0], None).unwrap();
    assert_eq!(
        decoded.message_types,
        vec![Batch::<SubmitOrder>::message_urn(), SubmitOrder::message_urn()]
    );
    assert!(decoded.payload.is_array());
}
