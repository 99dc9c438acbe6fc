use super::*;
use crate::dlq::ChannelDeadLetterPublisher;
use crate::storage::{AttributeValue, Item};
use crate::stream::EventType;

fn make_record(event_id: &str) -> Arc<ChangeRecord> {
    let keys = Item::from([("pk".to_string(), AttributeValue::string("ACCOUNT#a-1"))]);
    Arc::new(ChangeRecord {
        event_id: event_id.to_string(),
        table: "Subscriptions".to_string(),
        event_type: EventType::Insert,
        keys: keys.clone(),
        new_image: Some(keys),
        old_image: None,
    })
}

fn config(visibility_timeout_secs: u64, max_receive_count: u32) -> QueueConfig {
    QueueConfig {
        visibility_timeout_secs,
        max_receive_count,
        batch_size: 10,
    }
}

#[tokio::test]
async fn test_send_receive_ack() {
    let queue = ChannelQueue::new(&config(30, 3));
    queue.send("h", make_record("e-1")).await.unwrap();
    queue.send("other", make_record("e-2")).await.unwrap();

    let messages = queue.receive("h", 10).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].record.event_id, "e-1");
    assert_eq!(messages[0].receive_count, 1);
    assert_eq!(queue.pending().await, 2);

    queue.ack(&messages[0]).await.unwrap();
    assert_eq!(queue.pending().await, 1);
    assert!(queue.ack(&messages[0]).await.is_err());
}

#[tokio::test]
async fn test_receive_respects_max_and_order() {
    let queue = ChannelQueue::new(&config(30, 3));
    for id in ["e-1", "e-2", "e-3"] {
        queue.send("h", make_record(id)).await.unwrap();
    }

    let first = queue.receive("h", 2).await.unwrap();
    let ids: Vec<_> = first.iter().map(|m| m.record.event_id.as_str()).collect();
    assert_eq!(ids, vec!["e-1", "e-2"]);

    let second = queue.receive("h", 2).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].record.event_id, "e-3");
}

#[tokio::test]
async fn test_in_flight_message_is_invisible() {
    let queue = ChannelQueue::new(&config(30, 3));
    queue.send("h", make_record("e-1")).await.unwrap();

    assert_eq!(queue.receive("h", 10).await.unwrap().len(), 1);
    assert!(queue.receive("h", 10).await.unwrap().is_empty());
    assert_eq!(queue.visible().await, 0);
    assert_eq!(queue.pending().await, 1);
}

#[tokio::test]
async fn test_nack_waits_for_visibility_timeout() {
    let queue = ChannelQueue::new(&config(30, 3));
    queue.send("h", make_record("e-1")).await.unwrap();

    let messages = queue.receive("h", 10).await.unwrap();
    queue.nack(&messages[0], "boom").await.unwrap();

    assert!(queue.receive("h", 10).await.unwrap().is_empty());
    assert_eq!(queue.pending().await, 1);
}

#[tokio::test]
async fn test_nack_redelivers_with_count() {
    let queue = ChannelQueue::new(&config(0, 3));
    queue.send("h", make_record("e-1")).await.unwrap();

    let first = queue.receive("h", 10).await.unwrap();
    queue.nack(&first[0], "boom").await.unwrap();

    let second = queue.receive("h", 10).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message_id, first[0].message_id);
    assert_eq!(second[0].receive_count, 2);
}

#[tokio::test]
async fn test_exhausted_message_is_dead_lettered() {
    let (publisher, mut dead_letters) = ChannelDeadLetterPublisher::new();
    let queue = ChannelQueue::with_dead_letters(&config(0, 2), Arc::new(publisher));
    queue.send("Account:accountAudit", make_record("e-1")).await.unwrap();

    for _ in 0..2 {
        let messages = queue.receive("Account:accountAudit", 10).await.unwrap();
        assert_eq!(messages.len(), 1);
        queue.nack(&messages[0], "boom").await.unwrap();
    }

    assert_eq!(queue.pending().await, 0);
    let dead_letter = dead_letters.recv().await.unwrap();
    assert_eq!(dead_letter.handler_id, "Account:accountAudit");
    assert_eq!(dead_letter.receive_count, 2);
    assert_eq!(dead_letter.record.event_id, "e-1");
    assert_eq!(dead_letter.metadata.get("table"), Some(&"Subscriptions".to_string()));
}

#[tokio::test]
async fn test_unacked_message_returns_after_timeout() {
    let queue = ChannelQueue::new(&config(0, 3));
    queue.send("h", make_record("e-1")).await.unwrap();

    let first = queue.receive("h", 10).await.unwrap();
    // Never acked: with a zero timeout it is immediately receivable again.
    let second = queue.receive("h", 10).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message_id, first[0].message_id);
    assert_eq!(second[0].receive_count, 2);
}
