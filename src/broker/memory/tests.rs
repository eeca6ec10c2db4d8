use super::*;
use std::time::Duration;

async fn next_delivery(stream: &mut DeliveryStream) -> Delivery {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("timed out waiting for delivery")
        .expect("stream ended")
        .expect("delivery error")
}

async fn broker_with_queue(queue: &str, exchange: &str, pattern: &str) -> InMemoryBroker {
    let broker = InMemoryBroker::new();
    broker.declare_exchange(exchange, true).await.unwrap();
    broker.declare_queue(queue, &QueueOptions::default()).await.unwrap();
    broker.bind_queue(queue, exchange, pattern).await.unwrap();
    broker
}

#[test]
fn test_topic_matches_exact() {
    assert!(topic_matches("acme.saphir.employee", "acme.saphir.employee"));
    assert!(!topic_matches("acme.saphir.employee", "acme.saphir.booking"));
}

#[test]
fn test_topic_matches_single_wildcard() {
    assert!(topic_matches("*.*.employee", "acme.saphir.employee"));
    assert!(topic_matches("acme.*.employee", "acme.guard.employee"));
    assert!(!topic_matches("acme.*.employee", "beta.guard.employee"));
    assert!(!topic_matches("acme.saphir.*", "acme.saphir"));
    assert!(!topic_matches("acme.saphir.*", "acme.saphir.employee.created"));
}

#[test]
fn test_topic_matches_hash() {
    assert!(topic_matches("#", "anything.at.all"));
    assert!(topic_matches("acme.#", "acme"));
    assert!(topic_matches("acme.#.employee", "acme.a.b.employee"));
    assert!(!topic_matches("beta.#", "acme.saphir"));
}

#[tokio::test]
async fn test_declarations_are_idempotent() {
    let broker = InMemoryBroker::new();
    broker.declare_exchange("acme", true).await.unwrap();
    broker.declare_exchange("acme", true).await.unwrap();
    broker.declare_queue("q", &QueueOptions::default()).await.unwrap();
    broker.declare_queue("q", &QueueOptions::default()).await.unwrap();
    broker.bind_queue("q", "acme", "#").await.unwrap();
    broker.bind_queue("q", "acme", "#").await.unwrap();

    assert_eq!(broker.exchanges().await, vec!["acme".to_string()]);
    assert_eq!(broker.queues().await, vec!["q".to_string()]);
    assert_eq!(broker.queue_bindings().await.len(), 1);
}

#[tokio::test]
async fn test_redeclare_with_different_options_fails() {
    let broker = InMemoryBroker::new();
    broker.declare_queue("q", &QueueOptions::default()).await.unwrap();
    let transient = QueueOptions {
        durable: false,
        ..Default::default()
    };
    let result = broker.declare_queue("q", &transient).await;
    assert!(matches!(result, Err(BrokerError::Declare(_))));
}

#[tokio::test]
async fn test_bind_requires_existing_resources() {
    let broker = InMemoryBroker::new();
    broker.declare_exchange("acme", true).await.unwrap();
    let result = broker.bind_exchange("employee", "acme", "acme.*.employee").await;
    assert!(matches!(result, Err(BrokerError::NotFound(_))));
    let result = broker.bind_queue("missing", "acme", "#").await;
    assert!(matches!(result, Err(BrokerError::NotFound(_))));
}

#[tokio::test]
async fn test_publish_to_missing_exchange_fails() {
    let broker = InMemoryBroker::new();
    let result = broker
        .publish("nowhere", "a.b.c", MessageProperties::default(), vec![])
        .await;
    assert!(matches!(result, Err(BrokerError::NotFound(_))));
}

#[tokio::test]
async fn test_routes_through_exchange_bindings() {
    let broker = InMemoryBroker::new();
    broker.declare_exchange("acme", true).await.unwrap();
    broker.declare_exchange("employee", true).await.unwrap();
    broker
        .bind_exchange("employee", "acme", "acme.*.employee")
        .await
        .unwrap();
    broker.declare_queue("registry", &QueueOptions::default()).await.unwrap();
    broker
        .bind_queue("registry", "employee", "*.*.employee")
        .await
        .unwrap();

    broker
        .publish("acme", "acme.saphir.employee", MessageProperties::default(), vec![1])
        .await
        .unwrap();
    broker
        .publish("acme", "acme.saphir.booking", MessageProperties::default(), vec![2])
        .await
        .unwrap();

    let published = broker.published().await;
    assert_eq!(published[0].routed_to, vec!["registry".to_string()]);
    assert!(published[1].routed_to.is_empty());
    assert_eq!(broker.ready_count("registry").await, 1);
}

#[tokio::test]
async fn test_consume_receives_queued_messages() {
    let broker = broker_with_queue("q", "acme", "acme.#").await;
    broker
        .publish("acme", "acme.saphir.employee", MessageProperties::default(), vec![7])
        .await
        .unwrap();

    let mut stream = broker.consume("q").await.unwrap();
    let delivery = next_delivery(&mut stream).await;

    assert_eq!(delivery.body, vec![7]);
    assert_eq!(delivery.routing_key, "acme.saphir.employee");
    assert!(!delivery.redelivered);
}

#[tokio::test]
async fn test_ack_records_settlement() {
    let broker = broker_with_queue("q", "acme", "#").await;
    let mut stream = broker.consume("q").await.unwrap();
    broker
        .publish("acme", "acme.saphir.employee", MessageProperties::default(), vec![])
        .await
        .unwrap();

    let delivery = next_delivery(&mut stream).await;
    let tag = delivery.delivery_tag;
    delivery.ack().await.unwrap();

    assert_eq!(
        broker.settlements().await,
        vec![Settlement::Ack { delivery_tag: tag }]
    );
    assert_eq!(broker.ready_count("q").await, 0);
}

#[tokio::test]
async fn test_nack_with_requeue_redelivers() {
    let broker = broker_with_queue("q", "acme", "#").await;
    let mut stream = broker.consume("q").await.unwrap();
    broker
        .publish("acme", "acme.saphir.employee", MessageProperties::default(), vec![3])
        .await
        .unwrap();

    let first = next_delivery(&mut stream).await;
    first.nack(true).await.unwrap();

    let second = next_delivery(&mut stream).await;
    assert!(second.redelivered);
    assert_eq!(second.body, vec![3]);
    second.ack().await.unwrap();
}

#[tokio::test]
async fn test_reject_drops_message() {
    let broker = broker_with_queue("q", "acme", "#").await;
    let mut stream = broker.consume("q").await.unwrap();
    broker
        .publish("acme", "acme.saphir.employee", MessageProperties::default(), vec![])
        .await
        .unwrap();

    let delivery = next_delivery(&mut stream).await;
    let tag = delivery.delivery_tag;
    delivery.reject().await.unwrap();

    assert_eq!(
        broker.settlements().await,
        vec![Settlement::Nack {
            delivery_tag: tag,
            requeue: false
        }]
    );
    assert_eq!(broker.ready_count("q").await, 0);
}

#[tokio::test]
async fn test_disconnect_ends_stream_and_requeues() {
    let broker = broker_with_queue("q", "acme", "#").await;
    let mut stream = broker.consume("q").await.unwrap();
    broker
        .publish("acme", "acme.saphir.employee", MessageProperties::default(), vec![])
        .await
        .unwrap();
    let _unsettled = next_delivery(&mut stream).await;

    broker.disconnect().await;

    let item = stream.next().await;
    assert!(matches!(item, Some(Err(BrokerError::Connection(_)))));
    assert!(stream.next().await.is_none());
    assert_eq!(broker.ready_count("q").await, 1);
    assert_eq!(broker.consumer_count("q").await, 0);
}

#[tokio::test]
async fn test_injected_failure() {
    let broker = InMemoryBroker::new();
    broker.fail_on_resource("acme").await;
    assert!(broker.declare_exchange("acme", true).await.is_err());
    broker.clear_failures().await;
    assert!(broker.declare_exchange("acme", true).await.is_ok());
}

#[tokio::test]
async fn test_publish_log_keeps_most_recent_entries() {
    let broker = InMemoryBroker::with_log_capacity(2);
    broker.declare_exchange("acme", true).await.unwrap();

    for key in ["acme.saphir.booking", "acme.saphir.employee", "acme.guard.booking"] {
        broker
            .publish("acme", key, MessageProperties::default(), b"{}".to_vec())
            .await
            .unwrap();
    }

    let keys: Vec<String> = broker
        .published()
        .await
        .into_iter()
        .map(|message| message.routing_key)
        .collect();
    assert_eq!(keys, vec!["acme.saphir.employee", "acme.guard.booking"]);
}

#[tokio::test]
async fn test_zero_log_capacity_records_nothing() {
    let broker = InMemoryBroker::with_log_capacity(0);
    broker.declare_exchange("acme", true).await.unwrap();
    broker.declare_queue("acme.guard.booking", &QueueOptions::default()).await.unwrap();
    broker
        .bind_queue("acme.guard.booking", "acme", "acme.*.booking")
        .await
        .unwrap();
    let mut stream = broker.consume("acme.guard.booking").await.unwrap();

    broker
        .publish("acme", "acme.saphir.booking", MessageProperties::default(), b"{}".to_vec())
        .await
        .unwrap();
    next_delivery(&mut stream).await.ack().await.unwrap();

    assert!(broker.published().await.is_empty());
    assert!(broker.settlements().await.is_empty());
    assert_eq!(broker.ready_count("acme.guard.booking").await, 0);
}
