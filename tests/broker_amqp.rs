//! RabbitMQ integration tests using testcontainers.
//!
//! Run with: cargo test --test broker_amqp -- --ignored --nocapture
//!
//! These tests spin up RabbitMQ in a container using testcontainers-rs.
//! No manual RabbitMQ setup required.

use std::time::Duration;

use tenant_bus::broker::{AmqpBroker, AmqpConfig, QueueOptions};
use tenant_bus::config::BrokerConfig;
use tenant_bus::{
    ApplicationType, Broker, BrokerClient, ClientConfig, EventHandler, EventType,
    KnownApplication, MessageEnvelope, SubscriptionDescriptor,
};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};
use tokio::sync::mpsc;

/// Start RabbitMQ container.
///
/// Returns (container, broker config) pointing at the mapped AMQP port.
async fn start_rabbitmq() -> (testcontainers::ContainerAsync<GenericImage>, BrokerConfig) {
    let image = GenericImage::new("rabbitmq", "3-management")
        .with_exposed_port(5672.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Server startup complete"));

    let container = image
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start rabbitmq container");

    // Brief delay to ensure RabbitMQ is fully ready
    tokio::time::sleep(Duration::from_secs(2)).await;

    let port = container
        .get_host_port_ipv4(5672)
        .await
        .expect("Failed to get mapped port");

    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    let broker = BrokerConfig {
        host: host.to_string(),
        port,
        ..Default::default()
    };
    println!("RabbitMQ available at: {}", broker.url());

    (container, broker)
}

type Inbox = mpsc::UnboundedReceiver<MessageEnvelope>;

fn channel_handler() -> (impl EventHandler, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |envelope: MessageEnvelope| {
        let tx = tx.clone();
        async move { tx.send(envelope).is_ok() }
    };
    (handler, rx)
}

async fn connect(
    broker: &BrokerConfig,
    mut config: ClientConfig,
    subscriptions: Vec<SubscriptionDescriptor>,
) -> (BrokerClient<AmqpBroker>, Inbox) {
    config.broker = broker.clone();
    let (handler, inbox) = channel_handler();
    let client = BrokerClient::connect(&config, subscriptions, handler)
        .await
        .expect("Failed to connect client");
    client
        .build_topology()
        .await
        .expect("Failed to build topology");
    (client, inbox)
}

async fn recv(inbox: &mut Inbox) -> MessageEnvelope {
    tokio::time::timeout(Duration::from_secs(10), inbox.recv())
        .await
        .expect("Timed out waiting for message")
        .expect("Inbox closed")
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_tenant_employee_event_reaches_registry() {
    let (_container, broker) = start_rabbitmq().await;

    let (_registry, mut registry_inbox) =
        connect(&broker, ClientConfig::new(ApplicationType::AtiqxId), vec![]).await;
    let (saphir, _) = connect(
        &broker,
        ClientConfig::new(ApplicationType::Saphir).with_tenant_id("acme"),
        vec![],
    )
    .await;

    let mut envelope = saphir.envelope(EventType::Employee, "created");
    envelope.insert_body("employeeId", "E-1042");
    saphir.publish_message(&envelope).await.expect("Publish failed");

    let received = recv(&mut registry_inbox).await;
    assert_eq!(received.event_id(), envelope.event_id());
    assert_eq!(received.tenant_id(), "acme");
    assert_eq!(received.body(), envelope.body());
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_registry_broadcast_reaches_tenant_subscriber() {
    let (_container, broker) = start_rabbitmq().await;

    let (registry, _) = connect(&broker, ClientConfig::new(ApplicationType::AtiqxId), vec![]).await;
    let (_saphir, mut saphir_inbox) = connect(
        &broker,
        ClientConfig::new(ApplicationType::Saphir).with_tenant_id("acme"),
        vec![SubscriptionDescriptor::new(EventType::Employee, KnownApplication::AtiqxId.into())
            .unwrap()],
    )
    .await;

    let mut envelope = registry
        .envelope(EventType::Employee, "updated")
        .with_tenant_id("acme")
        .with_extension("correlation", "c-7");
    envelope.insert_body("employeeId", "E-1042");
    registry
        .publish_message(&envelope)
        .await
        .expect("Publish failed");

    let received = recv(&mut saphir_inbox).await;
    assert_eq!(received.event_id(), envelope.event_id());
    assert_eq!(received.action(), "updated");
    assert_eq!(received.extensions()["correlation"], "c-7");
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_redeclaring_queue_with_other_options_fails() {
    let (_container, broker) = start_rabbitmq().await;
    let amqp = AmqpBroker::connect(AmqpConfig::from(&broker))
        .await
        .expect("Failed to connect");

    amqp.declare_queue("acme.guard.booking", &QueueOptions::default())
        .await
        .expect("First declaration failed");
    amqp.declare_queue("acme.guard.booking", &QueueOptions::default())
        .await
        .expect("Redeclaration with same options failed");

    let transient = QueueOptions {
        durable: false,
        ..Default::default()
    };
    assert!(amqp.declare_queue("acme.guard.booking", &transient).await.is_err());
}
