//! Broker transport seam.
//!
//! This module contains:
//! - `Broker` trait: the topic-broker primitives the topology builder,
//!   publisher and delivery adapter are written against
//! - `Delivery` / `Acknowledger`: one received message and its settlement
//! - Wire-level property types shared by all transports
//! - Implementations: AMQP (RabbitMQ), in-memory

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpBroker, AmqpConfig};
pub use memory::InMemoryBroker;

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors raised by a broker transport.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Channel failed: {0}")]
    Channel(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Declare failed: {0}")]
    Declare(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Acknowledgement failed: {0}")]
    Ack(String),
}

/// Queue or header table value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i64),
    String(String),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

/// Header or argument table.
pub type FieldTable = BTreeMap<String, FieldValue>;

/// Queue declaration flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Survives a broker restart.
    pub durable: bool,
    /// Used by one connection only; deleted when it closes.
    pub exclusive: bool,
    /// Deleted once its last consumer unsubscribes.
    pub auto_delete: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: FieldTable,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
            arguments: FieldTable::new(),
        }
    }
}

/// Transport metadata carried next to a message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub message_id: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: Option<u64>,
    /// Message type.
    pub kind: Option<String>,
    pub app_id: Option<String>,
    pub content_type: Option<String>,
    /// Survives a broker restart while queued.
    pub persistent: bool,
    pub headers: FieldTable,
}

/// Settles one delivery. Consumed on use, so a delivery is settled at most once.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Remove the message from its queue.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Negative acknowledgement; `requeue` puts the message back on the queue.
    async fn nack(self: Box<Self>, requeue: bool) -> Result<()>;
}

/// One message handed to a consumer.
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        redelivered: bool,
        properties: MessageProperties,
        body: Vec<u8>,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            redelivered,
            properties,
            body,
            acker,
        }
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }

    /// Negative acknowledgement without requeue.
    pub async fn reject(self) -> Result<()> {
        self.acker.nack(false).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("properties", &self.properties)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Deliveries for one queue. Ends when the consumer is cancelled or the
/// connection drops.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Topic broker primitives.
///
/// Implementations:
/// - `AmqpBroker`: RabbitMQ via AMQP 0-9-1
/// - `InMemoryBroker`: in-process topic routing for tests and local runs
///
/// All declarations are idempotent: declaring an existing resource with the
/// same settings is a no-op.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Declare a topic exchange.
    async fn declare_exchange(&self, name: &str, durable: bool) -> Result<()>;

    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<()>;

    /// Route messages from `source` to `destination` exchange when the routing
    /// key matches `pattern`.
    async fn bind_exchange(&self, destination: &str, source: &str, pattern: &str) -> Result<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> Result<()>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Result<()>;

    /// Start a manual-ack consumer on `queue`.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream>;
}
