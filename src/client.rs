//! Client handle.
//!
//! [`BrokerClient`] is the composition root for one application instance:
//! it owns the topology builder, the publisher and the delivery adapter, all
//! sharing one broker.
//!
//! ```text
//! configure ──► Configured ──build_topology──► TopologyBuilt
//!                                   ▲               │
//!                                   └── restart ────┘  (ended consumers only)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::addressing::EventType;
use crate::application::LocalApplication;
use crate::broker::Broker;
use crate::config::ClientConfig;
use crate::consumer::{DeliveryAdapter, EventHandler, SubscriptionEnded};
use crate::envelope::MessageEnvelope;
use crate::error::{ConfigurationError, PublishError, TopologyError};
use crate::publisher::Publisher;
use crate::subscription::SubscriptionDescriptor;
use crate::topology::{TopologyBuilder, TopologyPlan};

/// Lifecycle of a [`BrokerClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Validated; nothing declared on the broker yet.
    Configured,
    /// Topology declared and consumers started. Publishing is allowed.
    TopologyBuilt,
}

/// One application instance on the bus.
pub struct BrokerClient<B: Broker + ?Sized> {
    broker: Arc<B>,
    topology: TopologyBuilder,
    publisher: Publisher<B>,
    adapter: DeliveryAdapter<B>,
    built: AtomicBool,
}

impl<B: Broker + ?Sized> BrokerClient<B> {
    /// Validate configuration and prepare the client.
    ///
    /// `subscriptions` are added to those listed in `config`. Nothing is sent
    /// to the broker until [`build_topology`](Self::build_topology).
    pub fn configure(
        config: &ClientConfig,
        subscriptions: Vec<SubscriptionDescriptor>,
        handler: impl EventHandler,
        broker: Arc<B>,
    ) -> Result<Self, ConfigurationError> {
        let local = config.local_application()?;
        let mut all = config.subscription_descriptors()?;
        all.extend(subscriptions);

        let topology = TopologyBuilder::new(local.clone(), all)?;
        info!(
            application = %local,
            subscriptions = topology.subscriptions().len(),
            "Client configured"
        );

        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        Ok(Self {
            publisher: Publisher::new(Arc::clone(&broker), local),
            adapter: DeliveryAdapter::new(Arc::clone(&broker), handler),
            broker,
            topology,
            built: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ClientState {
        if self.built.load(Ordering::SeqCst) {
            ClientState::TopologyBuilt
        } else {
            ClientState::Configured
        }
    }

    pub fn local(&self) -> &LocalApplication {
        self.topology.local()
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    /// Declarations `build_topology` applies.
    pub fn plan(&self) -> TopologyPlan {
        self.topology.plan()
    }

    /// Declare exchanges, queues and bindings, then start consumers.
    ///
    /// Safe to call again: declarations are idempotent and only consumers
    /// that ended are restarted.
    pub async fn build_topology(&self) -> Result<(), TopologyError> {
        self.topology.build(self.broker.as_ref(), &self.adapter).await?;
        self.built.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Publish one envelope.
    pub async fn publish_message(&self, envelope: &MessageEnvelope) -> Result<(), PublishError> {
        if self.state() != ClientState::TopologyBuilt {
            return Err(PublishError::TopologyNotBuilt);
        }
        self.publisher.publish(envelope).await
    }

    /// New envelope sourced from the local application.
    pub fn envelope(&self, event_type: EventType, action: impl Into<String>) -> MessageEnvelope {
        MessageEnvelope::new(self.local().identity(), event_type, action)
    }

    /// Notifications of consumers whose delivery stream ended. Available once.
    pub fn subscription_endings(&self) -> Option<mpsc::UnboundedReceiver<SubscriptionEnded>> {
        self.adapter.take_subscription_endings()
    }

    /// Queues with a running consumer.
    pub async fn running_queues(&self) -> Vec<String> {
        self.adapter.running_queues().await
    }

    /// Stop all consumers.
    pub async fn shutdown(&self) {
        self.adapter.shutdown().await;
        info!(application = %self.local(), "Client shut down");
    }
}

#[cfg(feature = "amqp")]
impl BrokerClient<crate::broker::AmqpBroker> {
    /// Connect to RabbitMQ with the broker settings in `config` and configure
    /// the client.
    pub async fn connect(
        config: &ClientConfig,
        subscriptions: Vec<SubscriptionDescriptor>,
        handler: impl EventHandler,
    ) -> crate::error::Result<Self> {
        // Validate before opening connections.
        config.local_application()?;
        let broker =
            crate::broker::AmqpBroker::connect(crate::broker::AmqpConfig::from(&config.broker))
                .await?;
        Ok(Self::configure(
            config,
            subscriptions,
            handler,
            Arc::new(broker),
        )?)
    }
}
