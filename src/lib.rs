//! tenant-bus - multi-tenant pub/sub over a topic broker
//!
//! Derives exchange names, queue names, routing keys and bindings from
//! {tenant, application, event type} so that independently deployed
//! applications exchange domain events while each tenant stays isolated.
//! Two privileged applications (`atiqxid`, `guest`) operate across tenants.

pub mod addressing;
pub mod application;
pub mod broker;
pub mod client;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod publisher;
pub mod subscription;
pub mod topology;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use addressing::{EventType, TenantId};
pub use application::{
    ApplicationIdentity, ApplicationRole, ApplicationType, ExternalName, KnownApplication,
    LocalApplication, MultiTenantRole,
};
pub use broker::{Broker, BrokerError, InMemoryBroker};
pub use client::{BrokerClient, ClientState};
pub use crate::config::ClientConfig;
pub use consumer::{EventHandler, SubscriptionEnded};
pub use envelope::{MessageBody, MessageEnvelope};
pub use error::{
    ClientError, ConfigurationError, EncodeError, MalformedEnvelopeError, PublishError,
    TopologyError, ValidationError,
};
pub use subscription::SubscriptionDescriptor;
pub use topology::{Declaration, TopologyBuilder, TopologyPlan};

#[cfg(feature = "amqp")]
pub use broker::{AmqpBroker, AmqpConfig};
