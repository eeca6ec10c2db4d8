//! Error types for tenant-bus.

use crate::broker::BrokerError;
use crate::topology::Declaration;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Invalid configuration, detected before any broker interaction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("application '{application}' cannot subscribe to its own events")]
    SelfSubscription { application: String },

    #[error("application '{application}' is not multi-tenant and requires a tenant id")]
    MissingTenantId { application: String },

    #[error("invalid tenant id '{tenant_id}': must be a non-empty routing segment")]
    InvalidTenantId { tenant_id: String },

    #[error("external application name '{name}' collides with a known application")]
    ExternalNameCollision { name: String },

    #[error("invalid external application name '{name}': must be a non-empty routing segment")]
    InvalidExternalName { name: String },

    #[error("subscriptions sharing queue '{queue}' declare different queue options")]
    ConflictingQueueOptions { queue: String },

    #[error("invalid subscription: {0}")]
    Subscription(#[from] ValidationError),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Message or descriptor rejected before reaching the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message body cannot be empty")]
    EmptyBody,

    #[error("messages from multi-tenant application '{application}' require a tenant id")]
    MissingTenantId { application: String },

    #[error("invalid tenant id '{tenant_id}': must be a non-empty routing segment")]
    InvalidTenantId { tenant_id: String },

    #[error("listening to events from external applications is not possible")]
    ExternalSource,

    #[error("message source '{source_application}' does not match local application '{local}'")]
    SourceMismatch {
        source_application: String,
        local: String,
    },

    #[error("routing key suffix '{suffix}' does not match topic '{expected}'")]
    InvalidRoutingKeySuffix { suffix: String, expected: &'static str },
}

/// Broker rejected part of the topology.
#[derive(Debug, thiserror::Error)]
#[error("failed to declare {declaration}")]
pub struct TopologyError {
    /// The step that failed. Steps before it are already applied.
    pub declaration: Declaration,
    #[source]
    pub source: BrokerError,
}

/// Inbound message metadata or body could not be reconstructed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedEnvelopeError {
    #[error("missing message property '{0}'")]
    MissingProperty(&'static str),

    #[error("missing header '{0}'")]
    MissingHeader(&'static str),

    #[error("header '{0}' is not a string")]
    InvalidHeader(&'static str),

    #[error("invalid message id '{0}'")]
    InvalidMessageId(String),

    #[error("unknown event type '{0}'")]
    UnknownEventType(String),

    #[error("unknown application '{0}'")]
    UnknownApplication(String),

    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(u64),

    #[error("body is not a JSON object of strings: {0}")]
    InvalidBody(String),
}

/// An envelope that cannot be put on the wire.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("body is not serializable: {0}")]
    Body(#[from] serde_json::Error),

    #[error("extension header '{0}' is reserved")]
    ReservedHeader(String),

    #[error("timestamp {0} is before the Unix epoch")]
    TimestampBeforeEpoch(i64),
}

/// Failure publishing a message.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("topology has not been built; call build_topology first")]
    TopologyNotBuilt,

    #[error("failed to encode message: {0}")]
    Encode(#[from] EncodeError),

    #[error("transport error: {0}")]
    Transport(#[from] BrokerError),
}

/// Any error surfaced by [`crate::BrokerClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}
