//! Outbound message path.
//!
//! Validates an envelope against the local application, selects exchange and
//! routing key, and hands the encoded message to the broker in one publish.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::addressing::{broadcast_exchange, routing_key, tenant_exchange, topic_segment, TenantId};
use crate::application::LocalApplication;
use crate::broker::Broker;
use crate::envelope::MessageEnvelope;
use crate::error::{PublishError, ValidationError};

/// Where a validated envelope goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub exchange: String,
    pub routing_key: String,
    /// Value of the `tenantid` header.
    pub tenant: String,
}

/// Publishes envelopes for one local application.
pub struct Publisher<B: Broker + ?Sized> {
    broker: Arc<B>,
    local: LocalApplication,
    // Publishes share one channel.
    lock: Mutex<()>,
}

impl<B: Broker + ?Sized> Publisher<B> {
    pub fn new(broker: Arc<B>, local: LocalApplication) -> Self {
        Self {
            broker,
            local,
            lock: Mutex::new(()),
        }
    }

    pub fn local(&self) -> &LocalApplication {
        &self.local
    }

    /// Check `envelope` and resolve its route without touching the broker.
    pub fn route(&self, envelope: &MessageEnvelope) -> Result<Route, ValidationError> {
        if envelope.body().is_empty() {
            return Err(ValidationError::EmptyBody);
        }

        let identity = self.local.identity();
        if envelope.source_application() != &identity {
            return Err(ValidationError::SourceMismatch {
                source_application: envelope.source_application().label().to_string(),
                local: identity.label().to_string(),
            });
        }

        // Subscriber bindings match the topic segment exactly.
        let event_type = envelope.event_type();
        let expected = topic_segment(event_type);
        if envelope.routing_key_suffix() != expected {
            return Err(ValidationError::InvalidRoutingKeySuffix {
                suffix: envelope.routing_key_suffix().to_string(),
                expected,
            });
        }

        match &self.local {
            LocalApplication::MultiTenant(role) => {
                let tenant = envelope.tenant_id();
                if tenant.is_empty() {
                    return Err(ValidationError::MissingTenantId {
                        application: identity.label().to_string(),
                    });
                }
                TenantId::new(tenant).map_err(|_| ValidationError::InvalidTenantId {
                    tenant_id: tenant.to_string(),
                })?;
                Ok(Route {
                    exchange: broadcast_exchange(*role),
                    routing_key: routing_key(tenant, &identity, event_type),
                    tenant: tenant.to_string(),
                })
            }
            LocalApplication::Tenant { tenant, .. } => Ok(Route {
                exchange: tenant_exchange(tenant.as_str()),
                routing_key: routing_key(tenant.as_str(), &identity, event_type),
                tenant: tenant.to_string(),
            }),
        }
    }

    /// Publish `envelope`. No retry; transport failures are returned.
    pub async fn publish(&self, envelope: &MessageEnvelope) -> Result<(), PublishError> {
        let route = self.route(envelope)?;
        let (properties, body) = envelope.to_wire(&route.tenant)?;

        let _guard = self.lock.lock().await;
        self.broker
            .publish(&route.exchange, &route.routing_key, properties, body)
            .await?;

        debug!(
            event_id = %envelope.event_id(),
            exchange = %route.exchange,
            routing_key = %route.routing_key,
            "Published message"
        );
        Ok(())
    }
}
