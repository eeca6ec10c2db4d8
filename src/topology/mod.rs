//! Topology construction.
//!
//! The builder turns the local application and its subscriptions into an
//! ordered [`TopologyPlan`] of broker declarations, then applies the plan in
//! order. Planning is pure; applying is idempotent at the broker, so a failed
//! build can simply be retried.
//!
//! Tenant-scoped applications publish into their tenant exchange `{t}`.
//! From there messages are routed to per-application exchanges `{t}.{app}`
//! and, for event families collected by a multi-tenant application, into the
//! global fan-in exchange (`employee`). Multi-tenant applications publish to
//! their own broadcast exchange (`atiqxid`, `guest`), which tenant
//! subscribers bind to with tenant-specific keys.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::addressing::{
    any_tenant_pattern, application_pattern, broadcast_exchange, exchange_name, fan_in_exchange,
    fan_in_pattern, multi_tenant_queue_name, queue_name, routing_key, tenant_exchange,
};
use crate::application::{ApplicationIdentity, LocalApplication, MultiTenantRole};
use crate::broker::{self, Broker, QueueOptions};
use crate::error::{ConfigurationError, TopologyError};
use crate::subscription::SubscriptionDescriptor;

/// One broker-side step of a topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Declaration {
    /// Durable topic exchange.
    Exchange { name: String },
    /// Route from `source` into `destination` for keys matching `pattern`.
    ExchangeBinding {
        destination: String,
        source: String,
        pattern: String,
    },
    Queue { name: String, options: QueueOptions },
    QueueBinding {
        queue: String,
        exchange: String,
        pattern: String,
    },
    /// Attach the delivery adapter to `queue`.
    Consume { queue: String },
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Declaration::Exchange { name } => write!(f, "exchange '{}'", name),
            Declaration::ExchangeBinding {
                destination,
                source,
                pattern,
            } => write!(
                f,
                "exchange binding '{}' -> '{}' ({})",
                source, destination, pattern
            ),
            Declaration::Queue { name, .. } => write!(f, "queue '{}'", name),
            Declaration::QueueBinding {
                queue,
                exchange,
                pattern,
            } => write!(f, "queue binding '{}' -> '{}' ({})", exchange, queue, pattern),
            Declaration::Consume { queue } => write!(f, "consumer on '{}'", queue),
        }
    }
}

/// Ordered, de-duplicated declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TopologyPlan {
    declarations: Vec<Declaration>,
}

impl TopologyPlan {
    fn push(&mut self, declaration: Declaration) {
        if !self.declarations.contains(&declaration) {
            self.declarations.push(declaration);
        }
    }

    fn exchange(&mut self, name: String) {
        self.push(Declaration::Exchange { name });
    }

    fn exchange_binding(&mut self, destination: String, source: String, pattern: String) {
        self.push(Declaration::ExchangeBinding {
            destination,
            source,
            pattern,
        });
    }

    fn queue(&mut self, name: String, options: QueueOptions) {
        self.push(Declaration::Queue { name, options });
    }

    fn queue_binding(&mut self, queue: String, exchange: String, pattern: String) {
        self.push(Declaration::QueueBinding {
            queue,
            exchange,
            pattern,
        });
    }

    fn consume(&mut self, queue: String) {
        self.push(Declaration::Consume { queue });
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Queues the plan attaches consumers to.
    pub fn consumed_queues(&self) -> impl Iterator<Item = &str> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Consume { queue } => Some(queue.as_str()),
            _ => None,
        })
    }

    /// Apply every declaration in order, stopping at the first failure.
    pub async fn apply<B: Broker + ?Sized>(
        &self,
        broker: &B,
        consumers: &dyn ConsumerRegistry,
    ) -> Result<(), TopologyError> {
        for declaration in &self.declarations {
            debug!(%declaration, "Applying topology step");
            let result = match declaration {
                Declaration::Exchange { name } => broker.declare_exchange(name, true).await,
                Declaration::ExchangeBinding {
                    destination,
                    source,
                    pattern,
                } => broker.bind_exchange(destination, source, pattern).await,
                Declaration::Queue { name, options } => broker.declare_queue(name, options).await,
                Declaration::QueueBinding {
                    queue,
                    exchange,
                    pattern,
                } => broker.bind_queue(queue, exchange, pattern).await,
                Declaration::Consume { queue } => consumers.start_consumer(queue).await,
            };
            result.map_err(|source| TopologyError {
                declaration: declaration.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Starts consumers for the queues of a plan.
#[async_trait]
pub trait ConsumerRegistry: Send + Sync {
    /// Start consuming `queue`. A queue with a running consumer is left alone.
    async fn start_consumer(&self, queue: &str) -> broker::Result<()>;
}

/// Registry that starts nothing; applies declarations only.
pub struct DeclareOnly;

#[async_trait]
impl ConsumerRegistry for DeclareOnly {
    async fn start_consumer(&self, queue: &str) -> broker::Result<()> {
        debug!(queue = %queue, "Skipping consumer");
        Ok(())
    }
}

/// Derives and applies the topology of one application instance.
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    local: LocalApplication,
    subscriptions: Vec<SubscriptionDescriptor>,
}

impl TopologyBuilder {
    /// Validate subscriptions against the local application.
    ///
    /// Fails when the application subscribes to itself, or when two
    /// subscriptions share a queue but disagree on its flags.
    pub fn new(
        local: LocalApplication,
        subscriptions: Vec<SubscriptionDescriptor>,
    ) -> Result<Self, ConfigurationError> {
        let identity = local.identity();
        if subscriptions.iter().any(|s| s.source() == &identity) {
            return Err(ConfigurationError::SelfSubscription {
                application: identity.label().to_string(),
            });
        }

        if let LocalApplication::Tenant { identity, tenant } = &local {
            let mut options: HashMap<String, QueueOptions> = HashMap::new();
            for sub in &subscriptions {
                let queue = queue_name(tenant.as_str(), identity.label(), sub.event_type());
                let wanted = sub.queue_options();
                match options.get(&queue) {
                    Some(existing) if existing != &wanted => {
                        return Err(ConfigurationError::ConflictingQueueOptions { queue });
                    }
                    Some(_) => {}
                    None => {
                        options.insert(queue, wanted);
                    }
                }
            }
        }

        Ok(Self {
            local,
            subscriptions,
        })
    }

    pub fn local(&self) -> &LocalApplication {
        &self.local
    }

    pub fn subscriptions(&self) -> &[SubscriptionDescriptor] {
        &self.subscriptions
    }

    /// Compute the declarations for this application.
    pub fn plan(&self) -> TopologyPlan {
        let mut plan = TopologyPlan::default();
        match &self.local {
            LocalApplication::MultiTenant(role) => {
                if !self.subscriptions.is_empty() {
                    warn!(
                        application = %role.application(),
                        count = self.subscriptions.len(),
                        "Multi-tenant applications ignore subscriptions"
                    );
                }
                plan_multi_tenant(&mut plan, *role);
            }
            LocalApplication::Tenant { identity, tenant } => {
                plan_tenant(&mut plan, tenant.as_str(), identity, &self.subscriptions);
            }
        }
        plan
    }

    /// Declare the topology on `broker` and start consumers.
    pub async fn build<B: Broker + ?Sized>(
        &self,
        broker: &B,
        consumers: &dyn ConsumerRegistry,
    ) -> Result<(), TopologyError> {
        let plan = self.plan();
        plan.apply(broker, consumers).await?;
        info!(
            application = %self.local,
            steps = plan.len(),
            queues = plan.consumed_queues().count(),
            "Topology built"
        );
        Ok(())
    }
}

/// Fan-in and broadcast exchanges plus the shared cross-tenant queue.
fn plan_multi_tenant(plan: &mut TopologyPlan, role: MultiTenantRole) {
    let event = role.inbound_event();
    let fan_in = fan_in_exchange(event);
    let queue = multi_tenant_queue_name(role, event);

    plan.exchange(fan_in.clone());
    plan.exchange(broadcast_exchange(role));
    plan.queue(queue.clone(), QueueOptions::default());
    plan.queue_binding(queue.clone(), fan_in, any_tenant_pattern(event));
    plan.consume(queue);
}

fn plan_tenant(
    plan: &mut TopologyPlan,
    tenant: &str,
    local: &ApplicationIdentity,
    subscriptions: &[SubscriptionDescriptor],
) {
    let main = tenant_exchange(tenant);
    plan.exchange(main.clone());

    // Every tenant feeds the families collected by multi-tenant applications.
    for role in MultiTenantRole::ALL {
        let event = role.inbound_event();
        plan.exchange(fan_in_exchange(event));
        plan.exchange_binding(fan_in_exchange(event), main.clone(), fan_in_pattern(tenant, event));
    }

    plan.exchange(exchange_name(tenant, local));
    plan.exchange_binding(
        exchange_name(tenant, local),
        main.clone(),
        application_pattern(tenant, local),
    );

    for source in subscriptions.iter().map(SubscriptionDescriptor::source) {
        match source.multi_tenant_role() {
            None => {
                plan.exchange(exchange_name(tenant, source));
                plan.exchange_binding(
                    exchange_name(tenant, source),
                    main.clone(),
                    application_pattern(tenant, source),
                );
            }
            Some(role) => plan.exchange(broadcast_exchange(role)),
        }
    }

    for sub in subscriptions {
        let queue = queue_name(tenant, local.label(), sub.event_type());
        plan.queue(queue.clone(), sub.queue_options());
        plan.queue_binding(
            queue.clone(),
            exchange_name(tenant, sub.source()),
            routing_key(tenant, sub.source(), sub.event_type()),
        );
        plan.consume(queue);
    }
}
