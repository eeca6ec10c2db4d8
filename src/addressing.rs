//! Addressing scheme.
//!
//! Pure derivation of exchange names, queue names, routing keys and binding
//! patterns from tenant, application and event type. Routing keys start with
//! `{tenant}.{application}`, followed by the topic segment of the event type
//! or a caller-supplied suffix.
//!
//! | Resource | Tenant-scoped | Multi-tenant |
//! |---|---|---|
//! | tenant exchange | `{tenant}` | - |
//! | application exchange | `{tenant}.{app}` | `{app}` (broadcast) |
//! | routing key | `{tenant}.{app}.{topic}` | `{tenant}.{app}.{topic}` |
//! | queue | `{tenant}.{app}.{topic}` | `{app}.{topic}` |
//! | fan-in exchange | - | `{topic}` |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::application::{ApplicationIdentity, MultiTenantRole};
use crate::error::ConfigurationError;

/// Matches exactly one routing key segment.
pub const SINGLE_WILDCARD: &str = "*";

/// Domain event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Employee,
    Booking,
    AccessProfile,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::Employee, EventType::Booking, EventType::AccessProfile];

    /// Canonical wire name, also the topic segment.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Employee => "employee",
            EventType::Booking => "booking",
            EventType::AccessProfile => "access-profile",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL.into_iter().find(|e| e.as_str() == s).ok_or(())
    }
}

/// Default routing key segment for an event type.
pub fn topic_segment(event_type: EventType) -> &'static str {
    event_type.as_str()
}

/// True if `value` can be embedded as one routing key segment.
pub fn is_valid_segment(value: &str) -> bool {
    !value.is_empty()
        && !value
            .chars()
            .any(|c| c == '.' || c == '*' || c == '#' || c.is_whitespace())
}

/// Identifier of a tenant's isolated routing namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigurationError> {
        let id = id.into();
        if !is_valid_segment(&id) {
            return Err(ConfigurationError::InvalidTenantId { tenant_id: id });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Main exchange of a tenant. Every tenant-scoped publish lands here first.
pub fn tenant_exchange(tenant: &str) -> String {
    tenant.to_string()
}

/// Exchange carrying one application's events.
///
/// `{tenant}.{app}` for tenant-scoped applications; the global broadcast
/// exchange (the application's own name) for multi-tenant applications.
pub fn exchange_name(tenant: &str, app: &ApplicationIdentity) -> String {
    match app.multi_tenant_role() {
        Some(role) => broadcast_exchange(role),
        None => format!("{}.{}", tenant, app.label()),
    }
}

/// Global exchange a multi-tenant application publishes to.
pub fn broadcast_exchange(role: MultiTenantRole) -> String {
    role.application().as_str().to_string()
}

/// Global exchange collecting one event family from every tenant.
pub fn fan_in_exchange(event_type: EventType) -> String {
    topic_segment(event_type).to_string()
}

/// `{tenant}.{app}.{topic}`
pub fn routing_key(tenant: &str, app: &ApplicationIdentity, event_type: EventType) -> String {
    routing_key_with_suffix(tenant, app, topic_segment(event_type))
}

/// `{tenant}.{app}.{suffix}` for messages overriding their topic segment.
pub fn routing_key_with_suffix(tenant: &str, app: &ApplicationIdentity, suffix: &str) -> String {
    format!("{}.{}.{}", tenant, app.label(), suffix)
}

/// `{tenant}.{label}.{topic}` where label is the local application's own label.
pub fn queue_name(tenant: &str, local_label: &str, event_type: EventType) -> String {
    format!("{}.{}.{}", tenant, local_label, topic_segment(event_type))
}

/// `{app}.{topic}`: queue of a multi-tenant application, shared across tenants.
pub fn multi_tenant_queue_name(role: MultiTenantRole, event_type: EventType) -> String {
    format!("{}.{}", role.application().as_str(), topic_segment(event_type))
}

/// `{tenant}.{app}.*`: everything one application publishes in a tenant.
pub fn application_pattern(tenant: &str, app: &ApplicationIdentity) -> String {
    format!("{}.{}.{}", tenant, app.label(), SINGLE_WILDCARD)
}

/// `{tenant}.*.{topic}`: one event family from any application in a tenant.
pub fn fan_in_pattern(tenant: &str, event_type: EventType) -> String {
    format!("{}.{}.{}", tenant, SINGLE_WILDCARD, topic_segment(event_type))
}

/// `*.*.{topic}`: one event family from any application in any tenant.
pub fn any_tenant_pattern(event_type: EventType) -> String {
    format!(
        "{}.{}.{}",
        SINGLE_WILDCARD,
        SINGLE_WILDCARD,
        topic_segment(event_type)
    )
}

/// Split a routing key into (tenant, application label, suffix).
pub fn split_routing_key(key: &str) -> Option<(&str, &str, &str)> {
    let mut parts = key.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(tenant), Some(app), Some(suffix)) => Some((tenant, app, suffix)),
        _ => None,
    }
}
