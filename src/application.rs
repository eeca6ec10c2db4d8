//! Application identities and their routing roles.
//!
//! Every participant on the bus is one of a closed set of known applications,
//! or an external (third-party) application carrying its own name. Two known
//! applications are multi-tenant: they operate across every tenant instead of
//! inside one, and own a global broadcast exchange.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::addressing::{is_valid_segment, EventType, TenantId};
use crate::error::ConfigurationError;

/// Name used for an external application when none is configured.
pub const DEFAULT_EXTERNAL_NAME: &str = "external";

/// Application kinds as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationType {
    Saphir,
    Request,
    Guard,
    Guest,
    Secure,
    #[serde(rename = "atiqxid")]
    AtiqxId,
    External,
}

impl ApplicationType {
    pub const ALL: [ApplicationType; 7] = [
        ApplicationType::Saphir,
        ApplicationType::Request,
        ApplicationType::Guard,
        ApplicationType::Guest,
        ApplicationType::Secure,
        ApplicationType::AtiqxId,
        ApplicationType::External,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationType::Saphir => "saphir",
            ApplicationType::Request => "request",
            ApplicationType::Guard => "guard",
            ApplicationType::Guest => "guest",
            ApplicationType::Secure => "secure",
            ApplicationType::AtiqxId => "atiqxid",
            ApplicationType::External => "external",
        }
    }

    /// The known application for this kind, `None` for `External`.
    pub fn known(&self) -> Option<KnownApplication> {
        match self {
            ApplicationType::Saphir => Some(KnownApplication::Saphir),
            ApplicationType::Request => Some(KnownApplication::Request),
            ApplicationType::Guard => Some(KnownApplication::Guard),
            ApplicationType::Guest => Some(KnownApplication::Guest),
            ApplicationType::Secure => Some(KnownApplication::Secure),
            ApplicationType::AtiqxId => Some(KnownApplication::AtiqxId),
            ApplicationType::External => None,
        }
    }
}

impl fmt::Display for ApplicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the first-party applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnownApplication {
    Saphir,
    Request,
    Guard,
    Guest,
    Secure,
    #[serde(rename = "atiqxid")]
    AtiqxId,
}

impl KnownApplication {
    pub const ALL: [KnownApplication; 6] = [
        KnownApplication::Saphir,
        KnownApplication::Request,
        KnownApplication::Guard,
        KnownApplication::Guest,
        KnownApplication::Secure,
        KnownApplication::AtiqxId,
    ];

    pub fn as_str(&self) -> &'static str {
        self.application_type().as_str()
    }

    pub fn application_type(&self) -> ApplicationType {
        match self {
            KnownApplication::Saphir => ApplicationType::Saphir,
            KnownApplication::Request => ApplicationType::Request,
            KnownApplication::Guard => ApplicationType::Guard,
            KnownApplication::Guest => ApplicationType::Guest,
            KnownApplication::Secure => ApplicationType::Secure,
            KnownApplication::AtiqxId => ApplicationType::AtiqxId,
        }
    }

    pub fn role(&self) -> ApplicationRole {
        match self {
            KnownApplication::AtiqxId => ApplicationRole::MultiTenant(MultiTenantRole::EmployeeRegistry),
            KnownApplication::Guest => ApplicationRole::MultiTenant(MultiTenantRole::Guest),
            KnownApplication::Saphir
            | KnownApplication::Request
            | KnownApplication::Guard
            | KnownApplication::Secure => ApplicationRole::Tenant,
        }
    }
}

impl fmt::Display for KnownApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnownApplication {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KnownApplication::ALL
            .into_iter()
            .find(|app| app.as_str() == s)
            .ok_or(())
    }
}

/// How an application participates in tenant routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationRole {
    /// Lives inside exactly one tenant namespace.
    Tenant,
    /// Operates across all tenants.
    MultiTenant(MultiTenantRole),
}

/// The privileged applications allowed to cross tenant boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MultiTenantRole {
    /// Central employee registry (`atiqxid`).
    EmployeeRegistry,
    /// Guest registration (`guest`).
    Guest,
}

impl MultiTenantRole {
    pub const ALL: [MultiTenantRole; 2] = [MultiTenantRole::EmployeeRegistry, MultiTenantRole::Guest];

    pub fn application(&self) -> KnownApplication {
        match self {
            MultiTenantRole::EmployeeRegistry => KnownApplication::AtiqxId,
            MultiTenantRole::Guest => KnownApplication::Guest,
        }
    }

    /// Event family this role receives from every tenant.
    pub fn inbound_event(&self) -> EventType {
        match self {
            MultiTenantRole::EmployeeRegistry | MultiTenantRole::Guest => EventType::Employee,
        }
    }
}

/// Caller-supplied name of a third-party application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalName(String);

impl ExternalName {
    /// Validate an external application name.
    ///
    /// The name becomes a routing segment and must not shadow a known application.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigurationError> {
        let name = name.into();
        if KnownApplication::from_str(&name).is_ok() {
            return Err(ConfigurationError::ExternalNameCollision { name });
        }
        if !is_valid_segment(&name) {
            return Err(ConfigurationError::InvalidExternalName { name });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExternalName {
    fn default() -> Self {
        Self(DEFAULT_EXTERNAL_NAME.to_string())
    }
}

impl fmt::Display for ExternalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved application identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApplicationIdentity {
    Known(KnownApplication),
    External(ExternalName),
}

impl ApplicationIdentity {
    /// Label used in exchange names, queue names, routing keys and app-id.
    pub fn label(&self) -> &str {
        match self {
            ApplicationIdentity::Known(app) => app.as_str(),
            ApplicationIdentity::External(name) => name.as_str(),
        }
    }

    pub fn application_type(&self) -> ApplicationType {
        match self {
            ApplicationIdentity::Known(app) => app.application_type(),
            ApplicationIdentity::External(_) => ApplicationType::External,
        }
    }

    pub fn role(&self) -> ApplicationRole {
        match self {
            ApplicationIdentity::Known(app) => app.role(),
            ApplicationIdentity::External(_) => ApplicationRole::Tenant,
        }
    }

    pub fn multi_tenant_role(&self) -> Option<MultiTenantRole> {
        match self.role() {
            ApplicationRole::MultiTenant(role) => Some(role),
            ApplicationRole::Tenant => None,
        }
    }

    pub fn is_multi_tenant(&self) -> bool {
        self.multi_tenant_role().is_some()
    }

    pub fn is_external(&self) -> bool {
        matches!(self, ApplicationIdentity::External(_))
    }

    /// Resolve an app-id label received on the wire.
    ///
    /// Known names resolve to their application; any other valid segment is
    /// an external application.
    pub fn from_label(label: &str) -> Option<Self> {
        if let Ok(app) = KnownApplication::from_str(label) {
            return Some(ApplicationIdentity::Known(app));
        }
        ExternalName::new(label).ok().map(ApplicationIdentity::External)
    }
}

impl From<KnownApplication> for ApplicationIdentity {
    fn from(app: KnownApplication) -> Self {
        ApplicationIdentity::Known(app)
    }
}

impl fmt::Display for ApplicationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The application this process runs as, with the tenant it is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalApplication {
    /// Tenant-scoped application (known or external) inside one tenant.
    Tenant {
        identity: ApplicationIdentity,
        tenant: TenantId,
    },
    /// Multi-tenant application; not bound to a tenant.
    MultiTenant(MultiTenantRole),
}

impl LocalApplication {
    /// Resolve the local application.
    ///
    /// Tenant-scoped identities require a tenant; multi-tenant identities
    /// ignore it.
    pub fn new(
        identity: ApplicationIdentity,
        tenant: Option<TenantId>,
    ) -> Result<Self, ConfigurationError> {
        match (identity.role(), tenant) {
            (ApplicationRole::MultiTenant(role), _) => Ok(LocalApplication::MultiTenant(role)),
            (ApplicationRole::Tenant, Some(tenant)) => Ok(LocalApplication::Tenant { identity, tenant }),
            (ApplicationRole::Tenant, None) => Err(ConfigurationError::MissingTenantId {
                application: identity.label().to_string(),
            }),
        }
    }

    pub fn identity(&self) -> ApplicationIdentity {
        match self {
            LocalApplication::Tenant { identity, .. } => identity.clone(),
            LocalApplication::MultiTenant(role) => role.application().into(),
        }
    }

    /// Configured tenant, `None` for multi-tenant applications.
    pub fn tenant(&self) -> Option<&TenantId> {
        match self {
            LocalApplication::Tenant { tenant, .. } => Some(tenant),
            LocalApplication::MultiTenant(_) => None,
        }
    }
}

impl fmt::Display for LocalApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalApplication::Tenant { identity, tenant } => write!(f, "{}@{}", identity, tenant),
            LocalApplication::MultiTenant(role) => write!(f, "{}", role.application()),
        }
    }
}
