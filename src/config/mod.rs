//! Client configuration.
//!
//! Loaded from YAML files and environment variables, then validated into a
//! [`LocalApplication`] and its subscriptions before any broker interaction.

use serde::{Deserialize, Serialize};

use crate::addressing::{EventType, TenantId};
use crate::application::{
    ApplicationIdentity, ApplicationType, ExternalName, LocalApplication,
};
use crate::broker::FieldTable;
use crate::error::{ConfigurationError, ValidationError};
use crate::subscription::SubscriptionDescriptor;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "tenantbus.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "TENANTBUS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "TENANTBUS";

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
        }
    }
}

impl BrokerConfig {
    /// AMQP connection URL.
    pub fn url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.username,
            self.password,
            self.host,
            self.port,
            self.vhost.replace('%', "%25").replace('/', "%2f")
        )
    }
}

/// One configured subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub event_type: EventType,
    pub source: ApplicationType,
    #[serde(default = "default_durable")]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub arguments: FieldTable,
}

fn default_durable() -> bool {
    true
}

impl SubscriptionConfig {
    pub fn descriptor(&self) -> Result<SubscriptionDescriptor, ValidationError> {
        let source = self.source.known().ok_or(ValidationError::ExternalSource)?;
        let mut descriptor = SubscriptionDescriptor::new(self.event_type, source.into())?
            .durable(self.durable)
            .auto_delete(self.auto_delete)
            .exclusive(self.exclusive);
        for (key, value) in &self.arguments {
            descriptor = descriptor.argument(key.clone(), value.clone());
        }
        Ok(descriptor)
    }
}

/// Everything needed to run one application instance on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    pub application: ApplicationType,
    /// Required for tenant-scoped applications.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Name of an `external` application. Defaults to `external`.
    #[serde(default)]
    pub external_application_name: Option<String>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

impl ClientConfig {
    pub fn new(application: ApplicationType) -> Self {
        Self {
            broker: BrokerConfig::default(),
            application,
            tenant_id: None,
            external_application_name: None,
            subscriptions: Vec::new(),
        }
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_external_application_name(mut self, name: impl Into<String>) -> Self {
        self.external_application_name = Some(name.into());
        self
    }

    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `tenantbus.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigurationError> {
        use ::config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Resolve the configured application identity.
    pub fn identity(&self) -> Result<ApplicationIdentity, ConfigurationError> {
        match self.application.known() {
            Some(app) => Ok(app.into()),
            None => {
                let name = match &self.external_application_name {
                    Some(name) => ExternalName::new(name.clone())?,
                    None => ExternalName::default(),
                };
                Ok(ApplicationIdentity::External(name))
            }
        }
    }

    /// Resolve identity and tenant.
    ///
    /// The tenant id is only parsed for tenant-scoped applications.
    pub fn local_application(&self) -> Result<LocalApplication, ConfigurationError> {
        let identity = self.identity()?;
        let tenant = if identity.is_multi_tenant() {
            None
        } else {
            self.tenant_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .map(TenantId::new)
                .transpose()?
        };
        LocalApplication::new(identity, tenant)
    }

    pub fn subscription_descriptors(&self) -> Result<Vec<SubscriptionDescriptor>, ConfigurationError> {
        self.subscriptions
            .iter()
            .map(|s| s.descriptor().map_err(ConfigurationError::from))
            .collect()
    }
}
