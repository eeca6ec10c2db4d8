//! tenantbus-topology: inspect or pre-declare an application's topology
//!
//! Loads the client configuration and prints the exchanges, queues and
//! bindings the application would declare, as YAML. With `TENANTBUS_APPLY=true`
//! the declarations are applied to RabbitMQ instead (consumers are not started).
//!
//! ## Usage
//! ```text
//! tenantbus-topology [config.yaml]
//! ```
//!
//! ## Configuration
//! - TENANTBUS_CONFIG: configuration file (alternative to the argument)
//! - TENANTBUS__*: configuration overrides, e.g. TENANTBUS__TENANT_ID=acme
//! - TENANTBUS_APPLY: apply the plan instead of printing it (default: false)
//! - TENANTBUS_LOG: tracing filter (default: info)

use tracing::info;

use tenant_bus::broker::{AmqpBroker, AmqpConfig};
use tenant_bus::config::ClientConfig;
use tenant_bus::topology::{DeclareOnly, TopologyBuilder};
use tenant_bus::utils::bootstrap::init_tracing;

const APPLY_ENV_VAR: &str = "TENANTBUS_APPLY";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let config = ClientConfig::load(path.as_deref())?;
    let local = config.local_application()?;
    let builder = TopologyBuilder::new(local, config.subscription_descriptors()?)?;
    let plan = builder.plan();

    let apply = std::env::var(APPLY_ENV_VAR)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);

    if !apply {
        print!("{}", serde_yaml::to_string(&plan)?);
        return Ok(());
    }

    info!(
        application = %builder.local(),
        host = %config.broker.host,
        steps = plan.len(),
        "Applying topology"
    );
    let broker = AmqpBroker::connect(AmqpConfig::from(&config.broker)).await?;
    plan.apply(&broker, &DeclareOnly).await?;
    info!("Topology applied");
    Ok(())
}
