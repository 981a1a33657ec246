//! Hangar control service binary.
//!
//! Runs the lifecycle orchestrator behind its HTTP API.

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hangar_control::{ControlConfig, ControlService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("hangar_control=info".parse()?),
        )
        .init();

    info!("Hangar control service starting");

    let config = ControlConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        ControlConfig::default()
    });

    info!(
        listen = %config.server.listen,
        registry = ?config.registry.backend,
        data_dir = %config.registry.data_dir.display(),
        runtime = ?config.runtime.runtime_type,
        "configuration loaded"
    );

    ControlService::new(config).run().await?;
    Ok(())
}
