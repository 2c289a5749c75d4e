//! ArduPilot quickstart.
//!
//! Starts Gazebo and the ArduPilot firmware in Docker, flies once and prints
//! the trajectory as JSON on stdout. Settings come from the environment (see
//! `ArduPilotConfig::from_env`); logs go to stderr.

use cosim_ardupilot::{ArduPilot, ArduPilotConfig};
use cosim_sandbox::DockerRuntime;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing - logs go to stderr (stdout carries the trajectory)
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("cosim_ardupilot=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration from environment
    let config = ArduPilotConfig::from_env();
    tracing::info!(?config, "Configuration loaded");
    config.validate()?;

    let runtime = Arc::new(DockerRuntime::connect()?);
    let ardupilot = ArduPilot::with_config(runtime, &config)?;

    let options = config.firmware_options();
    tracing::info!(vehicle = %options.vehicle, frame = %options.frame, "Flying");

    let result = ardupilot.simulate(&options).await?;
    tracing::info!(
        samples = result.len(),
        duration_secs = result.duration(),
        "Simulation complete"
    );

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
