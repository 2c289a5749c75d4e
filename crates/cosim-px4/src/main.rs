//! PX4 quickstart.
//!
//! Starts Gazebo and the PX4 firmware in Docker, flies the default mission
//! and prints the trajectory as JSON on stdout. Settings come from the
//! environment (see `Px4Config::from_env`); logs go to stderr.

use cosim_px4::{Configuration, Px4, Px4Config, Px4Gazebo, DEFAULT_MISSION};
use cosim_sandbox::DockerRuntime;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing - logs go to stderr (stdout carries the trajectory)
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("cosim_px4=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration from environment
    let config = Px4Config::from_env();
    tracing::info!(?config, "Configuration loaded");
    config.validate()?;

    let runtime = Arc::new(DockerRuntime::connect()?);
    let gazebo = Px4Gazebo::from_config(&config)?;
    let px4 = Px4::with_config(runtime, &config, gazebo)?;

    let mission = Configuration::new(DEFAULT_MISSION).with_model(config.model.clone());
    tracing::info!(waypoints = mission.mission.len(), model = %mission.model, "Flying mission");

    let states = px4.simulate(&mission).await?;
    tracing::info!(
        samples = states.len(),
        duration_secs = states.duration(),
        "Simulation complete"
    );

    println!("{}", serde_json::to_string_pretty(&states)?);
    Ok(())
}
