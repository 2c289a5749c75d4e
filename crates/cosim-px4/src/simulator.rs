//! PX4 firmware flying inside a PX4-flavoured Gazebo.

use crate::config::Px4Config;
use crate::messages::{Configuration, States};
use async_trait::async_trait;
use cosim_core::{
    CommunicationNode, Component, ContainerNode, CoreError, CosimConfig, Environment,
    FirmwareComponent, FirmwareNode, GazeboComponent, GazeboConfig, JointNode, JointSimulation,
    JointSimulator, NodeId, Result, Simulation, Simulator,
};
use cosim_protocol::DEFAULT_PORT;
use cosim_sandbox::{PortProtocol, Runtime, SandboxSpec};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

const FIRMWARE_REPOSITORY: &str = "ghcr.io/cpslab-asu/multicosim/px4/firmware";
const GAZEBO_REPOSITORY: &str = "ghcr.io/cpslab-asu/multicosim/px4/gazebo";

/// Firmware node answering missions with trajectories.
pub type Px4Firmware = FirmwareNode<Configuration, States>;

/// Running PX4 simulation.
pub type Px4Simulation = JointSimulation<ContainerNode, Px4Firmware>;

/// Joint node holding Gazebo and the firmware.
pub type Px4Node = JointNode<ContainerNode, Px4Firmware>;

/// Gazebo image shipping the PX4 worlds and vehicle models.
#[derive(Debug, Clone)]
pub struct Px4Gazebo {
    component: GazeboComponent,
    world: String,
}

impl Px4Gazebo {
    /// Gazebo for `world` from the images tagged `version`.
    pub fn new(version: &str, world: &str, config: GazeboConfig, remove: bool) -> Result<Self> {
        let component = GazeboComponent::builder()
            .image(format!("{GAZEBO_REPOSITORY}:{version}"))
            .template(format!("/app/resources/worlds/{world}.sdf"))
            .config(config)
            .remove(remove)
            .build()?;

        Ok(Self {
            component,
            world: world.to_string(),
        })
    }

    pub fn from_config(config: &Px4Config) -> Result<Self> {
        Self::new(
            &config.version,
            &config.world,
            GazeboConfig {
                backend: config.backend.backend(),
                step_size: config.step_size,
            },
            config.cosim.remove,
        )
    }

    pub fn world(&self) -> &str {
        &self.world
    }

    pub fn component(&self) -> &GazeboComponent {
        &self.component
    }
}

#[async_trait]
impl Component<Environment> for Px4Gazebo {
    type Node = ContainerNode;

    async fn start(&self, environment: &Environment) -> Result<ContainerNode> {
        tracing::info!(world = %self.world, "Starting PX4 Gazebo");
        self.component.start(environment).await
    }

    fn exposed_ports(&self) -> BTreeMap<u16, PortProtocol> {
        self.component.exposed_ports()
    }
}

/// The PX4 firmware component, listening on [`DEFAULT_PORT`].
pub fn firmware(
    version: &str,
    settings: &CosimConfig,
) -> Result<FirmwareComponent<Configuration, States>> {
    let spec = SandboxSpec::builder()
        .image(format!("{FIRMWARE_REPOSITORY}:{version}"))
        .command(format!("firmware --port {DEFAULT_PORT} --verbose"))
        .remove(settings.remove)
        .build()?;

    Ok(FirmwareComponent::new(spec, DEFAULT_PORT)?.monitor(settings.monitor_firmware))
}

/// Simulator tree of one PX4 firmware joined to one Gazebo.
pub struct Px4 {
    simulator: JointSimulator<ContainerNode, Px4Firmware>,
    version: String,
}

impl Px4 {
    /// PX4 with default settings around `gazebo`.
    pub fn new(runtime: Arc<dyn Runtime>, gazebo: Px4Gazebo) -> Result<Self> {
        Self::with_config(runtime, &Px4Config::default(), gazebo)
    }

    pub fn with_config(
        runtime: Arc<dyn Runtime>,
        config: &Px4Config,
        gazebo: Px4Gazebo,
    ) -> Result<Self> {
        let firmware = firmware(&config.version, &config.cosim)?;
        tracing::debug!(
            version = %config.version,
            world = %gazebo.world(),
            monitor = config.cosim.monitor_firmware,
            "PX4 simulator assembled"
        );

        Ok(Self {
            simulator: JointSimulator::with_config(runtime, config.cosim.clone(), gazebo, firmware),
            version: config.version.clone(),
        })
    }

    /// Id of the joint node in every started simulation.
    pub fn joint(&self) -> NodeId<Px4Node> {
        self.simulator.joint()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Start a simulation, fly `configuration` and stop again.
    ///
    /// Missions without waypoints or with out-of-range coordinates are
    /// rejected before anything is started.
    ///
    /// The simulation is stopped even when the flight fails; the flight's
    /// error takes precedence over a failed stop.
    pub async fn simulate(&self, configuration: &Configuration) -> Result<States> {
        check_mission(configuration)?;
        let start = Instant::now();
        let mut simulation = self.start().await?;

        let flown = simulation.firmware().send(configuration).await;
        let stopped = simulation.stop().await;

        let states = flown?;
        stopped?;

        if !states.is_time_ordered() {
            tracing::warn!(samples = states.len(), "Trajectory timestamps are not ordered");
        }
        tracing::info!(
            waypoints = configuration.mission.len(),
            samples = states.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Mission flown"
        );
        Ok(states)
    }
}

#[async_trait]
impl Simulator for Px4 {
    type Environment = Environment;
    type Simulation = Px4Simulation;

    fn add<C>(&mut self, component: C) -> NodeId<C::Node>
    where
        C: Component<Environment>,
    {
        self.simulator.add(component)
    }

    async fn start(&self) -> Result<Px4Simulation> {
        self.simulator.start().await
    }
}

/// Reject a configuration before any unit is started.
pub fn check_mission(configuration: &Configuration) -> Result<()> {
    if configuration.mission.is_empty() {
        return Err(CoreError::Config("mission has no waypoints".into()));
    }
    if let Some(bad) = configuration
        .mission
        .iter()
        .find(|w| !(w.lat.abs() <= 90.0 && w.lon.abs() <= 180.0 && w.alt.is_finite()))
    {
        return Err(CoreError::Config(format!(
            "waypoint out of range: lat {}, lon {}, alt {}",
            bad.lat, bad.lon, bad.alt
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Waypoint, DEFAULT_MISSION};

    #[test]
    fn test_firmware_listens_on_default_port() {
        let component = firmware("1.2.0", &CosimConfig::default()).unwrap();
        assert_eq!(component.port(), 5556);
    }

    #[test]
    fn test_gazebo_uses_px4_world_template() {
        let gazebo = Px4Gazebo::new("1.2.0", "baylands", GazeboConfig::default(), true).unwrap();
        let spec = gazebo.component().container().spec();

        assert_eq!(
            spec.image.to_string(),
            "ghcr.io/cpslab-asu/multicosim/px4/gazebo:1.2.0"
        );
        assert_eq!(spec.command[2], "/app/resources/worlds/baylands.sdf");
        assert_eq!(gazebo.world(), "baylands");
    }

    #[test]
    fn test_check_mission() {
        assert!(check_mission(&Configuration::new(DEFAULT_MISSION)).is_ok());
        assert!(check_mission(&Configuration::new(Vec::new())).is_err());
        assert!(check_mission(&Configuration::new([Waypoint::new(91.0, 0.0, 10.0)])).is_err());
        assert!(check_mission(&Configuration::new([Waypoint::new(0.0, 0.0, f64::NAN)])).is_err());
    }
}
