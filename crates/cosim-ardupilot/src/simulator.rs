//! ArduPilot firmware flying beside an ArduPilot-flavoured Gazebo.
//!
//! Unlike PX4, the ArduPilot firmware addresses Gazebo by host name. Gazebo
//! starts first; once its unit has a name the firmware is launched as a peer
//! on the run's network with `--gazebo-host` pointing at it.

use crate::config::ArduPilotConfig;
use crate::messages::{FirmwareOptions, FlightResult, Start, Vehicle, PORT};
use async_trait::async_trait;
use cosim_core::{
    CommunicationNode, Component, ContainerNode, ContainerSimulation, ContainerSimulator,
    CoreError, CosimConfig, Environment, FirmwareComponent, FirmwareNode, GazeboComponent,
    JointComponent, JointNode, Node, NodeId, Result, Simulation, Simulator,
};
use cosim_sandbox::{PortProtocol, Runtime, SandboxSpec};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

const FIRMWARE_REPOSITORY: &str = "ghcr.io/cpslab-asu/multicosim/ardupilot/firmware";

/// Gazebo image shipping the ArduPilot plugin and worlds.
pub const GAZEBO_IMAGE: &str = "ghcr.io/cpslab-asu/multicosim/ardupilot/gazebo:harmonic";

/// World flown in by default.
pub const GAZEBO_WORLD: &str = "/app/resources/worlds/iris_runway.sdf";

/// Firmware image for `version`.
pub fn firmware_image(version: &str) -> String {
    format!("{FIRMWARE_REPOSITORY}:{version}")
}

/// Firmware node answering start requests with trajectories.
pub type ArduPilotFirmwareNode = FirmwareNode<Start, FlightResult>;

/// Which Gazebo to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GazeboOptions {
    pub image: String,
    /// World file inside the image.
    pub world: String,
}

impl Default for GazeboOptions {
    fn default() -> Self {
        Self {
            image: GAZEBO_IMAGE.to_string(),
            world: GAZEBO_WORLD.to_string(),
        }
    }
}

impl GazeboOptions {
    pub fn component(&self, remove: bool) -> Result<GazeboComponent> {
        GazeboComponent::builder()
            .image(self.image.clone())
            .template(self.world.clone())
            .remove(remove)
            .build()
    }
}

/// The ArduPilot firmware. Its command line depends on Gazebo's host name,
/// so the unit spec is only built at start.
#[derive(Debug, Clone)]
pub struct ArduPilotFirmware {
    image: String,
    vehicle: Vehicle,
    frame: String,
    param_files: Vec<String>,
    remove: bool,
    monitor: bool,
}

impl ArduPilotFirmware {
    pub fn new(options: &FirmwareOptions, settings: &CosimConfig) -> Self {
        Self {
            image: options.image.clone(),
            vehicle: options.vehicle,
            frame: options.frame.clone(),
            param_files: options.param_files.clone(),
            remove: settings.remove,
            monitor: settings.monitor_firmware,
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Shell command starting the firmware against Gazebo at `gazebo_host`.
    pub fn command(&self, gazebo_host: &str) -> Result<String> {
        let vehicle = self.vehicle.to_string();
        let mut args = vec![
            "firmware",
            "run",
            "--vehicle",
            vehicle.as_str(),
            "--frame",
            self.frame.as_str(),
            "--gazebo-host",
            gazebo_host,
        ];
        for file in &self.param_files {
            args.push("--param-file");
            args.push(file.as_str());
        }

        shlex::try_join(args)
            .map_err(|e| CoreError::Config(format!("cannot quote firmware command: {e}")))
    }

    pub fn spec(&self, gazebo_host: &str) -> Result<SandboxSpec> {
        Ok(SandboxSpec::builder()
            .image(self.image.clone())
            .command(self.command(gazebo_host)?)
            .remove(self.remove)
            .build()?)
    }
}

#[async_trait]
impl Component<Environment> for ArduPilotFirmware {
    type Node = ArduPilotFirmwareNode;

    async fn start(&self, environment: &Environment) -> Result<ArduPilotFirmwareNode> {
        let gazebo_host = environment.simulator_host().ok_or_else(|| {
            CoreError::Config("ArduPilot firmware started without a Gazebo host".into())
        })?;
        tracing::info!(vehicle = %self.vehicle, frame = %self.frame, gazebo_host, "Starting ArduPilot firmware");

        FirmwareComponent::new(self.spec(gazebo_host)?, PORT)?
            .monitor(self.monitor)
            .start(environment)
            .await
    }

    fn exposed_ports(&self) -> BTreeMap<u16, PortProtocol> {
        BTreeMap::from([(PORT, PortProtocol::Tcp)])
    }
}

/// Gazebo and the firmware, started in that order.
#[derive(Debug, Clone)]
pub struct ArduPilotComponent {
    joint: JointComponent<GazeboComponent, ArduPilotFirmware>,
}

impl ArduPilotComponent {
    pub fn new(gazebo: GazeboComponent, firmware: ArduPilotFirmware) -> Self {
        Self {
            joint: JointComponent::peers(gazebo, firmware),
        }
    }

    pub fn gazebo(&self) -> &GazeboComponent {
        self.joint.simulator()
    }

    pub fn firmware(&self) -> &ArduPilotFirmware {
        self.joint.firmware()
    }
}

#[async_trait]
impl Component<Environment> for ArduPilotComponent {
    type Node = ArduPilotNode;

    async fn start(&self, environment: &Environment) -> Result<ArduPilotNode> {
        Ok(ArduPilotNode {
            joint: self.joint.start(environment).await?,
        })
    }

    fn exposed_ports(&self) -> BTreeMap<u16, PortProtocol> {
        self.joint.exposed_ports()
    }
}

/// Running Gazebo and firmware.
///
/// Sending [`FirmwareOptions`] fills in both host names and hands the
/// resulting [`Start`] to the firmware.
#[derive(Debug)]
pub struct ArduPilotNode {
    joint: JointNode<ContainerNode, ArduPilotFirmwareNode>,
}

impl ArduPilotNode {
    pub fn gazebo(&self) -> &ContainerNode {
        self.joint.simulator()
    }

    pub fn firmware(&self) -> &ArduPilotFirmwareNode {
        self.joint.firmware()
    }

    /// Host name the firmware was given for Gazebo.
    pub fn gazebo_host(&self) -> Option<&str> {
        self.joint.simulator_host()
    }

    pub fn joint(&self) -> &JointNode<ContainerNode, ArduPilotFirmwareNode> {
        &self.joint
    }
}

#[async_trait]
impl Node for ArduPilotNode {
    async fn stop(&mut self) -> Result<()> {
        self.joint.stop().await
    }
}

#[async_trait]
impl CommunicationNode<FirmwareOptions, FlightResult> for ArduPilotNode {
    async fn send(&self, options: &FirmwareOptions) -> Result<FlightResult> {
        let gazebo_host = self
            .gazebo_host()
            .ok_or_else(|| CoreError::Config("Gazebo host name is unknown".into()))?;
        let firmware_host = self.firmware().reporter().container().sandbox().identity().await?;

        let start = options.start_request(gazebo_host, firmware_host);
        tracing::debug!(
            gazebo_host = %start.gazebo_host,
            firmware_host = %start.firmware_host,
            params = start.param_files.len(),
            "Sending start request"
        );
        self.firmware().send(&start).await
    }
}

/// Simulator tree of one ArduPilot firmware beside one Gazebo.
pub struct ArduPilot {
    simulator: ContainerSimulator,
    node: NodeId<ArduPilotNode>,
    options: FirmwareOptions,
}

impl ArduPilot {
    /// ArduPilot with default orchestration settings.
    pub fn new(
        runtime: Arc<dyn Runtime>,
        gazebo: &GazeboOptions,
        firmware: &FirmwareOptions,
    ) -> Result<Self> {
        Self::with_settings(runtime, CosimConfig::default(), gazebo, firmware)
    }

    pub fn with_config(runtime: Arc<dyn Runtime>, config: &ArduPilotConfig) -> Result<Self> {
        Self::with_settings(
            runtime,
            config.cosim.clone(),
            &config.gazebo_options(),
            &config.firmware_options(),
        )
    }

    pub fn with_settings(
        runtime: Arc<dyn Runtime>,
        settings: CosimConfig,
        gazebo: &GazeboOptions,
        firmware: &FirmwareOptions,
    ) -> Result<Self> {
        let component = ArduPilotComponent::new(
            gazebo.component(settings.remove)?,
            ArduPilotFirmware::new(firmware, &settings),
        );
        tracing::debug!(
            gazebo = %gazebo.image,
            firmware = %firmware.image,
            vehicle = %firmware.vehicle,
            monitor = settings.monitor_firmware,
            "ArduPilot simulator assembled"
        );

        let mut simulator = ContainerSimulator::with_config(runtime, settings);
        let node = simulator.add(component);
        Ok(Self {
            simulator,
            node,
            options: firmware.clone(),
        })
    }

    /// Id of the Gazebo and firmware node in every started simulation.
    pub fn node(&self) -> NodeId<ArduPilotNode> {
        self.node
    }

    /// Options the firmware was assembled with.
    pub fn options(&self) -> &FirmwareOptions {
        &self.options
    }

    /// Start a simulation, fly with `options` and stop again.
    ///
    /// The simulation is stopped even when the flight fails; the flight's
    /// error takes precedence over a failed stop.
    pub async fn simulate(&self, options: &FirmwareOptions) -> Result<FlightResult> {
        let start = Instant::now();
        let mut simulation = self.start().await?;

        let flown = simulation.firmware().send(options).await;
        let stopped = simulation.stop().await;

        let result = flown?;
        stopped?;

        tracing::info!(
            vehicle = %options.vehicle,
            samples = result.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Flight complete"
        );
        Ok(result)
    }
}

#[async_trait]
impl Simulator for ArduPilot {
    type Environment = Environment;
    type Simulation = ArduPilotSimulation;

    fn add<C>(&mut self, component: C) -> NodeId<C::Node>
    where
        C: Component<Environment>,
    {
        self.simulator.add(component)
    }

    async fn start(&self) -> Result<ArduPilotSimulation> {
        Ok(ArduPilotSimulation {
            simulation: self.simulator.start().await?,
            node: self.node,
        })
    }
}

/// A running [`ArduPilot`] simulator.
#[derive(Debug)]
pub struct ArduPilotSimulation {
    simulation: ContainerSimulation,
    node: NodeId<ArduPilotNode>,
}

impl ArduPilotSimulation {
    pub fn gazebo(&self) -> &ContainerNode {
        self.simulation.node(self.node).gazebo()
    }

    /// The firmware side, which carries `send`.
    pub fn firmware(&self) -> &ArduPilotNode {
        self.simulation.node(self.node)
    }

    pub fn inner(&self) -> &ContainerSimulation {
        &self.simulation
    }
}

#[async_trait]
impl Simulation for ArduPilotSimulation {
    fn get<N: Node>(&self, id: NodeId<N>) -> Option<&N> {
        self.simulation.get(id)
    }

    fn get_mut<N: Node>(&mut self, id: NodeId<N>) -> Option<&mut N> {
        self.simulation.get_mut(id)
    }

    async fn stop(&mut self) -> Result<()> {
        self.simulation.stop().await
    }
}
