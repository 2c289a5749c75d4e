//! Simulator and firmware started as one unit.
//!
//! By default the firmware expects to reach the simulator on localhost, so it
//! joins the simulator's network namespace. The simulator therefore starts
//! first and publishes the firmware's ports on its behalf. Firmware that
//! addresses the simulator by host name instead runs beside it as a peer on
//! the run's network.

use crate::component::{Component, Environment};
use crate::config::CosimConfig;
use crate::error::Result;
use crate::node::{CommunicationNode, Node, NodeId};
use crate::simulation::{ContainerSimulation, ContainerSimulator, Simulation, Simulator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cosim_sandbox::{NetworkHost, NetworkRef, PortProtocol, Runtime};
use std::collections::BTreeMap;
use std::sync::Arc;

/// How the firmware reaches the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// The firmware joins the simulator's network namespace.
    #[default]
    SharedNamespace,
    /// The firmware runs on the same network and is told the simulator's
    /// host name through [`Environment::simulator_host`].
    Peer,
}

/// A simulator component paired with a firmware component.
#[derive(Debug, Clone)]
pub struct JointComponent<S, F> {
    simulator: S,
    firmware: F,
    placement: Placement,
}

impl<S, F> JointComponent<S, F> {
    /// Firmware sharing the simulator's network namespace.
    pub fn new(simulator: S, firmware: F) -> Self {
        Self {
            simulator,
            firmware,
            placement: Placement::SharedNamespace,
        }
    }

    /// Firmware running beside the simulator, addressing it by name.
    pub fn peers(simulator: S, firmware: F) -> Self {
        Self {
            simulator,
            firmware,
            placement: Placement::Peer,
        }
    }

    pub fn simulator(&self) -> &S {
        &self.simulator
    }

    pub fn firmware(&self) -> &F {
        &self.firmware
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }
}

#[async_trait]
impl<S, F> Component<Environment> for JointComponent<S, F>
where
    S: Component<Environment>,
    S::Node: NetworkHost,
    F: Component<Environment>,
{
    type Node = JointNode<S::Node, F::Node>;

    /// Starts the simulator, waits until it is running under a resolved
    /// name, then starts the firmware next to it. The simulator is stopped
    /// again if any later step fails; one that exited before the firmware
    /// could start fails the start with its exit code.
    async fn start(&self, environment: &Environment) -> Result<Self::Node> {
        let simulator_env = match self.placement {
            Placement::SharedNamespace => {
                environment.with_published_ports(self.firmware.exposed_ports())
            }
            Placement::Peer => environment.clone(),
        };
        let mut simulator = self.simulator.start(&simulator_env).await?;

        let identity = match simulator.network_identity().await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::error!(error = %e, "Simulator never became joinable, stopping it");
                stop_after_failure(&mut simulator).await;
                return Err(e.into());
            }
        };
        let identity_ready_at = Utc::now();
        tracing::debug!(network = %identity, placement = ?self.placement, "Simulator network identity available");

        let firmware_env = match (self.placement, identity.owner()) {
            (Placement::Peer, Some(host)) => environment.with_simulator_host(host),
            (Placement::Peer, None) => environment.clone(),
            (Placement::SharedNamespace, _) => environment.with_network(identity.clone()),
        };

        let firmware_started_at = Utc::now();
        let firmware = match self.firmware.start(&firmware_env).await {
            Ok(firmware) => firmware,
            Err(e) => {
                tracing::error!(error = %e, "Firmware failed to start, stopping simulator");
                stop_after_failure(&mut simulator).await;
                return Err(e);
            }
        };

        tracing::info!(
            firmware_ms = (Utc::now() - firmware_started_at).num_milliseconds(),
            "Joint simulation started"
        );

        Ok(JointNode {
            simulator,
            firmware,
            identity,
            identity_ready_at,
            firmware_started_at,
            stopped: false,
        })
    }

    fn exposed_ports(&self) -> BTreeMap<u16, PortProtocol> {
        let mut ports = self.simulator.exposed_ports();
        ports.extend(self.firmware.exposed_ports());
        ports
    }
}

async fn stop_after_failure<N: Node>(node: &mut N) {
    if let Err(e) = node.stop().await {
        tracing::warn!(error = %e, "Cleanup stop failed");
    }
}

/// Running simulator and firmware.
#[derive(Debug)]
pub struct JointNode<SN, FN> {
    simulator: SN,
    firmware: FN,
    identity: NetworkRef,
    identity_ready_at: DateTime<Utc>,
    firmware_started_at: DateTime<Utc>,
    stopped: bool,
}

impl<SN, FN> JointNode<SN, FN> {
    pub fn simulator(&self) -> &SN {
        &self.simulator
    }

    pub fn firmware(&self) -> &FN {
        &self.firmware
    }

    /// Name of the simulator unit, as resolved before the firmware started.
    pub fn simulator_host(&self) -> Option<&str> {
        self.identity.owner()
    }

    /// When the simulator's network namespace became joinable.
    pub fn identity_ready_at(&self) -> DateTime<Utc> {
        self.identity_ready_at
    }

    /// When the firmware start began.
    pub fn firmware_started_at(&self) -> DateTime<Utc> {
        self.firmware_started_at
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[async_trait]
impl<SN: Node, FN: Node> Node for JointNode<SN, FN> {
    /// Stops the firmware, then the simulator whose namespace it lives in.
    /// Both are attempted; the firmware's error wins.
    async fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let firmware = self.firmware.stop().await;
        if let Err(e) = &firmware {
            tracing::warn!(error = %e, "Firmware did not stop cleanly");
        }
        let simulator = self.simulator.stop().await;

        firmware?;
        simulator
    }
}

#[async_trait]
impl<SN, FN, M, R> CommunicationNode<M, R> for JointNode<SN, FN>
where
    SN: Node,
    FN: CommunicationNode<M, R>,
    M: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn send(&self, message: &M) -> Result<R> {
        self.firmware.send(message).await
    }
}

/// A [`ContainerSimulator`] with one joint composition registered up front.
pub struct JointSimulator<SN, FN> {
    simulator: ContainerSimulator,
    joint: NodeId<JointNode<SN, FN>>,
}

impl<SN: Node, FN: Node> JointSimulator<SN, FN> {
    pub fn new<S, F>(runtime: Arc<dyn Runtime>, simulator: S, firmware: F) -> Self
    where
        S: Component<Environment, Node = SN>,
        SN: NetworkHost,
        F: Component<Environment, Node = FN>,
    {
        Self::with_config(runtime, CosimConfig::default(), simulator, firmware)
    }

    pub fn with_config<S, F>(
        runtime: Arc<dyn Runtime>,
        config: CosimConfig,
        simulator: S,
        firmware: F,
    ) -> Self
    where
        S: Component<Environment, Node = SN>,
        SN: NetworkHost,
        F: Component<Environment, Node = FN>,
    {
        Self::with_joint(runtime, config, JointComponent::new(simulator, firmware))
    }

    /// Register an already assembled joint component, whatever its placement.
    pub fn with_joint<S, F>(
        runtime: Arc<dyn Runtime>,
        config: CosimConfig,
        joint: JointComponent<S, F>,
    ) -> Self
    where
        S: Component<Environment, Node = SN>,
        SN: NetworkHost,
        F: Component<Environment, Node = FN>,
    {
        let mut inner = ContainerSimulator::with_config(runtime, config);
        let joint = inner.add(joint);
        Self {
            simulator: inner,
            joint,
        }
    }

    /// Id of the joint node in every simulation this simulator starts.
    pub fn joint(&self) -> NodeId<JointNode<SN, FN>> {
        self.joint
    }

    pub fn config(&self) -> &CosimConfig {
        self.simulator.config()
    }
}

#[async_trait]
impl<SN: Node, FN: Node> Simulator for JointSimulator<SN, FN> {
    type Environment = Environment;
    type Simulation = JointSimulation<SN, FN>;

    fn add<C>(&mut self, component: C) -> NodeId<C::Node>
    where
        C: Component<Environment>,
    {
        self.simulator.add(component)
    }

    async fn start(&self) -> Result<JointSimulation<SN, FN>> {
        Ok(JointSimulation {
            simulation: self.simulator.start().await?,
            joint: self.joint,
        })
    }
}

/// A running [`JointSimulator`].
#[derive(Debug)]
pub struct JointSimulation<SN, FN> {
    simulation: ContainerSimulation,
    joint: NodeId<JointNode<SN, FN>>,
}

impl<SN: Node, FN: Node> JointSimulation<SN, FN> {
    pub fn joint(&self) -> &JointNode<SN, FN> {
        self.simulation.node(self.joint)
    }

    /// The firmware node, which carries `send`.
    pub fn firmware(&self) -> &FN {
        self.joint().firmware()
    }

    pub fn simulator(&self) -> &SN {
        self.joint().simulator()
    }

    pub fn inner(&self) -> &ContainerSimulation {
        &self.simulation
    }
}

#[async_trait]
impl<SN: Node, FN: Node> Simulation for JointSimulation<SN, FN> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerComponent, ContainerNode};
    use cosim_sandbox::mock::{MockRuntime, UnitScript};
    use cosim_sandbox::{RunStatus, SandboxError, SandboxSpec, WaitConfig};
    use std::time::Duration;

    fn fast() -> WaitConfig {
        WaitConfig {
            poll_interval: Duration::from_millis(5),
            identity_timeout: Duration::from_millis(100),
            ..WaitConfig::default()
        }
    }

    fn spec(image: &str) -> SandboxSpec {
        SandboxSpec::builder().image(image).build().unwrap()
    }

    async fn environment(runtime: &Arc<MockRuntime>) -> Environment {
        runtime.create_network("sim").await.unwrap();
        Environment::new(runtime.clone(), NetworkRef::Named("sim".into())).with_wait_config(fast())
    }

    #[tokio::test]
    async fn test_firmware_joins_simulator_namespace() {
        let runtime = Arc::new(MockRuntime::new());
        let env = environment(&runtime).await;

        let firmware = ContainerComponent::new(
            SandboxSpec::builder().image("firmware").tcp_port(5556).build().unwrap(),
        );
        let joint = JointComponent::new(ContainerComponent::new(spec("gazebo")), firmware);
        let mut node = joint.start(&env).await.unwrap();

        let launched = runtime.launched();
        let simulator_spec = runtime.launch_spec(&launched[0]).unwrap();
        let firmware_spec = runtime.launch_spec(&launched[1]).unwrap();

        // The simulator publishes the firmware's port
        assert!(simulator_spec.ports.contains_key(&5556));
        assert_eq!(simulator_spec.network, NetworkRef::Named("sim".into()));
        assert_eq!(
            firmware_spec.network,
            NetworkRef::Container(runtime.name_of(&launched[0]).unwrap())
        );
        assert!(node.firmware_started_at() >= node.identity_ready_at());

        node.stop().await.unwrap();
        assert_eq!(runtime.status_of(&launched[0]), Some(RunStatus::Exited));
        assert_eq!(runtime.status_of(&launched[1]), Some(RunStatus::Exited));
    }

    #[tokio::test]
    async fn test_stop_order_and_idempotence() {
        let runtime = Arc::new(MockRuntime::new());
        let env = environment(&runtime).await;

        let joint = JointComponent::new(
            ContainerComponent::new(spec("gazebo")),
            ContainerComponent::new(spec("firmware")),
        );
        let mut node: JointNode<ContainerNode, ContainerNode> = joint.start(&env).await.unwrap();
        let launched = runtime.launched();

        node.stop().await.unwrap();
        node.stop().await.unwrap();

        assert!(node.is_stopped());
        assert_eq!(runtime.stop_requests(&launched[0]), 1);
        assert_eq!(runtime.stop_requests(&launched[1]), 1);
    }

    #[tokio::test]
    async fn test_simulator_stopped_when_identity_never_appears() {
        let runtime = Arc::new(MockRuntime::new());
        let env = environment(&runtime).await;
        runtime.script_next(UnitScript {
            name_delay_polls: u32::MAX,
            ..UnitScript::default()
        });

        let joint = JointComponent::new(
            ContainerComponent::new(spec("gazebo")),
            ContainerComponent::new(spec("firmware")),
        );
        let err = joint.start(&env).await.unwrap_err();

        assert!(matches!(
            err,
            crate::CoreError::Sandbox(SandboxError::Timeout { .. })
        ));
        let launched = runtime.launched();
        assert_eq!(launched.len(), 1);
        assert_eq!(runtime.stop_requests(&launched[0]), 1);
    }

    #[tokio::test]
    async fn test_simulator_stopped_when_firmware_fails() {
        let runtime = Arc::new(MockRuntime::new());
        let env = environment(&runtime).await;
        runtime.forbid_image("firmware:latest");

        let joint = JointComponent::new(
            ContainerComponent::new(spec("gazebo")),
            ContainerComponent::new(spec("firmware")),
        );
        let err = joint.start(&env).await.unwrap_err();

        assert!(matches!(
            err,
            crate::CoreError::Sandbox(SandboxError::ImageResolution { .. })
        ));
        let launched = runtime.launched();
        assert_eq!(launched.len(), 1);
        assert_eq!(runtime.stop_requests(&launched[0]), 1);
    }

    #[tokio::test]
    async fn test_exited_simulator_fails_start_with_its_exit_code() {
        let runtime = Arc::new(MockRuntime::new());
        let env = environment(&runtime).await;
        runtime.script_next(UnitScript {
            exit_after_polls: Some((1, 2)),
            ..UnitScript::default()
        });

        let joint = JointComponent::new(
            ContainerComponent::new(spec("gazebo")),
            ContainerComponent::new(spec("firmware")),
        );
        let err = joint.start(&env).await.unwrap_err();

        let launched = runtime.launched();
        match err {
            crate::CoreError::Sandbox(SandboxError::AbnormalExit { name, code }) => {
                assert_eq!(name, runtime.name_of(&launched[0]).unwrap());
                assert_eq!(code, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The firmware was never launched
        assert_eq!(launched.len(), 1);
        assert_eq!(runtime.status_of(&launched[0]), Some(RunStatus::Exited));
    }

    #[tokio::test]
    async fn test_peer_firmware_learns_simulator_host() {
        let runtime = Arc::new(MockRuntime::new());
        let env = environment(&runtime).await;

        let firmware = ContainerComponent::new(
            SandboxSpec::builder().image("firmware").tcp_port(5556).build().unwrap(),
        );
        let joint = JointComponent::peers(ContainerComponent::new(spec("gazebo")), firmware);
        assert_eq!(joint.placement(), Placement::Peer);
        let mut node = joint.start(&env).await.unwrap();

        let launched = runtime.launched();
        let simulator_spec = runtime.launch_spec(&launched[0]).unwrap();
        let firmware_spec = runtime.launch_spec(&launched[1]).unwrap();

        // Both units sit on the run's network; the firmware publishes its own port
        assert!(!simulator_spec.ports.contains_key(&5556));
        assert!(firmware_spec.ports.contains_key(&5556));
        assert_eq!(firmware_spec.network, NetworkRef::Named("sim".into()));
        assert_eq!(
            node.simulator_host(),
            runtime.name_of(&launched[0]).as_deref()
        );

        node.stop().await.unwrap();
    }
}
