//! Components backed by a single sandbox.

use crate::component::{Component, Environment};
use crate::error::{CoreError, Result};
use crate::node::Node;
use async_trait::async_trait;
use cosim_protocol::{Liveness, ProtocolError};
use cosim_sandbox::{NetworkHost, NetworkRef, PortProtocol, Sandbox, SandboxSpec, Watchdog};
use std::collections::BTreeMap;

/// Starts one sandbox from a fixed spec.
#[derive(Debug, Clone)]
pub struct ContainerComponent {
    spec: SandboxSpec,
    monitor: bool,
}

impl ContainerComponent {
    pub fn new(spec: SandboxSpec) -> Self {
        Self {
            spec,
            monitor: false,
        }
    }

    /// Treat an early exit of the unit as fatal to the simulation.
    pub fn monitor(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn spec(&self) -> &SandboxSpec {
        &self.spec
    }

    pub fn is_monitored(&self) -> bool {
        self.monitor
    }
}

#[async_trait]
impl Component<Environment> for ContainerComponent {
    type Node = ContainerNode;

    async fn start(&self, environment: &Environment) -> Result<ContainerNode> {
        let mut spec = self.spec.clone();
        for (port, protocol) in environment.published_ports() {
            spec.ports.entry(*port).or_insert(*protocol);
        }

        let sandbox = Sandbox::start(
            environment.runtime().clone(),
            spec,
            environment.network().clone(),
            environment.wait_config().clone(),
        )
        .await?;

        let watchdog = self.monitor.then(|| {
            Watchdog::spawn(
                environment.runtime().clone(),
                sandbox.id(),
                sandbox.name(),
                environment.wait_config().poll_interval,
            )
        });

        Ok(ContainerNode { sandbox, watchdog })
    }

    fn exposed_ports(&self) -> BTreeMap<u16, PortProtocol> {
        self.spec.ports.clone()
    }
}

/// A running sandbox, optionally watched.
#[derive(Debug)]
pub struct ContainerNode {
    sandbox: Sandbox,
    watchdog: Option<Watchdog>,
}

impl ContainerNode {
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn is_monitored(&self) -> bool {
        self.watchdog.is_some()
    }

    /// Early exit recorded by the watchdog, if any.
    pub fn check(&self) -> Result<()> {
        match &self.watchdog {
            Some(watchdog) => Ok(watchdog.check()?),
            None => Ok(()),
        }
    }

    /// Stop treating an exit as premature, for units whose work is done.
    pub fn disarm(&self) {
        if let Some(watchdog) = &self.watchdog {
            if let Some(exit) = watchdog.disarm() {
                tracing::debug!(sandbox = %exit.name, status = %exit.status, "Exit after completed work");
            }
        }
    }

    /// Host port bound to a declared container port.
    pub async fn host_port(&self, port: u16, protocol: PortProtocol) -> Result<u16> {
        Ok(self.sandbox.host_port(port, protocol).await?)
    }
}

#[async_trait]
impl Node for ContainerNode {
    /// Stops the watchdog before the unit so an intentional shutdown is
    /// never reported as an early exit. An early exit recorded before the
    /// shutdown takes precedence over the unit's own stop result.
    async fn stop(&mut self) -> Result<()> {
        let monitored = match self.watchdog.as_mut() {
            Some(watchdog) => watchdog.stop().await,
            None => Ok(()),
        };
        let stopped = self.sandbox.stop().await;

        monitored?;
        stopped?;
        Ok(())
    }
}

#[async_trait]
impl NetworkHost for ContainerNode {
    async fn network_identity(&self) -> cosim_sandbox::Result<NetworkRef> {
        self.sandbox.network_identity().await
    }
}

#[async_trait]
impl Liveness for ContainerNode {
    async fn has_exited(&self) -> cosim_protocol::Result<bool> {
        if self.check().is_err() {
            return Ok(true);
        }
        self.sandbox
            .has_exited()
            .await
            .map_err(|e| ProtocolError::Liveness(e.to_string()))
    }
}

/// A container component whose results are read back through one declared port.
#[derive(Debug, Clone)]
pub struct ReporterComponent {
    container: ContainerComponent,
    port: u16,
    protocol: PortProtocol,
}

impl ReporterComponent {
    /// Report through TCP `port`, which is added to the spec's declared ports.
    pub fn new(mut spec: SandboxSpec, port: u16) -> Result<Self> {
        if port == 0 {
            return Err(CoreError::Config("reporter port cannot be 0".into()));
        }
        spec.ports.insert(port, PortProtocol::Tcp);
        Ok(Self {
            container: ContainerComponent::new(spec),
            port,
            protocol: PortProtocol::Tcp,
        })
    }

    pub fn monitor(mut self, monitor: bool) -> Self {
        self.container = self.container.monitor(monitor);
        self
    }

    pub fn container(&self) -> &ContainerComponent {
        &self.container
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl Component<Environment> for ReporterComponent {
    type Node = ReporterNode;

    async fn start(&self, environment: &Environment) -> Result<ReporterNode> {
        let mut node = self.container.start(environment).await?;

        match node.host_port(self.port, self.protocol).await {
            Ok(host_port) => Ok(ReporterNode { node, host_port }),
            Err(e) => {
                tracing::warn!(sandbox = %node.sandbox().name(), error = %e, "Reporter port never published, stopping");
                if let Err(stop_err) = node.stop().await {
                    tracing::warn!(sandbox = %node.sandbox().name(), error = %stop_err, "Failed to stop reporter");
                }
                Err(e)
            }
        }
    }

    fn exposed_ports(&self) -> BTreeMap<u16, PortProtocol> {
        self.container.exposed_ports()
    }
}

/// A container node with its report port resolved on the host.
#[derive(Debug)]
pub struct ReporterNode {
    node: ContainerNode,
    host_port: u16,
}

impl ReporterNode {
    pub fn container(&self) -> &ContainerNode {
        &self.node
    }

    /// Host side of the report port.
    pub fn host_port(&self) -> u16 {
        self.host_port
    }
}

#[async_trait]
impl Node for ReporterNode {
    async fn stop(&mut self) -> Result<()> {
        self.node.stop().await
    }
}

