//! Components and the environment they start in.

use crate::error::Result;
use crate::node::{AnyNode, Node};
use async_trait::async_trait;
use cosim_protocol::ClientConfig;
use cosim_sandbox::{NetworkRef, PortProtocol, Runtime, WaitConfig};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A reusable description of something that can be started.
///
/// Starting a component does not change it, so the same component may be
/// started any number of times, each start producing an independent node.
#[async_trait]
pub trait Component<E: Sync>: Send + Sync + 'static {
    /// Handle produced by [`start`](Self::start).
    type Node: Node;

    /// Start the component in `environment`.
    async fn start(&self, environment: &E) -> Result<Self::Node>;

    /// Container ports this component declares.
    ///
    /// A component joining another unit's network namespace relies on that
    /// unit to publish these.
    fn exposed_ports(&self) -> BTreeMap<u16, PortProtocol> {
        BTreeMap::new()
    }
}

#[async_trait]
pub(crate) trait ErasedComponent<E: Sync>: Send + Sync {
    async fn start_erased(&self, environment: &E) -> Result<Box<dyn AnyNode>>;
}

#[async_trait]
impl<E: Sync, C: Component<E>> ErasedComponent<E> for C {
    async fn start_erased(&self, environment: &E) -> Result<Box<dyn AnyNode>> {
        let node = self.start(environment).await?;
        Ok(Box::new(node))
    }
}

/// Ambient context handed to every container component.
#[derive(Clone)]
pub struct Environment {
    runtime: Arc<dyn Runtime>,
    network: NetworkRef,
    wait: WaitConfig,
    client: ClientConfig,
    published_ports: BTreeMap<u16, PortProtocol>,
    simulator_host: Option<String>,
}

impl Environment {
    pub fn new(runtime: Arc<dyn Runtime>, network: NetworkRef) -> Self {
        Self {
            runtime,
            network,
            wait: WaitConfig::default(),
            client: ClientConfig::default(),
            published_ports: BTreeMap::new(),
            simulator_host: None,
        }
    }

    pub fn with_wait_config(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_client_config(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn network(&self) -> &NetworkRef {
        &self.network
    }

    pub fn wait_config(&self) -> &WaitConfig {
        &self.wait
    }

    pub fn client_config(&self) -> &ClientConfig {
        &self.client
    }

    /// Extra ports every unit started in this environment must publish.
    pub fn published_ports(&self) -> &BTreeMap<u16, PortProtocol> {
        &self.published_ports
    }

    /// Name under which a previously started simulator is reachable on the
    /// run's network, for firmware that connects to it as a peer.
    pub fn simulator_host(&self) -> Option<&str> {
        self.simulator_host.as_deref()
    }

    /// Copy of this environment that knows the simulator's host name.
    pub fn with_simulator_host(&self, host: impl Into<String>) -> Self {
        Self {
            simulator_host: Some(host.into()),
            ..self.clone()
        }
    }

    /// Copy of this environment attached to `network`.
    ///
    /// Extra published ports are not carried over; they belong to the unit
    /// that owns the original network position.
    pub fn with_network(&self, network: NetworkRef) -> Self {
        Self {
            network,
            published_ports: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Copy of this environment that also publishes `ports`.
    pub fn with_published_ports(&self, ports: BTreeMap<u16, PortProtocol>) -> Self {
        let mut env = self.clone();
        env.published_ports.extend(ports);
        env
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("network", &self.network)
            .field("wait", &self.wait)
            .field("client", &self.client)
            .field("published_ports", &self.published_ports)
            .field("simulator_host", &self.simulator_host)
            .finish()
    }
}
