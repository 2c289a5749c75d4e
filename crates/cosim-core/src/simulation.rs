//! Simulators (registries of components) and the simulations they start.

use crate::component::{Component, Environment, ErasedComponent};
use crate::config::CosimConfig;
use crate::error::Result;
use crate::node::{AnyNode, Node, NodeId};
use async_trait::async_trait;
use cosim_sandbox::{Network, Runtime};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// A running set of nodes.
#[async_trait]
pub trait Simulation: Send + Sync {
    /// Typed lookup of a node started from a registered component.
    fn get<N: Node>(&self, id: NodeId<N>) -> Option<&N>;

    /// Mutable typed lookup.
    fn get_mut<N: Node>(&mut self, id: NodeId<N>) -> Option<&mut N>;

    /// Typed lookup of an id this simulation is known to hold.
    ///
    /// # Panics
    ///
    /// Panics if no node with `id` exists; ids only come from the simulator
    /// that started this simulation, so a miss is a programming error.
    fn node<N: Node>(&self, id: NodeId<N>) -> &N {
        match self.get(id) {
            Some(node) => node,
            None => panic!("node {id:?} does not belong to this simulation"),
        }
    }

    /// Stop every node exactly once.
    async fn stop(&mut self) -> Result<()>;
}

/// A registry of components that can be started into a [`Simulation`].
#[async_trait]
pub trait Simulator: Send + Sync {
    type Environment: Sync;
    type Simulation: Simulation;

    /// Register a component and return the id of the node it will start.
    fn add<C>(&mut self, component: C) -> NodeId<C::Node>
    where
        C: Component<Self::Environment>;

    /// Start every registered component.
    async fn start(&self) -> Result<Self::Simulation>;
}

/// Runs each registered component in its own container on a fresh network.
pub struct ContainerSimulator {
    runtime: Arc<dyn Runtime>,
    config: CosimConfig,
    components: Vec<(Uuid, Box<dyn ErasedComponent<Environment>>)>,
}

impl ContainerSimulator {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self::with_config(runtime, CosimConfig::default())
    }

    pub fn with_config(runtime: Arc<dyn Runtime>, config: CosimConfig) -> Self {
        Self {
            runtime,
            config,
            components: Vec::new(),
        }
    }

    pub fn config(&self) -> &CosimConfig {
        &self.config
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[async_trait]
impl Simulator for ContainerSimulator {
    type Environment = Environment;
    type Simulation = ContainerSimulation;

    fn add<C>(&mut self, component: C) -> NodeId<C::Node>
    where
        C: Component<Environment>,
    {
        let id = NodeId::new();
        let component: Box<dyn ErasedComponent<Environment>> = Box::new(component);
        self.components.push((id.as_uuid(), component));
        tracing::debug!(node_id = %id, components = self.components.len(), "Component registered");
        id
    }

    /// Creates a fresh network and starts the components in registration
    /// order. If one fails, nodes already started are stopped and the network
    /// is removed before the error is returned.
    async fn start(&self) -> Result<ContainerSimulation> {
        let start = Instant::now();
        tracing::info!(components = self.components.len(), "Starting simulation");

        let network = Network::create(self.runtime.clone()).await?;
        let environment = Environment::new(self.runtime.clone(), network.reference())
            .with_wait_config(self.config.wait.clone())
            .with_client_config(self.config.client);

        let mut simulation = ContainerSimulation {
            nodes: Vec::with_capacity(self.components.len()),
            network: Some(network),
        };

        for (id, component) in &self.components {
            match component.start_erased(&environment).await {
                Ok(node) => simulation.nodes.push(Entry {
                    id: *id,
                    node,
                    stopped: false,
                }),
                Err(e) => {
                    tracing::error!(node_id = %id, error = %e, "Component failed to start, cleaning up");
                    if let Err(cleanup) = simulation.stop().await {
                        tracing::warn!(error = %cleanup, "Cleanup after failed start was incomplete");
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(
            nodes = simulation.nodes.len(),
            network = %environment.network(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Simulation started"
        );
        Ok(simulation)
    }
}

struct Entry {
    id: Uuid,
    node: Box<dyn AnyNode>,
    stopped: bool,
}

/// Nodes started by a [`ContainerSimulator`] plus the network they share.
pub struct ContainerSimulation {
    nodes: Vec<Entry>,
    network: Option<Network>,
}

impl ContainerSimulation {
    fn entry(&self, id: Uuid) -> Option<&Entry> {
        self.nodes.iter().find(|e| e.id == id)
    }

    /// Name of the network created for this run, until it is removed.
    pub fn network_name(&self) -> Option<&str> {
        self.network.as_ref().map(Network::name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether every node has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.nodes.iter().all(|e| e.stopped)
    }
}

#[async_trait]
impl Simulation for ContainerSimulation {
    fn get<N: Node>(&self, id: NodeId<N>) -> Option<&N> {
        self.entry(id.as_uuid())?.node.as_any().downcast_ref()
    }

    fn get_mut<N: Node>(&mut self, id: NodeId<N>) -> Option<&mut N> {
        let token = id.as_uuid();
        self.nodes
            .iter_mut()
            .find(|e| e.id == token)?
            .node
            .as_any_mut()
            .downcast_mut()
    }

    /// Stops nodes in reverse registration order, then removes the network.
    ///
    /// Every node is attempted even if an earlier one fails; the first error
    /// is returned. Each node is stopped at most once; calling this again
    /// leaves already attempted nodes alone.
    async fn stop(&mut self) -> Result<()> {
        let start = Instant::now();
        let mut first_error = None;

        for entry in self.nodes.iter_mut().rev() {
            if entry.stopped {
                continue;
            }
            entry.stopped = true;
            tracing::debug!(node_id = %entry.id, "Stopping node");
            if let Err(e) = entry.node.stop().await {
                tracing::error!(node_id = %entry.id, error = %e, "Node failed to stop cleanly");
                first_error.get_or_insert(e);
            }
        }

        if let Some(mut network) = self.network.take() {
            if let Err(e) = network.remove().await {
                tracing::warn!(network = %network.name(), error = %e, "Failed to remove network");
                first_error.get_or_insert(e.into());
            }
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            clean = first_error.is_none(),
            "Simulation stopped"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for ContainerSimulation {
    fn drop(&mut self) {
        let running = self.nodes.iter().filter(|e| !e.stopped).count();
        if running > 0 {
            tracing::warn!(running, "Simulation dropped without stop(), containers are left running");
        }
    }
}

impl std::fmt::Debug for ContainerSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSimulation")
            .field("nodes", &self.nodes.len())
            .field("network", &self.network_name())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
