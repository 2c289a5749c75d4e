//! Several units sharing one network stack.
//!
//! The parent unit owns the namespace; every attached child joins it, so
//! they all reach each other on localhost. The parent publishes the ports
//! its children declare.

use crate::component::{Component, Environment, ErasedComponent};
use crate::error::Result;
use crate::node::{AnyNode, Node, NodeId};
use async_trait::async_trait;
use cosim_sandbox::{NetworkHost, PortProtocol};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

struct Child {
    id: Uuid,
    component: Box<dyn ErasedComponent<Environment>>,
    ports: BTreeMap<u16, PortProtocol>,
}

/// A namespace owner with any number of attached children.
pub struct AttachedComponent<P> {
    parent: P,
    children: Vec<Child>,
}

impl<P> AttachedComponent<P>
where
    P: Component<Environment>,
    P::Node: NetworkHost,
{
    pub fn new(parent: P) -> Self {
        Self {
            parent,
            children: Vec::new(),
        }
    }

    /// Attach a child and return the id of the node it will start.
    ///
    /// Children start in attach order.
    pub fn attach<C>(&mut self, child: C) -> NodeId<C::Node>
    where
        C: Component<Environment>,
    {
        let id = NodeId::new();
        let ports = child.exposed_ports();
        self.children.push(Child {
            id: id.as_uuid(),
            component: Box::new(child),
            ports,
        });
        id
    }

    /// Builder form of [`attach`](Self::attach), for children that are never looked up.
    pub fn with_child<C>(mut self, child: C) -> Self
    where
        C: Component<Environment>,
    {
        self.attach(child);
        self
    }

    pub fn parent(&self) -> &P {
        &self.parent
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn child_ports(&self) -> BTreeMap<u16, PortProtocol> {
        self.children
            .iter()
            .flat_map(|child| child.ports.iter().map(|(port, protocol)| (*port, *protocol)))
            .collect()
    }
}

impl<P: fmt::Debug> fmt::Debug for AttachedComponent<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachedComponent")
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .finish()
    }
}

#[async_trait]
impl<P> Component<Environment> for AttachedComponent<P>
where
    P: Component<Environment>,
    P::Node: NetworkHost,
{
    type Node = AttachedNode<P::Node>;

    /// Starts the parent, waits until it can be joined, then starts each
    /// child in its namespace. A failure stops whatever already started,
    /// newest first, parent last.
    async fn start(&self, environment: &Environment) -> Result<AttachedNode<P::Node>> {
        let parent = self
            .parent
            .start(&environment.with_published_ports(self.child_ports()))
            .await?;
        let mut node = AttachedNode {
            parent,
            children: Vec::with_capacity(self.children.len()),
            stopped: false,
        };

        let identity = match node.parent.network_identity().await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::error!(error = %e, "Parent never became joinable, stopping it");
                node.unwind().await;
                return Err(e.into());
            }
        };
        let child_env = environment.with_network(identity);

        for child in &self.children {
            match child.component.start_erased(&child_env).await {
                Ok(started) => node.children.push(StartedChild {
                    id: child.id,
                    node: started,
                }),
                Err(e) => {
                    tracing::error!(child = %child.id, error = %e, "Attached child failed to start, unwinding");
                    node.unwind().await;
                    return Err(e);
                }
            }
        }

        tracing::info!(
            network = %child_env.network(),
            children = node.children.len(),
            "Attached units started"
        );
        Ok(node)
    }

    fn exposed_ports(&self) -> BTreeMap<u16, PortProtocol> {
        let mut ports = self.parent.exposed_ports();
        ports.extend(self.child_ports());
        ports
    }
}

struct StartedChild {
    id: Uuid,
    node: Box<dyn AnyNode>,
}

/// A running namespace owner and its attached children.
pub struct AttachedNode<PN> {
    parent: PN,
    children: Vec<StartedChild>,
    stopped: bool,
}

impl<PN: Node> AttachedNode<PN> {
    pub fn parent(&self) -> &PN {
        &self.parent
    }

    /// Typed lookup of an attached child.
    pub fn child<N: Node>(&self, id: NodeId<N>) -> Option<&N> {
        let token = id.as_uuid();
        self.children
            .iter()
            .find(|c| c.id == token)?
            .node
            .as_any()
            .downcast_ref()
    }

    /// Number of started children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    async fn unwind(&mut self) {
        self.stopped = true;
        while let Some(mut child) = self.children.pop() {
            if let Err(e) = child.node.stop().await {
                tracing::warn!(child = %child.id, error = %e, "Cleanup stop failed");
            }
        }
        if let Err(e) = self.parent.stop().await {
            tracing::warn!(error = %e, "Cleanup stop of parent failed");
        }
    }
}

impl<PN: fmt::Debug> fmt::Debug for AttachedNode<PN> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachedNode")
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .field("stopped", &self.stopped)
            .finish()
    }
}

#[async_trait]
impl<PN: Node> Node for AttachedNode<PN> {
    /// Stops the children in attach order, then the parent. Every unit is
    /// attempted; the first error is returned.
    async fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let mut first_error = None;
        for child in &mut self.children {
            if let Err(e) = child.node.stop().await {
                tracing::warn!(child = %child.id, error = %e, "Attached child did not stop cleanly");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.parent.stop().await {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerComponent, ContainerNode};
    use cosim_sandbox::mock::MockRuntime;
    use cosim_sandbox::{NetworkRef, RunStatus, Runtime, SandboxSpec, WaitConfig};
    use std::sync::Arc;
    use std::time::Duration;

    fn spec(image: &str) -> SandboxSpec {
        SandboxSpec::builder().image(image).build().unwrap()
    }

    async fn environment(runtime: &Arc<MockRuntime>) -> Environment {
        runtime.create_network("sim").await.unwrap();
        Environment::new(runtime.clone(), NetworkRef::Named("sim".into())).with_wait_config(
            WaitConfig {
                poll_interval: Duration::from_millis(5),
                identity_timeout: Duration::from_millis(100),
                ..WaitConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_children_join_parent_namespace() {
        let runtime = Arc::new(MockRuntime::new());
        let env = environment(&runtime).await;

        let mut attached = AttachedComponent::new(ContainerComponent::new(spec("gazebo")));
        let firmware = attached.attach(ContainerComponent::new(
            SandboxSpec::builder().image("firmware").tcp_port(5556).build().unwrap(),
        ));
        let logger = attached.attach(ContainerComponent::new(
            SandboxSpec::builder().image("logger").port(14550, PortProtocol::Udp).build().unwrap(),
        ));
        assert_eq!(attached.len(), 2);

        let mut node = attached.start(&env).await.unwrap();
        let launched = runtime.launched();
        assert_eq!(launched.len(), 3);

        let parent_spec = runtime.launch_spec(&launched[0]).unwrap();
        assert!(parent_spec.ports.contains_key(&5556));
        assert!(parent_spec.ports.contains_key(&14550));

        let owner = NetworkRef::Container(runtime.name_of(&launched[0]).unwrap());
        for id in &launched[1..] {
            assert_eq!(runtime.launch_spec(id).unwrap().network, owner);
        }

        let firmware_node: &ContainerNode = node.child(firmware).unwrap();
        assert_eq!(firmware_node.sandbox().id(), launched[1]);
        assert_eq!(node.child(logger).unwrap().sandbox().id(), launched[2]);

        node.stop().await.unwrap();
        node.stop().await.unwrap();
        for id in &launched {
            assert_eq!(runtime.stop_requests(id), 1);
            assert_eq!(runtime.status_of(id), Some(RunStatus::Exited));
        }
    }

    #[tokio::test]
    async fn test_failed_child_unwinds_everything() {
        let runtime = Arc::new(MockRuntime::new());
        let env = environment(&runtime).await;
        runtime.forbid_image("broken:latest");

        let attached = AttachedComponent::new(ContainerComponent::new(spec("gazebo")))
            .with_child(ContainerComponent::new(spec("firmware")))
            .with_child(ContainerComponent::new(spec("broken")));

        let err = attached.start(&env).await.unwrap_err();
        assert!(matches!(
            err,
            crate::CoreError::Sandbox(cosim_sandbox::SandboxError::ImageResolution { .. })
        ));

        let launched = runtime.launched();
        assert_eq!(launched.len(), 2);
        for id in &launched {
            assert_eq!(runtime.stop_requests(id), 1);
        }
    }
}
