//! Typed firmware components speaking the firmware protocol.

use crate::component::{Component, Environment};
use crate::container::{ReporterComponent, ReporterNode};
use crate::error::Result;
use crate::node::{CommunicationNode, Node};
use async_trait::async_trait;
use cosim_protocol::{ClientConfig, FirmwareClient, Message, ProtocolError, DEFAULT_PORT};
use cosim_sandbox::{NetworkHost, NetworkRef, PortProtocol, SandboxSpec};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// A firmware unit that accepts one `M` and answers with an `R`.
pub struct FirmwareComponent<M, R> {
    reporter: ReporterComponent,
    _marker: PhantomData<fn(M) -> R>,
}

impl<M: Message, R: Message> FirmwareComponent<M, R> {
    /// Firmware listening on `port` inside its unit.
    pub fn new(spec: SandboxSpec, port: u16) -> Result<Self> {
        Ok(Self {
            reporter: ReporterComponent::new(spec, port)?,
            _marker: PhantomData,
        })
    }

    /// Firmware listening on [`DEFAULT_PORT`].
    pub fn with_default_port(spec: SandboxSpec) -> Result<Self> {
        Self::new(spec, DEFAULT_PORT)
    }

    /// Fail the run if the firmware exits before it is stopped.
    pub fn monitor(mut self, monitor: bool) -> Self {
        self.reporter = self.reporter.monitor(monitor);
        self
    }

    pub fn port(&self) -> u16 {
        self.reporter.port()
    }
}

impl<M, R> Clone for FirmwareComponent<M, R> {
    fn clone(&self) -> Self {
        Self {
            reporter: self.reporter.clone(),
            _marker: PhantomData,
        }
    }
}

impl<M, R> fmt::Debug for FirmwareComponent<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmwareComponent")
            .field("reporter", &self.reporter)
            .finish()
    }
}

#[async_trait]
impl<M: Message, R: Message> Component<Environment> for FirmwareComponent<M, R> {
    type Node = FirmwareNode<M, R>;

    async fn start(&self, environment: &Environment) -> Result<FirmwareNode<M, R>> {
        let reporter = self.reporter.start(environment).await?;
        tracing::info!(
            sandbox = %reporter.container().sandbox().name(),
            host_port = reporter.host_port(),
            message = M::TYPE,
            "Firmware started"
        );

        Ok(FirmwareNode {
            reporter,
            client: *environment.client_config(),
            _marker: PhantomData,
        })
    }

    fn exposed_ports(&self) -> BTreeMap<u16, PortProtocol> {
        self.reporter.exposed_ports()
    }
}

/// A running firmware unit.
pub struct FirmwareNode<M, R> {
    reporter: ReporterNode,
    client: ClientConfig,
    _marker: PhantomData<fn(M) -> R>,
}

impl<M, R> FirmwareNode<M, R> {
    pub fn reporter(&self) -> &ReporterNode {
        &self.reporter
    }

    pub fn host_port(&self) -> u16 {
        self.reporter.host_port()
    }
}

impl<M, R> fmt::Debug for FirmwareNode<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmwareNode")
            .field("reporter", &self.reporter)
            .field("client", &self.client)
            .finish()
    }
}

#[async_trait]
impl<M: Message, R: Message> Node for FirmwareNode<M, R> {
    async fn stop(&mut self) -> Result<()> {
        self.reporter.stop().await
    }
}

#[async_trait]
impl<M: Message, R: Message> CommunicationNode<M, R> for FirmwareNode<M, R> {
    /// Checks the watchdog before the exchange, and after it when no reply
    /// came back, so an early exit surfaces as a monitored exit rather than
    /// a bare protocol error.
    ///
    /// A firmware serves one request and then exits, so once any reply has
    /// arrived the watchdog is disarmed.
    async fn send(&self, message: &M) -> Result<R> {
        let container = self.reporter.container();
        container.check()?;

        let client = FirmwareClient::<M, R>::new(self.reporter.host_port()).with_config(self.client);
        let result = client.send(message, container).await;

        if replied(&result) {
            container.disarm();
        } else {
            container.check()?;
        }
        Ok(result?)
    }
}

/// Whether the firmware answered, successfully or not.
fn replied<R>(result: &cosim_protocol::Result<R>) -> bool {
    matches!(
        result,
        Ok(_)
            | Err(ProtocolError::Firmware(_))
            | Err(ProtocolError::MessageTypeMismatch { .. })
            | Err(ProtocolError::ResponseTypeMismatch { .. })
    )
}

#[async_trait]
impl<M: Message, R: Message> NetworkHost for FirmwareNode<M, R> {
    async fn network_identity(&self) -> cosim_sandbox::Result<NetworkRef> {
        self.reporter.container().network_identity().await
    }
}
