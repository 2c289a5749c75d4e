//! Sandbox specification and wait settings.

use crate::error::{Result, SandboxError};
use crate::image::ImageRef;
use crate::network::NetworkRef;
use crate::runtime::{LaunchSpec, PortProtocol};
use std::collections::BTreeMap;
use std::time::Duration;

/// Description of one unit to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    /// Image to start the unit from.
    pub image: ImageRef,
    /// Command line, already split into arguments.
    pub command: Vec<String>,
    /// Declared container ports to publish on the host.
    pub ports: BTreeMap<u16, PortProtocol>,
    /// Delete the unit after a good exit.
    pub remove: bool,
}

impl SandboxSpec {
    /// Create a new spec builder.
    pub fn builder() -> SandboxSpecBuilder {
        SandboxSpecBuilder::default()
    }

    /// Attach this spec to a network, producing what the runtime launches.
    pub fn launch_spec(&self, network: &NetworkRef) -> LaunchSpec {
        LaunchSpec {
            image: self.image.clone(),
            command: self.command.clone(),
            ports: self.ports.clone(),
            network: network.clone(),
        }
    }
}

/// Builder for SandboxSpec.
#[derive(Debug, Default)]
pub struct SandboxSpecBuilder {
    image: Option<String>,
    command: Option<String>,
    ports: BTreeMap<u16, PortProtocol>,
    remove: bool,
}

impl SandboxSpecBuilder {
    /// Set the image reference (`repo[:tag]`).
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the command line. It is split shell-style at build time.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Publish a TCP port.
    pub fn tcp_port(self, port: u16) -> Self {
        self.port(port, PortProtocol::Tcp)
    }

    /// Publish a port with the given protocol.
    pub fn port(mut self, port: u16, protocol: PortProtocol) -> Self {
        self.ports.insert(port, protocol);
        self
    }

    /// Remove the unit after a good exit.
    pub fn remove(mut self, remove: bool) -> Self {
        self.remove = remove;
        self
    }

    /// Build the spec, validating all required fields.
    pub fn build(self) -> Result<SandboxSpec> {
        let image = self
            .image
            .ok_or_else(|| SandboxError::Config("image is required".into()))?;
        let image = ImageRef::parse(&image)?;

        let command = match self.command {
            Some(line) => shlex::split(&line)
                .ok_or_else(|| SandboxError::Config(format!("unbalanced quotes in command: {line}")))?,
            None => Vec::new(),
        };

        if self.ports.contains_key(&0) {
            return Err(SandboxError::Config("port 0 cannot be published".into()));
        }

        Ok(SandboxSpec {
            image,
            command,
            ports: self.ports,
            remove: self.remove,
        })
    }
}

/// Polling and deadline settings for every wait loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitConfig {
    /// Delay between two runtime polls (default: 50ms).
    pub poll_interval: Duration,
    /// Deadline for leaving the `created` state (default: 60s).
    pub start_timeout: Duration,
    /// Deadline for a declared port to get a host binding (default: 30s).
    pub port_timeout: Duration,
    /// Deadline for the runtime to name a unit (default: 30s).
    pub identity_timeout: Duration,
    /// Grace period between stop request and kill (default: 10s).
    pub stop_grace: Duration,
    /// Deadline for reaching a terminal state after kill (default: 30s).
    pub exit_timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            start_timeout: Duration::from_secs(60),
            port_timeout: Duration::from_secs(30),
            identity_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(10),
            exit_timeout: Duration::from_secs(30),
        }
    }
}

impl WaitConfig {
    /// Create a new config builder.
    pub fn builder() -> WaitConfigBuilder {
        WaitConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(SandboxError::Config("poll_interval must be > 0".into()));
        }
        if self.start_timeout.is_zero()
            || self.port_timeout.is_zero()
            || self.identity_timeout.is_zero()
            || self.exit_timeout.is_zero()
        {
            return Err(SandboxError::Config("timeouts must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for WaitConfig.
#[derive(Debug, Default)]
pub struct WaitConfigBuilder {
    config: WaitConfig,
}

impl WaitConfigBuilder {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.config.start_timeout = timeout;
        self
    }

    pub fn port_timeout(mut self, timeout: Duration) -> Self {
        self.config.port_timeout = timeout;
        self
    }

    pub fn identity_timeout(mut self, timeout: Duration) -> Self {
        self.config.identity_timeout = timeout;
        self
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.config.stop_grace = grace;
        self
    }

    pub fn exit_timeout(mut self, timeout: Duration) -> Self {
        self.config.exit_timeout = timeout;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<WaitConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder_splits_command() {
        let spec = SandboxSpec::builder()
            .image("ghcr.io/cpslab-asu/multicosim/px4/firmware")
            .command("firmware --port 5556 --world 'iris runway'")
            .tcp_port(5556)
            .build()
            .expect("should build successfully");

        assert_eq!(spec.image.tag(), Some("latest"));
        assert_eq!(
            spec.command,
            vec!["firmware", "--port", "5556", "--world", "iris runway"]
        );
        assert_eq!(spec.ports.get(&5556), Some(&PortProtocol::Tcp));
        assert!(!spec.remove);
    }

    #[test]
    fn test_spec_builder_missing_image() {
        let result = SandboxSpec::builder().command("true").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_spec_builder_unbalanced_quotes() {
        let result = SandboxSpec::builder()
            .image("alpine")
            .command("sh -c 'echo hi")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_spec_builder_rejects_port_zero() {
        let result = SandboxSpec::builder().image("alpine").tcp_port(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_launch_spec_carries_network() {
        let spec = SandboxSpec::builder().image("alpine").build().unwrap();
        let launch = spec.launch_spec(&NetworkRef::Container("gazebo".into()));
        assert_eq!(launch.network, NetworkRef::Container("gazebo".into()));
        assert!(launch.command.is_empty());
    }

    #[test]
    fn test_wait_config_defaults() {
        let config = WaitConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.stop_grace, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wait_config_rejects_zero_interval() {
        let result = WaitConfig::builder()
            .poll_interval(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_wait_config_builder() {
        let config = WaitConfig::builder()
            .port_timeout(Duration::from_secs(5))
            .stop_grace(Duration::from_secs(1))
            .build()
            .unwrap();
        assert_eq!(config.port_timeout, Duration::from_secs(5));
        assert_eq!(config.stop_grace, Duration::from_secs(1));
    }
}
