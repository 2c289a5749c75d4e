//! The container runtime boundary.
//!
//! Everything the orchestrator needs from a sandbox runtime goes through the
//! [`Runtime`] trait so the lifecycle logic can run against Docker in
//! production and against an in-memory runtime in tests.

use crate::error::Result;
use crate::image::ImageRef;
use crate::network::NetworkRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Transport protocol of a declared container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    Tcp,
    Udp,
}

impl PortProtocol {
    /// Key used by the runtime's port table, e.g. `5556/tcp`.
    pub fn port_key(self, port: u16) -> String {
        format!("{port}/{self}")
    }
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortProtocol::Tcp => write!(f, "tcp"),
            PortProtocol::Udp => write!(f, "udp"),
        }
    }
}

/// Run status reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl RunStatus {
    /// The unit will not run again without outside intervention.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Exited | RunStatus::Dead)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Created => "created",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Restarting => "restarting",
            RunStatus::Removing => "removing",
            RunStatus::Exited => "exited",
            RunStatus::Dead => "dead",
            RunStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One host-side binding of a published container port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp")]
    pub host_ip: Option<String>,
    #[serde(rename = "HostPort")]
    pub host_port: Option<String>,
}

/// Snapshot of a unit as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitState {
    /// Runtime-assigned name, empty until the runtime has named the unit.
    pub name: Option<String>,
    pub status: RunStatus,
    /// Only meaningful once `status` is terminal.
    pub exit_code: Option<i64>,
    /// Port table keyed by `"<port>/<protocol>"`.
    pub ports: HashMap<String, Vec<PortBinding>>,
}

impl UnitState {
    /// First numeric host port bound to `port/protocol`, if the runtime has published it.
    pub fn host_port(&self, port: u16, protocol: PortProtocol) -> Option<u16> {
        self.ports
            .get(&protocol.port_key(port))?
            .iter()
            .find_map(|b| b.host_port.as_deref().and_then(|p| p.parse().ok()))
    }

    /// The runtime name without Docker's leading slash, if non-empty.
    pub fn identity(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(|n| n.trim_start_matches('/'))
            .filter(|n| !n.is_empty())
    }
}

/// Everything the runtime needs to create and start one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub image: ImageRef,
    pub command: Vec<String>,
    pub ports: BTreeMap<u16, PortProtocol>,
    pub network: NetworkRef,
}

/// Operations a sandbox runtime must provide.
///
/// Implementations must be safe to share between the caller and watchdog
/// tasks; every method takes `&self`.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Make sure `image` is available locally, pulling it if absent.
    async fn ensure_image(&self, image: &ImageRef) -> Result<()>;

    /// Create and start a detached unit, returning its runtime id.
    async fn launch(&self, spec: &LaunchSpec) -> Result<String>;

    /// Current state of the unit.
    async fn inspect(&self, id: &str) -> Result<UnitState>;

    /// Ask the unit to stop, killing it once `grace` has elapsed.
    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;

    /// Kill the unit immediately.
    async fn kill(&self, id: &str) -> Result<()>;

    /// Delete the unit's state.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Create a named network.
    async fn create_network(&self, name: &str) -> Result<()>;

    /// Delete a named network.
    async fn remove_network(&self, name: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_ports(ports: &[(&str, Vec<PortBinding>)]) -> UnitState {
        UnitState {
            name: Some("/brave_turing".into()),
            status: RunStatus::Running,
            exit_code: None,
            ports: ports
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_port_key() {
        assert_eq!(PortProtocol::Tcp.port_key(5556), "5556/tcp");
        assert_eq!(PortProtocol::Udp.port_key(14550), "14550/udp");
    }

    #[test]
    fn test_host_port_skips_bindings_without_port() {
        let state = state_with_ports(&[(
            "5556/tcp",
            vec![
                PortBinding {
                    host_ip: Some("::".into()),
                    host_port: None,
                },
                PortBinding {
                    host_ip: Some("0.0.0.0".into()),
                    host_port: Some("49153".into()),
                },
            ],
        )]);
        assert_eq!(state.host_port(5556, PortProtocol::Tcp), Some(49153));
        assert_eq!(state.host_port(5556, PortProtocol::Udp), None);
    }

    #[test]
    fn test_host_port_unpublished() {
        let state = state_with_ports(&[("5556/tcp", vec![])]);
        assert_eq!(state.host_port(5556, PortProtocol::Tcp), None);
    }

    #[test]
    fn test_identity_strips_slash() {
        let mut state = state_with_ports(&[]);
        assert_eq!(state.identity(), Some("brave_turing"));
        state.name = Some("/".into());
        assert_eq!(state.identity(), None);
        state.name = None;
        assert_eq!(state.identity(), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(RunStatus::Exited.is_terminal());
        assert!(RunStatus::Dead.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Created.is_terminal());
    }

    #[test]
    fn test_port_binding_wire_names() {
        let binding: PortBinding =
            serde_json::from_str(r#"{"HostIp":"0.0.0.0","HostPort":"32768"}"#).unwrap();
        assert_eq!(binding.host_port.as_deref(), Some("32768"));
    }
}
