//! Network topology for simulation runs.
//!
//! Each run gets its own randomly named network. A unit can instead join
//! another unit's network namespace, which lets the firmware reach the
//! simulator on localhost while both stay off the default network.

use crate::error::Result;
use crate::runtime::Runtime;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Where a unit's network stack comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum NetworkRef {
    /// The runtime's default network.
    #[default]
    Default,
    /// A named network created for the run.
    Named(String),
    /// The network namespace of an existing unit.
    Container(String),
}

impl NetworkRef {
    /// Network mode string understood by the runtime, if any.
    pub fn mode(&self) -> Option<String> {
        match self {
            NetworkRef::Default => None,
            NetworkRef::Named(name) => Some(name.clone()),
            NetworkRef::Container(name) => Some(format!("container:{name}")),
        }
    }

    /// Name of the unit whose namespace is joined.
    pub fn owner(&self) -> Option<&str> {
        match self {
            NetworkRef::Container(name) => Some(name),
            _ => None,
        }
    }

    /// Joining another unit's namespace; such units cannot publish ports themselves.
    pub fn is_shared_namespace(&self) -> bool {
        matches!(self, NetworkRef::Container(_))
    }
}

impl fmt::Display for NetworkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode() {
            Some(mode) => f.write_str(&mode),
            None => f.write_str("default"),
        }
    }
}

/// Anything whose network namespace other units can join.
#[async_trait]
pub trait NetworkHost: Send + Sync {
    /// Wait until the runtime has named this unit and return a reference to join it.
    async fn network_identity(&self) -> Result<NetworkRef>;
}

/// Generate a random network name the runtime will accept.
///
/// Network names must start with an alphanumeric character, which a raw
/// nanoid does not guarantee.
pub fn generate_network_name() -> String {
    loop {
        let name = nanoid::nanoid!();
        if name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return name;
        }
        tracing::trace!(name = %name, "Discarding network name with invalid first character");
    }
}

/// A network created for exactly one simulation run.
pub struct Network {
    name: String,
    runtime: Arc<dyn Runtime>,
    removed: bool,
}

impl Network {
    /// Create a freshly named network.
    pub async fn create(runtime: Arc<dyn Runtime>) -> Result<Self> {
        let name = generate_network_name();
        tracing::debug!(network = %name, "Creating network");
        runtime.create_network(&name).await?;
        tracing::info!(network = %name, "Network created");

        Ok(Self {
            name,
            runtime,
            removed: false,
        })
    }

    /// Name of the network.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference for units that should connect to this network.
    pub fn reference(&self) -> NetworkRef {
        NetworkRef::Named(self.name.clone())
    }

    /// Delete the network. Calling this more than once is a no-op.
    pub async fn remove(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        tracing::debug!(network = %self.name, "Removing network");
        self.runtime.remove_network(&self.name).await?;
        tracing::info!(network = %self.name, "Network removed");
        Ok(())
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("name", &self.name)
            .field("removed", &self.removed)
            .finish()
    }
}
