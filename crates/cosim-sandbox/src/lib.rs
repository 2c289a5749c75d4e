//! # cosim-sandbox
//!
//! Container lifecycle layer for co-simulation runs.
//! Wraps a container runtime (Docker via bollard) behind the [`Runtime`] trait
//! and adds the waiting, exit classification and cleanup rules a simulation needs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cosim_sandbox::{DockerRuntime, NetworkRef, PortProtocol, Sandbox, SandboxSpec, WaitConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> cosim_sandbox::Result<()> {
//! let runtime = Arc::new(DockerRuntime::connect()?);
//!
//! let spec = SandboxSpec::builder()
//!     .image("ghcr.io/cpslab-asu/multicosim/px4/firmware:latest")
//!     .command("firmware --port 5556 --verbose")
//!     .tcp_port(5556)
//!     .build()?;
//!
//! let mut sandbox = Sandbox::start(runtime, spec, NetworkRef::Default, WaitConfig::default()).await?;
//! let port = sandbox.host_port(5556, PortProtocol::Tcp).await?;
//! println!("firmware listening on localhost:{port}");
//!
//! // Stopping twice is fine; the second call returns the cached result
//! sandbox.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Lifecycle**: start, wait-until-running, graceful stop with kill fallback
//! - **Exit classification**: exits caused by our own stop request are not failures
//! - **Networks**: per-run named networks and shared network namespaces
//! - **Watchdog**: background detection of units that die early
//! - **mock** (cargo feature): in-memory runtime for tests

mod config;
mod docker;
mod error;
mod image;
mod network;
mod runtime;
mod sandbox;
mod watchdog;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{SandboxSpec, SandboxSpecBuilder, WaitConfig, WaitConfigBuilder};
pub use docker::DockerRuntime;
pub use error::{Result, SandboxError};
pub use image::{ImageRef, DEFAULT_TAG};
pub use network::{generate_network_name, Network, NetworkHost, NetworkRef};
pub use runtime::{LaunchSpec, PortBinding, PortProtocol, RunStatus, Runtime, UnitState};
pub use sandbox::{ExitStatus, Sandbox, STOP_SIGNAL_EXIT_CODES};
pub use watchdog::{MonitoredExit, Watchdog};
