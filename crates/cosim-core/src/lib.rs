//! # cosim-core
//!
//! Component/node tree for co-simulations of a physics simulator and a
//! vehicle firmware, each running in its own sandbox.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     cosim-core (host)                      │
//! ├────────────────────────────────────────────────────────────┤
//! │                                                            │
//! │  ┌──────────────────┐  start()  ┌───────────────────────┐  │
//! │  │ ContainerSimulator│─────────▶│  ContainerSimulation  │  │
//! │  │  - add()          │          │   NodeId -> Node      │  │
//! │  └──────────────────┘           │   + per-run network   │  │
//! │           │                     └───────────────────────┘  │
//! │           ▼                                                │
//! │  ┌──────────────────┐     ┌──────────────────────────┐     │
//! │  │  JointComponent  │────▶│ Gazebo (owns namespace)  │     │
//! │  │                  │     └──────────────────────────┘     │
//! │  │                  │     ┌──────────────────────────┐     │
//! │  │                  │────▶│ Firmware (joins it)      │     │
//! │  └──────────────────┘     │  send() over TCP         │     │
//! │                           └──────────────────────────┘     │
//! └────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │               cosim-sandbox (Docker runtime)               │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use cosim_core::{
//!     CommunicationNode, CosimConfig, FirmwareComponent, GazeboComponent, JointSimulator,
//!     Simulation, Simulator,
//! };
//! use cosim_protocol::Message;
//! use cosim_sandbox::{DockerRuntime, SandboxSpec};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Mission { waypoints: Vec<(f64, f64, f64)> }
//! impl Message for Mission { const TYPE: &'static str = "Mission"; }
//!
//! #[derive(Serialize, Deserialize)]
//! struct Trajectory { samples: Vec<(f64, f64)> }
//! impl Message for Trajectory { const TYPE: &'static str = "Trajectory"; }
//!
//! # async fn example() -> cosim_core::Result<()> {
//! let runtime = Arc::new(DockerRuntime::connect()?);
//! let gazebo = GazeboComponent::builder().build()?;
//! let firmware = FirmwareComponent::<Mission, Trajectory>::with_default_port(
//!     SandboxSpec::builder().image("my/firmware:latest").command("firmware --port 5556").build()?,
//! )?;
//!
//! let simulator = JointSimulator::with_config(runtime, CosimConfig::from_env(), gazebo, firmware);
//! let mut simulation = simulator.start().await?;
//!
//! let result = simulation.firmware().send(&Mission { waypoints: vec![] }).await;
//! simulation.stop().await?;
//! let trajectory = result?;
//! println!("{} samples", trajectory.samples.len());
//! # Ok(())
//! # }
//! ```

mod attached;
mod component;
mod config;
mod container;
mod error;
mod firmware;
mod gazebo;
mod joint;
mod node;
mod simulation;

// Re-exports for convenience
pub use attached::{AttachedComponent, AttachedNode};
pub use component::{Component, Environment};
pub use config::CosimConfig;
pub use container::{ContainerComponent, ContainerNode, ReporterComponent, ReporterNode};
pub use error::{CoreError, Result};
pub use firmware::{FirmwareComponent, FirmwareNode};
pub use gazebo::{
    Backend, DartSolver, GazeboComponent, GazeboComponentBuilder, GazeboConfig, OdeSolver,
    DEFAULT_IMAGE as DEFAULT_GAZEBO_IMAGE, DEFAULT_STEP_SIZE, DEFAULT_TEMPLATE, DEFAULT_WORLD,
};
pub use joint::{JointComponent, JointNode, JointSimulation, JointSimulator, Placement};
pub use node::{CommunicationNode, Node, NodeId};
pub use simulation::{ContainerSimulation, ContainerSimulator, Simulation, Simulator};
