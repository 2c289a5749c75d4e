//! # cosim-ardupilot
//!
//! ArduPilot adapter for cosim: vehicle and trajectory messages, an
//! ArduPilot Gazebo build, and a simulator tree that starts Gazebo first
//! and points the firmware at it by host name.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cosim_ardupilot::{ArduPilot, ArduPilotConfig};
//! use cosim_sandbox::DockerRuntime;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ArduPilotConfig::from_env();
//! let runtime = Arc::new(DockerRuntime::connect()?);
//! let ardupilot = ArduPilot::with_config(runtime, &config)?;
//!
//! let result = ardupilot.simulate(&config.firmware_options()).await?;
//! for state in &result.trajectory {
//!     println!("{:.3}s {:?}", state.time, state.pose);
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod messages;
mod simulator;

pub use config::{ArduPilotConfig, ConfigError, DEFAULT_VERSION};
pub use messages::{
    FirmwareOptions, FlightResult, Pose, Start, State, UnknownVehicle, Vehicle, DEFAULT_FRAME,
    PORT,
};
pub use simulator::{
    firmware_image, ArduPilot, ArduPilotComponent, ArduPilotFirmware, ArduPilotFirmwareNode,
    ArduPilotNode, ArduPilotSimulation, GazeboOptions, GAZEBO_IMAGE, GAZEBO_WORLD,
};
