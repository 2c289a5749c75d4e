//! # cosim-px4
//!
//! PX4 adapter for cosim: mission and trajectory messages, a Gazebo build
//! carrying the PX4 worlds, and a simulator tree pairing it with the PX4
//! firmware.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cosim_px4::{Configuration, Px4, Px4Config, Px4Gazebo, DEFAULT_MISSION};
//! use cosim_sandbox::DockerRuntime;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Px4Config::from_env();
//! let runtime = Arc::new(DockerRuntime::connect()?);
//! let px4 = Px4::with_config(runtime, &config, Px4Gazebo::from_config(&config)?)?;
//!
//! let states = px4.simulate(&Configuration::new(DEFAULT_MISSION)).await?;
//! for state in &states {
//!     println!("{:.3}s {:?}", state.time, state.pose);
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod messages;
mod simulator;

pub use config::{BackendKind, ConfigError, Px4Config, DEFAULT_VERSION, DEFAULT_WORLD};
pub use messages::{Configuration, Pose, State, States, Waypoint, DEFAULT_MISSION, DEFAULT_MODEL};
pub use simulator::{
    check_mission, firmware, Px4, Px4Firmware, Px4Gazebo, Px4Node, Px4Simulation,
};
