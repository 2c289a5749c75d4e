//! Payloads exchanged with the ArduPilot firmware.

use cosim_protocol::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Port the firmware listens on inside its unit.
pub const PORT: u16 = 5556;

/// Frame flown when none is given.
pub const DEFAULT_FRAME: &str = "quad";

/// ArduPilot vehicle class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vehicle {
    None,
    #[default]
    Copter,
    Plane,
    Rover,
    Sub,
}

impl Vehicle {
    pub fn as_str(self) -> &'static str {
        match self {
            Vehicle::None => "none",
            Vehicle::Copter => "copter",
            Vehicle::Plane => "plane",
            Vehicle::Rover => "rover",
            Vehicle::Sub => "sub",
        }
    }
}

impl fmt::Display for Vehicle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown vehicle name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown vehicle {0:?} (expected none, copter, plane, rover or sub)")]
pub struct UnknownVehicle(pub String);

impl FromStr for Vehicle {
    type Err = UnknownVehicle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Vehicle::None),
            "copter" => Ok(Vehicle::Copter),
            "plane" => Ok(Vehicle::Plane),
            "rover" => Ok(Vehicle::Rover),
            "sub" => Ok(Vehicle::Sub),
            _ => Err(UnknownVehicle(s.to_string())),
        }
    }
}

/// Vehicle position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A pose with its simulation timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Seconds since the start of the simulation.
    pub time: f64,
    pub pose: Pose,
}

/// Start request sent to the firmware once both units run.
///
/// The firmware reaches Gazebo at `gazebo_host` and advertises itself as
/// `firmware_host`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Start {
    pub vehicle: Vehicle,
    pub frame: String,
    #[serde(default)]
    pub param_files: Vec<String>,
    pub gazebo_host: String,
    pub firmware_host: String,
}

impl Message for Start {
    const TYPE: &'static str = "ardupilot.Start";
}

/// Trajectory flown by the firmware.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightResult {
    pub trajectory: Vec<State>,
}

impl FlightResult {
    pub fn len(&self) -> usize {
        self.trajectory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectory.is_empty()
    }

    /// Simulated time between the first and last sample.
    pub fn duration(&self) -> f64 {
        match (self.trajectory.first(), self.trajectory.last()) {
            (Some(first), Some(last)) => last.time - first.time,
            _ => 0.0,
        }
    }
}

impl Message for FlightResult {
    const TYPE: &'static str = "ardupilot.Result";
}

/// How to build and fly the firmware.
///
/// `image` only matters when the simulator is assembled; the other fields
/// also go into every [`Start`] request.
#[derive(Debug, Clone, PartialEq)]
pub struct FirmwareOptions {
    pub vehicle: Vehicle,
    pub frame: String,
    pub param_files: Vec<String>,
    pub image: String,
}

impl Default for FirmwareOptions {
    fn default() -> Self {
        Self {
            vehicle: Vehicle::default(),
            frame: DEFAULT_FRAME.to_string(),
            param_files: Vec::new(),
            image: crate::simulator::firmware_image(crate::config::DEFAULT_VERSION),
        }
    }
}

impl FirmwareOptions {
    /// The start request for a firmware reached as `firmware_host` that
    /// talks to Gazebo at `gazebo_host`.
    pub fn start_request(
        &self,
        gazebo_host: impl Into<String>,
        firmware_host: impl Into<String>,
    ) -> Start {
        Start {
            vehicle: self.vehicle,
            frame: self.frame.clone(),
            param_files: self.param_files.clone(),
            gazebo_host: gazebo_host.into(),
            firmware_host: firmware_host.into(),
        }
    }
}
