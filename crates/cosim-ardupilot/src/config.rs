//! Configuration for ArduPilot runs.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use crate::messages::{FirmwareOptions, Vehicle, DEFAULT_FRAME};
use crate::simulator::{firmware_image, GazeboOptions, GAZEBO_IMAGE, GAZEBO_WORLD};
use cosim_core::CosimConfig;

/// Tag of the firmware image.
pub const DEFAULT_VERSION: &str = "latest";

/// Configuration for an ArduPilot simulation.
#[derive(Debug, Clone)]
pub struct ArduPilotConfig {
    /// Tag of the firmware image.
    pub version: String,

    /// Gazebo image reference.
    pub gazebo_image: String,

    /// World file inside the Gazebo image.
    pub world: String,

    pub vehicle: Vehicle,

    /// Vehicle frame, e.g. `quad`.
    pub frame: String,

    /// Parameter files inside the firmware image, applied in order.
    pub param_files: Vec<String>,

    /// Orchestration settings shared with cosim-core.
    pub cosim: CosimConfig,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("parameter file paths cannot be empty")]
    EmptyParamFile,

    #[error(transparent)]
    Cosim(#[from] cosim_core::CoreError),
}

impl Default for ArduPilotConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            gazebo_image: GAZEBO_IMAGE.to_string(),
            world: GAZEBO_WORLD.to_string(),
            vehicle: Vehicle::default(),
            frame: DEFAULT_FRAME.to_string(),
            param_files: Vec::new(),
            cosim: CosimConfig::default(),
        }
    }
}

impl ArduPilotConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `COSIM_ARDUPILOT_VERSION` | `latest` |
    /// | `COSIM_ARDUPILOT_GAZEBO_IMAGE` | `ghcr.io/cpslab-asu/multicosim/ardupilot/gazebo:harmonic` |
    /// | `COSIM_ARDUPILOT_WORLD` | `/app/resources/worlds/iris_runway.sdf` |
    /// | `COSIM_ARDUPILOT_VEHICLE` | `copter` (none, copter, plane, rover, sub) |
    /// | `COSIM_ARDUPILOT_FRAME` | `quad` |
    /// | `COSIM_ARDUPILOT_PARAM_FILES` | none (comma separated) |
    ///
    /// An unknown vehicle falls back to the default. Orchestration settings
    /// come from [`CosimConfig::from_env`].
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            version: std::env::var("COSIM_ARDUPILOT_VERSION").unwrap_or(default.version),
            gazebo_image: std::env::var("COSIM_ARDUPILOT_GAZEBO_IMAGE")
                .unwrap_or(default.gazebo_image),
            world: std::env::var("COSIM_ARDUPILOT_WORLD").unwrap_or(default.world),
            vehicle: std::env::var("COSIM_ARDUPILOT_VEHICLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.vehicle),
            frame: std::env::var("COSIM_ARDUPILOT_FRAME").unwrap_or(default.frame),
            param_files: std::env::var("COSIM_ARDUPILOT_PARAM_FILES")
                .map(|v| parse_list(&v))
                .unwrap_or(default.param_files),
            cosim: CosimConfig::from_env(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::Empty("firmware version"));
        }

        if self.gazebo_image.trim().is_empty() {
            return Err(ConfigError::Empty("Gazebo image"));
        }

        if self.world.trim().is_empty() {
            return Err(ConfigError::Empty("world"));
        }

        if self.frame.trim().is_empty() {
            return Err(ConfigError::Empty("frame"));
        }

        if self.param_files.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::EmptyParamFile);
        }

        self.cosim.validate()?;
        Ok(())
    }

    pub fn gazebo_options(&self) -> GazeboOptions {
        GazeboOptions {
            image: self.gazebo_image.clone(),
            world: self.world.clone(),
        }
    }

    pub fn firmware_options(&self) -> FirmwareOptions {
        FirmwareOptions {
            vehicle: self.vehicle,
            frame: self.frame.clone(),
            param_files: self.param_files.clone(),
            image: firmware_image(&self.version),
        }
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ArduPilotConfig::default();
        assert_eq!(config.version, "latest");
        assert_eq!(config.vehicle, Vehicle::Copter);
        assert_eq!(config.frame, "quad");
        assert!(config.param_files.is_empty());
        assert!(config.validate().is_ok());

        assert_eq!(config.firmware_options(), FirmwareOptions::default());
        assert_eq!(config.gazebo_options(), GazeboOptions::default());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("a.parm, b.parm,,"), vec!["a.parm", "b.parm"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_from_env_uses_defaults() {
        // Clear any existing env vars
        for name in [
            "COSIM_ARDUPILOT_VERSION",
            "COSIM_ARDUPILOT_GAZEBO_IMAGE",
            "COSIM_ARDUPILOT_WORLD",
            "COSIM_ARDUPILOT_VEHICLE",
            "COSIM_ARDUPILOT_FRAME",
            "COSIM_ARDUPILOT_PARAM_FILES",
        ] {
            std::env::remove_var(name);
        }

        let config = ArduPilotConfig::from_env();
        assert_eq!(config.world, GAZEBO_WORLD);
        assert_eq!(config.vehicle, Vehicle::Copter);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = ArduPilotConfig {
            frame: " ".into(),
            ..ArduPilotConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Empty("frame"))));

        let config = ArduPilotConfig {
            param_files: vec![String::new()],
            ..ArduPilotConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyParamFile)));
    }
}
