//! Configuration for PX4 runs.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use crate::messages::DEFAULT_MODEL;
use cosim_core::{Backend, CosimConfig, DartSolver, OdeSolver, DEFAULT_STEP_SIZE};

/// Image tag used for the PX4 firmware and Gazebo images.
pub const DEFAULT_VERSION: &str = "latest";

/// Gazebo world flown in by default.
pub const DEFAULT_WORLD: &str = "iris_runway";

/// Physics backend family, selectable from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Open Dynamics Engine, quick solver (default)
    #[default]
    Ode,
    /// Dart, Dantzig solver
    Dart,
    /// Bullet
    Bullet,
    /// Simbody
    Simbody,
}

impl BackendKind {
    /// Parse from string (case-insensitive). Unknown names select ODE.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "dart" => Self::Dart,
            "bullet" => Self::Bullet,
            "simbody" => Self::Simbody,
            _ => Self::Ode,
        }
    }

    /// Backend with default solver settings.
    pub fn backend(self) -> Backend {
        match self {
            Self::Ode => Backend::Ode {
                solver: OdeSolver::Quick,
                iterations: 50,
            },
            Self::Dart => Backend::Dart {
                solver: DartSolver::Dantzig,
            },
            Self::Bullet => Backend::bullet(),
            Self::Simbody => Backend::Simbody,
        }
    }
}

/// Configuration for a PX4 simulation.
#[derive(Debug, Clone)]
pub struct Px4Config {
    /// Tag of the firmware and Gazebo images.
    pub version: String,

    /// Gazebo world, without the `.sdf` extension.
    pub world: String,

    /// Vehicle model.
    pub model: String,

    /// Physics backend.
    pub backend: BackendKind,

    /// Simulation step size in seconds.
    pub step_size: f64,

    /// Orchestration settings shared with cosim-core.
    pub cosim: CosimConfig,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("world name cannot be empty")]
    EmptyWorld,

    #[error("vehicle model cannot be empty")]
    EmptyModel,

    #[error("step size must be a positive number of seconds, got {0}")]
    InvalidStepSize(f64),

    #[error(transparent)]
    Cosim(#[from] cosim_core::CoreError),
}

impl Default for Px4Config {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            world: DEFAULT_WORLD.to_string(),
            model: DEFAULT_MODEL.to_string(),
            backend: BackendKind::default(),
            step_size: DEFAULT_STEP_SIZE,
            cosim: CosimConfig::default(),
        }
    }
}

impl Px4Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `COSIM_PX4_VERSION` | `latest` |
    /// | `COSIM_PX4_WORLD` | `iris_runway` |
    /// | `COSIM_PX4_MODEL` | `x500` |
    /// | `COSIM_PX4_BACKEND` | `ode` (ode, dart, bullet, simbody) |
    /// | `COSIM_PX4_STEP_SIZE` | `0.001` |
    ///
    /// Orchestration settings come from [`CosimConfig::from_env`].
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            version: std::env::var("COSIM_PX4_VERSION").unwrap_or(default.version),
            world: std::env::var("COSIM_PX4_WORLD").unwrap_or(default.world),
            model: std::env::var("COSIM_PX4_MODEL").unwrap_or(default.model),
            backend: std::env::var("COSIM_PX4_BACKEND")
                .map(|v| BackendKind::parse(&v))
                .unwrap_or(default.backend),
            step_size: std::env::var("COSIM_PX4_STEP_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.step_size),
            cosim: CosimConfig::from_env(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.world.trim().is_empty() {
            return Err(ConfigError::EmptyWorld);
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::EmptyModel);
        }

        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(ConfigError::InvalidStepSize(self.step_size));
        }

        self.cosim.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Px4Config::default();
        assert_eq!(config.version, "latest");
        assert_eq!(config.world, "iris_runway");
        assert_eq!(config.model, "x500");
        assert_eq!(config.backend, BackendKind::Ode);
        assert_eq!(config.step_size, 0.001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!(BackendKind::parse("dart"), BackendKind::Dart);
        assert_eq!(BackendKind::parse("BULLET"), BackendKind::Bullet);
        assert_eq!(BackendKind::parse("simbody"), BackendKind::Simbody);
        assert_eq!(BackendKind::parse("ode"), BackendKind::Ode);
        assert_eq!(BackendKind::parse("anything"), BackendKind::Ode);
    }

    #[test]
    fn test_backend_defaults() {
        assert_eq!(BackendKind::Ode.backend(), Backend::default());
        assert_eq!(BackendKind::Dart.backend().args(), "dart --solver dantzig");
    }

    #[test]
    fn test_from_env_uses_defaults() {
        // Clear any existing env vars
        for name in [
            "COSIM_PX4_VERSION",
            "COSIM_PX4_WORLD",
            "COSIM_PX4_MODEL",
            "COSIM_PX4_BACKEND",
            "COSIM_PX4_STEP_SIZE",
        ] {
            std::env::remove_var(name);
        }

        let config = Px4Config::from_env();
        assert_eq!(config.world, DEFAULT_WORLD);
        assert_eq!(config.backend, BackendKind::Ode);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = Px4Config {
            step_size: -1.0,
            ..Px4Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidStepSize(_))));

        let config = Px4Config {
            world: String::new(),
            ..Px4Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyWorld)));
    }
}
