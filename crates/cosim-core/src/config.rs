//! Simulation settings.
//!
//! Settings are loaded from environment variables with sensible defaults.

use crate::error::{CoreError, Result};
use cosim_protocol::ClientConfig;
use cosim_sandbox::WaitConfig;
use std::time::Duration;

/// Settings shared by every component of a simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosimConfig {
    /// Polling and deadlines for sandbox lifecycle waits.
    pub wait: WaitConfig,
    /// Timing of firmware exchanges.
    pub client: ClientConfig,
    /// Delete containers after a good exit (default: true).
    pub remove: bool,
    /// Watch firmware units and fail the run if they exit early (default: false).
    pub monitor_firmware: bool,
}

impl Default for CosimConfig {
    fn default() -> Self {
        Self {
            wait: WaitConfig::default(),
            client: ClientConfig::default(),
            remove: true,
            monitor_firmware: false,
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| v != "false" && v != "0")
}

impl CosimConfig {
    /// Load settings from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `COSIM_POLL_INTERVAL_MS` | `50` |
    /// | `COSIM_START_TIMEOUT_SECS` | `60` |
    /// | `COSIM_PORT_TIMEOUT_SECS` | `30` |
    /// | `COSIM_IDENTITY_TIMEOUT_SECS` | `30` |
    /// | `COSIM_STOP_GRACE_SECS` | `10` |
    /// | `COSIM_EXIT_TIMEOUT_SECS` | `30` |
    /// | `COSIM_CONNECT_RETRY_MS` | `100` |
    /// | `COSIM_RESPONSE_TIMEOUT_SECS` | `900` |
    /// | `COSIM_REMOVE` | `true` |
    /// | `COSIM_MONITOR_FIRMWARE` | `false` |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let default = Self::default();
        let wait = &default.wait;

        Self {
            wait: WaitConfig {
                poll_interval: env_millis("COSIM_POLL_INTERVAL_MS").unwrap_or(wait.poll_interval),
                start_timeout: env_secs("COSIM_START_TIMEOUT_SECS").unwrap_or(wait.start_timeout),
                port_timeout: env_secs("COSIM_PORT_TIMEOUT_SECS").unwrap_or(wait.port_timeout),
                identity_timeout: env_secs("COSIM_IDENTITY_TIMEOUT_SECS")
                    .unwrap_or(wait.identity_timeout),
                stop_grace: env_secs("COSIM_STOP_GRACE_SECS").unwrap_or(wait.stop_grace),
                exit_timeout: env_secs("COSIM_EXIT_TIMEOUT_SECS").unwrap_or(wait.exit_timeout),
            },
            client: ClientConfig {
                retry_interval: env_millis("COSIM_CONNECT_RETRY_MS")
                    .unwrap_or(default.client.retry_interval),
                // Liveness is checked at the same cadence as every other wait
                liveness_interval: env_millis("COSIM_POLL_INTERVAL_MS")
                    .unwrap_or(default.client.liveness_interval),
                response_timeout: env_secs("COSIM_RESPONSE_TIMEOUT_SECS")
                    .unwrap_or(default.client.response_timeout),
            },
            remove: env_flag("COSIM_REMOVE").unwrap_or(default.remove),
            monitor_firmware: env_flag("COSIM_MONITOR_FIRMWARE").unwrap_or(default.monitor_firmware),
        }
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        self.wait.validate()?;
        if self.client.retry_interval.is_zero() {
            return Err(CoreError::Config("connect retry interval must be > 0".into()));
        }
        if self.client.liveness_interval.is_zero() {
            return Err(CoreError::Config("liveness interval must be > 0".into()));
        }
        if self.client.response_timeout.is_zero() {
            return Err(CoreError::Config("response timeout must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CosimConfig::default();
        assert_eq!(config.wait.poll_interval, Duration::from_millis(50));
        assert_eq!(config.wait.stop_grace, Duration::from_secs(10));
        assert_eq!(config.client.response_timeout, Duration::from_secs(900));
        assert!(config.remove);
        assert!(!config.monitor_firmware);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_uses_defaults() {
        // Clear any existing env vars
        for name in [
            "COSIM_POLL_INTERVAL_MS",
            "COSIM_START_TIMEOUT_SECS",
            "COSIM_PORT_TIMEOUT_SECS",
            "COSIM_IDENTITY_TIMEOUT_SECS",
            "COSIM_STOP_GRACE_SECS",
            "COSIM_EXIT_TIMEOUT_SECS",
            "COSIM_CONNECT_RETRY_MS",
            "COSIM_RESPONSE_TIMEOUT_SECS",
            "COSIM_REMOVE",
            "COSIM_MONITOR_FIRMWARE",
        ] {
            std::env::remove_var(name);
        }

        assert_eq!(CosimConfig::from_env(), CosimConfig::default());
    }

    #[test]
    fn test_flag_parsing() {
        std::env::set_var("COSIM_TEST_FLAG_OFF", "0");
        std::env::set_var("COSIM_TEST_FLAG_ON", "yes");
        assert_eq!(env_flag("COSIM_TEST_FLAG_OFF"), Some(false));
        assert_eq!(env_flag("COSIM_TEST_FLAG_ON"), Some(true));
        assert_eq!(env_flag("COSIM_TEST_FLAG_UNSET"), None);
    }

    #[test]
    fn test_zero_response_timeout_rejected() {
        let mut config = CosimConfig::default();
        config.client.response_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }
}
