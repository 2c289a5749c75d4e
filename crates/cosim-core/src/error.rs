//! Error types for cosim-core.

use thiserror::Error;

/// Result type alias for cosim-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while starting, driving or stopping a simulation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from the sandbox layer (image, lifecycle, network, watchdog)
    #[error(transparent)]
    Sandbox(#[from] cosim_sandbox::SandboxError),

    /// Error from the firmware protocol
    #[error(transparent)]
    Protocol(#[from] cosim_protocol::ProtocolError),

    /// Invalid component or simulator configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Whether this error means a unit stopped before finishing its work.
    pub fn is_unit_exit(&self) -> bool {
        matches!(
            self,
            CoreError::Protocol(cosim_protocol::ProtocolError::UnitExited)
                | CoreError::Sandbox(cosim_sandbox::SandboxError::MonitoredExit { .. })
        )
    }
}
