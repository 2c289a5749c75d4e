//! Error types for cosim-sandbox.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for cosim-sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while managing sandboxes and networks.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The image reference could not be found locally or pulled
    #[error("could not resolve image {image}: {reason}")]
    ImageResolution { image: String, reason: String },

    /// The unit exited with a code that was neither 0 nor caused by our own stop request
    #[error("sandbox {name} exited abnormally with code {code}, check the container logs")]
    AbnormalExit { name: String, code: i64 },

    /// A watched unit stopped running before anyone asked it to
    #[error("monitored sandbox {name} exited early")]
    MonitoredExit { name: String },

    /// A polling wait ran past its deadline
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    /// The runtime does not know the requested unit
    #[error("sandbox not found: {0}")]
    NotFound(String),

    /// Invalid specification or configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Error reported by the container runtime
    #[error("runtime error: {0}")]
    Runtime(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub(crate) fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }
}
