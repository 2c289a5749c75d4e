//! Error types for cosim-protocol.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised on either side of a firmware exchange.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server refused a message of a different type than it serves.
    /// Raised on the server, and on the client from a `Rejected` reply.
    #[error("expected message of type {expected}, received {actual}")]
    MessageTypeMismatch { expected: String, actual: String },

    /// The reply was neither a success nor a failure envelope
    #[error("malformed reply envelope: {0}")]
    ResponseShape(String),

    /// The reply carried a value of a different type than requested
    #[error("expected response of type {expected}, received {actual}")]
    ResponseTypeMismatch { expected: String, actual: String },

    /// The firmware handler failed; carries the remote reason
    #[error("firmware error: {0}")]
    Firmware(String),

    /// The remote unit stopped before replying
    #[error("unit exited without completing its work")]
    UnitExited,

    /// No reply within the response deadline
    #[error("no reply after {0:?}")]
    Timeout(Duration),

    /// The liveness check itself failed
    #[error("liveness check failed: {0}")]
    Liveness(String),
}
