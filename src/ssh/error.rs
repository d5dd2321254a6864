//! Remote session error types

use std::time::Duration;

use thiserror::Error;

/// Session-level failures.
///
/// A non-zero exit status is not an error at this layer; it is returned as data
/// in [`CommandOutput`](super::CommandOutput).
#[derive(Debug, Error)]
pub enum SessionError {
    /// Key material could not be read or parsed. Raised before any network attempt.
    #[error("Credential error: {0}")]
    Credential(String),

    /// The remote rejected every authentication method tried
    #[error("Authentication failed for target '{target}'")]
    Authentication { target: String },

    /// Network or protocol failure reaching the target
    #[error("Connection error: {0}")]
    Connection(String),

    /// Script upload failed
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Command did not finish within the caller's bound
    #[error("Command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Caller-supplied options cannot be turned into a safe command line
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The session was closed and cannot be reused
    #[error("Session closed")]
    Closed,
}

impl From<russh::Error> for SessionError {
    fn from(e: russh::Error) -> Self {
        SessionError::Connection(e.to_string())
    }
}
