//! Caller-facing gateway errors
//!
//! Messages never carry host, user, port or credential details.

use std::time::Duration;

use serde::ser::SerializeMap;
use thiserror::Error;

use crate::ssh::SessionError;

/// Uniform rejection text for bad keys and disallowed targets alike
pub const UNAUTHORIZED_MESSAGE: &str = "API key invalid or target not permitted";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("API key invalid or target not permitted")]
    Unauthorized,

    #[error("Target not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Credential for target '{0}' is unusable")]
    Credential(String),

    #[error("SSH authentication failed for target '{0}'")]
    Authentication(String),

    #[error("Could not connect to target '{0}'")]
    Connection(String),

    #[error("Script transfer to target '{0}' failed")]
    Transfer(String),

    #[error("Command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The command ran and exited non-zero; full output is included
    #[error("Command exited with status {exit_code}")]
    CommandFailed {
        job_id: String,
        target: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
}

impl GatewayError {
    /// Stable machine-readable tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Credential(_) => "credential_error",
            Self::Authentication(_) => "authentication_error",
            Self::Connection(_) => "connection_error",
            Self::Transfer(_) => "transfer_error",
            Self::Timeout(_) => "timeout",
            Self::CommandFailed { .. } => "command_failed",
        }
    }

    /// Translate a session failure into its topology-free counterpart.
    ///
    /// The detailed session message is for server-side logs only.
    pub fn from_session(target: &str, error: &SessionError) -> Self {
        match error {
            SessionError::Credential(_) => Self::Credential(target.to_string()),
            SessionError::Authentication { .. } => Self::Authentication(target.to_string()),
            SessionError::Connection(_) | SessionError::Closed => {
                Self::Connection(target.to_string())
            }
            SessionError::Transfer(_) => Self::Transfer(target.to_string()),
            SessionError::Timeout(limit) => Self::Timeout(*limit),
            SessionError::InvalidRequest(msg) => Self::InvalidRequest(msg.clone()),
        }
    }
}

impl serde::Serialize for GatewayError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("kind", self.kind())?;
        map.serialize_entry("message", &self.to_string())?;
        if let Self::CommandFailed {
            job_id,
            target,
            exit_code,
            stdout,
            stderr,
        } = self
        {
            map.serialize_entry("job_id", job_id)?;
            map.serialize_entry("target", target)?;
            map.serialize_entry("exit_code", exit_code)?;
            map.serialize_entry("stdout", stdout)?;
            map.serialize_entry("stderr", stderr)?;
        }
        map.end()
    }
}
