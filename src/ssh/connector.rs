//! Session factory seam used by the gateway

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::command::{CommandOutput, RunOptions, ScriptOptions};
use super::error::SessionError;
use super::session::{RemoteSession, SessionConfig};
use crate::registry::Target;

/// A single-owner connection to one target
#[async_trait]
pub trait ExecSession: Send {
    async fn connect(&mut self) -> Result<(), SessionError>;

    async fn run(&mut self, command: &str, options: &RunOptions) -> Result<CommandOutput, SessionError>;

    async fn run_script(
        &mut self,
        local_path: &Path,
        options: &ScriptOptions,
    ) -> Result<CommandOutput, SessionError>;

    /// Release the transport; must be safe to call repeatedly
    async fn close(&mut self);
}

/// Creates unconnected sessions for targets
pub trait Connector: Send + Sync {
    fn session_for(&self, target: Arc<Target>) -> Box<dyn ExecSession>;
}

#[async_trait]
impl ExecSession for RemoteSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        RemoteSession::connect(self).await
    }

    async fn run(&mut self, command: &str, options: &RunOptions) -> Result<CommandOutput, SessionError> {
        RemoteSession::run(self, command, options).await
    }

    async fn run_script(
        &mut self,
        local_path: &Path,
        options: &ScriptOptions,
    ) -> Result<CommandOutput, SessionError> {
        RemoteSession::run_script(self, local_path, options).await
    }

    async fn close(&mut self) {
        RemoteSession::close(self).await
    }
}

/// Connector that opens real SSH sessions
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    config: SessionConfig,
}

impl SshConnector {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

impl Connector for SshConnector {
    fn session_for(&self, target: Arc<Target>) -> Box<dyn ExecSession> {
        Box::new(RemoteSession::new(target, self.config.clone()))
    }
}
