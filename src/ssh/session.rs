//! Remote Session
//!
//! One SSH connection to one target, owned by a single request. The session
//! connects lazily, runs commands on fresh exec channels and is closed
//! explicitly by its owner; dropping an open session still tears down the
//! transport.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::auth::{authenticate, resolve_explicit_key, AuthPolicy};
use super::command::{
    build_exec_command, build_script_command, default_remote_path, shell_quote, CommandOutput,
    RunOptions, ScriptOptions, DEFAULT_INTERPRETER,
};
use super::error::SessionError;
use super::handler::GatewayHandler;
use super::state::{SessionState, SessionStateMachine};
use crate::config::GatewaySettings;
use crate::registry::Target;

/// Per-session parameters derived from the gateway settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub login_shell: String,
    pub connect_timeout: Duration,
    pub default_command_timeout: Option<Duration>,
    pub auth: AuthPolicy,
}

impl SessionConfig {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            login_shell: settings.login_shell.clone(),
            connect_timeout: settings.connect_timeout(),
            default_command_timeout: settings.command_timeout(),
            auth: AuthPolicy::from_settings(settings),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&GatewaySettings::default())
    }
}

/// Raw channel output before decoding
#[derive(Default)]
struct ChannelOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    signalled: bool,
}

pub struct RemoteSession {
    target: Arc<Target>,
    config: SessionConfig,
    handle: Option<Handle<GatewayHandler>>,
    state: SessionStateMachine,
}

impl RemoteSession {
    pub fn new(target: Arc<Target>, config: SessionConfig) -> Self {
        Self {
            target,
            config,
            handle: None,
            state: SessionStateMachine::new(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        self.state.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected() && self.handle.is_some()
    }

    /// Establish and authenticate the transport. No-op when already connected.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        match self.state.state() {
            SessionState::Connected if self.handle.is_some() => return Ok(()),
            SessionState::Closed => return Err(SessionError::Closed),
            SessionState::Failed => {
                return Err(SessionError::Connection(
                    self.state
                        .error()
                        .unwrap_or("previous connection attempt failed")
                        .to_string(),
                ))
            }
            _ => {}
        }

        self.state
            .start_connecting()
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        debug!(
            "[ssh] Connecting to {} ({})",
            self.target.name,
            self.target.masked_details()
        );

        let result = self.establish().await;
        match result {
            Ok(handle) => {
                self.handle = Some(handle);
                if let Err(e) = self.state.connect_success() {
                    warn!("[ssh] {}", e);
                }
                info!("[ssh] Connected to {}", self.target.name);
                Ok(())
            }
            Err(e) => {
                if let Err(te) = self.state.connect_failed(e.to_string()) {
                    warn!("[ssh] {}", te);
                }
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<Handle<GatewayHandler>, SessionError> {
        // Key material is parsed before the socket is opened
        let explicit = resolve_explicit_key(&self.target.credential).await?;

        let target = self.target.clone();
        let policy = self.config.auth.clone();
        let connect_timeout = self.config.connect_timeout;

        let attempt = async move {
            let ssh_config = Arc::new(client::Config::default());
            let handler = GatewayHandler::new(target.name.clone());
            let mut handle =
                client::connect(ssh_config, (target.host.as_str(), target.port), handler).await?;
            authenticate(&mut handle, &target.name, &target.user, explicit, &policy).await?;
            Ok::<_, SessionError>(handle)
        };

        match tokio::time::timeout(connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Connection(format!(
                "connection timed out after {}s",
                connect_timeout.as_secs()
            ))),
        }
    }

    async fn open_channel(&mut self) -> Result<Channel<Msg>, SessionError> {
        if self.state.state() == SessionState::Unconnected {
            self.connect().await?;
        }
        let handle = match (&self.handle, self.state.state()) {
            (Some(handle), SessionState::Connected) => handle,
            (_, SessionState::Failed) => {
                return Err(SessionError::Connection(
                    self.state.error().unwrap_or("connection failed").to_string(),
                ))
            }
            _ => return Err(SessionError::Closed),
        };
        Ok(handle.channel_open_session().await?)
    }

    /// Run a command and capture its output.
    ///
    /// A non-zero exit status is data, not an error.
    pub async fn run(&mut self, command: &str, options: &RunOptions) -> Result<CommandOutput, SessionError> {
        let full_command = build_exec_command(&self.config.login_shell, command, options)?;
        let mut channel = self.open_channel().await?;

        if options.allocate_pty {
            channel
                .request_pty(false, "xterm", 80, 24, 0, 0, &[])
                .await?;
        }
        channel.exec(true, full_command.as_bytes()).await?;
        // Nothing is ever written to stdin
        channel.eof().await?;

        let wait = options.timeout.or(self.config.default_command_timeout);
        let raw = match wait {
            Some(limit) => match tokio::time::timeout(limit, drain(&mut channel)).await {
                Ok(raw) => raw,
                Err(_) => {
                    let _ = channel.close().await;
                    warn!("[ssh] Command on {} timed out after {:?}", self.target.name, limit);
                    return Err(SessionError::Timeout(limit));
                }
            },
            None => drain(&mut channel).await,
        };

        let exit_status = if raw.signalled { None } else { raw.exit_status };
        let output = CommandOutput::from_raw(&raw.stdout, &raw.stderr, exit_status);
        debug!(
            "[ssh] Command on {} exited with {} ({} bytes stdout, {} bytes stderr)",
            self.target.name,
            output.exit_code,
            raw.stdout.len(),
            raw.stderr.len()
        );
        Ok(output)
    }

    /// Upload a local script over SFTP, mark it executable and run it
    pub async fn run_script(
        &mut self,
        local_path: &Path,
        options: &ScriptOptions,
    ) -> Result<CommandOutput, SessionError> {
        let remote_path = match &options.remote_path {
            Some(path) if !path.trim().is_empty() => path.clone(),
            _ => default_remote_path(local_path)?,
        };
        let interpreter = options
            .interpreter
            .as_deref()
            .filter(|i| !i.trim().is_empty())
            .unwrap_or(DEFAULT_INTERPRETER);
        let script_command = build_script_command(interpreter, &remote_path)?;

        let content = tokio::fs::read(local_path).await.map_err(|e| {
            SessionError::Transfer(format!("cannot read local script {}: {}", local_path.display(), e))
        })?;

        self.upload(&remote_path, &content).await?;

        let chmod = self
            .run(&format!("chmod 755 {}", shell_quote(&remote_path)), &RunOptions::default())
            .await?;
        if !chmod.success() {
            return Err(SessionError::Transfer(format!(
                "chmod failed for {} (exit {}): {}",
                remote_path,
                chmod.exit_code,
                chmod.stderr.trim()
            )));
        }

        info!(
            "[ssh] Running uploaded script {} on {}",
            remote_path, self.target.name
        );
        self.run(&script_command, &options.run).await
    }

    async fn upload(&mut self, remote_path: &str, content: &[u8]) -> Result<(), SessionError> {
        let channel = self.open_channel().await?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| SessionError::Transfer(format!("SFTP subsystem not available: {}", e)))?;
        let sftp = russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SessionError::Transfer(format!("SFTP init failed: {}", e)))?;

        let write = async {
            let mut file = sftp
                .create(remote_path)
                .await
                .map_err(|e| SessionError::Transfer(format!("cannot create {}: {}", remote_path, e)))?;
            file.write_all(content)
                .await
                .map_err(|e| SessionError::Transfer(format!("write to {} failed: {}", remote_path, e)))?;
            file.shutdown()
                .await
                .map_err(|e| SessionError::Transfer(format!("close of {} failed: {}", remote_path, e)))?;
            Ok::<_, SessionError>(())
        };
        let result = write.await;

        if let Err(e) = sftp.close().await {
            debug!("[ssh] SFTP close: {}", e);
        }
        if result.is_ok() {
            debug!(
                "[ssh] Uploaded {} bytes to {} on {}",
                content.len(),
                remote_path,
                self.target.name
            );
        }
        result
    }

    /// Disconnect. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                debug!("[ssh] Disconnect from {}: {}", self.target.name, e);
            }
        }
        if self.state.close() {
            debug!("[ssh] Session to {} closed", self.target.name);
        }
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        if self.handle.is_some() {
            debug!(
                "[ssh] Session to {} dropped while open, transport released",
                self.target.name
            );
        }
    }
}

async fn drain(channel: &mut Channel<Msg>) -> ChannelOutput {
    let mut out = ChannelOutput::default();
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => out.stdout.extend_from_slice(&data),
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                if ext == 1 {
                    out.stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => out.exit_status = Some(exit_status),
            Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                debug!("[ssh] Remote process killed by signal {:?}", signal_name);
                out.signalled = true;
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }
    out
}
