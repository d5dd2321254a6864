//! SSH Remote Session module
//!
//! Connection, authentication and command execution against one target.

pub mod auth;
pub mod command;
pub mod connector;
pub mod error;
pub mod handler;
pub mod session;
pub mod state;
#[cfg(test)]
mod test_server;

pub use auth::{normalize_key_material, parse_private_key, AuthPolicy};
pub use command::{
    build_exec_command, shell_quote, CommandOutput, RunOptions, ScriptOptions,
    UNKNOWN_EXIT_STATUS,
};
pub use connector::{Connector, ExecSession, SshConnector};
pub use error::SessionError;
pub use handler::GatewayHandler;
pub use session::{RemoteSession, SessionConfig};
pub use state::{SessionState, SessionStateMachine};
