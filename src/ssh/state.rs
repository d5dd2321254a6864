//! Session State Machine
//!
//! Valid transitions for a remote session:
//!
//! ```text
//! ┌─────────────┐   connect()   ┌────────────┐   success   ┌───────────┐
//! │ Unconnected │ ────────────► │ Connecting │ ──────────► │ Connected │
//! └──────┬──────┘               └─────┬──────┘             └─────┬─────┘
//!        │                            │ failure                  │ close()
//!        │                            ▼                          ▼
//!        │                      ┌────────────┐             ┌───────────┐
//!        │                      │   Failed   │             │  Closed   │
//!        │                      └────────────┘             └───────────┘
//!        │                          close()                      ▲
//!        └───────────────────────────────────────────────────────┘
//! ```
//!
//! `Failed` is reachable from `Connecting` only. `Failed` and `Closed` are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, no transport yet
    #[default]
    Unconnected,
    /// TCP connect + handshake + authentication in progress
    Connecting,
    /// Authenticated and ready to run commands
    Connected,
    /// Transport released
    Closed,
    /// Connection or authentication failed
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconnected => write!(f, "unconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// State machine for session lifecycle management
#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
    error_message: Option<String>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unconnected,
            error_message: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Failure reason if in Failed state
    pub fn error(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn start_connecting(&mut self) -> Result<(), StateTransitionError> {
        match self.state {
            SessionState::Unconnected => {
                self.transition_to(SessionState::Connecting);
                Ok(())
            }
            _ => Err(StateTransitionError::InvalidTransition {
                from: self.state,
                to: SessionState::Connecting,
            }),
        }
    }

    pub fn connect_success(&mut self) -> Result<(), StateTransitionError> {
        match self.state {
            SessionState::Connecting => {
                self.transition_to(SessionState::Connected);
                Ok(())
            }
            _ => Err(StateTransitionError::InvalidTransition {
                from: self.state,
                to: SessionState::Connected,
            }),
        }
    }

    pub fn connect_failed(&mut self, error: String) -> Result<(), StateTransitionError> {
        match self.state {
            SessionState::Connecting => {
                self.transition_to(SessionState::Failed);
                self.error_message = Some(error);
                Ok(())
            }
            _ => Err(StateTransitionError::InvalidTransition {
                from: self.state,
                to: SessionState::Failed,
            }),
        }
    }

    /// Close from any non-terminal state. Returns false when already terminal.
    pub fn close(&mut self) -> bool {
        match self.state {
            SessionState::Closed | SessionState::Failed => false,
            _ => {
                self.transition_to(SessionState::Closed);
                true
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    fn transition_to(&mut self, new_state: SessionState) {
        tracing::debug!(
            "[ssh] Session state transition: {} -> {}",
            self.state,
            new_state
        );
        self.state = new_state;
    }
}

/// Error type for invalid state transitions
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut sm = SessionStateMachine::new();
        assert_eq!(sm.state(), SessionState::Unconnected);

        sm.start_connecting().unwrap();
        assert_eq!(sm.state(), SessionState::Connecting);

        sm.connect_success().unwrap();
        assert!(sm.is_connected());

        assert!(sm.close());
        assert_eq!(sm.state(), SessionState::Closed);
    }

    #[test]
    fn test_connect_failure_is_terminal() {
        let mut sm = SessionStateMachine::new();
        sm.start_connecting().unwrap();
        sm.connect_failed("Connection refused".to_string()).unwrap();

        assert_eq!(sm.state(), SessionState::Failed);
        assert_eq!(sm.error(), Some("Connection refused"));
        assert!(sm.start_connecting().is_err());
        assert!(!sm.close());
        assert_eq!(sm.state(), SessionState::Failed);
    }

    #[test]
    fn test_failed_only_from_connecting() {
        let mut sm = SessionStateMachine::new();
        assert!(sm.connect_failed("x".to_string()).is_err());

        sm.start_connecting().unwrap();
        sm.connect_success().unwrap();
        assert!(sm.connect_failed("x".to_string()).is_err());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut sm = SessionStateMachine::new();
        assert!(sm.close());
        assert!(!sm.close());
        assert_eq!(sm.state(), SessionState::Closed);
        assert!(sm.start_connecting().is_err());
    }

    #[test]
    fn test_invalid_transition() {
        let mut sm = SessionStateMachine::new();
        assert!(sm.connect_success().is_err());
    }
}
