//! Session Error Types

use crate::state::SessionState;
use obd_protocol::ObdError;
use thiserror::Error;

/// Errors surfaced by the session engine
///
/// Cloneable so diagnostic outcomes can be broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// The engine task has exited
    #[error("Session engine has shut down")]
    Closed,

    #[error("Not connected to an adapter")]
    NotConnected,

    /// The adapter is still being brought up
    #[error("Adapter not ready ({0})")]
    NotReady(SessionState),

    #[error("A diagnostic operation is already in progress")]
    Busy,

    /// Diagnostic request drew no terminal answer within its budget
    #[error("No response from vehicle to {command}. Check connection.")]
    NoResponse { command: String },

    #[error("Connection lost during diagnostic operation")]
    Disconnected,

    #[error(transparent)]
    Protocol(#[from] ObdError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport unavailable: {0}")]
    Transport(String),
}

impl From<config::ConfigError> for SessionError {
    fn from(e: config::ConfigError) -> Self {
        SessionError::Config(e.to_string())
    }
}
