//! Runtime error types.

use serde_json::Value;
use thiserror::Error;

use courier_core::JidError;

pub use crate::config::ConfigError;

/// Errors raised while executing an application's response.
#[derive(Error, Debug)]
pub enum ServerError {
    /// No registered capability provides the command.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// The command's payload is not a mapping.
    #[error("payload of command '{command}' should be a mapping, got: {payload}")]
    InvalidPayload { command: String, payload: Value },

    /// [`Server::serve_forever`](crate::Server::serve_forever) needs an
    /// account to connect with.
    #[error("no JID configured for the server")]
    MissingJid,

    /// The configured JID does not parse.
    #[error(transparent)]
    InvalidJid(#[from] JidError),

    /// Capability lookup or requirement failure.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ServerError {
    /// Creates an invalid payload error.
    pub fn invalid_payload(command: impl Into<String>, payload: Value) -> Self {
        Self::InvalidPayload {
            command: command.into(),
            payload,
        }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

/// Errors raised by the capability registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// No capability with this name is known, or the application requires
    /// one the server did not register.
    #[error("capability '{0}' not found")]
    NotFound(String),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
