//! Error taxonomy for the MCP client.
//!
//! Only [`ClientError::Config`] is fatal at startup. Connection failures skip
//! a single server, tool failures are fed back to the model, and model
//! failures abort the current query only.

use thiserror::Error;

/// Client error type.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Malformed, missing or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A server could not be reached or initialized.
    #[error("failed to connect to MCP server '{server}': {message}")]
    Connection {
        /// Server name from the config file.
        server: String,
        /// Underlying failure.
        message: String,
    },

    /// No active session owns the requested tool name.
    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    /// The owning session failed to execute the tool.
    #[error("tool '{tool}' failed: {message}")]
    ToolInvocation {
        /// Qualified tool name.
        tool: String,
        /// Error reported by the session.
        message: String,
    },

    /// The LLM request failed or its response could not be used.
    #[error("model request failed: {0}")]
    Model(String),

    /// Writing to the terminal failed.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl ClientError {
    /// Build a [`ClientError::Config`] from anything displayable.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}

/// Failure of a single session operation.
///
/// `Remote` errors leave the session usable; `Transport` errors mean the
/// connection is gone and the session must be closed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The server answered with an error.
    #[error("{0}")]
    Remote(String),

    /// The process exited or the stream broke.
    #[error("transport closed: {0}")]
    Transport(String),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
