//! Error taxonomy of the RPC boundary.
//!
//! Everything except [`RpcError::Fatal`] is recovered at dispatch and turned
//! into an `{"error": ...}` envelope with the connection kept open.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    /// Malformed JSON or a missing `function` key.
    #[error("protocol mismatch: {0}")]
    Protocol(String),

    /// Function name not present in the command registry.
    #[error("unknown function '{0}'")]
    UnknownCommand(String),

    /// A parameter could not be converted to its expected type.
    #[error("invalid value {value} for parameter '{name}'")]
    Validation { name: String, value: String },

    /// Camera read failure after the bounded reopen retry.
    #[error("Failed to capture image")]
    Device,

    /// A request that cannot be honored in the current state.
    #[error("{0}")]
    State(String),

    /// Resource initialization failure that must terminate the process.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl RpcError {
    pub fn validation(name: &str, value: impl ToString) -> Self {
        Self::Validation {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}
