//! Error types for the task broker

use thiserror::Error;

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Error taxonomy shared by the broker, its server and its client.
///
/// There is no "not found" variant: an `ACK` or `IN` for an
/// unknown task is a normal `false` answer, never an error.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Request frame could not be turned into a command
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// Snapshot save/restore failed for a reason other than raw I/O or JSON
    #[error("Snapshot {operation} failed: {reason}")]
    Snapshot { operation: String, reason: String },

    /// Snapshot serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The server answered with something the client did not expect
    #[error("Unexpected response: {response}")]
    UnexpectedResponse { response: String },

    /// Generic errors for wrapping other error types
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BrokerError {
    /// Create a protocol error
    pub fn protocol<S: Into<String>>(reason: S) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Create a snapshot error
    pub fn snapshot(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Snapshot {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an unexpected-response error, keeping the raw bytes readable
    pub fn unexpected_response(response: &[u8]) -> Self {
        Self::UnexpectedResponse {
            response: String::from_utf8_lossy(response).into_owned(),
        }
    }

    /// Check if the process can keep serving after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            BrokerError::Protocol { .. } => true,
            BrokerError::Snapshot { .. } => true,
            BrokerError::Serialization(_) => true,
            BrokerError::Io(_) => true,
            BrokerError::UnexpectedResponse { .. } => true,
            BrokerError::Config { .. } => false,
            BrokerError::Internal(_) => false,
        }
    }
}
