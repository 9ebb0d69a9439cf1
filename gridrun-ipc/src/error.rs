//! IPC error types

use thiserror::Error;

/// IPC error types
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IpcError {
    /// Final script output was not a single JSON document
    #[error("Malformed script output: {reason}; output: {output}")]
    MalformedOutput {
        reason: String,
        /// Raw output, truncated for diagnostics
        output: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Channel to or from a worker closed
    #[error("Connection closed")]
    ConnectionClosed,
}

impl IpcError {
    /// Check if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, IpcError::ConnectionClosed)
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        IpcError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_fatal() {
        assert!(IpcError::ConnectionClosed.is_fatal());
        assert!(!IpcError::SerializationError("bad".to_string()).is_fatal());
    }

    #[test]
    fn test_malformed_output_message_includes_output() {
        let err = IpcError::MalformedOutput {
            reason: "expected value".to_string(),
            output: "Traceback".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("expected value"));
        assert!(message.contains("Traceback"));
    }
}
