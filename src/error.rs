//! Error types for the event socket engine

use thiserror::Error;

/// Result alias used throughout the crate.
pub type EslResult<T> = Result<T, EslError>;

/// Byte-level framing failures. These end the message stream of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// The connection ended while a declared body was still incomplete.
    #[error("stream ended inside a message: expected {expected} body bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    /// `Content-Length` was not a valid byte count.
    #[error("invalid Content-Length header: {value:?}")]
    InvalidContentLength { value: String },

    /// `Content-Length` exceeded the per-message limit.
    #[error("message of {length} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { length: usize, limit: usize },

    /// Buffered input grew past the buffer limit without yielding a message.
    #[error("parser buffer exceeded {limit} bytes")]
    BufferOverflow { limit: usize },
}

/// Errors surfaced by connections, the protocol engine and channel operations.
#[derive(Debug, Error)]
pub enum EslError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// A message had the wrong content type, or a required header was missing.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The switch rejected the password during the inbound handshake.
    #[error("authentication failed: {reason}")]
    Authentication { reason: String },

    /// The connection was closed or disposed.
    #[error("not connected")]
    Disconnected,

    /// The connection's cancellation signal fired while the operation was pending.
    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The switch answered a command with `-ERR`.
    #[error("command failed: {reply_text}")]
    CommandFailed { reply_text: String },

    /// A command could not be encoded, e.g. because it contained a newline.
    #[error("invalid command: {message}")]
    InvalidCommand { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl EslError {
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for [`EslError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True when the connection itself is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Framing(_) | Self::Disconnected | Self::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_message_reports_byte_counts() {
        let err = EslError::from(FramingError::Truncated {
            expected: 50,
            received: 30,
        });
        assert_eq!(
            err.to_string(),
            "framing error: stream ended inside a message: expected 50 body bytes, received 30"
        );
        assert!(err.is_connection_error());
    }

    #[test]
    fn cancelled_is_distinct_from_disconnected() {
        assert!(EslError::Cancelled.is_cancelled());
        assert!(!EslError::Disconnected.is_cancelled());
        assert!(!EslError::protocol_error("x").is_connection_error());
    }
}
