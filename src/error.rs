//! Error types for the backend transport.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use backend_transport::{Error, Result, Transport};
//!
//! async fn example(transport: &dyn Transport) -> Result<()> {
//!     match transport.invoke("sessions.list", None, false).await {
//!         Ok(value) => println!("{value}"),
//!         Err(e) if e.is_recoverable() => { /* retry after reconnect */ }
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Command | [`Error::CommandFailed`], [`Error::RequestTimeout`], [`Error::Timeout`] |
//! | Payload | [`Error::Decode`], [`Error::Protocol`] |
//! | Lifecycle | [`Error::Disposed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a remote configuration value is missing or invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection could not be established or a transport call failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// No connection became available within the connect deadline.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed while a request was in flight or a caller was
    /// waiting for the connection to open.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Command Errors
    // ========================================================================
    /// The remote end reported `success: false`.
    ///
    /// Carries the remote error string verbatim. Never retried automatically.
    #[error("Command '{command}' failed: {message}")]
    CommandFailed {
        /// Command that failed.
        command: String,
        /// Error message reported by the remote end.
        message: String,
    },

    /// No correlated response arrived within the request deadline.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Operation timeout outside of socket request correlation.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Payload Errors
    // ========================================================================
    /// A compressed or encoded payload could not be decoded.
    #[error("Decode failure: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// A response frame that cannot be read, such as mistyped fields.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The transport has been disposed.
    #[error("Transport disposed")]
    Disposed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a command failed error.
    #[inline]
    pub fn command_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::Timeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the remote end rejected the command.
    #[inline]
    #[must_use]
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Self::CommandFailed { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed when the caller re-invokes after the
    /// transport reports `connected` again.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::Timeout { .. }
                | Self::RequestTimeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_command_failed_display() {
        let err = Error::command_failed("sessions.delete", "not found");
        assert_eq!(
            err.to_string(),
            "Command 'sessions.delete' failed: not found"
        );
        assert!(err.is_command_failure());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::connection_timeout(10_000);
        let request_err = Error::request_timeout(RequestId::new(7), 30_000);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(request_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        let conn_err = Error::connection("test");
        let timeout_err = Error::connection_timeout(1000);
        let closed_err = Error::ConnectionClosed;
        let other_err = Error::config("test");

        assert!(conn_err.is_connection_error());
        assert!(timeout_err.is_connection_error());
        assert!(closed_err.is_connection_error());
        assert!(!other_err.is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::ConnectionClosed.is_recoverable());
        assert!(Error::timeout("api call", 1000).is_recoverable());
        assert!(!Error::Disposed.is_recoverable());
        assert!(!Error::decode("bad gzip").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
    }
}
