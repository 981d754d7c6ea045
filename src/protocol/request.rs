//! Outgoing message types.
//!
//! Defines the frames the client sends: socket command requests, control
//! frames (keepalive, auth), and the HTTP command body.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::identifiers::RequestId;

// ============================================================================
// Request
// ============================================================================

/// A command request sent over the socket.
///
/// # Format
///
/// ```json
/// {
///   "id": "17",
///   "command": "sessions.list",
///   "payload": { ... },
///   "compressed": false,
///   "accept_gzip": true
/// }
/// ```
///
/// When `compressed` is true, `payload` is a base64 string of a gzip blob
/// holding the JSON payload.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Unique identifier for request/response correlation.
    pub id: RequestId,

    /// Opaque command name.
    pub command: String,

    /// Command payload (or its encoded form when `compressed`).
    pub payload: Value,

    /// Whether `payload` is gzip+base64 encoded.
    pub compressed: bool,

    /// Whether the client accepts compressed response data.
    pub accept_gzip: bool,
}

impl Request {
    /// Creates an uncompressed request.
    #[inline]
    #[must_use]
    pub fn new(id: RequestId, command: impl Into<String>, payload: Value, accept_gzip: bool) -> Self {
        Self {
            id,
            command: command.into(),
            payload,
            compressed: false,
            accept_gzip,
        }
    }

    /// Creates a request, compressing the payload when asked to.
    ///
    /// `encode` turns the payload into its compressed text form. If it fails
    /// the request is built uncompressed instead of failing, so a broken
    /// compressor never costs the caller its command.
    pub fn prepare<F>(
        id: RequestId,
        command: impl Into<String>,
        payload: Option<Value>,
        use_compression: bool,
        accept_gzip: bool,
        encode: F,
    ) -> Self
    where
        F: FnOnce(&Value) -> Result<String>,
    {
        let command = command.into();

        let Some(payload) = payload else {
            return Self::new(id, command, Value::Null, accept_gzip);
        };

        if !use_compression {
            return Self::new(id, command, payload, accept_gzip);
        }

        match encode(&payload) {
            Ok(encoded) => Self {
                id,
                command,
                payload: Value::String(encoded),
                compressed: true,
                accept_gzip,
            },
            Err(e) => {
                warn!(%id, command = %command, error = %e, "Payload compression failed, sending uncompressed");
                Self::new(id, command, payload, accept_gzip)
            }
        }
    }
}

// ============================================================================
// ControlFrame
// ============================================================================

/// Non-command frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ControlFrame {
    /// Keepalive: `{"ping": true}`.
    Ping {
        /// Always `true`.
        ping: bool,
    },
    /// Reply to a server ping: `{"pong": true}`.
    Pong {
        /// Always `true`.
        pong: bool,
    },
    /// Auth handshake: `{"auth": "<token>"}`.
    Auth {
        /// Bearer token.
        auth: String,
    },
}

impl ControlFrame {
    /// Creates a keepalive ping.
    #[inline]
    #[must_use]
    pub const fn ping() -> Self {
        Self::Ping { ping: true }
    }

    /// Creates a pong reply.
    #[inline]
    #[must_use]
    pub const fn pong() -> Self {
        Self::Pong { pong: true }
    }

    /// Creates an auth handshake frame.
    #[inline]
    #[must_use]
    pub fn auth(token: impl Into<String>) -> Self {
        Self::Auth { auth: token.into() }
    }
}

// ============================================================================
// HttpCommand
// ============================================================================

/// Body of `POST <base>/api`.
#[derive(Debug, Clone, Serialize)]
pub struct HttpCommand<'a> {
    /// Opaque command name.
    pub command: &'a str,
    /// Command payload.
    pub payload: Value,
}

// ============================================================================
// Tests
// ============================================================================
