//! Wire protocol message types.
//!
//! This module defines the JSON frames exchanged with the backend.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Channel | Purpose |
//! |--------------|-----------|---------|---------|
//! | [`Request`] | Client → Server | socket | Command request |
//! | [`ControlFrame`] | Client → Server | socket | Keepalive and auth handshake |
//! | [`ServerMessage`] | Server → Client | socket | Response, event, pong, auth reply |
//! | [`HttpCommand`] | Client → Server | HTTP | Stateless command request |
//! | [`HttpReply`] | Server → Client | HTTP | Stateless command response |
//!
//! Command names and payloads are opaque to the transport.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `request` | Outgoing socket and HTTP frames |
//! | `message` | Incoming socket frames and HTTP replies |

// ============================================================================
// Submodules
// ============================================================================

/// Incoming message types.
pub mod message;

/// Outgoing message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{EventFrame, HttpReply, Response, ServerMessage};
pub use request::{ControlFrame, HttpCommand, Request};
