//! Backend transport - one command/event contract over three channels.
//!
//! Application code talks to its backend through a single [`Transport`]
//! without knowing which concrete channel carries the traffic.
//!
//! # Architecture
//!
//! - **Local**: an in-process host bridge, always connected
//! - **Socket**: one persistent WebSocket multiplexing correlated commands
//!   and server-pushed events
//! - **Hybrid**: stateless `POST <base>/api` commands plus a WebSocket used
//!   only for events, with its own auth handshake
//!
//! Key design principles:
//!
//! - One supervisor task per socket applies every state transition
//! - Requests are correlated by id; pending requests never survive a reconnect
//! - Reconnects back off as `min(1000 * 1.5^n, 10000)` ms with one timer
//! - Listeners survive reconnects and are removed by identity
//!
//! # Quick Start
//!
//! ```no_run
//! use backend_transport::{
//!     ConfigSources, Environment, FileOverrideStore, RemoteConfig, Result, TransportFactory,
//! };
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let store = FileOverrideStore::new("overrides.json");
//!     let sources = ConfigSources::new(Url::parse("http://localhost:3000")?)
//!         .with_query("server=https://backend.example&token=secret");
//!     let remote = RemoteConfig::resolve(&sources, &store)?;
//!
//!     let factory = TransportFactory::new(Environment::default()).with_remote(remote);
//!     let transport = factory.transport()?;
//!
//!     let sessions = transport.invoke("sessions.list", None, false).await?;
//!     println!("{sessions}");
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`codec`] | gzip + base64 payload codec |
//! | [`config`] | Remote endpoint resolution and persisted overrides |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`factory`] | Environment detection and the shared transport |
//! | [`identifiers`] | Request and listener ids |
//! | [`protocol`] | Wire frame types |
//! | [`transport`] | The [`Transport`] trait and its implementations |

// ============================================================================
// Modules
// ============================================================================

/// Payload compression for text frames.
pub mod codec;

/// Remote configuration.
///
/// Use [`RemoteConfig::resolve`] for layered resolution or
/// [`RemoteConfig::builder()`] for an explicit configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Transport selection and memoization.
pub mod factory;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire protocol frame types.
pub mod protocol;

/// Transport trait and implementations.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Config types
pub use config::{
    ConfigSources, FileOverrideStore, MemoryOverrideStore, OverrideStore, Overrides, RemoteConfig,
    RemoteConfigBuilder, TransportPreference, clear_overrides,
};

// Error types
pub use error::{Error, Result};

// Factory types
pub use factory::{Environment, TransportFactory, is_mobile_user_agent, select_kind};

// Identifier types
pub use identifiers::{ListenerId, RequestId};

// Transport types
pub use transport::{
    ConnectionStatus, EventCallback, HostBridge, HybridOptions, HybridTransport, InProcessBridge,
    LocalTransport, ReconnectPolicy, SocketOptions, SocketTransport, StatusCallback,
    StatusMonitor, Subscription, Transport, TransportExt, TransportKind,
};
