//! Remote configuration.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `remote` | Layered resolution of [`RemoteConfig`] |
//! | `store` | Persisted query-string overrides |

/// Layered remote endpoint resolution.
pub mod remote;

/// Persisted overrides.
pub mod store;

pub use remote::{
    ConfigSources, RemoteConfig, RemoteConfigBuilder, TransportPreference, clear_overrides,
    derive_ws_url,
};
pub use store::{FileOverrideStore, MemoryOverrideStore, OverrideStore, Overrides};
