//! Remote endpoint resolution.
//!
//! [`RemoteConfig`] is resolved once from four layers, highest first:
//!
//! 1. Query-string overrides (`server`, `ws`, `http`, `token`, `transport`),
//!    which are persisted when present
//! 2. Persisted overrides from an [`OverrideStore`]
//! 3. Environment defaults (`APP_SERVER_URL`, `APP_WS_URL`, `APP_HTTP_URL`,
//!    `APP_TOKEN`, `APP_TRANSPORT`)
//! 4. Same-origin defaults computed from the page origin
//!
//! `server` is a shorthand: it sets the HTTP base and derives the WebSocket
//! URL (`http` → `ws`, `https` → `wss`, path `/ws`) unless `ws` is also set.

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};

use super::store::{OverrideStore, Overrides};

// ============================================================================
// Constants
// ============================================================================

const ENV_SERVER: &str = "APP_SERVER_URL";
const ENV_WS: &str = "APP_WS_URL";
const ENV_HTTP: &str = "APP_HTTP_URL";
const ENV_TOKEN: &str = "APP_TOKEN";
const ENV_TRANSPORT: &str = "APP_TRANSPORT";

/// Path of the event/command socket relative to the server root.
const WS_PATH: &str = "/ws";

// ============================================================================
// TransportPreference
// ============================================================================

/// Operator preference for the remote transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportPreference {
    /// Pick by environment.
    #[default]
    Auto,
    /// Force the persistent WebSocket transport.
    Ws,
    /// Force HTTP commands with a WebSocket event feed.
    Http,
}

impl FromStr for TransportPreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "ws" | "websocket" => Ok(Self::Ws),
            "http" | "hybrid" => Ok(Self::Http),
            other => Err(Error::config(format!(
                "Unknown transport '{other}' (expected auto, ws or http)"
            ))),
        }
    }
}

impl fmt::Display for TransportPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Ws => "ws",
            Self::Http => "http",
        };
        f.write_str(name)
    }
}

// ============================================================================
// RemoteConfig
// ============================================================================

/// Resolved remote endpoints. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// WebSocket URL for the socket transport and the event feed.
    pub ws_url: Url,
    /// Base URL for `POST <base>/api`.
    pub http_base_url: Url,
    /// Bearer token, if any.
    pub token: Option<String>,
    /// Transport preference.
    pub transport: TransportPreference,
}

impl RemoteConfig {
    /// Creates a builder for an explicit configuration.
    #[inline]
    #[must_use]
    pub fn builder() -> RemoteConfigBuilder {
        RemoteConfigBuilder::new()
    }

    /// Resolves the configuration from every layer.
    ///
    /// Query overrides, when present, are merged over the persisted ones and
    /// saved back to `store`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a URL in any layer is invalid
    /// - any error from loading `store`
    pub fn resolve(sources: &ConfigSources, store: &dyn OverrideStore) -> Result<Self> {
        let query = sources
            .query
            .as_deref()
            .map(Overrides::from_query)
            .unwrap_or_default();

        let mut saved = store.load()?;
        if !query.is_empty() {
            saved = saved.merged_with(query);
            if let Err(e) = store.save(&saved) {
                warn!(error = %e, "Failed to persist query overrides");
            }
        }

        let layers = [&saved, &sources.env];

        let http_base_url = match first_url(&layers, |layer| {
            layer.http.as_deref().or(layer.server.as_deref())
        })? {
            Some(url) => url,
            None => same_origin_base(&sources.origin),
        };

        let ws_url = match first_ws_url(&layers)? {
            Some(url) => url,
            None => derive_ws_url(&sources.origin)?,
        };

        let token = layers.iter().find_map(|layer| layer.token.clone());

        let transport = match layers.iter().find_map(|layer| layer.transport.as_deref()) {
            Some(value) => value.parse::<TransportPreference>().unwrap_or_else(|e| {
                warn!(value, error = %e, "Ignoring transport preference");
                TransportPreference::Auto
            }),
            None => TransportPreference::Auto,
        };

        let config = Self {
            ws_url,
            http_base_url,
            token,
            transport,
        };
        debug!(
            ws = %config.ws_url,
            http = %config.http_base_url,
            transport = %config.transport,
            has_token = config.token.is_some(),
            "Resolved remote config"
        );
        Ok(config)
    }
}

/// Removes every persisted override.
///
/// # Errors
///
/// Returns any error from the store.
pub fn clear_overrides(store: &dyn OverrideStore) -> Result<()> {
    store.clear()
}

// ============================================================================
// ConfigSources
// ============================================================================

/// Inputs to [`RemoteConfig::resolve`] other than the persisted store.
#[derive(Debug, Clone)]
pub struct ConfigSources {
    /// Raw query string, with or without the leading `?`.
    pub query: Option<String>,
    /// Environment defaults.
    pub env: Overrides,
    /// Page origin for same-origin defaults.
    pub origin: Url,
}

impl ConfigSources {
    /// Creates sources with no query and no environment defaults.
    #[must_use]
    pub fn new(origin: Url) -> Self {
        Self {
            query: None,
            env: Overrides::default(),
            origin,
        }
    }

    /// Sets the query string.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Sets the environment defaults.
    #[must_use]
    pub fn with_env(mut self, env: Overrides) -> Self {
        self.env = env;
        self
    }
}

// ============================================================================
// Overrides - Layer Parsing
// ============================================================================

impl Overrides {
    /// Parses the recognized query parameters. Empty values are ignored.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut overrides = Self::default();

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            let value = Some(value.into_owned());
            match key.as_ref() {
                "server" => overrides.server = value,
                "ws" => overrides.ws = value,
                "http" => overrides.http = value,
                "token" => overrides.token = value,
                "transport" => overrides.transport = value,
                _ => {}
            }
        }

        overrides
    }

    /// Reads the environment defaults from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the environment defaults through `lookup`.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            server: read(ENV_SERVER),
            ws: read(ENV_WS),
            http: read(ENV_HTTP),
            token: read(ENV_TOKEN),
            transport: read(ENV_TRANSPORT),
        }
    }
}

// ============================================================================
// URL Helpers
// ============================================================================

/// Derives the WebSocket URL for a server base URL.
///
/// # Errors
///
/// Returns [`Error::Config`] if the scheme is not http(s) or ws(s).
pub fn derive_ws_url(base: &Url) -> Result<Url> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::config(format!(
                "Cannot derive a WebSocket URL from scheme '{other}'"
            )));
        }
    };

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| Error::config(format!("Cannot derive a WebSocket URL from '{base}'")))?;
    url.set_path(WS_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Root of the page origin.
fn same_origin_base(origin: &Url) -> Url {
    let mut url = origin.clone();
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    url
}

fn parse_url(value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| Error::config(format!("Invalid URL '{value}': {e}")))
}

fn first_url<'a>(
    layers: &[&'a Overrides],
    pick: impl Fn(&'a Overrides) -> Option<&'a str>,
) -> Result<Option<Url>> {
    layers
        .iter()
        .find_map(|layer| pick(*layer))
        .map(parse_url)
        .transpose()
}

fn first_ws_url(layers: &[&Overrides]) -> Result<Option<Url>> {
    for layer in layers {
        if let Some(ws) = &layer.ws {
            return parse_url(ws).map(Some);
        }
        if let Some(server) = &layer.server {
            return derive_ws_url(&parse_url(server)?).map(Some);
        }
    }
    Ok(None)
}

// ============================================================================
// RemoteConfigBuilder
// ============================================================================

/// Builder for an explicit [`RemoteConfig`].
///
/// # Example
///
/// ```ignore
/// let config = RemoteConfig::builder()
///     .server("https://backend.example")
///     .token("secret")
///     .build()?;
/// assert_eq!(config.ws_url.as_str(), "wss://backend.example/ws");
/// ```
#[derive(Debug, Default, Clone)]
pub struct RemoteConfigBuilder {
    ws_url: Option<String>,
    http_base_url: Option<String>,
    token: Option<String>,
    transport: TransportPreference,
}

impl RemoteConfigBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the HTTP base URL; the WebSocket URL is derived unless set.
    #[inline]
    #[must_use]
    pub fn server(mut self, url: impl Into<String>) -> Self {
        self.http_base_url = Some(url.into());
        self
    }

    /// Sets the WebSocket URL.
    #[inline]
    #[must_use]
    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// Sets the bearer token.
    #[inline]
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the transport preference.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: TransportPreference) -> Self {
        self.transport = transport;
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the server URL is not set
    /// - [`Error::Config`] if a URL is invalid
    pub fn build(self) -> Result<RemoteConfig> {
        let http = self.http_base_url.ok_or_else(|| {
            Error::config(
                "Server URL is required. Use .server() to set it.\n\
                 Example: RemoteConfig::builder().server(\"https://backend.example\")",
            )
        })?;
        let http_base_url = parse_url(&http)?;

        let ws_url = match self.ws_url {
            Some(ws) => parse_url(&ws)?,
            None => derive_ws_url(&http_base_url)?,
        };

        Ok(RemoteConfig {
            ws_url,
            http_base_url,
            token: self.token,
            transport: self.transport,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use crate::config::MemoryOverrideStore;

    fn origin() -> Url {
        Url::parse("https://app.example:8443/index.html").expect("origin")
    }

    fn env_of(pairs: &[(&str, &str)]) -> Overrides {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Overrides::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_same_origin_defaults() {
        let store = MemoryOverrideStore::new();
        let config = RemoteConfig::resolve(&ConfigSources::new(origin()), &store).expect("resolve");

        assert_eq!(config.ws_url.as_str(), "wss://app.example:8443/ws");
        assert_eq!(config.http_base_url.as_str(), "https://app.example:8443/");
        assert_eq!(config.token, None);
        assert_eq!(config.transport, TransportPreference::Auto);
    }

    #[test]
    fn test_env_beats_origin() {
        let store = MemoryOverrideStore::new();
        let sources = ConfigSources::new(origin()).with_env(env_of(&[
            ("APP_SERVER_URL", "http://10.0.0.2:3000"),
            ("APP_TOKEN", "env-token"),
            ("APP_TRANSPORT", "http"),
        ]));

        let config = RemoteConfig::resolve(&sources, &store).expect("resolve");
        assert_eq!(config.http_base_url.as_str(), "http://10.0.0.2:3000/");
        assert_eq!(config.ws_url.as_str(), "ws://10.0.0.2:3000/ws");
        assert_eq!(config.token.as_deref(), Some("env-token"));
        assert_eq!(config.transport, TransportPreference::Http);
    }

    #[test]
    fn test_query_beats_env_and_is_persisted() {
        let store = MemoryOverrideStore::new();
        let env = env_of(&[("APP_SERVER_URL", "http://10.0.0.2:3000")]);

        let sources = ConfigSources::new(origin())
            .with_env(env.clone())
            .with_query("?server=https%3A%2F%2Fremote.example&token=abc&unknown=1");
        let config = RemoteConfig::resolve(&sources, &store).expect("resolve");
        assert_eq!(config.http_base_url.as_str(), "https://remote.example/");
        assert_eq!(config.ws_url.as_str(), "wss://remote.example/ws");
        assert_eq!(config.token.as_deref(), Some("abc"));

        // Next start without a query keeps the saved pointing.
        let config = RemoteConfig::resolve(&ConfigSources::new(origin()).with_env(env), &store)
            .expect("resolve");
        assert_eq!(config.http_base_url.as_str(), "https://remote.example/");
        assert_eq!(config.token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_explicit_ws_beats_derived() {
        let store = MemoryOverrideStore::new();
        let sources = ConfigSources::new(origin())
            .with_query("server=https://remote.example&ws=wss://events.example/stream");

        let config = RemoteConfig::resolve(&sources, &store).expect("resolve");
        assert_eq!(config.ws_url.as_str(), "wss://events.example/stream");
        assert_eq!(config.http_base_url.as_str(), "https://remote.example/");
    }

    #[test]
    fn test_clear_overrides_restores_defaults() {
        let store = MemoryOverrideStore::new();
        let sources = ConfigSources::new(origin()).with_query("server=https://remote.example");
        RemoteConfig::resolve(&sources, &store).expect("resolve");

        clear_overrides(&store).expect("clear");
        let config = RemoteConfig::resolve(&ConfigSources::new(origin()), &store).expect("resolve");
        assert_eq!(config.http_base_url.as_str(), "https://app.example:8443/");
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let store = MemoryOverrideStore::new();
        let sources = ConfigSources::new(origin()).with_query("http=not%20a%20url");

        let err = RemoteConfig::resolve(&sources, &store).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_unknown_transport_falls_back_to_auto() {
        let store = MemoryOverrideStore::new();
        let sources = ConfigSources::new(origin()).with_query("transport=carrier-pigeon");

        let config = RemoteConfig::resolve(&sources, &store).expect("resolve");
        assert_eq!(config.transport, TransportPreference::Auto);
    }

    #[test]
    fn test_transport_preference_parse() {
        assert_eq!("WS".parse::<TransportPreference>().ok(), Some(TransportPreference::Ws));
        assert_eq!("http".parse::<TransportPreference>().ok(), Some(TransportPreference::Http));
        assert_eq!("".parse::<TransportPreference>().ok(), Some(TransportPreference::Auto));
        assert!("tcp".parse::<TransportPreference>().is_err());
    }

    #[test]
    fn test_derive_ws_url() {
        let url = Url::parse("http://localhost:3000/app?x=1").expect("url");
        assert_eq!(derive_ws_url(&url).expect("derive").as_str(), "ws://localhost:3000/ws");

        let file = Url::parse("file:///tmp/index.html").expect("url");
        assert!(derive_ws_url(&file).is_err());
    }

    #[test]
    fn test_builder() {
        let config = RemoteConfig::builder()
            .server("https://backend.example")
            .token("secret")
            .transport(TransportPreference::Ws)
            .build()
            .expect("build");
        assert_eq!(config.ws_url.as_str(), "wss://backend.example/ws");
        assert_eq!(config.token.as_deref(), Some("secret"));

        let err = RemoteConfig::builder().build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
