//! Transport selection and the shared instance.
//!
//! Selection order:
//!
//! 1. A host bridge is present → [`LocalTransport`]
//! 2. The preference forces `http`, or is `auto` on a mobile client →
//!    [`HybridTransport`]
//! 3. Otherwise → [`SocketTransport`]
//!
//! [`TransportFactory`] is owned by the composition root and creates the
//! chosen transport once; every later call shares the same instance.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use regex::Regex;
use tracing::info;

use crate::config::{RemoteConfig, TransportPreference};
use crate::error::{Error, Result};
use crate::transport::{
    HostBridge, HybridOptions, HybridTransport, LocalTransport, SocketOptions, SocketTransport,
    Transport, TransportKind,
};

// ============================================================================
// Environment Detection
// ============================================================================

static MOBILE_USER_AGENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)android|iphone|ipad|ipod|mobile|blackberry|iemobile|opera mini|webos")
        .expect("mobile user agent regex must compile")
});

/// Returns `true` if `user_agent` looks like a phone or tablet.
#[must_use]
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    MOBILE_USER_AGENT.is_match(user_agent)
}

/// What the client knows about where it runs.
#[derive(Clone, Default)]
pub struct Environment {
    /// In-process host bridge, when running inside the host.
    pub host_bridge: Option<Arc<dyn HostBridge>>,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// Explicit mobile flag; overrides the user agent heuristic.
    pub mobile: Option<bool>,
}

impl Environment {
    /// Creates an environment running inside `bridge`'s host.
    #[must_use]
    pub fn hosted(bridge: Arc<dyn HostBridge>) -> Self {
        Self {
            host_bridge: Some(bridge),
            ..Self::default()
        }
    }

    /// Creates a remote environment identified by its user agent.
    #[must_use]
    pub fn remote(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: Some(user_agent.into()),
            ..Self::default()
        }
    }

    /// Returns `true` for a constrained or mobile client.
    #[must_use]
    pub fn is_mobile(&self) -> bool {
        self.mobile.unwrap_or_else(|| {
            self.user_agent
                .as_deref()
                .is_some_and(is_mobile_user_agent)
        })
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("hosted", &self.host_bridge.is_some())
            .field("user_agent", &self.user_agent)
            .field("mobile", &self.mobile)
            .finish()
    }
}

/// Picks the transport kind for an environment and preference.
#[must_use]
pub fn select_kind(environment: &Environment, preference: TransportPreference) -> TransportKind {
    if environment.host_bridge.is_some() {
        return TransportKind::Local;
    }

    match preference {
        TransportPreference::Http => TransportKind::Hybrid,
        TransportPreference::Auto if environment.is_mobile() => TransportKind::Hybrid,
        TransportPreference::Auto | TransportPreference::Ws => TransportKind::Socket,
    }
}

// ============================================================================
// TransportFactory
// ============================================================================

/// Creates and memoizes the application's transport.
///
/// # Example
///
/// ```ignore
/// let factory = TransportFactory::new(Environment::remote(user_agent))
///     .with_remote(RemoteConfig::resolve(&sources, &store)?);
///
/// let transport = factory.transport()?;
/// transport.invoke("sessions.list", None, false).await?;
/// ```
pub struct TransportFactory {
    environment: Environment,
    remote: Option<RemoteConfig>,
    socket_options: SocketOptions,
    hybrid_options: HybridOptions,
    instance: Mutex<Option<Arc<dyn Transport>>>,
}

impl TransportFactory {
    /// Creates a factory for `environment`.
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            remote: None,
            socket_options: SocketOptions::default(),
            hybrid_options: HybridOptions::default(),
            instance: Mutex::new(None),
        }
    }

    /// Sets the resolved remote configuration.
    #[must_use]
    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Sets the socket transport options.
    #[must_use]
    pub fn with_socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = options;
        self
    }

    /// Sets the hybrid transport options.
    #[must_use]
    pub fn with_hybrid_options(mut self, options: HybridOptions) -> Self {
        self.hybrid_options = options;
        self
    }

    /// Returns the kind [`transport`](Self::transport) creates.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        let preference = self
            .remote
            .as_ref()
            .map_or(TransportPreference::Auto, |remote| remote.transport);
        select_kind(&self.environment, preference)
    }

    /// Returns the shared transport, creating it on first call.
    ///
    /// Remote transports must be created inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a remote transport is selected without a
    ///   remote configuration
    /// - any error from constructing the transport
    pub fn transport(&self) -> Result<Arc<dyn Transport>> {
        let mut instance = self.instance.lock();
        if let Some(transport) = instance.as_ref() {
            return Ok(Arc::clone(transport));
        }

        let transport = self.create()?;
        info!(kind = %transport.kind(), "Transport created");
        *instance = Some(Arc::clone(&transport));
        Ok(transport)
    }

    fn create(&self) -> Result<Arc<dyn Transport>> {
        if let Some(bridge) = &self.environment.host_bridge {
            return Ok(Arc::new(LocalTransport::new(Arc::clone(bridge))));
        }

        let remote = self.remote.as_ref().ok_or_else(|| {
            Error::config(
                "Remote configuration is required outside the host. \
                 Use .with_remote() to set it.",
            )
        })?;

        let transport: Arc<dyn Transport> = match self.kind() {
            TransportKind::Hybrid => Arc::new(HybridTransport::from_config(
                remote,
                self.hybrid_options.clone(),
            )?),
            _ => Arc::new(SocketTransport::from_config(
                remote,
                self.socket_options.clone(),
            )),
        };
        Ok(transport)
    }
}

impl fmt::Debug for TransportFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportFactory")
            .field("environment", &self.environment)
            .field("remote", &self.remote)
            .field("created", &self.instance.lock().is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
