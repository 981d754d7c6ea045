//! Persisted configuration overrides.
//!
//! Overrides given on the query string are saved so a client pointed at a
//! remote server keeps that pointing across restarts.

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

// ============================================================================
// Overrides
// ============================================================================

/// Raw override values, one per recognized query parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Overrides {
    /// Remote server base URL; also derives the WebSocket URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// WebSocket URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws: Option<String>,
    /// HTTP base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    /// Auth token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Transport preference (`auto`, `ws`, `http`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
}

impl Overrides {
    /// Returns `true` if no value is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.server.is_none()
            && self.ws.is_none()
            && self.http.is_none()
            && self.token.is_none()
            && self.transport.is_none()
    }

    /// Applies `newer` on top of `self`.
    ///
    /// A new `server` resets the stored `ws` and `http` URLs, since they
    /// belonged to the previous server.
    #[must_use]
    pub fn merged_with(mut self, newer: Overrides) -> Self {
        if newer.server.is_some() {
            self.ws = None;
            self.http = None;
            self.server = newer.server;
        }
        if newer.ws.is_some() {
            self.ws = newer.ws;
        }
        if newer.http.is_some() {
            self.http = newer.http;
        }
        if newer.token.is_some() {
            self.token = newer.token;
        }
        if newer.transport.is_some() {
            self.transport = newer.transport;
        }
        self
    }
}

// ============================================================================
// OverrideStore
// ============================================================================

/// Persistence for [`Overrides`].
pub trait OverrideStore: Send + Sync {
    /// Loads saved overrides; empty if none were saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn load(&self) -> Result<Overrides>;

    /// Replaces the saved overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn save(&self, overrides: &Overrides) -> Result<()>;

    /// Removes every saved override.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn clear(&self) -> Result<()>;
}

// ============================================================================
// MemoryOverrideStore
// ============================================================================

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryOverrideStore {
    saved: Mutex<Overrides>,
}

impl MemoryOverrideStore {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverrideStore for MemoryOverrideStore {
    fn load(&self) -> Result<Overrides> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, overrides: &Overrides) -> Result<()> {
        *self.saved.lock() = overrides.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.saved.lock() = Overrides::default();
        Ok(())
    }
}

// ============================================================================
// FileOverrideStore
// ============================================================================

/// JSON file store.
///
/// A missing file reads as no overrides. An unreadable or corrupt file is
/// logged and also reads as no overrides, so a bad file never blocks
/// startup.
#[derive(Debug, Clone)]
pub struct FileOverrideStore {
    path: PathBuf,
}

impl FileOverrideStore {
    /// Creates a store backed by `path`. The file is created on first save.
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OverrideStore for FileOverrideStore {
    fn load(&self) -> Result<Overrides> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Overrides::default()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&text) {
            Ok(overrides) => Ok(overrides),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt overrides file");
                Ok(Overrides::default())
            }
        }
    }

    fn save(&self, overrides: &Overrides) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(overrides)?;
        fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), "Saved overrides");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn sample() -> Overrides {
        Overrides {
            server: Some("https://remote.example".into()),
            token: Some("tok".into()),
            ..Overrides::default()
        }
    }

    #[test]
    fn test_merge_server_resets_urls() {
        let saved = Overrides {
            ws: Some("wss://old.example/ws".into()),
            http: Some("https://old.example".into()),
            token: Some("old".into()),
            ..Overrides::default()
        };

        let merged = saved.merged_with(Overrides {
            server: Some("https://new.example".into()),
            ..Overrides::default()
        });

        assert_eq!(merged.server.as_deref(), Some("https://new.example"));
        assert_eq!(merged.ws, None);
        assert_eq!(merged.http, None);
        assert_eq!(merged.token.as_deref(), Some("old"));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryOverrideStore::new();
        assert!(store.load().expect("load").is_empty());

        store.save(&sample()).expect("save");
        assert_eq!(store.load().expect("load"), sample());

        store.clear().expect("clear");
        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileOverrideStore::new(dir.path().join("nested/overrides.json"));

        assert!(store.load().expect("load missing").is_empty());

        store.save(&sample()).expect("save");
        let reopened = FileOverrideStore::new(store.path());
        assert_eq!(reopened.load().expect("load"), sample());

        reopened.clear().expect("clear");
        reopened.clear().expect("clear twice");
        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn test_file_store_ignores_corrupt_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("overrides.json");
        fs::write(&path, "{not json").expect("write");

        let store = FileOverrideStore::new(&path);
        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn test_saved_json_omits_unset_fields() {
        let json = serde_json::to_value(sample()).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"server": "https://remote.example", "token": "tok"})
        );
    }
}
