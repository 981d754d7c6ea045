//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing request correlation ids with listener ids.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`RequestId`] | Correlates a socket request with its response |
//! | [`ListenerId`] | Identity of a registered event/status listener |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// RequestId
// ============================================================================

/// Client-assigned correlation id for a socket request.
///
/// Serialized as a decimal string on the wire, since the server echoes it back
/// verbatim and only compares it for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Creates a request id from a raw counter value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// RequestIdGenerator
// ============================================================================

/// Monotonic request id source owned by one transport instance.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counter: AtomicU64,
}

impl RequestIdGenerator {
    /// Creates a generator whose first id is `1`.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Returns the next id. Never repeats within this generator.
    #[inline]
    pub fn next_id(&self) -> RequestId {
        RequestId(self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

// ============================================================================
// ListenerId
// ============================================================================

/// Identity of a registered listener.
///
/// Removal is by identity, so two registrations of the same callback are two
/// independent listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocates a process-unique listener id.
    #[must_use]
    pub fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_is_monotonic() {
        let generator = RequestIdGenerator::new();
        let first = generator.next_id();
        let second = generator.next_id();
        assert_eq!(first.as_u64(), 1);
        assert!(second > first);
    }

    #[test]
    fn test_request_id_wire_format() {
        let id = RequestId::new(42);
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "\"42\"");

        let parsed: RequestId = serde_json::from_str("\"42\"").expect("parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_request_id_rejects_non_numeric() {
        assert!(serde_json::from_str::<RequestId>("\"abc\"").is_err());
    }

    #[test]
    fn test_listener_ids_unique() {
        assert_ne!(ListenerId::generate(), ListenerId::generate());
    }
}
