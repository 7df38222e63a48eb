//! Short-TTL cache for hot read paths
//!
//! Namespaced keys over a concurrent map. Readers get a clone of the cached
//! JSON value when it is still fresh; any device status change invalidates
//! the device-list namespace so list endpoints never serve a stale status.

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::trace;

/// Device list entries
pub const NS_DEVICE_LIST: &str = "devices";
/// Device ping/status histories
pub const NS_DEVICE_HISTORY: &str = "history";
/// Alert listings
pub const NS_ALERTS: &str = "alerts";
/// Alert rules
pub const NS_RULES: &str = "rules";
/// Monitoring profile
pub const NS_PROFILE: &str = "profile";

/// TTL for device list entries
pub const TTL_DEVICE_LIST: Duration = Duration::from_secs(30);
/// TTL for device history entries
pub const TTL_DEVICE_HISTORY: Duration = Duration::from_secs(30);
/// TTL for alert listings
pub const TTL_ALERTS: Duration = Duration::from_secs(30);
/// TTL for alert rules
pub const TTL_RULES: Duration = Duration::from_secs(60);
/// TTL for the active monitoring profile
pub const TTL_PROFILE: Duration = Duration::from_secs(5 * 60);

struct Entry {
    expires_at: Instant,
    value: serde_json::Value,
}

/// Namespaced TTL cache
#[derive(Default)]
pub struct TtlCache {
    entries: DashMap<String, Entry>,
}

impl TtlCache {
    /// Creates an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn full_key(namespace: &str, key: &str) -> String {
        format!("{namespace}:{key}")
    }

    /// Reads a fresh entry, deserializing into the caller's type
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let full = Self::full_key(namespace, key);
        let entry = self.entries.get(&full)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(&full);
            return None;
        }
        serde_json::from_value(entry.value.clone()).ok()
    }

    /// Stores a value under a namespace with the given TTL
    pub fn put<T: Serialize>(&self, namespace: &str, key: &str, value: &T, ttl: Duration) {
        let Ok(json) = serde_json::to_value(value) else {
            return;
        };
        self.entries.insert(
            Self::full_key(namespace, key),
            Entry {
                expires_at: Instant::now() + ttl,
                value: json,
            },
        );
    }

    /// Drops every entry in a namespace
    pub fn invalidate_namespace(&self, namespace: &str) {
        let prefix = format!("{namespace}:");
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        trace!(namespace, "cache namespace invalidated");
    }

    /// Drops one entry
    pub fn invalidate(&self, namespace: &str, key: &str) {
        self.entries.remove(&Self::full_key(namespace, key));
    }

    /// Entries currently held (fresh or not yet swept)
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the cache holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
