//! Cache configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for [`TieredCache`](crate::TieredCache).
///
/// Durations are carried as whole seconds so the struct reads naturally from
/// TOML and environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget of the local tier (key bytes + stored payload bytes)
    pub max_bytes: usize,
    /// TTL applied when `put` is called without one
    pub default_ttl_secs: u64,
    /// Values longer than this are zlib-compressed before storage
    pub compression_threshold: usize,
    /// Look for a near-identical key when the exact one misses
    pub fuzzy_enabled: bool,
    /// Minimum word-token Jaccard similarity for a fuzzy hit. The default
    /// of 1.0 asks for equal word sets after normalisation.
    pub fuzzy_threshold: f64,
    /// How many most-recently-used keys a fuzzy lookup scans
    pub fuzzy_window: usize,
    /// Prefix for remote tier keys
    pub namespace: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024 * 1024,
            default_ttl_secs: 3600,
            compression_threshold: 1024,
            fuzzy_enabled: true,
            fuzzy_threshold: 1.0,
            fuzzy_window: 128,
            namespace: "deckflow".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    pub fn with_fuzzy(mut self, enabled: bool) -> Self {
        self.fuzzy_enabled = enabled;
        self
    }

    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_fuzzy_window(mut self, window: usize) -> Self {
        self.fuzzy_window = window;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}
