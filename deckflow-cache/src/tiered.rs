//! Local + remote cache front.

use crate::codec::Envelope;
use crate::config::CacheConfig;
use crate::key::remote_key;
use crate::local::{EntryInfo, LocalTier};
use crate::remote::RemoteTier;
use crate::stats::{CacheCounters, CacheStats};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Two-tier completion cache.
///
/// Lookups go local → remote → fuzzy. Every internal failure (codec, remote
/// connectivity) is logged and treated as a miss; callers only ever see
/// `Some(value)` or `None`.
#[derive(Debug)]
pub struct TieredCache {
    config: CacheConfig,
    local: Mutex<LocalTier>,
    remote: Option<Arc<dyn RemoteTier>>,
    counters: CacheCounters,
}

impl TieredCache {
    /// Local tier only
    pub fn new(config: CacheConfig) -> Self {
        Self {
            local: Mutex::new(LocalTier::new(config.max_bytes)),
            config,
            remote: None,
            counters: CacheCounters::default(),
        }
    }

    /// Local tier backed by a shared remote tier
    pub fn with_remote(config: CacheConfig, remote: Arc<dyn RemoteTier>) -> Self {
        let mut cache = Self::new(config);
        cache.remote = Some(remote);
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let local = self.local.lock().get(key, Instant::now());
        if let Some(envelope) = local {
            if let Some(value) = self.decode(key, &envelope) {
                CacheCounters::bump(&self.counters.local_hits);
                CacheCounters::bump(&self.counters.hits);
                return Some(value);
            }
        }

        if let Some(value) = self.remote_get(key).await {
            CacheCounters::bump(&self.counters.remote_hits);
            CacheCounters::bump(&self.counters.hits);
            return Some(value);
        }

        if self.config.fuzzy_enabled {
            let near = self.local.lock().fuzzy_get(
                key,
                self.config.fuzzy_threshold,
                self.config.fuzzy_window,
                Instant::now(),
            );
            if let Some((matched, envelope)) = near {
                if let Some(value) = self.decode(&matched, &envelope) {
                    tracing::debug!(key_len = key.len(), "fuzzy cache hit");
                    CacheCounters::bump(&self.counters.fuzzy_hits);
                    CacheCounters::bump(&self.counters.hits);
                    return Some(value);
                }
            }
        }

        CacheCounters::bump(&self.counters.misses);
        None
    }

    async fn remote_get(&self, key: &str) -> Option<String> {
        let remote = self.remote.as_ref()?;
        let rkey = remote_key(&self.config.namespace, key);

        let found = match remote.get(&rkey).await {
            Ok(Some(found)) => found,
            Ok(None) => return None,
            Err(e) => {
                CacheCounters::bump(&self.counters.remote_errors);
                tracing::warn!(error = %e, "remote cache lookup failed");
                return None;
            }
        };

        let envelope = match Envelope::from_bytes(&found.bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "discarding undecodable remote cache entry");
                return None;
            }
        };
        let value = self.decode(key, &envelope)?;

        // the local copy expires together with the shared one
        let ttl = found.ttl.unwrap_or_else(|| self.config.default_ttl());
        let expires_at = Instant::now() + ttl;
        let outcome = self.local.lock().insert(key.to_string(), envelope, expires_at);
        CacheCounters::add(&self.counters.evictions, outcome.evicted as u64);
        Some(value)
    }

    fn decode(&self, key: &str, envelope: &Envelope) -> Option<String> {
        match envelope.decode() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable cache entry");
                self.local.lock().remove(key);
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl` (the configured default when `None`).
    ///
    /// The local write is synchronous; the remote write is best-effort.
    pub async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.store(key, value, ttl).await;
    }

    /// Preload `entries` with one TTL. Returns how many were kept locally.
    pub async fn warm_up<K, V>(&self, entries: &[(K, V)], ttl: Option<Duration>) -> usize
    where
        K: AsRef<str> + Sync,
        V: AsRef<str> + Sync,
    {
        tracing::info!(entries = entries.len(), "cache warm-up started");
        let mut stored = 0;
        for (key, value) in entries {
            if self.store(key.as_ref(), value.as_ref(), ttl).await {
                stored += 1;
            }
        }
        tracing::info!(stored, entries = entries.len(), "cache warm-up finished");
        stored
    }

    /// Whether the value made it into the local tier
    async fn store(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        let envelope = match Envelope::encode(value, self.config.compression_threshold) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "cache value not stored: encoding failed");
                return false;
            }
        };

        let remote_bytes = match &self.remote {
            Some(_) => match envelope.to_bytes() {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!(error = %e, "remote cache envelope encoding failed");
                    None
                }
            },
            None => None,
        };

        let outcome = self
            .local
            .lock()
            .insert(key.to_string(), envelope, Instant::now() + ttl);
        CacheCounters::bump(&self.counters.puts);
        CacheCounters::add(&self.counters.evictions, outcome.evicted as u64);
        if !outcome.stored {
            tracing::debug!(key_len = key.len(), "value larger than local budget, not kept locally");
        }

        if let (Some(remote), Some(bytes)) = (&self.remote, remote_bytes) {
            let rkey = remote_key(&self.config.namespace, key);
            if let Err(e) = remote.set(&rkey, bytes, ttl).await {
                CacheCounters::bump(&self.counters.remote_errors);
                tracing::warn!(error = %e, "remote cache write failed");
            }
        }
        outcome.stored
    }

    /// Remove `key` from both tiers
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.local.lock().remove(key);
        if let Some(remote) = &self.remote {
            let rkey = remote_key(&self.config.namespace, key);
            if let Err(e) = remote.delete(&rkey).await {
                CacheCounters::bump(&self.counters.remote_errors);
                tracing::warn!(error = %e, "remote cache delete failed");
            }
        }
        removed
    }

    /// Empty the local tier. The remote tier is shared and left alone.
    pub fn clear(&self) {
        self.local.lock().clear();
    }

    /// Drop local entries whose key starts with `prefix`.
    ///
    /// Remote keys are hashed, so the remote tier cannot be scanned by
    /// prefix; its entries age out through their TTL.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.local.lock().remove_prefix(prefix)
    }

    pub fn purge_expired(&self) -> usize {
        let purged = self.local.lock().purge_expired(Instant::now());
        if purged > 0 {
            tracing::debug!(purged, "expired cache entries purged");
        }
        purged
    }

    /// Hit count and timing of the local entry under `key`
    pub fn inspect(&self, key: &str) -> Option<EntryInfo> {
        self.local.lock().entry_info(key, Instant::now())
    }

    pub fn stats(&self) -> CacheStats {
        let local = self.local.lock();
        self.counters.snapshot(local.len(), local.used_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::key::prompt_key;
    use crate::remote::{MemoryTier, RemoteValue};
    use async_trait::async_trait;
    use deckflow_core::prompt::{DeckPromptBuilder, JobContext, PromptBuilder};

    #[derive(Debug)]
    struct DownTier;

    #[async_trait]
    impl RemoteTier for DownTier {
        async fn get(&self, _key: &str) -> Result<Option<RemoteValue>, CacheError> {
            Err(CacheError::remote("connection refused"))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::remote("connection refused"))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::remote("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_local_hit_and_miss_counters() {
        let cache = TieredCache::new(CacheConfig::default());
        assert_eq!(cache.get("k").await, None);

        cache.put("k", "v", None).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.local_hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.puts, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_remote_hit_populates_local() {
        let shared: Arc<dyn RemoteTier> = Arc::new(MemoryTier::new());
        let writer = TieredCache::with_remote(CacheConfig::default(), shared.clone());
        let reader = TieredCache::with_remote(CacheConfig::default(), shared);

        writer.put("gpt-4o-mini\nsys\nslide 1", &"x".repeat(4096), None).await;

        let value = reader.get("gpt-4o-mini\nsys\nslide 1").await.unwrap();
        assert_eq!(value.len(), 4096);
        assert_eq!(reader.stats().remote_hits, 1);

        reader.get("gpt-4o-mini\nsys\nslide 1").await.unwrap();
        assert_eq!(reader.stats().local_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_promoted_entry_keeps_remote_ttl() {
        let shared: Arc<dyn RemoteTier> = Arc::new(MemoryTier::new());
        let writer = TieredCache::with_remote(CacheConfig::default(), shared.clone());
        let reader = TieredCache::with_remote(CacheConfig::default(), shared);

        writer.put("k", "v", Some(Duration::from_secs(10))).await;
        assert_eq!(reader.get("k").await.as_deref(), Some("v"));
        assert_eq!(reader.stats().remote_hits, 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(reader.get("k").await.as_deref(), Some("v"));
        assert_eq!(reader.stats().local_hits, 1);
        let info = reader.inspect("k").unwrap();
        assert_eq!(info.hits, 1);
        assert_eq!(info.expires_in, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(writer.get("k").await, None);
        assert_eq!(reader.get("k").await, None);
    }

    #[tokio::test]
    async fn test_remote_failure_degrades_to_local() {
        let cache = TieredCache::with_remote(CacheConfig::default(), Arc::new(DownTier));
        cache.put("k", "v", None).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert_eq!(cache.get("other").await, None);

        let stats = cache.stats();
        assert_eq!(stats.remote_errors, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = TieredCache::new(CacheConfig::default());
        cache.put("k", "v", Some(Duration::from_secs(10))).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_fuzzy_hit_respects_unit_index() {
        let cache = TieredCache::new(CacheConfig::default());
        cache
            .put("gpt-4o-mini\nTopic: Rust\nWrite slide 2 of 5.", "slide two", None)
            .await;

        let near = cache.get("gpt-4o-mini\ntopic:  rust\nwrite SLIDE 2 of 5").await;
        assert_eq!(near.as_deref(), Some("slide two"));
        assert_eq!(cache.stats().fuzzy_hits, 1);

        let other_unit = cache.get("gpt-4o-mini\nTopic: Rust\nWrite slide 3 of 5.").await;
        assert_eq!(other_unit, None);
    }

    #[tokio::test]
    async fn test_fuzzy_never_crosses_topics() {
        let builder = DeckPromptBuilder::new();
        let slide_three = |topic: &str| {
            let ctx = JobContext {
                topic: topic.to_string(),
                audience: String::new(),
                description: String::new(),
                unit_count: 10,
                template_id: None,
            };
            let prompt = builder.build(&ctx, 2);
            prompt_key("gpt-4o-mini", &prompt.system, &prompt.user)
        };

        let cache = TieredCache::new(CacheConfig::default());
        cache.put(&slide_three("Rust ownership"), "RUST SLIDE", None).await;

        assert_eq!(cache.get(&slide_three("Go ownership")).await, None);
        assert_eq!(cache.get(&slide_three("Kubernetes networking")).await, None);
        assert_eq!(cache.stats().fuzzy_hits, 0);

        let variant = cache.get(&slide_three("the rust   OWNERSHIP")).await;
        assert_eq!(variant.as_deref(), Some("RUST SLIDE"));
        assert_eq!(cache.stats().fuzzy_hits, 1);

        let other_slide = builder.build(
            &JobContext {
                topic: "Rust ownership".to_string(),
                audience: String::new(),
                description: String::new(),
                unit_count: 10,
                template_id: None,
            },
            3,
        );
        let key = prompt_key("gpt-4o-mini", &other_slide.system, &other_slide.user);
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn test_fuzzy_disabled() {
        let cache = TieredCache::new(CacheConfig::default().with_fuzzy(false));
        cache.put("Hello World", "v", None).await;
        assert_eq!(cache.get("hello world").await, None);
    }

    #[tokio::test]
    async fn test_budget_and_evictions() {
        let cache = TieredCache::new(CacheConfig::default().with_max_bytes(64).with_fuzzy(false));
        for i in 0..10 {
            cache.put(&format!("key-{}", i), "0123456789", None).await;
        }
        let stats = cache.stats();
        assert!(stats.bytes <= 64);
        assert!(stats.evictions >= 6);
        assert_eq!(cache.get("key-9").await.as_deref(), Some("0123456789"));
        assert_eq!(cache.get("key-0").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_up_preloads_both_tiers() {
        let remote = Arc::new(MemoryTier::new());
        let cache = TieredCache::with_remote(CacheConfig::default().with_max_bytes(64), remote.clone());
        let entries = vec![
            ("slide 1".to_string(), "one".to_string()),
            ("slide 2".to_string(), "two".to_string()),
            ("slide 3".to_string(), "x".repeat(100)),
        ];

        // the oversized value only reaches the shared tier
        assert_eq!(cache.warm_up(&entries, Some(Duration::from_secs(30))).await, 2);
        assert_eq!(cache.stats().puts, 3);
        assert_eq!(remote.len(), 3);
        assert_eq!(cache.get("slide 2").await.as_deref(), Some("two"));
        assert!(cache.inspect("slide 1").unwrap().expires_in <= Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get("slide 1").await, None);
    }

    #[tokio::test]
    async fn test_delete_clear_and_prefix() {
        let remote = Arc::new(MemoryTier::new());
        let cache = TieredCache::with_remote(CacheConfig::default().with_fuzzy(false), remote.clone());
        cache.put("a/1", "1", None).await;
        cache.put("a/2", "2", None).await;
        cache.put("b/1", "3", None).await;

        assert!(cache.delete("b/1").await);
        assert_eq!(remote.len(), 2);
        assert_eq!(cache.invalidate_prefix("a/"), 2);
        assert_eq!(cache.stats().entries, 0);

        cache.put("c", "4", None).await;
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
        // still served from the shared tier
        assert_eq!(cache.get("c").await.as_deref(), Some("4"));
    }
}
