//! In-process LRU tier with a byte budget.
//!
//! Recency is a monotonically increasing tick per entry; `order` maps ticks
//! back to keys so the least recently used entry is always the first one.

use crate::codec::Envelope;
use crate::fuzzy::{best_match, Signature};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct LocalEntry {
    envelope: Envelope,
    signature: Signature,
    expires_at: Instant,
    last_access: Instant,
    hits: u64,
    tick: u64,
    size: usize,
}

impl LocalEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bookkeeping of one live local entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Key bytes plus stored payload bytes
    pub size: usize,
    pub compressed: bool,
    /// Lookups served by this entry, exact or fuzzy
    pub hits: u64,
    /// Time since the entry was stored or last served
    pub idle: Duration,
    pub expires_in: Duration,
}

/// Outcome of an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InsertOutcome {
    pub stored: bool,
    pub evicted: usize,
}

#[derive(Debug)]
pub struct LocalTier {
    max_bytes: usize,
    used_bytes: usize,
    next_tick: u64,
    entries: HashMap<String, LocalEntry>,
    order: BTreeMap<u64, String>,
}

impl LocalTier {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            used_bytes: 0,
            next_tick: 0,
            entries: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    /// Record a hit: most recently used from now on
    fn touch(&mut self, key: &str, now: Instant) {
        let tick = self.tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.order.remove(&entry.tick);
            entry.tick = tick;
            entry.hits += 1;
            entry.last_access = now;
            self.order.insert(tick, key.to_string());
        }
    }

    /// Look up a live entry and mark it most recently used.
    /// An expired entry is dropped and reported as absent.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<Envelope> {
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            self.remove(key);
            return None;
        }
        self.touch(key, now);
        self.entries.get(key).map(|e| e.envelope.clone())
    }

    /// Hit count and timing of a live entry. Does not count as an access.
    pub fn entry_info(&self, key: &str, now: Instant) -> Option<EntryInfo> {
        let entry = self.entries.get(key).filter(|e| !e.is_expired(now))?;
        Some(EntryInfo {
            size: entry.size,
            compressed: entry.envelope.compressed,
            hits: entry.hits,
            idle: now.duration_since(entry.last_access),
            expires_in: entry.expires_at.duration_since(now),
        })
    }

    /// Store an entry, evicting least recently used entries until the tier
    /// fits its budget again.
    ///
    /// Replacing an existing key keeps its recency and hit count. An entry that alone
    /// exceeds the budget is not stored, and any older value under the same
    /// key is dropped.
    pub fn insert(&mut self, key: String, envelope: Envelope, expires_at: Instant) -> InsertOutcome {
        let size = key.len() + envelope.stored_len();
        if size > self.max_bytes {
            self.remove(&key);
            return InsertOutcome::default();
        }

        let signature = Signature::of(&key);
        let now = Instant::now();
        match self.entries.get_mut(&key) {
            Some(entry) => {
                self.used_bytes = self.used_bytes - entry.size + size;
                entry.envelope = envelope;
                entry.signature = signature;
                entry.expires_at = expires_at;
                entry.last_access = now;
                entry.size = size;
            }
            None => {
                let tick = self.tick();
                self.order.insert(tick, key.clone());
                self.entries.insert(
                    key,
                    LocalEntry {
                        envelope,
                        signature,
                        expires_at,
                        last_access: now,
                        hits: 0,
                        tick,
                        size,
                    },
                );
                self.used_bytes += size;
            }
        }

        let mut evicted = 0;
        while self.used_bytes > self.max_bytes {
            let Some((_, victim)) = self.order.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&victim) {
                self.used_bytes -= entry.size;
                evicted += 1;
            }
        }

        InsertOutcome {
            stored: true,
            evicted,
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.tick);
                self.used_bytes -= entry.size;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.used_bytes = 0;
    }

    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        doomed.iter().filter(|k| self.remove(k)).count()
    }

    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        doomed.iter().filter(|k| self.remove(k)).count()
    }

    /// Find a live entry whose key is a near-duplicate of `key` among the
    /// `window` most recently used ones. A match is marked used.
    pub fn fuzzy_get(
        &mut self,
        key: &str,
        threshold: f64,
        window: usize,
        now: Instant,
    ) -> Option<(String, Envelope)> {
        let wanted = Signature::of(key);
        let matched = {
            let candidates = self
                .order
                .values()
                .rev()
                .take(window)
                .filter_map(|k| self.entries.get_key_value(k))
                .filter(|(_, e)| !e.is_expired(now))
                .map(|(k, e)| (k.as_str(), &e.signature));
            best_match(&wanted, candidates, threshold)?.to_string()
        };
        self.touch(&matched, now);
        let envelope = self.entries.get(&matched)?.envelope.clone();
        Some((matched, envelope))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn env(value: &str) -> Envelope {
        Envelope::encode(value, usize::MAX).unwrap()
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    #[test]
    fn test_strict_lru_eviction() {
        // each entry: 2 key bytes + 8 payload bytes
        let mut tier = LocalTier::new(30);
        tier.insert("k1".into(), env("aaaaaaaa"), later());
        tier.insert("k2".into(), env("bbbbbbbb"), later());
        tier.insert("k3".into(), env("cccccccc"), later());
        assert_eq!(tier.used_bytes(), 30);

        // k1 becomes most recent, so k2 is the victim
        assert!(tier.get("k1", Instant::now()).is_some());
        let outcome = tier.insert("k4".into(), env("dddddddd"), later());
        assert_eq!(outcome.evicted, 1);
        assert!(tier.get("k2", Instant::now()).is_none());
        assert!(tier.get("k1", Instant::now()).is_some());
        assert!(tier.used_bytes() <= 30);
    }

    #[test]
    fn test_overwrite_keeps_recency() {
        let mut tier = LocalTier::new(30);
        tier.insert("k1".into(), env("aaaaaaaa"), later());
        tier.insert("k2".into(), env("bbbbbbbb"), later());
        tier.insert("k3".into(), env("cccccccc"), later());

        // overwrite k1: still the oldest, so it goes first
        tier.insert("k1".into(), env("AAAAAAAA"), later());
        tier.insert("k4".into(), env("dddddddd"), later());
        assert!(tier.get("k1", Instant::now()).is_none());
        assert!(tier.get("k2", Instant::now()).is_some());
    }

    #[test]
    fn test_oversized_entry_is_not_stored() {
        let mut tier = LocalTier::new(10);
        tier.insert("k".into(), env("small"), later());
        let outcome = tier.insert("k".into(), env(&"x".repeat(100)), later());
        assert!(!outcome.stored);
        assert!(tier.is_empty());
        assert_eq!(tier.used_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_dropped() {
        let mut tier = LocalTier::new(1024);
        let soon = Instant::now() + Duration::from_secs(5);
        tier.insert("short".into(), env("v"), soon);
        tier.insert("long".into(), env("v"), later());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(tier.get("short", Instant::now()).is_none());
        assert_eq!(tier.len(), 1);

        tier.insert("short2".into(), env("v"), Instant::now());
        assert_eq!(tier.purge_expired(Instant::now()), 1);
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_info_tracks_hits_and_access() {
        let mut tier = LocalTier::new(1024);
        tier.insert("Write slide 1 of 3".into(), env("v"), later());
        let info = tier.entry_info("Write slide 1 of 3", Instant::now()).unwrap();
        assert_eq!(info.hits, 0);
        assert_eq!(info.size, "Write slide 1 of 3".len() + 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        tier.get("Write slide 1 of 3", Instant::now()).unwrap();
        tier.fuzzy_get("write SLIDE 1 of 3", 1.0, 16, Instant::now()).unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        let info = tier.entry_info("Write slide 1 of 3", Instant::now()).unwrap();
        assert_eq!(info.hits, 2);
        assert_eq!(info.idle, Duration::from_secs(4));
        assert_eq!(info.expires_in, Duration::from_secs(3600 - 14));
        assert!(!info.compressed);

        // replacing the value keeps the count
        tier.insert("Write slide 1 of 3".into(), env("w"), later());
        assert_eq!(tier.entry_info("Write slide 1 of 3", Instant::now()).unwrap().hits, 2);
        assert!(tier.entry_info("missing", Instant::now()).is_none());
    }

    #[test]
    fn test_remove_prefix() {
        let mut tier = LocalTier::new(1024);
        tier.insert("gpt-4o\na".into(), env("1"), later());
        tier.insert("gpt-4o\nb".into(), env("2"), later());
        tier.insert("claude\na".into(), env("3"), later());
        assert_eq!(tier.remove_prefix("gpt-4o"), 2);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_fuzzy_get_scans_window() {
        let mut tier = LocalTier::new(4096);
        tier.insert("Write slide 2 of 5 about Rust".into(), env("slide-2"), later());
        for i in 0..4 {
            tier.insert(format!("filler {}", i), env("x"), later());
        }

        let hit = tier.fuzzy_get("write  SLIDE 2 of 5 about rust", 0.92, 16, Instant::now());
        assert_eq!(hit.map(|(_, e)| e.decode().unwrap()), Some("slide-2".to_string()));

        assert!(tier
            .fuzzy_get("write slide 3 of 5 about rust", 0.92, 16, Instant::now())
            .is_none());

        // entry has been pushed out of a window of 2
        tier.insert("filler 9".into(), env("x"), later());
        tier.insert("filler 10".into(), env("x"), later());
        assert!(tier
            .fuzzy_get("write slide 2 of 5 about rust", 0.92, 2, Instant::now())
            .is_none());
    }
}
