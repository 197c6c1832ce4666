//! Cache counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub local_hits: AtomicU64,
    pub remote_hits: AtomicU64,
    pub fuzzy_hits: AtomicU64,
    pub puts: AtomicU64,
    pub evictions: AtomicU64,
    pub remote_errors: AtomicU64,
}

impl CacheCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entries: usize, bytes: usize) -> CacheStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let hits = load(&self.hits);
        let misses = load(&self.misses);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            local_hits: load(&self.local_hits),
            remote_hits: load(&self.remote_hits),
            fuzzy_hits: load(&self.fuzzy_hits),
            puts: load(&self.puts),
            evictions: load(&self.evictions),
            remote_errors: load(&self.remote_errors),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            entries,
            bytes,
        }
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub local_hits: u64,
    pub remote_hits: u64,
    pub fuzzy_hits: u64,
    pub puts: u64,
    pub evictions: u64,
    pub remote_errors: u64,
    /// `hits / (hits + misses)`, 0 before the first lookup
    pub hit_rate: f64,
    pub entries: usize,
    pub bytes: usize,
}
