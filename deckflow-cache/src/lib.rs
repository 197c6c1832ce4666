//! # deckflow cache
//!
//! Two-tier cache for completion outputs: a byte-budgeted LRU in process and
//! an optional shared remote tier (Redis behind the `redis` feature).
//! Near-duplicate keys can be served through a fuzzy signature match.
//!
//! ```ignore
//! let cache = TieredCache::new(CacheConfig::default());
//! let key = prompt_key("gpt-4o-mini", &prompt.system, &prompt.user);
//! if cache.get(&key).await.is_none() {
//!     cache.put(&key, &text, None).await;
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod fuzzy;
pub mod key;
pub mod local;
pub mod remote;
pub mod stats;
pub mod tiered;

// Re-exports
pub use config::CacheConfig;
pub use error::CacheError;
pub use key::{prompt_key, remote_key};
pub use local::EntryInfo;
pub use remote::{MemoryTier, RemoteTier, RemoteValue};
pub use stats::CacheStats;
pub use tiered::TieredCache;

#[cfg(feature = "redis")]
pub use remote::RedisTier;
