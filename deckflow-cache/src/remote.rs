//! Remote (shared) cache tier.

use crate::error::CacheError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// A stored value and the time it has left, `None` when it does not expire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteValue {
    pub bytes: Vec<u8>,
    pub ttl: Option<Duration>,
}

/// Byte store shared between processes.
///
/// Keys handed to a tier are already namespaced and hashed.
#[async_trait]
pub trait RemoteTier: Send + Sync + std::fmt::Debug + 'static {
    async fn get(&self, key: &str) -> Result<Option<RemoteValue>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// In-memory remote tier, for tests and single-process setups that still
/// want the shared-tier code path.
#[derive(Debug, Default)]
pub struct MemoryTier {
    items: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[async_trait]
impl RemoteTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<RemoteValue>, CacheError> {
        let mut items = self.items.lock();
        let now = Instant::now();
        let expired = match items.get(key) {
            Some((_, expires_at)) => now >= *expires_at,
            None => return Ok(None),
        };
        if expired {
            items.remove(key);
            return Ok(None);
        }
        Ok(items.get(key).map(|(bytes, expires_at)| RemoteValue {
            bytes: bytes.clone(),
            ttl: Some(expires_at.duration_since(now)),
        }))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.items
            .lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.items.lock().remove(key);
        Ok(())
    }
}

#[cfg(feature = "redis")]
pub use self::redis_tier::RedisTier;

#[cfg(feature = "redis")]
mod redis_tier {
    use super::{RemoteTier, RemoteValue};
    use crate::error::CacheError;
    use async_trait::async_trait;
    use redis::aio::MultiplexedConnection;
    use redis::AsyncCommands;
    use std::time::Duration;
    use tokio::sync::OnceCell;

    /// Redis-backed remote tier.
    ///
    /// The connection is opened on first use and multiplexed afterwards.
    pub struct RedisTier {
        client: redis::Client,
        conn: OnceCell<MultiplexedConnection>,
    }

    impl std::fmt::Debug for RedisTier {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisTier")
                .field("connected", &self.conn.initialized())
                .finish()
        }
    }

    impl RedisTier {
        pub fn new(redis_url: impl AsRef<str>) -> Result<Self, CacheError> {
            let client = redis::Client::open(redis_url.as_ref())?;
            Ok(Self {
                client,
                conn: OnceCell::new(),
            })
        }

        async fn conn(&self) -> Result<MultiplexedConnection, CacheError> {
            let conn = self
                .conn
                .get_or_try_init(|| async {
                    let conn = self.client.get_multiplexed_tokio_connection().await?;
                    tracing::info!("redis cache tier connected");
                    Ok::<_, CacheError>(conn)
                })
                .await?;
            Ok(conn.clone())
        }
    }

    #[async_trait]
    impl RemoteTier for RedisTier {
        async fn get(&self, key: &str) -> Result<Option<RemoteValue>, CacheError> {
            let mut conn = self.conn().await?;
            // PTTL is negative for keys without an expiry
            let (bytes, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
                .get(key)
                .pttl(key)
                .query_async(&mut conn)
                .await?;
            Ok(bytes.map(|bytes| RemoteValue {
                bytes,
                ttl: u64::try_from(pttl).ok().map(Duration::from_millis),
            }))
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
            let mut conn = self.conn().await?;
            let secs = ttl.as_secs().max(1);
            conn.set_ex::<_, _, ()>(key, value, secs).await?;
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            let mut conn = self.conn().await?;
            conn.del::<_, ()>(key).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_memory_tier_expires() {
        let tier = MemoryTier::new();
        tier.set("k", b"v".to_vec(), Duration::from_secs(2)).await.unwrap();
        let value = tier.get("k").await.unwrap().unwrap();
        assert_eq!(value.bytes, b"v".to_vec());
        assert_eq!(value.ttl, Some(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_millis(500)).await;
        let ttl = tier.get("k").await.unwrap().and_then(|v| v.ttl);
        assert_eq!(ttl, Some(Duration::from_millis(1500)));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(tier.get("k").await.unwrap(), None);
        assert!(tier.is_empty());
    }
}
