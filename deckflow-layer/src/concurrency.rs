//! Shared ceiling on in-flight provider calls.
//!
//! One [`ConcurrencyLimiter`] is created per gateway and layered into every
//! client it hands out, so the ceiling holds across all jobs at once.

use deckflow_core::error::FlowError;
use deckflow_core::impl_layered_provider;
use deckflow_core::layer::{Layer, LayeredProvider};
use deckflow_core::provider::Provider;
use deckflow_core::types::*;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore with in-flight and peak gauges.
///
/// Waiters are admitted in arrival order.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    /// A limiter admitting `max` concurrent holders (at least one)
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a slot. The slot is held until the guard is dropped.
    pub async fn acquire(&self) -> Result<InFlightGuard, FlowError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FlowError::layer("concurrency", "limiter closed"))?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(InFlightGuard {
            in_flight: self.in_flight.clone(),
            _permit: permit,
        })
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Calls currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest in-flight count observed so far
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Layer that makes every call through it hold a slot of this limiter
    pub fn layer(&self) -> ConcurrencyLimitLayer {
        ConcurrencyLimitLayer {
            limiter: self.clone(),
        }
    }
}

/// A held slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        // The permit is released after this runs, so the gauge never
        // reads above the ceiling.
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Layer form of a [`ConcurrencyLimiter`]
#[derive(Debug, Clone)]
pub struct ConcurrencyLimitLayer {
    limiter: ConcurrencyLimiter,
}

impl ConcurrencyLimitLayer {
    pub fn new(limiter: ConcurrencyLimiter) -> Self {
        Self { limiter }
    }
}

impl<P: Provider> Layer<P> for ConcurrencyLimitLayer {
    type LayeredProvider = LimitedProvider<P>;

    fn layer(&self, inner: P) -> Self::LayeredProvider {
        LimitedProvider {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Provider whose calls each hold a limiter slot
#[derive(Debug)]
pub struct LimitedProvider<P> {
    inner: P,
    limiter: ConcurrencyLimiter,
}

#[async_trait]
impl<P: Provider> LayeredProvider for LimitedProvider<P> {
    type Inner = P;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_complete(
        &self,
        req: CompletionRequest,
    ) -> Result<CompletionResponse, FlowError> {
        let _slot = self.limiter.acquire().await?;
        self.inner.complete(req).await
    }
}

impl_layered_provider!(<P: Provider> LimitedProvider<P>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_holds_across_clients() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter
            .layer()
            .layer(ScriptedProvider::new(vec![]).with_delay(Duration::from_millis(50)));
        let b = limiter
            .layer()
            .layer(ScriptedProvider::new(vec![]).with_delay(Duration::from_millis(50)));

        let calls = (0..6).map(|i| {
            let p: &dyn Provider = if i % 2 == 0 { &a } else { &b };
            p.complete(CompletionRequest::new("m", vec![]))
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(limiter.peak(), 2);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn test_guard_releases_slot() {
        let limiter = ConcurrencyLimiter::new(1);
        let guard = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 1);
        assert_eq!(limiter.available(), 0);
        drop(guard);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn test_zero_ceiling_is_raised_to_one() {
        assert_eq!(ConcurrencyLimiter::new(0).max(), 1);
    }
}
