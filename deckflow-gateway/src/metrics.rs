//! Gateway call accounting.

use deckflow_core::error::FlowError;
use deckflow_core::impl_layered_provider;
use deckflow_core::layer::{Layer, LayeredProvider};
use deckflow_core::provider::Provider;
use deckflow_core::types::*;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct CallCounters {
    dispatched: AtomicU64,
    failures: AtomicU64,
}

impl CallCounters {
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Outermost layer of every gateway client: counts logical calls and the
/// ones that finally failed.
#[derive(Debug, Clone)]
pub(crate) struct MeterLayer {
    counters: Arc<CallCounters>,
}

impl MeterLayer {
    pub fn new(counters: Arc<CallCounters>) -> Self {
        Self { counters }
    }
}

impl<P: Provider> Layer<P> for MeterLayer {
    type LayeredProvider = MeteredProvider<P>;

    fn layer(&self, inner: P) -> Self::LayeredProvider {
        MeteredProvider {
            inner,
            counters: self.counters.clone(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct MeteredProvider<P> {
    inner: P,
    counters: Arc<CallCounters>,
}

#[async_trait]
impl<P: Provider> LayeredProvider for MeteredProvider<P> {
    type Inner = P;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_complete(
        &self,
        req: CompletionRequest,
    ) -> Result<CompletionResponse, FlowError> {
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        let result = self.inner.complete(req).await;
        if result.is_err() {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

impl_layered_provider!(<P: Provider> MeteredProvider<P>);

/// Point-in-time gateway metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayMetrics {
    pub max_concurrency: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub dispatched: u64,
    pub failures: u64,
    pub open_circuits: usize,
}
