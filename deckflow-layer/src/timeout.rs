//! Per-call deadline.

use deckflow_core::error::FlowError;
use deckflow_core::impl_layered_provider;
use deckflow_core::layer::{Layer, LayeredProvider};
use deckflow_core::provider::Provider;
use deckflow_core::types::*;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

/// Fails a call with a transient [`FlowError::Timeout`] once `timeout` passes.
#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<P: Provider> Layer<P> for TimeoutLayer {
    type LayeredProvider = TimeoutProvider<P>;

    fn layer(&self, inner: P) -> Self::LayeredProvider {
        TimeoutProvider {
            inner,
            timeout: self.timeout,
        }
    }
}

/// Provider wrapped with a call deadline
#[derive(Debug)]
pub struct TimeoutProvider<P> {
    inner: P,
    timeout: Duration,
}

#[async_trait]
impl<P: Provider> LayeredProvider for TimeoutProvider<P> {
    type Inner = P;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_complete(
        &self,
        req: CompletionRequest,
    ) -> Result<CompletionResponse, FlowError> {
        match tokio::time::timeout(self.timeout, self.inner.complete(req)).await {
            Ok(result) => result,
            Err(_) => Err(FlowError::timeout(format!(
                "no response from {} within {:?}",
                self.inner.info().id,
                self.timeout
            ))),
        }
    }
}

impl_layered_provider!(<P: Provider> TimeoutProvider<P>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let inner = ScriptedProvider::new(vec![]).with_delay(Duration::from_secs(10));
        let provider = TimeoutLayer::new(Duration::from_secs(1)).layer(inner);

        let err = provider.complete(CompletionRequest::new("m", vec![])).await.unwrap_err();
        assert!(matches!(err, FlowError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_passes() {
        let inner = ScriptedProvider::new(vec![Ok("quick")]).with_delay(Duration::from_millis(5));
        let provider = TimeoutLayer::new(Duration::from_secs(1)).layer(inner);

        let ok = provider.complete(CompletionRequest::new("m", vec![])).await.unwrap();
        assert_eq!(ok.content, "quick");
    }
}
