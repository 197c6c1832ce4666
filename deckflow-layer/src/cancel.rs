//! Job cancellation gate.

use deckflow_core::error::FlowError;
use deckflow_core::impl_layered_provider;
use deckflow_core::layer::{Layer, LayeredProvider};
use deckflow_core::provider::Provider;
use deckflow_core::types::*;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Fails calls with [`FlowError::Cancelled`] once `token` is cancelled.
///
/// Sits just inside the concurrency limiter, so a call that queued for a
/// slot before its job was stopped never reaches the provider. Calls that
/// already passed the gate run to completion.
#[derive(Debug, Clone)]
pub struct CancelLayer {
    token: CancellationToken,
}

impl CancelLayer {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl<P: Provider> Layer<P> for CancelLayer {
    type LayeredProvider = CancelProvider<P>;

    fn layer(&self, inner: P) -> Self::LayeredProvider {
        CancelProvider {
            inner,
            token: self.token.clone(),
        }
    }
}

#[derive(Debug)]
pub struct CancelProvider<P> {
    inner: P,
    token: CancellationToken,
}

#[async_trait]
impl<P: Provider> LayeredProvider for CancelProvider<P> {
    type Inner = P;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_complete(
        &self,
        req: CompletionRequest,
    ) -> Result<CompletionResponse, FlowError> {
        if self.token.is_cancelled() {
            return Err(FlowError::cancelled("job stopped before dispatch"));
        }
        self.inner.complete(req).await
    }
}

impl_layered_provider!(<P: Provider> CancelProvider<P>);
