//! Provider trait and core abstractions.

use crate::credentials::Secret;
use crate::error::FlowError;
use crate::types::*;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Core provider trait for completion services.
///
/// Every provider family implements this single capability; retry, timeouts,
/// concurrency limits and logging are layered around it (see
/// [`Layer`](crate::Layer)).
#[async_trait]
pub trait Provider: Send + Sync + Debug + 'static {
    /// Get provider information
    fn info(&self) -> Arc<ProviderInfo>;

    /// Perform one completion call.
    ///
    /// Errors must be classified: transient conditions map to
    /// retryable [`FlowError`] variants, everything else to permanent ones.
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, FlowError>;
}

#[async_trait]
impl<T: Provider + ?Sized> Provider for Arc<T> {
    fn info(&self) -> Arc<ProviderInfo> {
        (**self).info()
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, FlowError> {
        (**self).complete(req).await
    }
}

/// Builds the concrete provider for a job.
///
/// Selection happens once, when the job's client is assembled, never per call.
pub trait ProviderFactory: Send + Sync + 'static {
    fn create(&self, spec: &ProviderSpec, credential: &Secret)
        -> Result<Arc<dyn Provider>, FlowError>;
}
