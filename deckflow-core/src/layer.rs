//! Layer trait and abstractions.
//!
//! Layers wrap a provider with a cross-cutting concern (logging, retry,
//! concurrency limits, timeouts, ...). A client's middleware chain is the
//! ordered stack of layers applied at construction time.

use crate::error::FlowError;
use crate::provider::Provider;
use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;

/// Layer trait for wrapping providers.
///
/// Each layer wraps an inner provider and returns a new provider with the
/// added behaviour.
pub trait Layer<P: Provider> {
    /// The type of the layered provider
    type LayeredProvider: Provider;

    /// Wrap the inner provider with this layer
    fn layer(&self, inner: P) -> Self::LayeredProvider;
}

/// Helper trait for layered providers.
///
/// Provides forwarding defaults so implementers only override the calls they
/// intercept.
#[async_trait]
pub trait LayeredProvider: Sized + Provider {
    /// The inner provider type
    type Inner: Provider;

    /// Get a reference to the inner provider
    fn inner(&self) -> &Self::Inner;

    /// Default implementation for info - forwards to inner
    fn layered_info(&self) -> Arc<ProviderInfo> {
        self.inner().info()
    }

    /// Default implementation for complete - forwards to inner
    async fn layered_complete(
        &self,
        req: CompletionRequest,
    ) -> Result<CompletionResponse, FlowError> {
        self.inner().complete(req).await
    }
}

/// Implement [`Provider`] for a type by forwarding to its
/// [`LayeredProvider`] methods.
///
/// Accepts a generic parameter list so it works for `Wrapper<P>`:
///
/// ```ignore
/// impl_layered_provider!(<P: Provider> LoggingProvider<P>);
/// ```
#[macro_export]
macro_rules! impl_layered_provider {
    (<$param:ident : $bound:path> $type:ty) => {
        #[async_trait::async_trait]
        impl<$param: $bound> $crate::provider::Provider for $type {
            fn info(&self) -> std::sync::Arc<$crate::types::ProviderInfo> {
                $crate::layer::LayeredProvider::layered_info(self)
            }

            async fn complete(
                &self,
                req: $crate::types::CompletionRequest,
            ) -> Result<$crate::types::CompletionResponse, $crate::error::FlowError> {
                $crate::layer::LayeredProvider::layered_complete(self, req).await
            }
        }
    };
    ($type:ty) => {
        #[async_trait::async_trait]
        impl $crate::provider::Provider for $type {
            fn info(&self) -> std::sync::Arc<$crate::types::ProviderInfo> {
                $crate::layer::LayeredProvider::layered_info(self)
            }

            async fn complete(
                &self,
                req: $crate::types::CompletionRequest,
            ) -> Result<$crate::types::CompletionResponse, $crate::error::FlowError> {
                $crate::layer::LayeredProvider::layered_complete(self, req).await
            }
        }
    };
}
