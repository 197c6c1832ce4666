//! Logging layer for provider operations.

use deckflow_core::error::FlowError;
use deckflow_core::impl_layered_provider;
use deckflow_core::layer::{Layer, LayeredProvider};
use deckflow_core::provider::Provider;
use deckflow_core::types::*;
use async_trait::async_trait;
use std::fmt::Debug;
use tokio::time::Instant;

/// Logging layer that logs every completion call.
///
/// Successes are logged at debug, transient failures at warn and permanent
/// failures at error.
#[derive(Debug, Clone)]
pub struct LoggingLayer {
    prefix: String,
}

impl LoggingLayer {
    /// Create a new logging layer
    pub fn new() -> Self {
        Self {
            prefix: "[deckflow]".to_string(),
        }
    }

    /// Create a logging layer with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LoggingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Provider> Layer<P> for LoggingLayer {
    type LayeredProvider = LoggingProvider<P>;

    fn layer(&self, inner: P) -> Self::LayeredProvider {
        LoggingProvider {
            inner,
            prefix: self.prefix.clone(),
        }
    }
}

/// Provider wrapped with logging
#[derive(Debug)]
pub struct LoggingProvider<P> {
    inner: P,
    prefix: String,
}

#[async_trait]
impl<P: Provider> LayeredProvider for LoggingProvider<P> {
    type Inner = P;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_complete(
        &self,
        req: CompletionRequest,
    ) -> Result<CompletionResponse, FlowError> {
        let provider = self.inner.info().id.clone();
        tracing::debug!(
            prefix = %self.prefix,
            provider = %provider,
            model = %req.model,
            messages = req.messages.len(),
            "completion request"
        );

        let start = Instant::now();
        let result = self.inner.complete(req).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::debug!(
                    prefix = %self.prefix,
                    provider = %provider,
                    id = %response.id,
                    tokens = response.usage.total_tokens,
                    attempts = response.attempts,
                    ?elapsed,
                    "completion success"
                );
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    prefix = %self.prefix,
                    provider = %provider,
                    kind = e.kind(),
                    error = %e,
                    ?elapsed,
                    "completion failed (transient)"
                );
            }
            Err(e) => {
                tracing::error!(
                    prefix = %self.prefix,
                    provider = %provider,
                    kind = e.kind(),
                    error = %e,
                    ?elapsed,
                    "completion failed"
                );
            }
        }

        result
    }
}

impl_layered_provider!(<P: Provider> LoggingProvider<P>);
