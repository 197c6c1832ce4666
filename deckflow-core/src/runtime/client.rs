//! CompletionClient implementation.

use crate::error::FlowError;
use crate::layer::Layer;
use crate::prompt::Prompt;
use crate::provider::Provider;
use crate::strategy::{detect_output_strategy, OutputStrategy};
use crate::types::*;
use std::fmt;
use std::sync::Arc;

/// Type-erased provider that can be shared across threads
type BoxedProvider = Arc<dyn Provider>;

/// Builder for composing a provider with layers.
///
/// Each call to [`layer`](Self::layer) wraps the current provider, so the
/// last layer added is the outermost one.
///
/// # Example
///
/// ```ignore
/// let client = CompletionClient::builder(provider, "gpt-4o-mini")
///     .layer(TimeoutLayer::new(Duration::from_secs(180)))
///     .layer(RetryLayer::new())
///     .layer(LoggingLayer::new())
///     .finish();
/// ```
pub struct CompletionClientBuilder<P> {
    provider: P,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    strategy: Option<Box<dyn OutputStrategy>>,
}

impl<P: Provider> CompletionClientBuilder<P> {
    /// Create a new builder with a provider
    pub fn new(provider: P, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
            max_tokens: None,
            strategy: None,
        }
    }

    /// Add a layer to wrap the provider
    pub fn layer<L>(self, layer: L) -> CompletionClientBuilder<L::LayeredProvider>
    where
        L: Layer<P>,
    {
        CompletionClientBuilder {
            provider: layer.layer(self.provider),
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            strategy: self.strategy,
        }
    }

    /// Set sampling temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens per completion
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set a custom output strategy
    ///
    /// If not set, the strategy is detected from the provider id and model.
    pub fn strategy(mut self, strategy: Box<dyn OutputStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Finish building and create a CompletionClient
    pub fn finish(self) -> CompletionClient {
        let provider = Arc::new(self.provider);
        let provider_id = provider.info().id.clone();

        let strategy = self
            .strategy
            .unwrap_or_else(|| detect_output_strategy(&provider_id, &self.model));

        CompletionClient {
            provider,
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            strategy: Arc::from(strategy),
        }
    }
}

/// Generated text plus call metadata
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: Usage,
    pub attempts: u32,
}

/// A ready-to-use completion client for one job.
///
/// Cheap to clone; clones share the provider stack.
#[derive(Clone)]
pub struct CompletionClient {
    provider: BoxedProvider,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    strategy: Arc<dyn OutputStrategy>,
}

impl fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionClient")
            .field("provider", &self.provider.info().id)
            .field("model", &self.model)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

impl CompletionClient {
    /// Create a new builder
    pub fn builder<P: Provider>(provider: P, model: impl Into<String>) -> CompletionClientBuilder<P> {
        CompletionClientBuilder::new(provider, model)
    }

    /// Get provider information
    pub fn info(&self) -> Arc<ProviderInfo> {
        self.provider.info()
    }

    /// Model this client requests
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the request a prompt turns into
    pub fn request_for(&self, prompt: &Prompt) -> CompletionRequest {
        let mut req = CompletionRequest::new(self.model.clone(), Vec::with_capacity(2));
        req.temperature = self.temperature;
        req.max_tokens = self.max_tokens;
        self.strategy.apply(&mut req, prompt);
        req
    }

    /// Run one prompt through the provider stack and return the text.
    ///
    /// An empty completion is reported as a transient provider failure so
    /// the retry policy gets another go at it.
    pub async fn dispatch(&self, prompt: &Prompt) -> Result<Completion, FlowError> {
        let response = self.provider.complete(self.request_for(prompt)).await?;

        if response.content.trim().is_empty() {
            return Err(FlowError::unavailable("provider returned empty content"));
        }
        if response.finish_reason == FinishReason::ContentFilter {
            return Err(FlowError::content_rejected(
                "completion stopped by the provider's content filter",
            ));
        }

        Ok(Completion {
            text: response.content,
            model: response.model,
            usage: response.usage,
            attempts: response.attempts,
        })
    }
}
