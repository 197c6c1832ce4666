//! # deckflow providers
//!
//! Provider implementations for the supported completion services, and the
//! factory the gateway uses to build one from a [`ProviderSpec`].

pub mod anthropic;
pub mod openai;
pub mod status;

// Re-exports
pub use anthropic::AnthropicProvider;
pub use openai::{OpenAiBuilder, OpenAiProvider};

use async_trait::async_trait;
use deckflow_core::credentials::Secret;
use deckflow_core::error::FlowError;
use deckflow_core::provider::{Provider, ProviderFactory};
use deckflow_core::types::*;
use std::sync::Arc;

pub const DEEPSEEK_API_BASE: &str = "https://api.deepseek.com/v1";

/// Create a DeepSeek provider (OpenAI-compatible)
///
/// DeepSeek uses the OpenAI API protocol but with a different endpoint.
///
/// # Example
///
/// ```ignore
/// use deckflow_provider::deepseek;
///
/// let provider = deepseek("your-api-key")?;
/// ```
pub fn deepseek(api_key: impl Into<String>) -> Result<OpenAiProvider, FlowError> {
    OpenAiProvider::builder()
        .api_key(api_key)
        .api_base(DEEPSEEK_API_BASE)
        .build_with_id("deepseek", "DeepSeek")
}

/// One variant per provider family, fixed when the job is configured.
#[derive(Debug, Clone)]
pub enum AnyProvider {
    OpenAi(OpenAiProvider),
    DeepSeek(OpenAiProvider),
    Anthropic(AnthropicProvider),
}

impl AnyProvider {
    /// Build the provider a spec asks for
    pub fn from_spec(spec: &ProviderSpec, credential: &Secret) -> Result<Self, FlowError> {
        let key = credential.expose().to_string();
        let provider = match spec.kind {
            ProviderKind::OpenAi => {
                let mut builder = OpenAiProvider::builder().api_key(key);
                if let Some(base) = &spec.api_base {
                    builder = builder.api_base(base.clone());
                }
                AnyProvider::OpenAi(builder.build()?)
            }
            ProviderKind::DeepSeek => {
                let base = spec.api_base.as_deref().unwrap_or(DEEPSEEK_API_BASE);
                AnyProvider::DeepSeek(
                    OpenAiProvider::builder()
                        .api_key(key)
                        .api_base(base)
                        .build_with_id("deepseek", "DeepSeek")?,
                )
            }
            ProviderKind::Anthropic => {
                let base = spec.api_base.as_deref().unwrap_or(anthropic::ANTHROPIC_API_BASE);
                AnyProvider::Anthropic(AnthropicProvider::with_api_base(key, base)?)
            }
        };
        Ok(provider)
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            AnyProvider::OpenAi(_) => ProviderKind::OpenAi,
            AnyProvider::DeepSeek(_) => ProviderKind::DeepSeek,
            AnyProvider::Anthropic(_) => ProviderKind::Anthropic,
        }
    }
}

#[async_trait]
impl Provider for AnyProvider {
    fn info(&self) -> Arc<ProviderInfo> {
        match self {
            AnyProvider::OpenAi(p) | AnyProvider::DeepSeek(p) => p.info(),
            AnyProvider::Anthropic(p) => p.info(),
        }
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, FlowError> {
        match self {
            AnyProvider::OpenAi(p) | AnyProvider::DeepSeek(p) => p.complete(req).await,
            AnyProvider::Anthropic(p) => p.complete(req).await,
        }
    }
}

/// Factory for the provider families shipped with deckflow
#[derive(Debug, Clone, Default)]
pub struct BuiltinProviderFactory;

impl ProviderFactory for BuiltinProviderFactory {
    fn create(&self, spec: &ProviderSpec, credential: &Secret) -> Result<Arc<dyn Provider>, FlowError> {
        if credential.is_empty() {
            return Err(FlowError::authentication(format!(
                "no API key for {} provider",
                spec.kind
            )));
        }
        let provider = AnyProvider::from_spec(spec, credential)?;
        tracing::debug!(
            provider = %provider.kind(),
            endpoint = %provider.info().endpoint,
            model = %spec.model,
            "provider created"
        );
        Ok(Arc::new(provider))
    }
}
