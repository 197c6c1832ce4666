//! OpenAI provider implementation using async-openai crate.
//!
//! Also serves every OpenAI-compatible endpoint (DeepSeek, self-hosted
//! proxies) through [`OpenAiBuilder::api_base`].

use crate::status::classify_status;
use deckflow_core::error::FlowError;
use deckflow_core::provider::Provider;
use deckflow_core::types::*;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    ResponseFormat as OpenAIResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;
use std::sync::Arc;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI provider using async-openai
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    info: Arc<ProviderInfo>,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("info", &self.info)
            .finish()
    }
}

impl OpenAiProvider {
    /// Create a new OpenAI provider with default configuration
    pub fn new(api_key: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);

        Self {
            client: Client::with_config(config),
            info: Arc::new(ProviderInfo {
                id: "openai".to_string(),
                name: "OpenAI".to_string(),
                endpoint: OPENAI_API_BASE.to_string(),
            }),
        }
    }

    /// Create a builder for more configuration options
    pub fn builder() -> OpenAiBuilder {
        OpenAiBuilder::default()
    }

    /// Convert our Message type to OpenAI's ChatCompletionRequestMessage
    fn convert_message(msg: &Message) -> Result<ChatCompletionRequestMessage, FlowError> {
        let content = msg.content.clone();

        match msg.role {
            Role::System => {
                let msg = ChatCompletionRequestSystemMessageArgs::default()
                    .content(content)
                    .build()
                    .map_err(|e| {
                        FlowError::invalid_request(format!("Failed to build system message: {}", e))
                    })?;
                Ok(ChatCompletionRequestMessage::System(msg))
            }
            Role::User => {
                let msg = ChatCompletionRequestUserMessageArgs::default()
                    .content(content)
                    .build()
                    .map_err(|e| {
                        FlowError::invalid_request(format!("Failed to build user message: {}", e))
                    })?;
                Ok(ChatCompletionRequestMessage::User(msg))
            }
            Role::Assistant => {
                let msg = ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content)
                    .build()
                    .map_err(|e| {
                        FlowError::invalid_request(format!(
                            "Failed to build assistant message: {}",
                            e
                        ))
                    })?;
                Ok(ChatCompletionRequestMessage::Assistant(msg))
            }
        }
    }

    /// Build CreateChatCompletionRequest from our CompletionRequest
    fn build_request(&self, req: &CompletionRequest) -> Result<CreateChatCompletionRequest, FlowError> {
        let messages: Result<Vec<_>, _> = req.messages.iter().map(Self::convert_message).collect();

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&req.model).messages(messages?);

        if let Some(max_tokens) = req.max_tokens {
            builder.max_tokens(max_tokens);
        }
        if let Some(temperature) = req.temperature {
            builder.temperature(temperature);
        }
        match req.response_format {
            Some(ResponseFormat::JsonObject) => {
                builder.response_format(OpenAIResponseFormat::JsonObject);
            }
            Some(ResponseFormat::Text) => {
                builder.response_format(OpenAIResponseFormat::Text);
            }
            None => {}
        }

        builder
            .build()
            .map_err(|e| FlowError::invalid_request(format!("Failed to build request: {}", e)))
    }

    /// Convert OpenAI response to our CompletionResponse
    fn convert_response(
        response: async_openai::types::CreateChatCompletionResponse,
    ) -> Result<CompletionResponse, FlowError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| FlowError::unavailable("response contained no choices"))?;

        let finish_reason = choice.finish_reason.map_or(FinishReason::Stop, |r| match r {
            async_openai::types::FinishReason::Stop => FinishReason::Stop,
            async_openai::types::FinishReason::Length => FinishReason::Length,
            async_openai::types::FinishReason::ContentFilter => FinishReason::ContentFilter,
            other => FinishReason::Other(format!("{:?}", other).to_lowercase()),
        });

        let usage = response.usage.map_or(Usage::default(), |u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        let mut out = CompletionResponse::new(
            response.id,
            response.model,
            choice.message.content.unwrap_or_default(),
        );
        out.finish_reason = finish_reason;
        out.usage = usage;
        Ok(out)
    }
}

/// Classify an OpenAI API error body by its `type`/`code` fields and message.
pub fn classify_api_error(message: &str, kind: Option<&str>, code: Option<&str>) -> FlowError {
    let lower = message.to_lowercase();
    let tag = |t: &str| kind == Some(t) || code == Some(t);

    if tag("insufficient_quota") {
        FlowError::provider(format!("quota exhausted: {}", message))
    } else if tag("rate_limit_exceeded") || tag("rate_limit_error") || lower.contains("rate limit") {
        FlowError::rate_limit(message)
    } else if tag("invalid_api_key")
        || tag("authentication_error")
        || lower.contains("incorrect api key")
        || lower.contains("unauthorized")
    {
        FlowError::authentication(message)
    } else if tag("content_filter") || tag("content_policy_violation") {
        FlowError::content_rejected(message)
    } else if tag("server_error") || tag("service_unavailable") || lower.contains("overloaded") {
        FlowError::unavailable(message)
    } else if tag("invalid_request_error") || tag("model_not_found") || tag("context_length_exceeded") {
        FlowError::invalid_request(message)
    } else {
        FlowError::provider(message)
    }
}

fn map_openai_error(err: OpenAIError) -> FlowError {
    match err {
        OpenAIError::ApiError(api) => {
            classify_api_error(&api.message, api.r#type.as_deref(), api.code.as_deref())
        }
        OpenAIError::Reqwest(e) => {
            if e.is_timeout() {
                FlowError::timeout(e.to_string())
            } else if let Some(status) = e.status() {
                classify_status(status.as_u16(), e.to_string(), None)
            } else {
                FlowError::network(e.to_string())
            }
        }
        OpenAIError::JSONDeserialize(e, _) => {
            FlowError::unavailable(format!("malformed response body: {}", e))
        }
        OpenAIError::InvalidArgument(msg) => FlowError::invalid_request(msg),
        other => FlowError::provider(format!("OpenAI API error: {}", other)),
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn info(&self) -> Arc<ProviderInfo> {
        self.info.clone()
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, FlowError> {
        let openai_req = self.build_request(&req)?;

        let response = self
            .client
            .chat()
            .create(openai_req)
            .await
            .map_err(map_openai_error)?;

        Self::convert_response(response)
    }
}

/// Builder for OpenAI provider with custom configuration
#[derive(Default)]
pub struct OpenAiBuilder {
    api_key: Option<String>,
    api_base: Option<String>,
    org_id: Option<String>,
}

impl OpenAiBuilder {
    /// Set API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set API base URL (for OpenAI-compatible APIs like DeepSeek)
    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    /// Set organization ID
    pub fn organization(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Build the provider
    pub fn build(self) -> Result<OpenAiProvider, FlowError> {
        self.build_with_id("openai", "OpenAI")
    }

    /// Build a provider with a custom provider ID and name
    ///
    /// This is useful for OpenAI-compatible APIs like DeepSeek that use
    /// the same protocol but different endpoints.
    pub fn build_with_id(
        self,
        provider_id: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Result<OpenAiProvider, FlowError> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| FlowError::configuration("API key is required"))?;

        let endpoint = self
            .api_base
            .as_deref()
            .map(|b| b.trim().trim_end_matches('/').to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| OPENAI_API_BASE.to_string());

        let mut config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(endpoint.clone());

        if let Some(org_id) = self.org_id {
            config = config.with_org_id(org_id);
        }

        Ok(OpenAiProvider {
            client: Client::with_config(config),
            info: Arc::new(ProviderInfo {
                id: provider_id.into(),
                name: provider_name.into(),
                endpoint,
            }),
        })
    }
}
