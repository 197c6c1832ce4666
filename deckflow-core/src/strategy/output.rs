//! Output strategies for different providers.
//!
//! - JsonModeStrategy: system + user messages, JSON object response format
//!   (OpenAI, DeepSeek)
//! - SystemPromptStrategy: system + user messages, no response format
//!   (Anthropic messages API)
//! - CombinedPromptStrategy: one user message with the system text folded in,
//!   no response format (Claude models behind OpenAI-compatible proxies, which
//!   tend to reject both system messages and `response_format`)

use crate::prompt::Prompt;
use crate::types::{CompletionRequest, Message, ResponseFormat};

/// Strategy for turning a [`Prompt`] into request messages.
pub trait OutputStrategy: Send + Sync {
    /// Get the strategy name for debugging
    fn name(&self) -> &str;

    /// Fill `req.messages` and `req.response_format` from `prompt`.
    fn apply(&self, req: &mut CompletionRequest, prompt: &Prompt);
}

fn push_system_and_user(req: &mut CompletionRequest, prompt: &Prompt) {
    if !prompt.system.is_empty() {
        req.messages.push(Message::system(prompt.system.clone()));
    }
    req.messages.push(Message::user(prompt.user.clone()));
}

/// JSON object mode with a separate system message.
#[derive(Debug, Clone, Default)]
pub struct JsonModeStrategy;

impl OutputStrategy for JsonModeStrategy {
    fn name(&self) -> &str {
        "JsonModeStrategy"
    }

    fn apply(&self, req: &mut CompletionRequest, prompt: &Prompt) {
        push_system_and_user(req, prompt);
        req.response_format = Some(ResponseFormat::JsonObject);
    }
}

/// Separate system message, provider has no JSON mode.
#[derive(Debug, Clone, Default)]
pub struct SystemPromptStrategy;

impl OutputStrategy for SystemPromptStrategy {
    fn name(&self) -> &str {
        "SystemPromptStrategy"
    }

    fn apply(&self, req: &mut CompletionRequest, prompt: &Prompt) {
        push_system_and_user(req, prompt);
        req.response_format = None;
    }
}

/// Single user message carrying both parts.
#[derive(Debug, Clone, Default)]
pub struct CombinedPromptStrategy;

impl OutputStrategy for CombinedPromptStrategy {
    fn name(&self) -> &str {
        "CombinedPromptStrategy"
    }

    fn apply(&self, req: &mut CompletionRequest, prompt: &Prompt) {
        let text = if prompt.system.is_empty() {
            prompt.user.clone()
        } else {
            format!("{}\n\n{}", prompt.system, prompt.user)
        };
        req.messages.push(Message::user(text));
        req.response_format = None;
    }
}

/// Pick the strategy for a provider id and model name.
pub fn detect_output_strategy(provider_id: &str, model: &str) -> Box<dyn OutputStrategy> {
    match provider_id {
        "anthropic" => Box::new(SystemPromptStrategy),
        _ if model.to_lowercase().contains("claude") => Box::new(CombinedPromptStrategy),
        _ => Box::new(JsonModeStrategy),
    }
}
