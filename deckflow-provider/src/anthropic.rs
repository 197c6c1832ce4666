//! Anthropic messages API provider on plain reqwest.

use crate::status::{classify_status, parse_retry_after};
use deckflow_core::error::FlowError;
use deckflow_core::provider::Provider;
use deckflow_core::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic provider
#[derive(Clone)]
pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    info: Arc<ProviderInfo>,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("info", &self.info)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: String,
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Default output budget when a request does not set one
const DEFAULT_MAX_TOKENS: u32 = 4096;

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, FlowError> {
        Self::with_api_base(api_key, ANTHROPIC_API_BASE)
    }

    pub fn with_api_base(api_key: impl Into<String>, api_base: &str) -> Result<Self, FlowError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(FlowError::configuration("API key is required"));
        }
        let endpoint = api_base.trim().trim_end_matches('/');
        let endpoint = if endpoint.is_empty() {
            ANTHROPIC_API_BASE
        } else {
            endpoint
        };

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| FlowError::configuration(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            info: Arc::new(ProviderInfo {
                id: "anthropic".to_string(),
                name: "Anthropic".to_string(),
                endpoint: endpoint.to_string(),
            }),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.info.endpoint)
    }

    /// Translate a request into the messages API body.
    ///
    /// System messages are folded into the top-level `system` field.
    fn build_body<'a>(req: &'a CompletionRequest) -> MessagesRequest<'a> {
        let system: Vec<&str> = req
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let messages = req
            .messages
            .iter()
            .filter_map(|m| match m.role {
                Role::User => Some(WireMessage {
                    role: "user",
                    content: &m.content,
                }),
                Role::Assistant => Some(WireMessage {
                    role: "assistant",
                    content: &m.content,
                }),
                Role::System => None,
            })
            .collect();

        MessagesRequest {
            model: &req.model,
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages,
            temperature: req.temperature,
        }
    }

    fn parse_response(body: &str) -> Result<CompletionResponse, FlowError> {
        let parsed: MessagesResponse = serde_json::from_str(body)
            .map_err(|e| FlowError::unavailable(format!("malformed response body: {}", e)))?;

        let content: String = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let finish_reason = match parsed.stop_reason.as_deref() {
            None | Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            Some("refusal") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Other(other.to_string()),
        };

        let usage = parsed.usage.map_or(Usage::default(), |u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        let mut out = CompletionResponse::new(parsed.id, parsed.model, content);
        out.finish_reason = finish_reason;
        out.usage = usage;
        Ok(out)
    }

    fn parse_error(status: u16, body: &str, retry_after: Option<std::time::Duration>) -> FlowError {
        let (kind, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(env) => (env.error.kind, env.error.message),
            Err(_) => (String::new(), body.chars().take(500).collect()),
        };

        match kind.as_str() {
            "overloaded_error" | "api_error" => FlowError::unavailable(message),
            "rate_limit_error" => classify_status(429, message, retry_after),
            "authentication_error" | "permission_error" => FlowError::authentication(message),
            "invalid_request_error" | "not_found_error" | "request_too_large" => {
                FlowError::invalid_request(message)
            }
            _ => classify_status(status, message, retry_after),
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FlowError {
    if e.is_timeout() {
        FlowError::timeout(e.to_string())
    } else {
        FlowError::network(e.to_string())
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn info(&self) -> Arc<ProviderInfo> {
        self.info.clone()
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, FlowError> {
        let body = Self::build_body(&req);

        let response = self
            .http
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let text = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            return Err(Self::parse_error(status.as_u16(), &text, retry_after));
        }
        Self::parse_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_build_body_folds_system() {
        let req = CompletionRequest::new(
            "claude-3-5-haiku-latest",
            vec![Message::system("be terse"), Message::user("hi")],
        )
        .with_temperature(0.7);

        let body = serde_json::to_value(AnthropicProvider::build_body(&req)).unwrap();
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "id": "msg_01",
            "type": "message",
            "model": "claude-3-5-haiku-latest",
            "content": [{"type": "text", "text": "{\"title\": \"x\"}"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#;
        let resp = AnthropicProvider::parse_response(body).unwrap();
        assert_eq!(resp.content, "{\"title\": \"x\"}");
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert_eq!(resp.usage.total_tokens, 15);
    }

    #[test]
    fn test_parse_error_classification() {
        let overloaded = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert!(AnthropicProvider::parse_error(529, overloaded, None).is_retryable());

        let limited = r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow"}}"#;
        let err = AnthropicProvider::parse_error(429, limited, Some(Duration::from_secs(20)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(20)));

        let auth = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        assert!(matches!(
            AnthropicProvider::parse_error(401, auth, None),
            FlowError::Authentication(_)
        ));

        assert!(AnthropicProvider::parse_error(502, "<html>bad gateway</html>", None).is_retryable());
    }

    #[test]
    fn test_rejects_empty_key() {
        assert!(AnthropicProvider::new("").is_err());
        let p = AnthropicProvider::with_api_base("k", "https://gw.local/").unwrap();
        assert_eq!(p.messages_url(), "https://gw.local/v1/messages");
    }
}
