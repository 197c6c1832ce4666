//! Error types for deckflow operations.

use crate::credentials::Secret;
use std::time::Duration;

/// The main error type shared by the gateway, scheduler and providers.
///
/// Provider failures are split into transient and permanent conditions;
/// [`FlowError::is_retryable`] is the single place that decides which is which.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    /// Connection-level failure talking to the provider
    #[error("Network error: {0}")]
    Network(String),

    /// The per-call deadline expired
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// The provider asked us to slow down
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Upstream overloaded or returned a server error
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Bad or missing credentials
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The request was malformed or referenced something unknown
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The provider refused to produce content for this prompt
    #[error("Content rejected: {0}")]
    ContentRejected(String),

    /// Any other non-retryable provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// A transient failure that kept failing until the attempt budget ran out
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FlowError> },

    /// The endpoint's circuit breaker is open
    #[error("Circuit open for {0}")]
    CircuitOpen(String),

    /// Cache tier failure (never surfaced by the cache itself)
    #[error("Cache error: {0}")]
    Cache(String),

    /// Submission rejected because the pending queue is full
    #[error("Overloaded: {depth} jobs pending (capacity {capacity})")]
    Overloaded { depth: usize, capacity: usize },

    /// The job spec failed validation
    #[error("Invalid job spec: {0}")]
    InvalidSpec(String),

    /// Unknown or purged job
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Work discarded because its job was cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Layer errors
    #[error("Layer error ({layer}): {message}")]
    Layer { layer: String, message: String },

    /// Generic errors
    #[error("Error: {0}")]
    Other(String),
}

impl FlowError {
    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a rate limit error without a retry hint
    pub fn rate_limit(msg: impl Into<String>) -> Self {
        Self::RateLimit {
            message: msg.into(),
            retry_after: None,
        }
    }

    /// Create a rate limit error carrying the provider's retry hint
    pub fn rate_limit_after(msg: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimit {
            message: msg.into(),
            retry_after: Some(retry_after),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a content rejected error
    pub fn content_rejected(msg: impl Into<String>) -> Self {
        Self::ContentRejected(msg.into())
    }

    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create an invalid spec error
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a cancelled error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a layer error
    pub fn layer(layer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Layer {
            layer: layer.into(),
            message: message.into(),
        }
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this is a retryable (transient) error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowError::Network(_)
                | FlowError::Timeout(_)
                | FlowError::RateLimit { .. }
                | FlowError::Unavailable(_)
        )
    }

    /// Provider-suggested minimum wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FlowError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Network(_) => "network",
            FlowError::Timeout(_) => "timeout",
            FlowError::RateLimit { .. } => "rate_limit",
            FlowError::Unavailable(_) => "unavailable",
            FlowError::Authentication(_) => "authentication",
            FlowError::InvalidRequest(_) => "invalid_request",
            FlowError::ContentRejected(_) => "content_rejected",
            FlowError::Provider(_) => "provider",
            FlowError::RetriesExhausted { .. } => "retries_exhausted",
            FlowError::CircuitOpen(_) => "circuit_open",
            FlowError::Cache(_) => "cache",
            FlowError::Overloaded { .. } => "overloaded",
            FlowError::InvalidSpec(_) => "invalid_spec",
            FlowError::NotFound(_) => "not_found",
            FlowError::Cancelled(_) => "cancelled",
            FlowError::Serialization(_) => "serialization",
            FlowError::Configuration(_) => "configuration",
            FlowError::Layer { .. } => "layer",
            FlowError::Other(_) => "other",
        }
    }

    /// Return a copy of this error with every occurrence of `secret` masked.
    ///
    /// Provider messages sometimes echo the key back (e.g. "Incorrect API key
    /// provided: sk-..."), so anything user-visible goes through here first.
    pub fn masked(&self, secret: &Secret) -> Self {
        let m = |s: &str| secret.redact(s);
        match self {
            FlowError::Network(s) => FlowError::Network(m(s)),
            FlowError::Timeout(s) => FlowError::Timeout(m(s)),
            FlowError::RateLimit {
                message,
                retry_after,
            } => FlowError::RateLimit {
                message: m(message),
                retry_after: *retry_after,
            },
            FlowError::Unavailable(s) => FlowError::Unavailable(m(s)),
            FlowError::Authentication(s) => FlowError::Authentication(m(s)),
            FlowError::InvalidRequest(s) => FlowError::InvalidRequest(m(s)),
            FlowError::ContentRejected(s) => FlowError::ContentRejected(m(s)),
            FlowError::Provider(s) => FlowError::Provider(m(s)),
            FlowError::RetriesExhausted { attempts, last } => FlowError::RetriesExhausted {
                attempts: *attempts,
                last: Box::new(last.masked(secret)),
            },
            FlowError::CircuitOpen(s) => FlowError::CircuitOpen(m(s)),
            FlowError::Cache(s) => FlowError::Cache(m(s)),
            FlowError::Serialization(s) => FlowError::Serialization(m(s)),
            FlowError::Configuration(s) => FlowError::Configuration(m(s)),
            FlowError::Layer { layer, message } => FlowError::Layer {
                layer: layer.clone(),
                message: m(message),
            },
            FlowError::Other(s) => FlowError::Other(m(s)),
            other => other.clone(),
        }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<String> for FlowError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for FlowError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}
