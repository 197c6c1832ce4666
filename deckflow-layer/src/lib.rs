//! # deckflow layers
//!
//! Built-in layers for deckflow providers.
//!
//! - `LoggingLayer`: logs every completion call with timing information
//! - `RetryLayer`: retries transient failures with exponential backoff
//! - `TimeoutLayer`: per-call deadline, expiry is a transient timeout
//! - `ConcurrencyLimitLayer`: shared ceiling on in-flight calls
//! - `CircuitBreakerLayer`: fails fast while an endpoint keeps failing
//! - `CancelLayer`: refuses calls once the owning job has been stopped
//!
//! ## Usage
//!
//! ```ignore
//! use deckflow_core::CompletionClient;
//! use deckflow_layer::{ConcurrencyLimiter, LoggingLayer, RetryLayer, TimeoutLayer};
//!
//! let limiter = ConcurrencyLimiter::new(5);
//! let client = CompletionClient::builder(provider, "gpt-4o-mini")
//!     .layer(TimeoutLayer::new(Duration::from_secs(180)))
//!     .layer(limiter.layer())
//!     .layer(RetryLayer::new().with_max_attempts(3))
//!     .layer(LoggingLayer::new())
//!     .finish();
//! ```

pub mod cancel;
pub mod circuit_breaker;
pub mod concurrency;
pub mod logging;
pub mod retry;
pub mod timeout;

// Re-exports
pub use cancel::CancelLayer;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerLayer, CircuitState};
pub use concurrency::{ConcurrencyLimitLayer, ConcurrencyLimiter, InFlightGuard};
pub use logging::LoggingLayer;
pub use retry::{RetryLayer, RetryPolicy};
pub use timeout::TimeoutLayer;

#[cfg(test)]
pub(crate) mod testing;
