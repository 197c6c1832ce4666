//! Circuit breaker for a provider endpoint.
//!
//! Closed: calls pass through and consecutive transient failures are counted.
//! Open: calls fail fast with [`FlowError::CircuitOpen`] until the cool-down
//! elapses. Half-open: calls are let through as trial calls; enough successes
//! close the circuit again, any transient failure re-opens it.
//!
//! Permanent errors (bad key, malformed request) say nothing about endpoint
//! health and leave the breaker untouched.

use deckflow_core::error::FlowError;
use deckflow_core::impl_layered_provider;
use deckflow_core::layer::{Layer, LayeredProvider};
use deckflow_core::provider::Provider;
use deckflow_core::types::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// How long the circuit stays open before probing
    pub open_for: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_for: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    rejected: u64,
}

/// Breaker shared by every client talking to one endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                rejected: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, moving open to half-open once the cool-down is over
    pub fn state(&self) -> CircuitState {
        let mut st = self.state.lock();
        self.refresh(&mut st);
        st.state
    }

    /// Calls refused while open
    pub fn rejected(&self) -> u64 {
        self.state.lock().rejected
    }

    fn refresh(&self, st: &mut BreakerState) {
        if st.state == CircuitState::Open {
            let cooled = st
                .opened_at
                .map(|at| at.elapsed() >= self.config.open_for)
                .unwrap_or(true);
            if cooled {
                st.state = CircuitState::HalfOpen;
                st.consecutive_successes = 0;
                tracing::info!(breaker = %self.name, "circuit half-open, probing");
            }
        }
    }

    /// Admit a call or refuse it with [`FlowError::CircuitOpen`]
    pub fn try_acquire(&self) -> Result<(), FlowError> {
        let mut st = self.state.lock();
        self.refresh(&mut st);
        if st.state == CircuitState::Open {
            st.rejected += 1;
            return Err(FlowError::CircuitOpen(format!(
                "circuit for {} is open",
                self.name
            )));
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut st = self.state.lock();
        st.consecutive_failures = 0;
        if st.state == CircuitState::HalfOpen {
            st.consecutive_successes += 1;
            if st.consecutive_successes >= self.config.success_threshold {
                st.state = CircuitState::Closed;
                st.opened_at = None;
                tracing::info!(breaker = %self.name, "circuit closed");
            }
        }
    }

    /// Count a failure. Only transient errors move the breaker.
    pub fn record_failure(&self, error: &FlowError) {
        if !error.is_retryable() {
            return;
        }
        let mut st = self.state.lock();
        st.consecutive_successes = 0;
        st.consecutive_failures += 1;

        let trip = match st.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => st.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            st.state = CircuitState::Open;
            st.opened_at = Some(Instant::now());
            tracing::warn!(
                breaker = %self.name,
                failures = st.consecutive_failures,
                open_for = ?self.config.open_for,
                "circuit opened"
            );
        }
    }

    pub fn reset(&self) {
        let mut st = self.state.lock();
        st.state = CircuitState::Closed;
        st.consecutive_failures = 0;
        st.consecutive_successes = 0;
        st.opened_at = None;
    }
}

/// Layer guarding calls with a shared [`CircuitBreaker`]
#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerLayer {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

impl<P: Provider> Layer<P> for CircuitBreakerLayer {
    type LayeredProvider = BreakerProvider<P>;

    fn layer(&self, inner: P) -> Self::LayeredProvider {
        BreakerProvider {
            inner,
            breaker: self.breaker.clone(),
        }
    }
}

#[derive(Debug)]
pub struct BreakerProvider<P> {
    inner: P,
    breaker: Arc<CircuitBreaker>,
}

#[async_trait]
impl<P: Provider> LayeredProvider for BreakerProvider<P> {
    type Inner = P;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_complete(
        &self,
        req: CompletionRequest,
    ) -> Result<CompletionResponse, FlowError> {
        self.breaker.try_acquire()?;
        let result = self.inner.complete(req).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(e) => self.breaker.record_failure(e),
        }
        result
    }
}

impl_layered_provider!(<P: Provider> BreakerProvider<P>);
