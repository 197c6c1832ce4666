//! Retry layer with exponential backoff.

use deckflow_core::error::FlowError;
use deckflow_core::impl_layered_provider;
use deckflow_core::layer::{Layer, LayeredProvider};
use deckflow_core::provider::Provider;
use deckflow_core::types::*;
use async_trait::async_trait;
use rand::Rng;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

/// Backoff policy for transient failures.
///
/// `max_attempts` counts the first try, so a policy of 3 makes at most two
/// retries. Only errors whose [`FlowError::is_retryable`] is true are retried;
/// anything else is returned as-is after the attempt that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter: bool,
}

impl RetryPolicy {
    /// Create a new policy with default settings
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Set the total number of attempts, first try included
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Randomise each delay to 50-150% of its nominal value
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Nominal delay before retry number `retry` (0-based)
    fn base_delay(&self, retry: u32) -> Duration {
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(retry as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }

    /// Delay before retry number `retry`, honouring a server-supplied
    /// retry-after hint when it is longer.
    pub fn delay_for(&self, retry: u32, error: &FlowError) -> Duration {
        let mut delay = self.base_delay(retry);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            delay = delay.mul_f64(factor).min(self.max_delay);
        }
        match error.retry_after() {
            Some(hint) if hint > delay => hint,
            _ => delay,
        }
    }

    /// Run `operation` under this policy.
    ///
    /// Returns the value with the number of attempts it took. When every
    /// attempt failed transiently the last error is wrapped in
    /// [`FlowError::RetriesExhausted`].
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<(T, u32), FlowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FlowError>>,
    {
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(FlowError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt - 1, &e);
                    tracing::debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        kind = e.kind(),
                        ?delay,
                        "retrying after transient failure"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Layer applying a [`RetryPolicy`] to every completion call
#[derive(Debug, Clone, Default)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

impl RetryLayer {
    /// Create a new retry layer with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Set the total number of attempts, first try included
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy = self.policy.with_max_attempts(max_attempts);
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.policy = self.policy.with_initial_delay(initial_delay);
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.policy = self.policy.with_max_delay(max_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.policy = self.policy.with_jitter(jitter);
        self
    }
}

impl<P: Provider> Layer<P> for RetryLayer {
    type LayeredProvider = RetryProvider<P>;

    fn layer(&self, inner: P) -> Self::LayeredProvider {
        RetryProvider {
            inner,
            policy: self.policy.clone(),
        }
    }
}

/// Provider wrapped with retry logic
#[derive(Debug)]
pub struct RetryProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

#[async_trait]
impl<P: Provider> LayeredProvider for RetryProvider<P> {
    type Inner = P;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_complete(
        &self,
        req: CompletionRequest,
    ) -> Result<CompletionResponse, FlowError> {
        let (mut response, attempts) = self
            .policy
            .run(|| {
                let req = req.clone();
                async move { self.inner.complete(req).await }
            })
            .await?;

        response.attempts = attempts;
        Ok(response)
    }
}

impl_layered_provider!(<P: Provider> RetryProvider<P>);
