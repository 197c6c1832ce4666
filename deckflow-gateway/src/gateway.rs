//! Completion gateway: builds per-job client stacks sharing one ceiling.

use crate::batch::plan_batches;
use crate::config::GatewayConfig;
use crate::metrics::{CallCounters, GatewayMetrics, MeterLayer};
use dashmap::DashMap;
use deckflow_core::credentials::Secret;
use deckflow_core::error::FlowError;
use deckflow_core::provider::{Provider, ProviderFactory};
use deckflow_core::runtime::CompletionClient;
use deckflow_core::types::ProviderSpec;
use deckflow_layer::{
    CancelLayer, CircuitBreaker, CircuitBreakerLayer, CircuitState, ConcurrencyLimiter,
    LoggingLayer, RetryLayer, TimeoutLayer,
};
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Hands out completion clients whose calls all share one concurrency
/// ceiling and one circuit breaker per endpoint.
///
/// Client stack, outermost first: meter → logging → retry → circuit breaker
/// → concurrency limit → cancel gate → timeout → provider. Backoff sleeps
/// therefore do not hold a slot, the call deadline starts once a slot is
/// held, and a call whose job was stopped while it waited for a slot is
/// refused without reaching the provider.
pub struct CompletionGateway {
    config: GatewayConfig,
    factory: Arc<dyn ProviderFactory>,
    limiter: ConcurrencyLimiter,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    counters: Arc<CallCounters>,
}

impl fmt::Debug for CompletionGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionGateway")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .field("breakers", &self.breakers.len())
            .finish()
    }
}

impl CompletionGateway {
    pub fn new(config: GatewayConfig, factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            limiter: ConcurrencyLimiter::new(config.max_concurrency),
            config,
            factory,
            breakers: DashMap::new(),
            counters: Arc::new(CallCounters::default()),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Build the client for one job from its provider spec and credential
    pub fn connect(&self, spec: &ProviderSpec, credential: &Secret) -> Result<CompletionClient, FlowError> {
        self.connect_cancellable(spec, credential, CancellationToken::new())
    }

    /// Like [`connect`](Self::connect), but calls are refused with
    /// [`FlowError::Cancelled`] once `cancel` fires
    pub fn connect_cancellable(
        &self,
        spec: &ProviderSpec,
        credential: &Secret,
        cancel: CancellationToken,
    ) -> Result<CompletionClient, FlowError> {
        let provider = self.factory.create(spec, credential)?;
        Ok(self.assemble(provider, spec, cancel))
    }

    /// Build a client around an already constructed provider
    pub fn connect_with(&self, provider: Arc<dyn Provider>, spec: &ProviderSpec) -> CompletionClient {
        self.assemble(provider, spec, CancellationToken::new())
    }

    fn assemble(
        &self,
        provider: Arc<dyn Provider>,
        spec: &ProviderSpec,
        cancel: CancellationToken,
    ) -> CompletionClient {
        let info = provider.info();
        let breaker = self.breaker_for(&info.endpoint);

        CompletionClient::builder(provider, spec.model.clone())
            .temperature(spec.temperature)
            .max_tokens(spec.max_tokens)
            .layer(TimeoutLayer::new(self.config.call_timeout()))
            .layer(CancelLayer::new(cancel))
            .layer(self.limiter.layer())
            .layer(CircuitBreakerLayer::new(breaker))
            .layer(RetryLayer::with_policy(self.config.retry_policy()))
            .layer(LoggingLayer::with_prefix(format!("[{}]", info.id)))
            .layer(MeterLayer::new(self.counters.clone()))
            .finish()
    }

    fn breaker_for(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(endpoint, self.config.breaker_config())))
            .clone()
    }

    /// Breaker state for an endpoint, if any client has used it
    pub fn circuit_state(&self, endpoint: &str) -> Option<CircuitState> {
        self.breakers.get(endpoint).map(|b| b.state())
    }

    /// Batches for a job of `units` sub-requests
    pub fn plan(&self, units: usize) -> Vec<Range<usize>> {
        plan_batches(units, self.config.batch_threshold, self.config.max_concurrency)
    }

    /// Run `unit(i)` for every index in `0..units`.
    ///
    /// Batches run one after another; units within a batch run concurrently.
    /// Results come back in index order regardless of completion order.
    pub async fn run_batched<T, F, Fut>(&self, units: usize, unit: F) -> Vec<T>
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = T>,
    {
        let batches = self.plan(units);
        let total = batches.len();
        let mut results = Vec::with_capacity(units);

        for (n, batch) in batches.into_iter().enumerate() {
            if total > 1 {
                tracing::debug!(batch = n + 1, total, units = batch.len(), "dispatching batch");
            }
            results.extend(join_all(batch.map(&unit)).await);
        }
        results
    }

    pub fn metrics(&self) -> GatewayMetrics {
        GatewayMetrics {
            max_concurrency: self.limiter.max(),
            in_flight: self.limiter.in_flight(),
            peak_in_flight: self.limiter.peak(),
            dispatched: self.counters.dispatched(),
            failures: self.counters.failures(),
            open_circuits: self
                .breakers
                .iter()
                .filter(|b| b.value().state() == CircuitState::Open)
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use deckflow_core::prompt::Prompt;
    use deckflow_core::types::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks its own concurrency and answers with the last user message.
    #[derive(Debug)]
    struct SlowEcho {
        info: Arc<ProviderInfo>,
        delay: Duration,
        active: AtomicUsize,
        max_seen: AtomicUsize,
        failures: Mutex<VecDeque<FlowError>>,
    }

    impl SlowEcho {
        fn new(endpoint: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                info: Arc::new(ProviderInfo {
                    id: "openai".to_string(),
                    name: "SlowEcho".to_string(),
                    endpoint: endpoint.to_string(),
                }),
                delay,
                active: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
                failures: Mutex::new(VecDeque::new()),
            })
        }

        fn fail_next(&self, errors: Vec<FlowError>) {
            self.failures.lock().extend(errors);
        }
    }

    #[async_trait]
    impl Provider for SlowEcho {
        fn info(&self) -> Arc<ProviderInfo> {
            self.info.clone()
        }

        async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, FlowError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if let Some(err) = self.failures.lock().pop_front() {
                return Err(err);
            }
            let text = req.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(CompletionResponse::new("echo", req.model, text))
        }
    }

    struct NoFactory;

    impl ProviderFactory for NoFactory {
        fn create(&self, _spec: &ProviderSpec, _credential: &Secret) -> Result<Arc<dyn Provider>, FlowError> {
            Err(FlowError::configuration("no providers in this test"))
        }
    }

    fn gateway(config: GatewayConfig) -> CompletionGateway {
        CompletionGateway::new(config.with_jitter(false), Arc::new(NoFactory))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_holds_across_jobs() {
        let gw = gateway(GatewayConfig::default().with_max_concurrency(3));
        let provider = SlowEcho::new("mem://a", Duration::from_millis(100));
        let spec = ProviderSpec::openai("gpt-4o-mini");

        let job_a = gw.connect_with(provider.clone(), &spec);
        let job_b = gw.connect_with(provider.clone(), &spec);

        let calls = (0..20).map(|i| {
            let client = if i % 2 == 0 { job_a.clone() } else { job_b.clone() };
            async move { client.dispatch(&Prompt::user(format!("unit {}", i))).await }
        });
        let results = join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(provider.max_seen.load(Ordering::SeqCst), 3);
        let metrics = gw.metrics();
        assert_eq!(metrics.peak_in_flight, 3);
        assert_eq!(metrics.in_flight, 0);
        assert_eq!(metrics.dispatched, 20);
        assert_eq!(metrics.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_batched_keeps_index_order() {
        let gw = gateway(GatewayConfig::default().with_max_concurrency(5).with_batch_threshold(35));
        assert_eq!(gw.plan(50).len(), 10);

        let out = gw
            .run_batched(50, |i| async move {
                // later units finish first within a batch
                tokio::time::sleep(Duration::from_millis(100 - i as u64)).await;
                i * 10
            })
            .await;
        assert_eq!(out, (0..50).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_run_sequentially() {
        let gw = gateway(GatewayConfig::default().with_max_concurrency(2).with_batch_threshold(3));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        gw.run_batched(7, |_| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried_with_attempt_count() {
        let gw = gateway(
            GatewayConfig::default()
                .with_max_attempts(3)
                .with_backoff(Duration::from_millis(10), Duration::from_millis(100)),
        );
        let provider = SlowEcho::new("mem://retry", Duration::from_millis(1));
        provider.fail_next(vec![FlowError::timeout("slow"), FlowError::rate_limit("429")]);

        let client = gw.connect_with(provider, &ProviderSpec::openai("gpt-4o-mini"));
        let completion = client.dispatch(&Prompt::user("hello")).await.unwrap();
        assert_eq!(completion.text, "hello");
        assert_eq!(completion.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_is_retried_then_exhausted() {
        let gw = gateway(
            GatewayConfig::default()
                .with_max_attempts(2)
                .with_call_timeout(Duration::from_secs(1))
                .with_backoff(Duration::from_millis(10), Duration::from_millis(10)),
        );
        let provider = SlowEcho::new("mem://slow", Duration::from_secs(5));
        let client = gw.connect_with(provider, &ProviderSpec::openai("gpt-4o-mini"));

        let err = client.dispatch(&Prompt::user("hello")).await.unwrap_err();
        assert!(matches!(err, FlowError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(gw.metrics().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_is_shared_per_endpoint() {
        let gw = gateway(
            GatewayConfig::default()
                .with_max_attempts(1)
                .with_breaker(2, 1, Duration::from_secs(30)),
        );
        let provider = SlowEcho::new("mem://flaky", Duration::from_millis(1));
        provider.fail_next(vec![FlowError::unavailable("503"), FlowError::unavailable("503")]);
        let spec = ProviderSpec::openai("gpt-4o-mini");

        let first = gw.connect_with(provider.clone(), &spec);
        let second = gw.connect_with(provider.clone(), &spec);
        assert!(first.dispatch(&Prompt::user("a")).await.is_err());
        assert!(second.dispatch(&Prompt::user("b")).await.is_err());
        assert_eq!(gw.circuit_state("mem://flaky"), Some(CircuitState::Open));

        let err = first.dispatch(&Prompt::user("c")).await.unwrap_err();
        assert!(matches!(err, FlowError::CircuitOpen(_)));
        assert_eq!(gw.metrics().open_circuits, 1);

        let other = gw.connect_with(SlowEcho::new("mem://healthy", Duration::from_millis(1)), &spec);
        assert!(other.dispatch(&Prompt::user("d")).await.is_ok());
    }

    struct FixedFactory(Arc<SlowEcho>);

    impl ProviderFactory for FixedFactory {
        fn create(&self, _spec: &ProviderSpec, _credential: &Secret) -> Result<Arc<dyn Provider>, FlowError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_refuses_calls_waiting_for_a_slot() {
        let provider = SlowEcho::new("mem://cancel", Duration::from_secs(1));
        let gw = CompletionGateway::new(
            GatewayConfig::default().with_max_concurrency(1).with_jitter(false),
            Arc::new(FixedFactory(provider.clone())),
        );
        let token = CancellationToken::new();
        let client = gw
            .connect_cancellable(&ProviderSpec::openai("gpt-4o-mini"), &Secret::new("sk-x"), token.clone())
            .unwrap();

        let calls = (0..3).map(|i| {
            let client = client.clone();
            async move { client.dispatch(&Prompt::user(format!("unit {}", i))).await }
        });
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            token.cancel();
        };
        let (results, _) = tokio::join!(join_all(calls), canceller);

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(FlowError::Cancelled(_))));
        assert!(matches!(results[2], Err(FlowError::Cancelled(_))));
        assert_eq!(provider.max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(gw.metrics().in_flight, 0);
    }

    #[test]
    fn test_connect_surfaces_factory_errors() {
        let gw = gateway(GatewayConfig::default());
        let err = gw
            .connect(&ProviderSpec::openai("gpt-4o-mini"), &Secret::new("sk-x"))
            .unwrap_err();
        assert!(matches!(err, FlowError::Configuration(_)));
    }
}
