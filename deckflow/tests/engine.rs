//! Engine wiring: settings → cache/gateway/scheduler → document plan.

use async_trait::async_trait;
use deckflow::cache::MemoryTier;
use deckflow::prelude::*;
use deckflow::{
    CompletionRequest, CompletionResponse, Provider, ProviderFactory, ProviderInfo, SlideKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers each "Write slide N of M" prompt with a slide object, the last
/// one as an ending slide, wrapped in a code fence like real models do.
#[derive(Debug)]
struct SlideProvider {
    info: Arc<ProviderInfo>,
    calls: AtomicUsize,
}

impl SlideProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            info: Arc::new(ProviderInfo {
                id: "openai".to_string(),
                name: "SlideProvider".to_string(),
                endpoint: "mem://slides".to_string(),
            }),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// "... Write slide 2 of 4. ..." → (2, 4)
fn slide_numbers(user: &str) -> (usize, usize) {
    let rest = user.split("Write slide ").nth(1).unwrap_or_default();
    let words: Vec<&str> = rest.split_whitespace().take(3).collect();
    let parse = |w: Option<&&str>| {
        w.and_then(|w| w.trim_end_matches('.').parse().ok())
            .unwrap_or(0)
    };
    (parse(words.first()), parse(words.get(2)))
}

#[async_trait]
impl Provider for SlideProvider {
    fn info(&self) -> Arc<ProviderInfo> {
        self.info.clone()
    }

    async fn complete(&self, req: CompletionRequest) -> std::result::Result<CompletionResponse, FlowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let user = req.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let (number, total) = slide_numbers(&user);
        let kind = if number == total { "ending" } else { "bullets" };
        let body = format!(
            "```json\n{{\"type\": \"{}\", \"title\": \"Slide {}\", \"bullets\": [\"point\"]}}\n```",
            kind, number
        );
        Ok(CompletionResponse::new("slide", req.model, body))
    }
}

struct SlideFactory(Arc<SlideProvider>);

impl ProviderFactory for SlideFactory {
    fn create(&self, _spec: &ProviderSpec, _credential: &Secret) -> std::result::Result<Arc<dyn Provider>, FlowError> {
        Ok(self.0.clone())
    }
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.gateway = settings
        .gateway
        .with_jitter(false)
        .with_backoff(Duration::from_millis(10), Duration::from_millis(50));
    settings
}

fn engine(provider: Arc<SlideProvider>) -> Engine {
    Engine::builder(settings(), Arc::new(StaticKeyResolver::new().with_fallback("sk-test-0123456789")))
        .factory(Arc::new(SlideFactory(provider)))
        .build()
        .unwrap()
}

async fn wait_terminal(engine: &Engine, id: &JobId) -> JobSnapshot {
    for _ in 0..10_000 {
        let snapshot = engine.get_job_status(id).unwrap();
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never finished", id);
}

fn deck(topic: &str, units: usize) -> JobSpec {
    JobSpec::new(topic, units, ProviderSpec::openai("gpt-4o-mini")).with_audience("new hires")
}

#[tokio::test(start_paused = true)]
async fn test_completed_job_assembles_into_plan() {
    let provider = SlideProvider::new();
    let engine = engine(provider.clone());
    engine.start();

    let id = engine.submit_job(deck("Rust ownership", 4), 0).unwrap();
    let snapshot = wait_terminal(&engine, &id).await;
    assert_eq!(snapshot.status, JobStatus::Completed);

    let plan = engine.job_plan(&id).unwrap();
    assert_eq!(plan.title, "Rust ownership");
    assert_eq!(plan.subtitle, "new hires");
    assert_eq!(plan.slides.len(), 4);
    let titles: Vec<&str> = plan.slides.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["Slide 1", "Slide 2", "Slide 3", "Slide 4"]);
    assert_eq!(plan.slides[3].kind, SlideKind::Ending);
    assert!(plan.slides[..3].iter().all(|s| s.kind == SlideKind::Bullets));
    assert_eq!(provider.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_plan_requires_completed_job() {
    let engine = engine(SlideProvider::new());

    let id = engine.submit_job(deck("Queued only", 2), 0).unwrap();
    let err = engine.job_plan(&id).unwrap_err();
    assert!(matches!(err, FlowError::InvalidRequest(_)));

    assert!(engine.cancel_job(&id).unwrap());
    assert!(!engine.cancel_job(&id).unwrap());
    assert!(matches!(engine.job_plan(&id), Err(FlowError::InvalidRequest(_))));

    let unknown: JobId = "00000000-0000-4000-8000-000000000000".parse().unwrap();
    assert!(matches!(engine.get_job_status(&unknown), Err(FlowError::NotFound(_))));
    assert!(matches!(engine.job_plan(&unknown), Err(FlowError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_metrics_report_cache_hit_rate() {
    let provider = SlideProvider::new();
    let engine = engine(provider.clone());
    engine.start();

    let first = engine.submit_job(deck("Caching", 3), 0).unwrap();
    wait_terminal(&engine, &first).await;
    let second = engine.submit_job(deck("Caching", 3), 0).unwrap();
    let second = wait_terminal(&engine, &second).await;

    assert!(second.units.iter().all(|u| u.cached));
    assert_eq!(provider.calls(), 3);

    let metrics = engine.metrics();
    assert!((metrics.cache_hit_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(metrics.queue_depth, 0);
    assert_eq!(metrics.in_flight, 0);
    assert_eq!(metrics.scheduler.completed, 2);
    assert_eq!(metrics.gateway.dispatched, 3);
    assert_eq!(metrics.cache.entries, 3);

    let json = serde_json::to_value(&metrics).unwrap();
    assert!(json["scheduler"]["completed"].is_number());
}

#[tokio::test(start_paused = true)]
async fn test_remote_tier_is_shared_between_engines() {
    let remote = Arc::new(MemoryTier::new());
    let keys = Arc::new(StaticKeyResolver::new().with_fallback("sk-test-0123456789"));

    let first_provider = SlideProvider::new();
    let first = Engine::builder(settings(), keys.clone())
        .factory(Arc::new(SlideFactory(first_provider.clone())))
        .remote(remote.clone())
        .build()
        .unwrap();
    first.start();
    let id = first.submit_job(deck("Shared", 2), 0).unwrap();
    wait_terminal(&first, &id).await;

    let second_provider = SlideProvider::new();
    let second = Engine::builder(settings(), keys)
        .factory(Arc::new(SlideFactory(second_provider.clone())))
        .remote(remote)
        .build()
        .unwrap();
    second.start();
    let id = second.submit_job(deck("Shared", 2), 0).unwrap();
    let snapshot = wait_terminal(&second, &id).await;

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(first_provider.calls(), 2);
    assert_eq!(second_provider.calls(), 0);
    assert_eq!(second.metrics().cache.remote_hits, 2);
}

#[test]
fn test_invalid_settings_are_rejected_at_build() {
    let mut settings = Settings::default();
    settings.scheduler.max_workers = 0;
    let err = Engine::builder(settings, Arc::new(StaticKeyResolver::new()))
        .factory(Arc::new(SlideFactory(SlideProvider::new())))
        .build()
        .unwrap_err();
    assert!(matches!(err, FlowError::Configuration(_)));
}

#[cfg(not(feature = "redis"))]
#[test]
fn test_redis_url_needs_the_redis_feature() {
    let mut settings = Settings::default();
    settings.redis_url = Some("redis://127.0.0.1:6379".to_string());
    let err = Engine::builder(settings, Arc::new(StaticKeyResolver::new()))
        .factory(Arc::new(SlideFactory(SlideProvider::new())))
        .build()
        .unwrap_err();
    assert!(matches!(err, FlowError::Configuration(_)));
}
