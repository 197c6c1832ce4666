//! Engine: cache, gateway and scheduler wired together.

use crate::settings::Settings;
use deckflow_cache::{CacheStats, RemoteTier, TieredCache};
use deckflow_core::credentials::KeyResolver;
use deckflow_core::error::FlowError;
use deckflow_core::plan::{DeckPlan, DocumentAssembler, PlanAssembler};
use deckflow_core::prompt::{DeckPromptBuilder, PromptBuilder};
use deckflow_core::provider::ProviderFactory;
use deckflow_gateway::{CompletionGateway, GatewayMetrics};
use deckflow_scheduler::{
    JobFilter, JobId, JobSnapshot, JobSpec, JobStatus, Scheduler, SchedulerMetrics,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Point-in-time view over every component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineMetrics {
    pub cache_hit_rate: f64,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub scheduler: SchedulerMetrics,
    pub gateway: GatewayMetrics,
    pub cache: CacheStats,
}

/// Builder for [`Engine`].
///
/// Only the key resolver is mandatory. Without a factory the built-in
/// providers are used (feature `providers`); without a prompt builder,
/// [`DeckPromptBuilder`].
pub struct EngineBuilder {
    settings: Settings,
    keys: Arc<dyn KeyResolver>,
    factory: Option<Arc<dyn ProviderFactory>>,
    prompts: Option<Arc<dyn PromptBuilder>>,
    remote: Option<Arc<dyn RemoteTier>>,
}

impl EngineBuilder {
    pub fn new(settings: Settings, keys: Arc<dyn KeyResolver>) -> Self {
        Self {
            settings,
            keys,
            factory: None,
            prompts: None,
            remote: None,
        }
    }

    pub fn factory(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn prompts(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Use this remote tier instead of the one `redis_url` would open
    pub fn remote(mut self, remote: Arc<dyn RemoteTier>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Validate the settings and assemble the engine. Nothing runs until
    /// [`Engine::start`].
    pub fn build(self) -> Result<Engine, FlowError> {
        let settings = self.settings;
        settings.validate()?;

        let factory = match self.factory {
            Some(factory) => factory,
            None => default_factory()?,
        };
        let remote = match (self.remote, settings.redis_url.as_deref()) {
            (Some(remote), _) => Some(remote),
            (None, Some(url)) => Some(redis_tier(url)?),
            (None, None) => None,
        };
        let cache = Arc::new(match remote {
            Some(remote) => TieredCache::with_remote(settings.cache.clone(), remote),
            None => TieredCache::new(settings.cache.clone()),
        });
        let gateway = Arc::new(CompletionGateway::new(settings.gateway.clone(), factory));
        let prompts = self
            .prompts
            .unwrap_or_else(|| Arc::new(DeckPromptBuilder::new()));

        let scheduler = Scheduler::new(
            settings.scheduler.clone(),
            gateway.clone(),
            cache.clone(),
            prompts,
            self.keys,
        );

        tracing::info!(
            max_concurrency = settings.gateway.max_concurrency,
            max_workers = settings.scheduler.max_workers,
            remote_cache = cache.has_remote(),
            "engine assembled"
        );
        Ok(Engine {
            scheduler,
            gateway,
            cache,
        })
    }
}

#[cfg(feature = "deckflow-provider")]
fn default_factory() -> Result<Arc<dyn ProviderFactory>, FlowError> {
    Ok(Arc::new(deckflow_provider::BuiltinProviderFactory))
}

#[cfg(not(feature = "deckflow-provider"))]
fn default_factory() -> Result<Arc<dyn ProviderFactory>, FlowError> {
    Err(FlowError::configuration(
        "no provider factory given and the `providers` feature is disabled",
    ))
}

#[cfg(feature = "redis")]
fn redis_tier(url: &str) -> Result<Arc<dyn RemoteTier>, FlowError> {
    let tier = deckflow_cache::RedisTier::new(url)
        .map_err(|e| FlowError::configuration(format!("redis_url: {}", e)))?;
    Ok(Arc::new(tier))
}

#[cfg(not(feature = "redis"))]
fn redis_tier(_url: &str) -> Result<Arc<dyn RemoteTier>, FlowError> {
    Err(FlowError::configuration(
        "redis_url is set but deckflow was built without the `redis` feature",
    ))
}

/// The caller-facing entry point.
pub struct Engine {
    scheduler: Scheduler,
    gateway: Arc<CompletionGateway>,
    cache: Arc<TieredCache>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("scheduler", &self.scheduler)
            .field("gateway", &self.gateway)
            .finish()
    }
}

impl Engine {
    pub fn builder(settings: Settings, keys: Arc<dyn KeyResolver>) -> EngineBuilder {
        EngineBuilder::new(settings, keys)
    }

    /// Spawn the scheduler's workers and sweeper
    pub fn start(&self) {
        self.scheduler.start();
    }

    pub fn submit_job(&self, spec: JobSpec, priority: i32) -> Result<JobId, FlowError> {
        self.scheduler.submit(spec, priority)
    }

    pub fn get_job_status(&self, id: &JobId) -> Result<JobSnapshot, FlowError> {
        self.scheduler.status(id)
    }

    /// False if the job had already finished
    pub fn cancel_job(&self, id: &JobId) -> Result<bool, FlowError> {
        self.scheduler.cancel(id)
    }

    pub fn list_jobs(&self, filter: &JobFilter, limit: usize) -> Vec<JobSnapshot> {
        self.scheduler.list(filter, limit)
    }

    /// Assemble the document plan of a completed job
    pub fn job_plan(&self, id: &JobId) -> Result<DeckPlan, FlowError> {
        self.assemble(id, &PlanAssembler)
    }

    /// Run a completed job's ordered outputs through `assembler`
    pub fn assemble<A: DocumentAssembler>(&self, id: &JobId, assembler: &A) -> Result<A::Output, FlowError> {
        let snapshot = self.scheduler.status(id)?;
        let outputs = match (snapshot.status, snapshot.result) {
            (JobStatus::Completed, Some(outputs)) => outputs,
            (status, _) => {
                return Err(FlowError::invalid_request(format!(
                    "job {} is {}, not completed",
                    id,
                    status.as_str()
                )))
            }
        };
        let spec = self.scheduler.spec(id)?;
        assembler.assemble(&spec.context(), &outputs)
    }

    /// Purge expired jobs and cache entries; returns the number of jobs
    pub fn purge_expired(&self) -> usize {
        let entries = self.cache.purge_expired();
        if entries > 0 {
            tracing::debug!(entries, "expired cache entries purged");
        }
        self.scheduler.purge_expired()
    }

    pub fn metrics(&self) -> EngineMetrics {
        let scheduler = self.scheduler.metrics();
        let gateway = self.gateway.metrics();
        let cache = self.cache.stats();
        EngineMetrics {
            cache_hit_rate: cache.hit_rate,
            queue_depth: scheduler.queue_depth,
            in_flight: gateway.in_flight,
            scheduler,
            gateway,
            cache,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn gateway(&self) -> &CompletionGateway {
        &self.gateway
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Stop the workers; unfinished jobs are cancelled
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
