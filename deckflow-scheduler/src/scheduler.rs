//! Scheduler front: submission, status, cancellation, housekeeping.

use crate::config::SchedulerConfig;
use crate::job::{JobFilter, JobId, JobSnapshot, JobSpec, JobStatus};
use crate::queue::JobQueue;
use crate::registry::{JobHandle, JobRegistry};
use crate::worker::worker_loop;
use deckflow_cache::TieredCache;
use deckflow_core::credentials::KeyResolver;
use deckflow_core::error::FlowError;
use deckflow_core::prompt::PromptBuilder;
use deckflow_gateway::CompletionGateway;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct SchedulerInner {
    pub config: SchedulerConfig,
    pub queue: JobQueue,
    pub registry: JobRegistry,
    pub gateway: Arc<CompletionGateway>,
    pub cache: Arc<TieredCache>,
    pub prompts: Arc<dyn PromptBuilder>,
    pub keys: Arc<dyn KeyResolver>,
}

/// Counts over the jobs currently known to the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerMetrics {
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub workers: usize,
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Priority job scheduler.
///
/// Jobs wait in a priority queue until one of `max_workers` workers picks
/// them up. Nothing runs until [`start`](Self::start) is called.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("queued", &self.inner.queue.len())
            .field("jobs", &self.inner.registry.len())
            .finish()
    }
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        gateway: Arc<CompletionGateway>,
        cache: Arc<TieredCache>,
        prompts: Arc<dyn PromptBuilder>,
        keys: Arc<dyn KeyResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue: JobQueue::new(config.max_queue),
                registry: JobRegistry::new(),
                config,
                gateway,
                cache,
                prompts,
                keys,
            }),
            tasks: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Spawn the workers and the retention sweeper. Calling it again is a
    /// no-op. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() || self.shutdown.is_cancelled() {
            return;
        }

        let workers = self.inner.config.max_workers.max(1);
        for worker in 0..workers {
            tasks.push(tokio::spawn(worker_loop(
                self.inner.clone(),
                worker,
                self.shutdown.clone(),
            )));
        }
        tasks.push(tokio::spawn(sweeper(self.inner.clone(), self.shutdown.clone())));
        tracing::info!(workers, "scheduler started");
    }

    /// Queue a job. Higher `priority` runs sooner; equal priorities run in
    /// submission order.
    pub fn submit(&self, spec: JobSpec, priority: i32) -> Result<JobId, FlowError> {
        spec.validate(self.inner.config.max_units)?;

        let handle = Arc::new(JobHandle::new(spec, priority, self.inner.config.job_deadline()));
        let id = handle.id;
        self.inner.registry.insert(handle.clone());

        if let Err(e) = self.inner.queue.push(id, priority) {
            self.inner.registry.remove(&id);
            tracing::warn!(error = %e, "job rejected");
            return Err(e);
        }
        tracing::info!(
            job_id = %id,
            priority,
            units = handle.spec.unit_count,
            "job queued"
        );
        Ok(id)
    }

    pub fn status(&self, id: &JobId) -> Result<JobSnapshot, FlowError> {
        Ok(self.inner.registry.get(id)?.snapshot())
    }

    /// The job spec a job was submitted with
    pub fn spec(&self, id: &JobId) -> Result<JobSpec, FlowError> {
        Ok(self.inner.registry.get(id)?.spec.clone())
    }

    /// Cancel a job. Returns false if it had already finished.
    ///
    /// Queued jobs leave the queue at once; for running jobs no further
    /// units are dispatched and results still in flight are dropped.
    pub fn cancel(&self, id: &JobId) -> Result<bool, FlowError> {
        let handle = self.inner.registry.get(id)?;
        if !handle.cancel("cancelled by request") {
            return Ok(false);
        }
        self.inner.queue.remove(id);
        Ok(true)
    }

    /// Snapshots matching `filter`, newest first
    pub fn list(&self, filter: &JobFilter, limit: usize) -> Vec<JobSnapshot> {
        let mut snapshots: Vec<JobSnapshot> = self
            .inner
            .registry
            .handles()
            .iter()
            .map(|h| h.snapshot())
            .filter(|s| filter.matches(s.status))
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots.truncate(limit);
        snapshots
    }

    /// Drop terminal jobs past the retention window. Queued jobs already
    /// past their deadline are cancelled first.
    pub fn purge_expired(&self) -> usize {
        expire_overdue(&self.inner);
        purge(&self.inner)
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let mut metrics = SchedulerMetrics {
            queue_depth: self.inner.queue.len(),
            queue_capacity: self.inner.queue.capacity(),
            workers: self.inner.config.max_workers,
            ..Default::default()
        };
        for handle in self.inner.registry.handles() {
            metrics.total += 1;
            match handle.status() {
                JobStatus::Queued => metrics.queued += 1,
                JobStatus::Running => metrics.running += 1,
                JobStatus::Completed => metrics.completed += 1,
                JobStatus::Failed => metrics.failed += 1,
                JobStatus::Cancelled => metrics.cancelled += 1,
            }
        }
        metrics
    }

    /// Stop the workers and the sweeper.
    ///
    /// Jobs still queued or running are cancelled; calls already in flight
    /// are allowed to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for handle in self.inner.registry.handles() {
            if !handle.status().is_terminal() {
                handle.cancel("scheduler shutdown");
                self.inner.queue.remove(&handle.id);
            }
        }
        self.inner.queue.wake_all();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "scheduler task ended abnormally");
            }
        }
        tracing::info!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn purge(inner: &SchedulerInner) -> usize {
    let purged = inner.registry.purge(inner.config.retention());
    if purged > 0 {
        tracing::info!(purged, "expired jobs purged");
    }
    purged
}

fn expire_overdue(inner: &SchedulerInner) -> usize {
    let overdue = inner.registry.cancel_overdue();
    for id in &overdue {
        inner.queue.remove(id);
    }
    overdue.len()
}

async fn sweeper(inner: Arc<SchedulerInner>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.config.sweep_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick fires immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                expire_overdue(&inner);
                purge(&inner);
            }
        }
    }
}
