//! Job registry with per-job locks.

use crate::job::{Job, JobId, JobSnapshot, JobSpec, JobStatus, SubRequest, UnitStatus};
use chrono::Utc;
use dashmap::DashMap;
use deckflow_core::error::FlowError;
use deckflow_core::prompt::Prompt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A registered job: immutable request data plus its locked state.
///
/// The lock is only ever held for short, non-suspending sections.
#[derive(Debug)]
pub(crate) struct JobHandle {
    pub id: JobId,
    pub priority: i32,
    pub spec: JobSpec,
    pub deadline_at: Option<Instant>,
    state: Mutex<Job>,
    stop: CancellationToken,
}

impl JobHandle {
    pub fn new(spec: JobSpec, priority: i32, default_deadline: Option<Duration>) -> Self {
        let deadline_at = spec
            .deadline()
            .or(default_deadline)
            .map(|d| Instant::now() + d);
        Self {
            id: JobId::new(),
            priority,
            spec,
            deadline_at,
            state: Mutex::new(Job::new()),
            stop: CancellationToken::new(),
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let job = self.state.lock();
        JobSnapshot::capture(self.id, self.priority, &self.spec, &job)
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    /// Set once the job is terminal; no new units may be dispatched after
    pub fn should_stop(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Fires when the job turns terminal
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline_at.is_some_and(|at| Instant::now() >= at)
    }

    pub fn terminal_at(&self) -> Option<Instant> {
        self.state.lock().terminal_at
    }

    /// queued → running. False if the job is no longer queued.
    pub fn start(&self) -> bool {
        let mut job = self.state.lock();
        if job.status != JobStatus::Queued {
            return false;
        }
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        true
    }

    /// Install the expanded sub-requests
    pub fn expand(&self, units: Vec<SubRequest>) -> bool {
        let mut job = self.state.lock();
        if job.status != JobStatus::Running {
            return false;
        }
        job.units = units;
        true
    }

    /// Mark unit `index` in flight and hand out what it needs.
    /// `None` once the job has stopped running.
    pub fn begin_unit(&self, index: usize) -> Option<(Prompt, String)> {
        let mut job = self.state.lock();
        if job.status != JobStatus::Running {
            return None;
        }
        let unit = job.units.get_mut(index)?;
        unit.status = UnitStatus::InFlight;
        Some((unit.prompt.clone(), unit.cache_key.clone()))
    }

    /// Record a unit's output and mark it done in the same critical section.
    ///
    /// Returns false (and records nothing) if the job stopped running while
    /// the unit was in flight.
    pub fn record_output(&self, index: usize, output: String, attempts: u32, cached: bool) -> bool {
        let mut job = self.state.lock();
        if job.status != JobStatus::Running {
            return false;
        }
        let Some(unit) = job.units.get_mut(index) else {
            return false;
        };
        unit.output = Some(output);
        unit.attempts = attempts;
        unit.cached = cached;
        unit.status = UnitStatus::Done;

        let completed = job.completed_units();
        tracing::debug!(
            job_id = %self.id,
            unit = index,
            cached,
            attempts,
            completed,
            total = job.units.len(),
            "unit done"
        );
        true
    }

    /// Fail the job with its first fatal error. Later failures are ignored.
    pub fn fail(&self, error: FlowError, unit: Option<(usize, u32)>) -> bool {
        let mut job = self.state.lock();
        if !job.finish(JobStatus::Failed) {
            return false;
        }
        self.stop.cancel();
        if let Some((index, attempts)) = unit {
            if let Some(u) = job.units.get_mut(index) {
                u.status = UnitStatus::Failed;
                u.attempts = attempts;
            }
        }
        tracing::error!(
            job_id = %self.id,
            unit = unit.map(|(i, _)| i),
            kind = error.kind(),
            error = %error,
            "job failed"
        );
        job.error = Some(error);
        true
    }

    /// Cancel unless already terminal
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let mut job = self.state.lock();
        if !job.finish(JobStatus::Cancelled) {
            return false;
        }
        self.stop.cancel();
        let reason = reason.into();
        tracing::info!(job_id = %self.id, reason = %reason, "job cancelled");
        job.cancel_reason = Some(reason);
        true
    }

    /// running → completed once every unit is done; assembles the result.
    pub fn complete(&self) -> bool {
        let mut job = self.state.lock();
        if job.status != JobStatus::Running {
            return false;
        }
        let outputs: Option<Vec<String>> = job.units.iter().map(|u| u.output.clone()).collect();
        let Some(outputs) = outputs.filter(|o| o.len() == self.spec.unit_count) else {
            drop(job);
            return self.fail(FlowError::other("job ended with units unfinished"), None);
        };
        job.result = Some(outputs);
        job.finish(JobStatus::Completed);
        self.stop.cancel();
        tracing::info!(job_id = %self.id, units = self.spec.unit_count, "job completed");
        true
    }
}

/// All known jobs, keyed by id
#[derive(Debug, Default)]
pub(crate) struct JobRegistry {
    jobs: DashMap<JobId, Arc<JobHandle>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<JobHandle>) {
        self.jobs.insert(handle.id, handle);
    }

    pub fn get(&self, id: &JobId) -> Result<Arc<JobHandle>, FlowError> {
        self.jobs
            .get(id)
            .map(|h| h.value().clone())
            .ok_or_else(|| FlowError::not_found(format!("job {}", id)))
    }

    pub fn remove(&self, id: &JobId) {
        self.jobs.remove(id);
    }

    pub fn handles(&self) -> Vec<Arc<JobHandle>> {
        self.jobs.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Cancel queued jobs whose deadline has passed; returns their ids
    pub fn cancel_overdue(&self) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|e| e.value().status() == JobStatus::Queued && e.value().deadline_passed())
            .filter(|e| e.value().cancel("deadline exceeded"))
            .map(|e| *e.key())
            .collect()
    }

    /// Drop terminal jobs older than `retention`
    pub fn purge(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let before = self.jobs.len();
        self.jobs.retain(|_, handle| match handle.terminal_at() {
            Some(at) => now.duration_since(at) < retention,
            None => true,
        });
        before.saturating_sub(self.jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckflow_core::types::ProviderSpec;

    fn handle(units: usize) -> JobHandle {
        let spec = JobSpec::new("topic", units, ProviderSpec::openai("gpt-4o-mini"));
        let h = JobHandle::new(spec, 0, None);
        assert!(h.start());
        let units = (0..units)
            .map(|i| SubRequest::new(h.id, i, Prompt::user(format!("u{}", i)), format!("k{}", i)))
            .collect();
        assert!(h.expand(units));
        h
    }

    #[test]
    fn test_out_of_order_completion_keeps_slots() {
        let h = handle(3);
        for i in [2, 0, 1] {
            h.begin_unit(i).unwrap();
            assert!(h.record_output(i, format!("out{}", i), 1, false));
        }
        assert!(h.complete());
        let snap = h.snapshot();
        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.result.unwrap(), vec!["out0", "out1", "out2"]);
        assert_eq!(snap.progress.completed, 3);
    }

    #[test]
    fn test_results_after_cancel_are_discarded() {
        let h = handle(2);
        h.begin_unit(0).unwrap();
        assert!(h.cancel("user request"));
        assert!(h.should_stop());
        assert!(!h.record_output(0, "late".into(), 1, false));
        assert!(h.begin_unit(1).is_none());

        let snap = h.snapshot();
        assert_eq!(snap.status, JobStatus::Cancelled);
        assert_eq!(snap.result, None);
        assert_eq!(snap.progress.completed, 0);
        assert!(!h.cancel("again"));
    }

    #[test]
    fn test_first_failure_wins() {
        let h = handle(2);
        assert!(h.fail(FlowError::authentication("first"), Some((0, 1))));
        assert!(!h.fail(FlowError::timeout("second"), Some((1, 3))));
        let snap = h.snapshot();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.error_kind.as_deref(), Some("authentication"));
        assert!(!h.complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_queued_jobs_are_cancelled() {
        let registry = JobRegistry::new();
        let spec = JobSpec::new("topic", 1, ProviderSpec::openai("gpt-4o-mini"));
        let overdue = Arc::new(JobHandle::new(spec.clone(), 0, Some(Duration::from_secs(5))));
        let patient = Arc::new(JobHandle::new(spec, 0, Some(Duration::from_secs(60))));
        registry.insert(overdue.clone());
        registry.insert(patient.clone());

        assert!(registry.cancel_overdue().is_empty());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(registry.cancel_overdue(), vec![overdue.id]);

        let snap = overdue.snapshot();
        assert_eq!(snap.status, JobStatus::Cancelled);
        assert_eq!(snap.cancel_reason.as_deref(), Some("deadline exceeded"));
        assert_eq!(patient.status(), JobStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_respects_retention() {
        let registry = JobRegistry::new();
        let done = Arc::new(handle(1));
        done.cancel("x");
        let live = Arc::new(handle(1));
        registry.insert(done.clone());
        registry.insert(live.clone());

        assert_eq!(registry.purge(Duration::from_secs(60)), 0);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(registry.purge(Duration::from_secs(60)), 1);
        assert!(registry.get(&done.id).is_err());
        assert!(registry.get(&live.id).is_ok());
    }
}
