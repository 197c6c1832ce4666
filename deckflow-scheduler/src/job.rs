//! Job model.

use chrono::{DateTime, Utc};
use deckflow_core::error::FlowError;
use deckflow_core::prompt::{JobContext, Prompt};
use deckflow_core::types::ProviderSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Opaque job identifier (UUID v4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| FlowError::not_found(format!("job {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub topic: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub description: String,
    pub unit_count: usize,
    #[serde(default)]
    pub template_id: Option<String>,
    pub provider: ProviderSpec,
    /// Who the credential is resolved for
    #[serde(default)]
    pub identity: String,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

fn default_use_cache() -> bool {
    true
}

impl JobSpec {
    pub fn new(topic: impl Into<String>, unit_count: usize, provider: ProviderSpec) -> Self {
        Self {
            topic: topic.into(),
            audience: String::new(),
            description: String::new(),
            unit_count,
            template_id: None,
            provider,
            identity: String::new(),
            use_cache: true,
            deadline_secs: None,
        }
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_secs = Some(deadline.as_secs());
        self
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// The part of the job spec prompt builders and assemblers see
    pub fn context(&self) -> JobContext {
        JobContext {
            topic: self.topic.clone(),
            audience: self.audience.clone(),
            description: self.description.clone(),
            unit_count: self.unit_count,
            template_id: self.template_id.clone(),
        }
    }

    /// Check the job spec is acceptable for a scheduler allowing `max_units`
    pub fn validate(&self, max_units: usize) -> Result<(), FlowError> {
        if self.topic.trim().is_empty() {
            return Err(FlowError::invalid_spec("topic must not be empty"));
        }
        if self.unit_count == 0 {
            return Err(FlowError::invalid_spec("unit_count must be at least 1"));
        }
        if self.unit_count > max_units {
            return Err(FlowError::invalid_spec(format!(
                "unit_count {} exceeds the limit of {}",
                self.unit_count, max_units
            )));
        }
        if self.provider.model.trim().is_empty() {
            return Err(FlowError::invalid_spec("provider model must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// One unit of a job: a single completion call.
#[derive(Debug, Clone)]
pub struct SubRequest {
    pub job_id: JobId,
    pub index: usize,
    pub prompt: Prompt,
    pub cache_key: String,
    pub attempts: u32,
    pub status: UnitStatus,
    pub cached: bool,
    pub output: Option<String>,
}

impl SubRequest {
    pub fn new(job_id: JobId, index: usize, prompt: Prompt, cache_key: String) -> Self {
        Self {
            job_id,
            index,
            prompt,
            cache_key,
            attempts: 0,
            status: UnitStatus::Pending,
            cached: false,
            output: None,
        }
    }
}

/// Mutable job state, only touched under the job's lock.
#[derive(Debug)]
pub(crate) struct Job {
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Monotonic instant of reaching a terminal state, for retention
    pub terminal_at: Option<Instant>,
    pub units: Vec<SubRequest>,
    pub result: Option<Vec<String>>,
    pub error: Option<FlowError>,
    pub cancel_reason: Option<String>,
}

impl Job {
    pub fn new() -> Self {
        Self {
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            terminal_at: None,
            units: Vec::new(),
            result: None,
            error: None,
            cancel_reason: None,
        }
    }

    pub fn completed_units(&self) -> usize {
        self.units.iter().filter(|u| u.status == UnitStatus::Done).count()
    }

    /// Move to a terminal state. Returns false if already terminal.
    pub fn finish(&mut self, status: JobStatus) -> bool {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.terminal_at = Some(Instant::now());
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitSnapshot {
    pub index: usize,
    pub status: UnitStatus,
    pub attempts: u32,
    pub cached: bool,
}

/// Read-only copy of a job's externally visible state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub priority: i32,
    pub topic: String,
    pub progress: Progress,
    /// Per-unit outputs in index order, present only once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<String>>,
    /// Credential-masked failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub units: Vec<UnitSnapshot>,
}

impl JobSnapshot {
    pub(crate) fn capture(id: JobId, priority: i32, spec: &JobSpec, job: &Job) -> Self {
        Self {
            id,
            status: job.status,
            priority,
            topic: spec.topic.clone(),
            progress: Progress {
                completed: job.completed_units(),
                total: spec.unit_count,
            },
            result: match job.status {
                JobStatus::Completed => job.result.clone(),
                _ => None,
            },
            error: job.error.as_ref().map(|e| e.to_string()),
            error_kind: job.error.as_ref().map(|e| e.kind().to_string()),
            cancel_reason: job.cancel_reason.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            units: job
                .units
                .iter()
                .map(|u| UnitSnapshot {
                    index: u.index,
                    status: u.status,
                    attempts: u.attempts,
                    cached: u.cached,
                })
                .collect(),
        }
    }
}

/// Selection for [`Scheduler::list`](crate::Scheduler::list)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
}

impl JobFilter {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
        }
    }

    pub fn matches(&self, status: JobStatus) -> bool {
        self.status.map_or(true, |s| s == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(units: usize) -> JobSpec {
        JobSpec::new("Rust async", units, ProviderSpec::openai("gpt-4o-mini"))
    }

    #[test]
    fn test_validate() {
        assert!(spec(3).validate(200).is_ok());
        assert!(matches!(spec(0).validate(200), Err(FlowError::InvalidSpec(_))));
        assert!(matches!(spec(201).validate(200), Err(FlowError::InvalidSpec(_))));

        let mut blank = spec(3);
        blank.topic = "   ".to_string();
        assert!(matches!(blank.validate(200), Err(FlowError::InvalidSpec(_))));
    }

    #[test]
    fn test_job_id_roundtrip_text() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_spec_deserialize_defaults() {
        let spec: JobSpec = serde_json::from_value(serde_json::json!({
            "topic": "Ownership",
            "unit_count": 4,
            "provider": {"kind": "deepseek", "model": "deepseek-chat"}
        }))
        .unwrap();
        assert!(spec.use_cache);
        assert_eq!(spec.deadline(), None);
        assert_eq!(spec.context().unit_count, 4);
    }

    #[test]
    fn test_finish_is_one_way() {
        let mut job = Job::new();
        assert!(job.finish(JobStatus::Cancelled));
        assert!(!job.finish(JobStatus::Completed));
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.terminal_at.is_some());
    }
}
