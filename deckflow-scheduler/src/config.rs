//! Scheduler configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker tasks pulling jobs off the queue
    pub max_workers: usize,
    /// Pending-queue length at which submissions are refused
    pub max_queue: usize,
    /// Largest accepted unit count per job
    pub max_units: usize,
    /// How long terminal jobs stay queryable
    pub retention_secs: u64,
    /// Period of the background purge
    pub sweep_interval_secs: u64,
    /// Deadline applied to jobs that do not carry their own
    pub job_deadline_secs: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            max_queue: 100,
            max_units: 200,
            retention_secs: 24 * 60 * 60,
            sweep_interval_secs: 5 * 60,
            job_deadline_secs: None,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }

    pub fn with_max_units(mut self, max_units: usize) -> Self {
        self.max_units = max_units;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_secs = retention.as_secs();
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_job_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.job_deadline_secs = deadline.map(|d| d.as_secs());
        self
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn job_deadline(&self) -> Option<Duration> {
        self.job_deadline_secs.map(Duration::from_secs)
    }
}
