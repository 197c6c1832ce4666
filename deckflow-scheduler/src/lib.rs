//! # deckflow scheduler
//!
//! Accepts generation jobs, expands each into ordered sub-requests, runs
//! them through the completion gateway (consulting the cache first), and
//! tracks per-job progress until the job completes, fails or is cancelled.
//!
//! ```ignore
//! let scheduler = Scheduler::new(config, gateway, cache, prompts, keys);
//! scheduler.start();
//!
//! let id = scheduler.submit(JobSpec::new("Rust ownership", 8, provider), 0)?;
//! let snapshot = scheduler.status(&id)?;
//! ```

pub mod config;
pub mod job;
pub mod queue;
mod registry;
pub mod scheduler;
mod worker;

// Re-exports
pub use config::SchedulerConfig;
pub use job::{
    JobFilter, JobId, JobSnapshot, JobSpec, JobStatus, Progress, SubRequest, UnitSnapshot,
    UnitStatus,
};
pub use queue::JobQueue;
pub use scheduler::{Scheduler, SchedulerMetrics};
