//! # deckflow
//!
//! Prioritised, cached, concurrency-bounded AI generation jobs.
//!
//! A job ("eight slides about Rust ownership") is expanded into one
//! completion request per unit. Units are looked up in a two-tier cache,
//! dispatched through a gateway that enforces one process-wide concurrency
//! ceiling with retry, timeouts and per-endpoint circuit breakers, and their
//! outputs are collected in unit order into the job's result.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! deckflow = { version = "0.1", features = ["providers"] }
//! ```
//!
//! ```ignore
//! use deckflow::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> deckflow::Result<()> {
//! let settings = Settings::load(None)?;
//! init_tracing(&settings.logging)?;
//!
//! let keys = StaticKeyResolver::new().with_fallback(std::env::var("OPENAI_API_KEY").unwrap_or_default());
//! let engine = Engine::builder(settings, Arc::new(keys)).build()?;
//! engine.start();
//!
//! let id = engine.submit_job(JobSpec::new("Rust ownership", 8, ProviderSpec::openai("gpt-4o-mini")), 0)?;
//! let snapshot = engine.get_job_status(&id)?;
//! println!("{}/{}", snapshot.progress.completed, snapshot.progress.total);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: `providers`
//! - `providers`: built-in OpenAI, DeepSeek and Anthropic providers
//! - `redis`: Redis-backed remote cache tier (`redis_url` setting)
//! - `full`: all features enabled

pub mod engine;
pub mod settings;
pub mod telemetry;

// Re-export core types and traits
pub use deckflow_core::*;

/// Completion provider implementations.
#[cfg(feature = "deckflow-provider")]
pub mod provider {
    pub use deckflow_provider::*;
}

/// Built-in middleware layers.
pub mod layer {
    pub use deckflow_layer::*;
}

/// Two-tier result cache.
pub mod cache {
    pub use deckflow_cache::*;
}

/// Completion gateway.
pub mod gateway {
    pub use deckflow_gateway::*;
}

/// Job scheduler.
pub mod scheduler {
    pub use deckflow_scheduler::*;
}

pub use engine::{Engine, EngineBuilder, EngineMetrics};
pub use settings::Settings;
pub use telemetry::{init_tracing, LogFormat, LogSettings};

/// Prelude module for convenient imports
pub mod prelude {
    //! The types most callers need.
    //!
    //! ```
    //! use deckflow::prelude::*;
    //! ```

    pub use crate::{
        init_tracing, DeckPlan, Engine, EngineMetrics, FlowError, KeyResolver, Prompt,
        PromptBuilder, ProviderKind, ProviderSpec, Result, Secret, Settings, StaticKeyResolver,
    };
    pub use deckflow_scheduler::{JobFilter, JobId, JobSnapshot, JobSpec, JobStatus};
}
