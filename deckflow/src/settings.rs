//! Layered settings.
//!
//! Precedence, lowest to highest:
//! 1. Built-in defaults of every component config
//! 2. An optional TOML file
//! 3. `DECKFLOW__*` environment variables, `__` separating sections
//!    (`DECKFLOW__GATEWAY__MAX_CONCURRENCY=8`)

use crate::telemetry::LogSettings;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use deckflow_cache::CacheConfig;
use deckflow_core::error::FlowError;
use deckflow_gateway::GatewayConfig;
use deckflow_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of the environment variables read by [`Settings::load`]
pub const ENV_PREFIX: &str = "DECKFLOW";

/// Everything needed to assemble an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheConfig,
    pub gateway: GatewayConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LogSettings,
    /// Remote cache tier; requires the `redis` feature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
}

impl Settings {
    /// Defaults, then `path` (if any), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, FlowError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        Self::finish(builder.add_source(env_source()))
    }

    /// Defaults overlaid with a TOML document. The environment is not read.
    pub fn from_toml_str(toml: &str) -> Result<Self, FlowError> {
        Self::finish(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self, FlowError> {
        let settings: Settings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| FlowError::configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the components cannot run with
    pub fn validate(&self) -> Result<(), FlowError> {
        let checks = [
            (self.gateway.max_concurrency == 0, "gateway.max_concurrency must be at least 1"),
            (self.gateway.max_attempts == 0, "gateway.max_attempts must be at least 1"),
            (self.gateway.call_timeout_secs == 0, "gateway.call_timeout_secs must be at least 1"),
            (self.scheduler.max_workers == 0, "scheduler.max_workers must be at least 1"),
            (self.scheduler.max_queue == 0, "scheduler.max_queue must be at least 1"),
            (self.scheduler.max_units == 0, "scheduler.max_units must be at least 1"),
            (
                self.scheduler.sweep_interval_secs == 0,
                "scheduler.sweep_interval_secs must be at least 1",
            ),
            (
                !(0.0..=1.0).contains(&self.cache.fuzzy_threshold),
                "cache.fuzzy_threshold must be within 0..=1",
            ),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(FlowError::configuration(*message)),
            None => Ok(()),
        }
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
