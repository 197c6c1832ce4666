//! Tracing subscriber setup.
//!
//! Library crates only emit `tracing` events; installing a subscriber is the
//! host application's call. [`init_tracing`] is the stock way to do it.

use deckflow_core::error::FlowError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable that replaces the configured filter entirely
pub const LOG_ENV: &str = "DECKFLOW_LOG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// trace, debug, info, warn, error or off
    pub level: String,
    pub format: LogFormat,
    /// ANSI colours (text format only)
    pub color: bool,
    /// Per-target levels, e.g. `deckflow_cache = "debug"`
    pub modules: HashMap<String, String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            color: true,
            modules: HashMap::new(),
        }
    }
}

/// Install the global subscriber.
///
/// `DECKFLOW_LOG`, when set, takes precedence over `settings.level` and
/// `settings.modules`. Fails if a global subscriber is already installed.
pub fn init_tracing(settings: &LogSettings) -> Result<(), FlowError> {
    let env_filter = std::env::var(LOG_ENV).ok();
    let filter = build_filter(settings, env_filter.as_deref())?;
    let registry = Registry::default().with(filter);

    let installed = match settings.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339()),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(settings.color),
            )
            .try_init(),
    };

    installed.map_err(|e| FlowError::configuration(format!("failed to install subscriber: {}", e)))
}

fn build_filter(settings: &LogSettings, env_filter: Option<&str>) -> Result<EnvFilter, FlowError> {
    if let Some(directives) = env_filter.filter(|d| !d.trim().is_empty()) {
        return EnvFilter::try_new(directives)
            .map_err(|e| FlowError::configuration(format!("invalid {}: {}", LOG_ENV, e)));
    }

    let level = settings.level.trim();
    if level.eq_ignore_ascii_case("off") {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::try_new(level)
        .map_err(|e| FlowError::configuration(format!("invalid log level '{}': {}", level, e)))?;

    let mut modules: Vec<_> = settings.modules.iter().collect();
    modules.sort();
    for (target, target_level) in modules {
        let directive: Directive = format!("{}={}", target, target_level).parse().map_err(|e| {
            FlowError::configuration(format!("invalid log directive for '{}': {}", target, e))
        })?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}
