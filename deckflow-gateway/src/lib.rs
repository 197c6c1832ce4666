//! # deckflow gateway
//!
//! Turns a job's [`ProviderSpec`](deckflow_core::ProviderSpec) into a ready
//! completion client, and runs a job's units under the process-wide
//! concurrency ceiling with batching for large jobs.

pub mod batch;
pub mod config;
pub mod gateway;
pub mod metrics;

// Re-exports
pub use batch::plan_batches;
pub use config::GatewayConfig;
pub use gateway::CompletionGateway;
pub use metrics::GatewayMetrics;
