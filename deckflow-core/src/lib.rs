//! # deckflow core
//!
//! Core abstractions shared by the deckflow crates.
//!
//! This crate provides the provider capability trait, the layer abstraction
//! used to build middleware chains around it, the completion client that turns
//! prompts into provider requests, and the external-interface traits the
//! scheduler consumes (prompt building, credential resolution, document
//! assembly).

pub mod credentials;
pub mod error;
pub mod layer;
pub mod plan;
pub mod prompt;
pub mod provider;
pub mod runtime;
pub mod strategy;
pub mod types;

// Re-exports
pub use credentials::{mask_key, KeyResolver, Secret, StaticKeyResolver};
pub use error::FlowError;
pub use layer::{Layer, LayeredProvider};
pub use plan::{clean_json_response, DeckPlan, DocumentAssembler, PlanAssembler, Slide, SlideKind};
pub use prompt::{DeckPromptBuilder, JobContext, Prompt, PromptBuilder};
pub use provider::{Provider, ProviderFactory};
pub use runtime::{Completion, CompletionClient, CompletionClientBuilder};
pub use strategy::{detect_output_strategy, OutputStrategy};
pub use types::*;

/// Result type alias for deckflow operations
pub type Result<T> = std::result::Result<T, FlowError>;
