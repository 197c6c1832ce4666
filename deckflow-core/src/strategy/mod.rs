//! Strategy layer for provider-specific behaviors.
//!
//! Providers differ in how they want a prompt framed and whether they offer a
//! JSON output mode; strategies hide that from the completion client.

pub mod output;

pub use output::{
    detect_output_strategy, CombinedPromptStrategy, JsonModeStrategy, OutputStrategy,
    SystemPromptStrategy,
};
