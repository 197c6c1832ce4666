//! Runtime layer for deckflow.
//!
//! Sits between the prompt-level API used by the scheduler and the
//! request-level [`Provider`](crate::Provider) interface:
//! - frames a [`Prompt`](crate::Prompt) for the provider via an output strategy
//! - holds the provider stack built from layers (logging, retry, limits, ...)
//! - extracts the generated text from the response

pub mod client;

pub use client::{Completion, CompletionClient, CompletionClientBuilder};
