//! Prompt construction for job units.

use crate::plan::Slide;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// The exact text sent for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    /// Prompt without a system part
    pub fn user(user: impl Into<String>) -> Self {
        Self::new(String::new(), user)
    }
}

/// Job-level facts a prompt builder may draw on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    pub topic: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub description: String,
    pub unit_count: usize,
    #[serde(default)]
    pub template_id: Option<String>,
}

/// Produces the prompt for one unit of a job.
///
/// Must be a pure function of its inputs: the cache keys derived from the
/// prompt are only stable if the same unit always yields the same text.
pub trait PromptBuilder: Send + Sync + 'static {
    fn build(&self, ctx: &JobContext, unit_index: usize) -> Prompt;
}

impl<F> PromptBuilder for F
where
    F: Fn(&JobContext, usize) -> Prompt + Send + Sync + 'static,
{
    fn build(&self, ctx: &JobContext, unit_index: usize) -> Prompt {
        self(ctx, unit_index)
    }
}

static SLIDE_SCHEMA: Lazy<String> = Lazy::new(|| {
    let schema = schemars::schema_for!(Slide);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
});

/// Default builder: one slide per unit, answered as a single JSON object.
#[derive(Debug, Clone)]
pub struct DeckPromptBuilder {
    /// Description is truncated to this many characters inside each prompt
    max_description_chars: usize,
}

impl DeckPromptBuilder {
    pub fn new() -> Self {
        Self {
            max_description_chars: 4000,
        }
    }

    pub fn with_max_description_chars(mut self, max: usize) -> Self {
        self.max_description_chars = max;
        self
    }

    fn system_prompt() -> String {
        format!(
            "You are an expert presentation designer. You turn a topic into \
             informative, well-structured slides.\n\n\
             Output rules:\n\
             1. Return exactly one JSON object and nothing else\n\
             2. No markdown code fences, no commentary\n\
             3. The object must match this schema:\n{}\n\n\
             Content rules:\n\
             - \"bullets\" slides carry 4-5 points of 40-60 words, each naming a concept, \
             explaining it and stating its value\n\
             - \"image_with_text\" slides carry 150-200 words of text and an English \
             image_keyword\n\
             - \"timeline\" slides carry 4-5 dated or ordered steps\n\
             - Prefer concrete figures and examples over adjectives",
            SLIDE_SCHEMA.as_str()
        )
    }
}

impl Default for DeckPromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder for DeckPromptBuilder {
    fn build(&self, ctx: &JobContext, unit_index: usize) -> Prompt {
        let number = unit_index + 1;
        let total = ctx.unit_count;

        let mut user = format!(
            "Topic: {}\nAudience: {}\nWrite slide {} of {}.",
            ctx.topic.trim(),
            if ctx.audience.trim().is_empty() {
                "general audience"
            } else {
                ctx.audience.trim()
            },
            number,
            total
        );

        if unit_index == 0 {
            user.push_str("\nThis is the opening slide: introduce the topic with a strong hook.");
        } else if number == total {
            user.push_str("\nThis is the closing slide: use type \"ending\" with a short closing line.");
        } else {
            user.push_str("\nDo not use type \"ending\" for this slide.");
        }

        let description = ctx.description.trim();
        if !description.is_empty() {
            let clipped: String = description.chars().take(self.max_description_chars).collect();
            user.push_str("\n\nReference material:\n");
            user.push_str(&clipped);
        }

        Prompt::new(Self::system_prompt(), user)
    }
}
