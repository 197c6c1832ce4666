//! Structured document plan assembled from a finished job's unit outputs.

use crate::error::FlowError;
use crate::prompt::JobContext;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Layout of a single slide
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SlideKind {
    #[default]
    Bullets,
    ImageWithText,
    TwoColumn,
    Timeline,
    Comparison,
    Quote,
    Ending,
}

/// One slide of the plan
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Slide {
    #[serde(rename = "type", default)]
    pub kind: SlideKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bullets: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtitle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_keyword: Option<String>,
}

/// The whole document plan handed to a renderer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeckPlan {
    pub title: String,
    pub subtitle: String,
    pub slides: Vec<Slide>,
}

/// Consumes a finished job's ordered outputs and produces an artifact.
pub trait DocumentAssembler: Send + Sync {
    type Output;

    fn assemble(&self, ctx: &JobContext, outputs: &[String]) -> Result<Self::Output, FlowError>;
}

/// Builds a [`DeckPlan`] from per-slide JSON outputs.
///
/// Only the last slide may be an ending slide; earlier ones are demoted to
/// bullets.
#[derive(Debug, Clone, Default)]
pub struct PlanAssembler;

impl DocumentAssembler for PlanAssembler {
    type Output = DeckPlan;

    fn assemble(&self, ctx: &JobContext, outputs: &[String]) -> Result<DeckPlan, FlowError> {
        let last = outputs.len().saturating_sub(1);
        let mut slides = Vec::with_capacity(outputs.len());

        for (index, raw) in outputs.iter().enumerate() {
            let cleaned = clean_json_response(raw);
            let mut slide: Slide = serde_json::from_str(&cleaned).map_err(|e| {
                FlowError::Serialization(format!("slide {}: {}", index + 1, e))
            })?;

            if slide.kind == SlideKind::Ending && index != last {
                slide.kind = SlideKind::Bullets;
            }
            slides.push(slide);
        }

        Ok(DeckPlan {
            title: ctx.topic.trim().to_string(),
            subtitle: ctx.audience.trim().to_string(),
            slides,
        })
    }
}

/// Strip the usual wrapping models put around a JSON object.
///
/// Handles markdown fences, leading/trailing prose, typographic quotes and a
/// byte-order mark.
pub fn clean_json_response(content: &str) -> String {
    let mut text = content.trim().trim_start_matches('\u{feff}').trim();

    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    let mut text = text.trim();

    if let (Some(first), Some(last)) = (text.find('{'), text.rfind('}')) {
        if first < last {
            text = &text[first..=last];
        }
    }

    text.replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}
