//! Optional learning collaborators: parameter hints before a run and a
//! generation record after it.
//!
//! Both are best-effort. An advisor error means "use the baseline"; a recorder
//! error is logged and otherwise ignored.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use scenecraft_core::params::{MAX_STEPS, MIN_STEPS};
use scenecraft_core::{JobId, ModelClass, SceneTags};

pub const MIN_STEPS_DELTA: i32 = -10;
pub const MAX_STEPS_DELTA: i32 = 15;
pub const MIN_GUIDANCE_DELTA: f32 = -2.0;
pub const MAX_GUIDANCE_DELTA: f32 = 3.0;
/// Guidance bounds after a hint is applied. Lower than the request bound
/// because distilled models legitimately run at 0.
pub const HINT_GUIDANCE_FLOOR: f32 = 0.0;
pub const HINT_GUIDANCE_CEIL: f32 = 20.0;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("learning collaborator error: {0}")]
pub struct LearningError(pub String);

/// Inputs to a hint lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HintQuery {
    pub scene_type: Option<String>,
    pub mood: Option<String>,
    pub genre: Option<String>,
    pub base_steps: u32,
    pub base_guidance: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationHints {
    /// 0.0..=1.0
    pub confidence: f32,
    pub steps_delta: i32,
    pub guidance_delta: f32,
    #[serde(default)]
    pub prompt_additions: Vec<String>,
    #[serde(default)]
    pub negative_additions: Vec<String>,
}

pub trait OptimizationAdvisor: Send + Sync + 'static {
    fn advise(&self, query: &HintQuery) -> Result<OptimizationHints, LearningError>;
}

/// Parameters after hints were applied.
#[derive(Debug, Clone, PartialEq)]
pub struct TunedParams {
    pub steps: u32,
    pub guidance: f32,
    pub prompt: String,
    pub negative_prompt: String,
}

/// Apply `hints` to a baseline. Deltas are clamped regardless of confidence,
/// then the results are clamped to their valid ranges.
pub fn apply_hints(
    hints: &OptimizationHints,
    steps: u32,
    guidance: f32,
    prompt: &str,
    negative_prompt: &str,
) -> TunedParams {
    let steps_delta = hints.steps_delta.clamp(MIN_STEPS_DELTA, MAX_STEPS_DELTA);
    let guidance_delta = if hints.guidance_delta.is_finite() {
        hints
            .guidance_delta
            .clamp(MIN_GUIDANCE_DELTA, MAX_GUIDANCE_DELTA)
    } else {
        0.0
    };

    let tuned_steps = (i64::from(steps) + i64::from(steps_delta))
        .clamp(i64::from(MIN_STEPS), i64::from(MAX_STEPS)) as u32;
    let tuned_guidance = (guidance + guidance_delta).clamp(HINT_GUIDANCE_FLOOR, HINT_GUIDANCE_CEIL);

    TunedParams {
        steps: tuned_steps,
        guidance: tuned_guidance,
        prompt: append_fragments(prompt, &hints.prompt_additions),
        negative_prompt: append_fragments(negative_prompt, &hints.negative_additions),
    }
}

fn append_fragments(base: &str, fragments: &[String]) -> String {
    let mut out = base.to_string();
    let lower = base.to_lowercase();
    for fragment in fragments {
        let fragment = fragment.trim();
        if fragment.is_empty() || lower.contains(&fragment.to_lowercase()) {
            continue;
        }
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(fragment);
    }
    out
}

/// What happened in one successful generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRecord {
    pub job_id: JobId,
    pub prompt: String,
    pub negative_prompt: String,
    pub model: ModelClass,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f32,
    pub seed: u32,
    pub generation_time: f64,
    pub retries: u32,
    pub tags: SceneTags,
    pub filename: String,
}

pub trait GenerationRecorder: Send + Sync + 'static {
    fn record(&self, record: &GenerationRecord) -> Result<(), LearningError>;
}
