//! Generation parameters: the raw request shape and its validated form.
//!
//! Requests are validated exactly once, at admission. Everything downstream of
//! admission works with [`GenerationParams`], whose fields are already range
//! checked and aligned.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::model::{ModelClass, QualityMode};

pub const MAX_PROMPT_CHARS: usize = 2000;
pub const MAX_NEGATIVE_PROMPT_CHARS: usize = 1000;
pub const MAX_TAG_CHARS: usize = 100;
pub const MIN_STEPS: u32 = 1;
pub const MAX_STEPS: u32 = 100;
pub const MIN_GUIDANCE: f32 = 1.0;
pub const MAX_GUIDANCE: f32 = 20.0;
pub const MIN_SIZE: u32 = 256;
pub const MAX_SIZE: u32 = 2048;
/// Output dimensions must be multiples of this.
pub const SIZE_ALIGNMENT: u32 = 8;

pub const ASPECT_RATIOS: [&str; 6] = ["16:9", "9:16", "1:1", "4:3", "3:4", "21:9"];

/// A submission as it arrives from a caller. Nothing here is trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_size")]
    pub width: i64,
    #[serde(default = "default_size")]
    pub height: i64,
    #[serde(default = "default_steps")]
    pub steps: i64,
    #[serde(default = "default_guidance")]
    pub guidance_scale: f64,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub quality_mode: Option<String>,
    #[serde(default)]
    pub scene_type: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub lighting: Option<String>,
    #[serde(default)]
    pub remove_background: bool,
}

fn default_size() -> i64 {
    512
}

fn default_steps() -> i64 {
    25
}

fn default_guidance() -> f64 {
    7.5
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            width: default_size(),
            height: default_size(),
            steps: default_steps(),
            guidance_scale: default_guidance(),
            seed: None,
            aspect_ratio: None,
            model: None,
            quality_mode: None,
            scene_type: None,
            mood: None,
            genre: None,
            style: None,
            lighting: None,
            remove_background: false,
        }
    }

    /// Validate and normalise the request.
    ///
    /// `base_size` is the default edge length of the model that would be used
    /// when the caller does not choose one; an aspect ratio is resolved against
    /// it. Out-of-range numbers are clamped; only a missing/oversized prompt or
    /// an unknown model/quality id is an error.
    pub fn validate(self, base_size: u32) -> DomainResult<GenerationParams> {
        let prompt = self.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(DomainError::validation("prompt is required"));
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(DomainError::validation(format!(
                "prompt too long (max {MAX_PROMPT_CHARS} characters)"
            )));
        }

        let negative_prompt: String = self
            .negative_prompt
            .trim()
            .chars()
            .take(MAX_NEGATIVE_PROMPT_CHARS)
            .collect();

        let (mut width, mut height) = (self.width, self.height);
        if let Some(ratio) = self.aspect_ratio.as_deref() {
            if let Some((w, h)) = aspect_dimensions(ratio, base_size) {
                width = i64::from(w);
                height = i64::from(h);
            }
        }

        let model = match non_empty(self.model) {
            Some(id) => Some(id.parse::<ModelClass>()?),
            None => None,
        };
        let quality_mode = match non_empty(self.quality_mode) {
            Some(id) => Some(id.parse::<QualityMode>()?),
            None => None,
        };

        let guidance = if self.guidance_scale.is_finite() {
            (self.guidance_scale as f32).clamp(MIN_GUIDANCE, MAX_GUIDANCE)
        } else {
            7.5
        };

        Ok(GenerationParams {
            prompt,
            negative_prompt,
            width: clamp_dimension(width),
            height: clamp_dimension(height),
            steps: self.steps.clamp(i64::from(MIN_STEPS), i64::from(MAX_STEPS)) as u32,
            guidance,
            seed: self.seed.map(|s| s.rem_euclid(1 << 32) as u32),
            model,
            quality_mode,
            tags: SceneTags {
                scene_type: tag(self.scene_type),
                mood: tag(self.mood),
                genre: tag(self.genre),
                style: tag(self.style),
                lighting: tag(self.lighting),
            },
            remove_background: self.remove_background,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn tag(value: Option<String>) -> Option<String> {
    non_empty(value).filter(|v| v.chars().count() < MAX_TAG_CHARS)
}

/// Clamp to `[MIN_SIZE, MAX_SIZE]` and floor to [`SIZE_ALIGNMENT`].
pub fn clamp_dimension(value: i64) -> u32 {
    let clamped = value.clamp(i64::from(MIN_SIZE), i64::from(MAX_SIZE)) as u32;
    align_down(clamped)
}

/// Floor `value` to a multiple of [`SIZE_ALIGNMENT`].
pub fn align_down(value: u32) -> u32 {
    (value / SIZE_ALIGNMENT) * SIZE_ALIGNMENT
}

/// Resolve a named aspect ratio to dimensions whose long edge is `base`.
pub fn aspect_dimensions(ratio: &str, base: u32) -> Option<(u32, u32)> {
    let scaled = |num: u32, den: u32| base * num / den;
    match ratio {
        "16:9" => Some((base, scaled(9, 16))),
        "9:16" => Some((scaled(9, 16), base)),
        "1:1" => Some((base, base)),
        "4:3" => Some((base, scaled(3, 4))),
        "3:4" => Some((scaled(3, 4), base)),
        "21:9" => Some((base, scaled(9, 21))),
        _ => None,
    }
}

/// Descriptive tags produced by upstream text analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneTags {
    pub scene_type: Option<String>,
    pub mood: Option<String>,
    pub genre: Option<String>,
    pub style: Option<String>,
    pub lighting: Option<String>,
}

/// Validated generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    pub seed: Option<u32>,
    pub model: Option<ModelClass>,
    pub quality_mode: Option<QualityMode>,
    pub tags: SceneTags,
    pub remove_background: bool,
}
