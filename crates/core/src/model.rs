//! Model and quality catalogues.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Synthesis model family. Each class carries its own resource profile and
/// output limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClass {
    Sd15,
    Sdxl,
    SdxlTurbo,
    SdxlLightning,
}

/// Static properties of a [`ModelClass`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelProfile {
    pub name: &'static str,
    /// Minimum device memory (MiB) for the model to be usable on an accelerator.
    pub min_memory_mib: u64,
    /// Memory held by the loaded weights (MiB), independent of output size.
    pub weights_mib: u64,
    /// Activation memory (MiB) per output megapixel.
    pub mib_per_megapixel: u64,
    pub default_size: u32,
    pub max_size: u32,
    pub fixed_steps: Option<u32>,
    pub fixed_guidance: Option<f32>,
}

impl ModelClass {
    pub const ALL: [ModelClass; 4] = [
        ModelClass::Sd15,
        ModelClass::Sdxl,
        ModelClass::SdxlTurbo,
        ModelClass::SdxlLightning,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            ModelClass::Sd15 => "sd15",
            ModelClass::Sdxl => "sdxl",
            ModelClass::SdxlTurbo => "sdxl_turbo",
            ModelClass::SdxlLightning => "sdxl_lightning",
        }
    }

    pub fn profile(&self) -> ModelProfile {
        match self {
            ModelClass::Sd15 => ModelProfile {
                name: "Stable Diffusion 1.5",
                min_memory_mib: 4 * 1024,
                weights_mib: 2_600,
                mib_per_megapixel: 3_000,
                default_size: 512,
                max_size: 768,
                fixed_steps: None,
                fixed_guidance: None,
            },
            ModelClass::Sdxl => ModelProfile {
                name: "SDXL Base",
                min_memory_mib: 8 * 1024,
                weights_mib: 6_900,
                mib_per_megapixel: 4_000,
                default_size: 1024,
                max_size: 1024,
                fixed_steps: None,
                fixed_guidance: None,
            },
            ModelClass::SdxlTurbo => ModelProfile {
                name: "SDXL Turbo",
                min_memory_mib: 8 * 1024,
                weights_mib: 6_900,
                mib_per_megapixel: 4_000,
                default_size: 512,
                max_size: 512,
                fixed_steps: Some(4),
                fixed_guidance: Some(0.0),
            },
            ModelClass::SdxlLightning => ModelProfile {
                name: "SDXL Lightning",
                min_memory_mib: 8 * 1024,
                weights_mib: 7_100,
                mib_per_megapixel: 4_000,
                default_size: 1024,
                max_size: 1024,
                fixed_steps: Some(4),
                fixed_guidance: None,
            },
        }
    }

    /// Pick a model for a device with `total_mib` of memory.
    pub fn recommended_for(total_mib: u64) -> ModelClass {
        if total_mib >= 10 * 1024 {
            ModelClass::Sdxl
        } else if total_mib >= 8 * 1024 {
            ModelClass::SdxlTurbo
        } else {
            ModelClass::Sd15
        }
    }
}

impl core::fmt::Display for ModelClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ModelClass {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelClass::ALL
            .into_iter()
            .find(|m| m.id() == s)
            .ok_or_else(|| DomainError::unknown("model", s))
    }
}

/// Speed/quality trade-off selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMode {
    Fast,
    #[default]
    Balanced,
    Quality,
    Ultra,
}

impl QualityMode {
    pub const ALL: [QualityMode; 4] = [
        QualityMode::Fast,
        QualityMode::Balanced,
        QualityMode::Quality,
        QualityMode::Ultra,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            QualityMode::Fast => "fast",
            QualityMode::Balanced => "balanced",
            QualityMode::Quality => "quality",
            QualityMode::Ultra => "ultra",
        }
    }

    pub fn steps(&self) -> u32 {
        match self {
            QualityMode::Fast => 8,
            QualityMode::Balanced => 20,
            QualityMode::Quality => 30,
            QualityMode::Ultra => 50,
        }
    }

    pub fn guidance(&self) -> f32 {
        match self {
            QualityMode::Fast => 5.0,
            QualityMode::Balanced => 7.0,
            QualityMode::Quality => 7.5,
            QualityMode::Ultra => 8.0,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            QualityMode::Fast => "very fast, lower detail",
            QualityMode::Balanced => "balanced speed and detail",
            QualityMode::Quality => "high detail",
            QualityMode::Ultra => "maximum detail, slowest",
        }
    }
}

impl FromStr for QualityMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QualityMode::ALL
            .into_iter()
            .find(|q| q.id() == s)
            .ok_or_else(|| DomainError::unknown("quality mode", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_ids_round_trip_through_from_str() {
        for model in ModelClass::ALL {
            assert_eq!(model.id().parse::<ModelClass>().unwrap(), model);
        }
        assert!("sd3".parse::<ModelClass>().is_err());
    }

    #[test]
    fn recommendation_follows_device_memory() {
        assert_eq!(ModelClass::recommended_for(12 * 1024), ModelClass::Sdxl);
        assert_eq!(ModelClass::recommended_for(8 * 1024), ModelClass::SdxlTurbo);
        assert_eq!(ModelClass::recommended_for(6 * 1024), ModelClass::Sd15);
        assert_eq!(ModelClass::recommended_for(0), ModelClass::Sd15);
    }

    #[test]
    fn turbo_pins_steps_and_guidance() {
        let p = ModelClass::SdxlTurbo.profile();
        assert_eq!(p.fixed_steps, Some(4));
        assert_eq!(p.fixed_guidance, Some(0.0));
        assert_eq!(p.max_size, 512);
    }

    #[test]
    fn unknown_quality_mode_is_rejected() {
        assert_eq!("ultra".parse::<QualityMode>().unwrap(), QualityMode::Ultra);
        assert!(matches!(
            "extreme".parse::<QualityMode>(),
            Err(DomainError::Unknown { kind: "quality mode", .. })
        ));
    }
}
