//! Resource retry policy.
//!
//! Retries after a resource-exhaustion failure shrink the request instead of
//! waiting: each retry halves both edges, floored to the alignment and never
//! below the minimum edge.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed per job (0 = fail on the first exhaustion).
    pub max_retries: u32,
    pub min_dimension: u32,
    pub alignment: u32,
}

/// What to do after a resource-exhaustion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { width: u32, height: u32 },
    GiveUp,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_dimension: 256,
            alignment: 8,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_resource_retries,
            min_dimension: config.min_dimension,
            alignment: config.dimension_alignment.max(1),
        }
    }

    /// Decide after attempt `attempt` (0-based) failed at `width`x`height`.
    pub fn next(&self, attempt: u32, width: u32, height: u32) -> RetryDecision {
        if attempt >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            width: self.downscale(width),
            height: self.downscale(height),
        }
    }

    pub fn downscale(&self, edge: u32) -> u32 {
        let halved = (edge / 2) / self.alignment * self.alignment;
        halved.max(self.min_dimension)
    }
}
