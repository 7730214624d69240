//! The synthesis backend seam.
//!
//! The engine treats image synthesis as an opaque, blocking call. It only
//! distinguishes "ran out of device memory" from every other failure, because
//! only the former is worth retrying with a smaller request.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use scenecraft_core::{JobId, ModelClass};

/// One execution attempt, fully resolved (model chosen, sizes final).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub job_id: JobId,
    pub model: ModelClass,
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    pub seed: u32,
    pub remove_background: bool,
}

/// Encoded image returned by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisOutput {
    /// PNG bytes.
    pub image: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// What the backend should do after reporting a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    /// The job was cancelled; stop if the backend supports early exit.
    Cancel,
}

/// Receives per-step progress from inside an execution.
pub trait ProgressObserver {
    fn on_step(&self, step: u32, total: u32) -> Checkpoint;
}

/// Observer that ignores progress (useful for warm-up runs).
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_step(&self, _step: u32, _total: u32) -> Checkpoint {
        Checkpoint::Continue
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The backend ran out of device memory for this request.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The backend stopped early because an observer returned `Cancel`.
    #[error("interrupted by cancellation")]
    Interrupted,

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl ExecutionError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }
}

/// Opaque image synthesis.
///
/// Implementations are driven by exactly one worker thread; they never see
/// two concurrent `run` calls from the engine.
pub trait ExecutionCapability: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Run one generation. Blocks for the whole duration.
    fn run(
        &self,
        request: &SynthesisRequest,
        progress: &dyn ProgressObserver,
    ) -> Result<SynthesisOutput, ExecutionError>;

    /// Release cached device allocations before a smaller retry.
    fn clear_cache(&self) {}

    /// Drop and reload model state from scratch.
    fn reload(&self) -> Result<(), ExecutionError> {
        Ok(())
    }
}
