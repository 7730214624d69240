//! Job record and lifecycle transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scenecraft_core::{ClientKey, GenerationParams, JobId, ModelClass};

use crate::artifacts::ArtifactRef;

/// Stored error messages are cut to this many characters.
pub const MAX_ERROR_CHARS: usize = 500;

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admitted, waiting in the queue
    Pending,
    /// Claimed by the worker
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a completed job produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub artifact: ArtifactRef,
    pub image_url: String,
    pub seed: u32,
    pub model: ModelClass,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f32,
    pub prompt: String,
    pub negative_prompt: String,
    /// Wall-clock seconds from claim to completion.
    pub generation_time: f64,
    /// Resource retries that were needed.
    pub retries: u32,
}

/// One admitted unit of generation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub params: GenerationParams,
    /// Who submitted it, when known.
    pub client: Option<ClientKey>,
    pub status: JobStatus,
    /// 0..=100
    pub progress: u8,
    pub progress_message: String,
    pub result: Option<GenerationResult>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set by a cancel request; observed by the worker at checkpoints.
    pub cancelled: bool,
}

impl Job {
    pub fn new(id: JobId, params: GenerationParams) -> Self {
        Self {
            id,
            params,
            client: None,
            status: JobStatus::Pending,
            progress: 0,
            progress_message: "Queued".to_string(),
            result: None,
            error: None,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancelled: false,
        }
    }

    pub fn with_client(mut self, client: ClientKey) -> Self {
        self.client = Some(client);
        self
    }

    /// Only finished, uncancelled jobs can receive quality feedback.
    pub fn can_rate(&self) -> bool {
        self.status == JobStatus::Completed && !self.cancelled
    }

    pub(crate) fn mark_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.progress = 0;
        self.progress_message = "Starting generation".to_string();
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn mark_completed(&mut self, result: GenerationResult) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.progress_message = "Complete".to_string();
        self.retry_count = result.retries;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, error: &str) {
        self.status = JobStatus::Failed;
        self.progress_message = "Failed".to_string();
        self.error = Some(truncate_error(error));
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
        self.status = JobStatus::Cancelled;
        self.progress_message = "Cancelled".to_string();
        self.completed_at = Some(Utc::now());
    }
}

/// Failures always carry a non-empty message of bounded length.
pub(crate) fn truncate_error(error: &str) -> String {
    let trimmed = error.trim();
    if trimmed.is_empty() {
        return "unknown error".to_string();
    }
    trimmed.chars().take(MAX_ERROR_CHARS).collect()
}
