use chrono::{DateTime, Utc};
use serde::Serialize;

use scenecraft_engine::{
    ArtifactInfo, DeviceStatus, GenerationResult, Job, JobStatus, QueueStatus, Submitted,
    WorkerStats,
};

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub job_id: String,
    pub status: &'static str,
    pub message: String,
    pub queue_position: usize,
}

impl From<Submitted> for GenerateResponse {
    fn from(s: Submitted) -> Self {
        Self {
            job_id: s.job_id.to_string(),
            status: "queued",
            message: format!("Job queued at position {}", s.queue_position),
            queue_position: s.queue_position,
        }
    }
}

/// Public view of a finished generation. The server-side path stays private.
#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub image_url: String,
    pub filename: String,
    pub seed: u32,
    pub model: &'static str,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f32,
    pub prompt: String,
    pub negative_prompt: String,
    pub generation_time: f64,
    pub retries: u32,
}

impl From<GenerationResult> for ResultResponse {
    fn from(r: GenerationResult) -> Self {
        Self {
            image_url: r.image_url,
            filename: r.artifact.filename,
            seed: r.seed,
            model: r.model.id(),
            width: r.width,
            height: r.height,
            steps: r.steps,
            guidance_scale: r.guidance_scale,
            prompt: r.prompt,
            negative_prompt: r.negative_prompt,
            generation_time: r.generation_time,
            retries: r.retries,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub progress_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub can_rate: bool,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let can_rate = job.can_rate();
        Self {
            job_id: job.id.to_string(),
            status: job.status,
            progress: job.progress,
            progress_message: job.progress_message,
            result: job.result.map(ResultResponse::from),
            error: job.error,
            retry_count: job.retry_count,
            created_at: job.created_at,
            completed_at: job.completed_at,
            can_rate,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub device: DeviceStatus,
    pub queue: QueueStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerStats>,
}

#[derive(Debug, Serialize)]
pub struct ImageEntry {
    pub filename: String,
    pub url: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

impl From<ArtifactInfo> for ImageEntry {
    fn from(info: ArtifactInfo) -> Self {
        Self {
            url: format!("/api/image/{}", info.filename),
            filename: info.filename,
            size_bytes: info.size_bytes,
            modified_at: info.modified_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImagesResponse {
    pub images: Vec<ImageEntry>,
    pub count: usize,
}
