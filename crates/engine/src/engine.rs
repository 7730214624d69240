//! Engine facade: admission in front, worker behind.
//!
//! Every shared service is constructed here once and handed out as an `Arc`;
//! nothing in the crate is a global.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use scenecraft_core::{ClientKey, DomainError, GenerationRequest, JobId, ModelClass, QualityMode};

use crate::admission::AdmissionGate;
use crate::budget::{BudgetSnapshot, DeviceProbe, ModelAvailability, ResourceBudgetTracker};
use crate::capability::ExecutionCapability;
use crate::config::EngineConfig;
use crate::content::ContentPolicy;
use crate::jobs::{
    Collaborators, Job, JobQueue, JobRegistry, JobStats, JobStatus, RegistryError, Worker,
    WorkerConfig, WorkerHandle,
};

/// Why a submission was refused. No job exists afterwards.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdmissionError {
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("generation queue is full")]
    QueueFull,

    #[error("prompt blocked by content policy")]
    ContentBlocked { categories: Vec<String> },

    #[error(transparent)]
    Validation(#[from] DomainError),
}

/// Lookup/cancel failures for an existing job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("invalid job id")]
    InvalidId,

    #[error("job not found")]
    NotFound,

    #[error("job already {0}")]
    AlreadyTerminal(JobStatus),
}

/// Accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submitted {
    pub job_id: JobId,
    pub queue_position: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub depth: usize,
    pub capacity: usize,
    pub jobs: JobStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityModeInfo {
    pub id: &'static str,
    pub steps: u32,
    pub guidance: f32,
    pub description: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    #[serde(flatten)]
    pub budget: BudgetSnapshot,
    pub models: Vec<ModelAvailability>,
    pub quality_modes: Vec<QualityModeInfo>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub jobs_removed: usize,
    pub clients_pruned: usize,
}

pub struct GenerationEngine {
    config: EngineConfig,
    gate: Arc<AdmissionGate>,
    registry: Arc<JobRegistry>,
    queue: Arc<JobQueue>,
    budget: ResourceBudgetTracker,
    content: Arc<dyn ContentPolicy>,
    worker_live: Arc<AtomicBool>,
}

impl GenerationEngine {
    pub fn new(
        config: EngineConfig,
        probe: Arc<dyn DeviceProbe>,
        content: Arc<dyn ContentPolicy>,
    ) -> Self {
        let gate = Arc::new(AdmissionGate::new(config.rate_limit_per_minute));
        let registry = Arc::new(JobRegistry::new(gate.clone()));
        let queue = Arc::new(JobQueue::new(config.queue_capacity));
        Self {
            config,
            gate,
            registry,
            queue,
            budget: ResourceBudgetTracker::new(probe),
            content,
            worker_live: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn budget(&self) -> &ResourceBudgetTracker {
        &self.budget
    }

    /// Admit a job: throttle, validate, content check, then enqueue.
    ///
    /// May block for up to the configured enqueue timeout.
    pub fn submit(
        &self,
        client: Option<&ClientKey>,
        request: GenerationRequest,
    ) -> Result<Submitted, AdmissionError> {
        if let Some(client) = client {
            let decision = self.gate.allow(client);
            if !decision.allowed {
                debug!(client = %client, retry_after = decision.retry_after_secs, "rate limited");
                return Err(AdmissionError::RateLimited {
                    retry_after_secs: decision.retry_after_secs,
                });
            }
        }

        let base_size = request
            .model
            .as_deref()
            .and_then(|m| m.trim().parse::<ModelClass>().ok())
            .unwrap_or_else(|| self.budget.recommended_model())
            .profile()
            .default_size;
        let params = request.validate(base_size)?;

        let verdict = self.content.check(&params.prompt);
        if !verdict.allowed {
            info!(categories = ?verdict.blocked_categories, "prompt blocked by content policy");
            return Err(AdmissionError::ContentBlocked {
                categories: verdict.blocked_categories,
            });
        }

        let id = self.gate.generate_id();
        let mut job = Job::new(id.clone(), params);
        if let Some(client) = client {
            job = job.with_client(client.clone());
        }
        if let Err(e) = self.registry.create(job) {
            self.gate.release(&id);
            warn!(job_id = %id, error = %e, "failed to register job");
            return Err(AdmissionError::QueueFull);
        }

        if !self.queue.enqueue(id.clone(), self.config.enqueue_timeout) {
            self.registry.discard(&id);
            self.gate.release(&id);
            warn!(job_id = %id, capacity = self.queue.capacity(), "queue full, job rejected");
            return Err(AdmissionError::QueueFull);
        }

        let queue_position = self.queue.len();
        info!(job_id = %id, queue_position, "job queued");
        Ok(Submitted {
            job_id: id,
            queue_position,
        })
    }

    fn parse_id(&self, token: &str) -> Result<JobId, JobError> {
        if !self.gate.validate_id(token) {
            return Err(JobError::InvalidId);
        }
        token.parse::<JobId>().map_err(|_| JobError::InvalidId)
    }

    /// Snapshot of a job. Malformed tokens are rejected before any lookup.
    pub fn status(&self, token: &str) -> Result<Job, JobError> {
        let id = self.parse_id(token)?;
        self.registry.get(&id).ok_or(JobError::NotFound)
    }

    pub fn cancel(&self, token: &str) -> Result<JobId, JobError> {
        let id = self.parse_id(token)?;
        match self.registry.cancel(&id) {
            Ok(true) => {
                info!(job_id = %id, "cancellation requested");
                Ok(id)
            }
            Ok(false) => {
                let status = self
                    .registry
                    .get(&id)
                    .map(|j| j.status)
                    .ok_or(JobError::NotFound)?;
                Err(JobError::AlreadyTerminal(status))
            }
            Err(RegistryError::NotFound(_)) => Err(JobError::NotFound),
            Err(RegistryError::AlreadyExists(_)) => Err(JobError::NotFound),
        }
    }

    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            depth: self.queue.len(),
            capacity: self.queue.capacity(),
            jobs: self.registry.stats(),
        }
    }

    /// Device, model and quality catalogue. Queries the probe.
    pub fn device_status(&self) -> DeviceStatus {
        DeviceStatus {
            budget: self.budget.snapshot(),
            models: self.budget.models(),
            quality_modes: QualityMode::ALL
                .into_iter()
                .map(|m| QualityModeInfo {
                    id: m.id(),
                    steps: m.steps(),
                    guidance: m.guidance(),
                    description: m.description(),
                })
                .collect(),
        }
    }

    /// Drop expired jobs and idle throttle records.
    pub fn sweep(&self) -> SweepReport {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let report = SweepReport {
            jobs_removed: self.registry.sweep(retention),
            clients_pruned: self.gate.prune_idle_at(Utc::now()),
        };
        if report.jobs_removed > 0 || report.clients_pruned > 0 {
            info!(
                jobs_removed = report.jobs_removed,
                clients_pruned = report.clients_pruned,
                "sweep finished"
            );
        }
        report
    }

    /// Whether a worker thread spawned by this engine is still running.
    pub fn worker_running(&self) -> bool {
        self.worker_live.load(Ordering::Acquire)
    }

    /// Start the single worker thread.
    ///
    /// Fails with [`io::ErrorKind::AlreadyExists`] while a previous worker is
    /// still running; shut it down first.
    pub fn spawn_worker(
        &self,
        capability: Arc<dyn ExecutionCapability>,
        collaborators: Collaborators,
    ) -> io::Result<WorkerHandle> {
        if self
            .worker_live
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("refusing to start a second generation worker");
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a generation worker is already running",
            ));
        }

        Worker::new(
            self.registry.clone(),
            self.queue.clone(),
            self.budget.clone(),
            capability,
            collaborators,
            WorkerConfig::from_engine(&self.config),
        )
        .with_live_flag(self.worker_live.clone())
        .spawn()
    }
}
