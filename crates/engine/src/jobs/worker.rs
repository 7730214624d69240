//! The generation worker.
//!
//! Exactly one worker drains the queue. It owns the execution backend for its
//! whole life, so the backend never sees concurrent runs.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scenecraft_core::{JobId, ModelClass};

use super::queue::JobQueue;
use super::registry::JobRegistry;
use super::retry::{RetryDecision, RetryPolicy};
use super::types::{GenerationResult, Job};
use crate::artifacts::ArtifactStore;
use crate::budget::ResourceBudgetTracker;
use crate::capability::{
    Checkpoint, ExecutionCapability, ExecutionError, ProgressObserver, SynthesisRequest,
};
use crate::config::EngineConfig;
use crate::learning::{
    apply_hints, GenerationRecord, GenerationRecorder, HintQuery, OptimizationAdvisor, TunedParams,
};

/// Share of the progress bar given to the backend; the rest covers saving.
const EXECUTION_PROGRESS_SPAN: u32 = 80;

/// Services the worker calls besides the backend.
#[derive(Clone)]
pub struct Collaborators {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub advisor: Option<Arc<dyn OptimizationAdvisor>>,
    pub recorder: Option<Arc<dyn GenerationRecorder>>,
}

impl Collaborators {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            artifacts,
            advisor: None,
            recorder: None,
        }
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn OptimizationAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn GenerationRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Thread name, also used in logs.
    pub name: String,
    pub dequeue_timeout: Duration,
    pub failure_reload_threshold: u32,
    pub retry: RetryPolicy,
}

impl WorkerConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            name: "generation-worker".to_string(),
            dequeue_timeout: config.dequeue_timeout,
            failure_reload_threshold: config.failure_reload_threshold.max(1),
            retry: RetryPolicy::from_config(config),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_engine(&EngineConfig::default())
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub resource_retries: u64,
    pub backend_reloads: u64,
    pub consecutive_failures: u32,
    pub busy: bool,
    pub uptime_secs: u64,
}

/// How one dequeued job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    Cancelled,
    /// The id no longer referred to a pending job.
    Skipped,
}

/// Handle to control a running worker.
///
/// Dropping the handle also stops the worker once its current job ends.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the current job to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().clone()
    }
}

/// Marks a worker as live until the worker value is dropped, which happens
/// when its thread ends.
struct LiveFlag(Arc<AtomicBool>);

impl Drop for LiveFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reports backend steps into the registry and relays cancellation back.
struct RegistryProgress<'a> {
    registry: &'a JobRegistry,
    id: &'a JobId,
}

impl ProgressObserver for RegistryProgress<'_> {
    fn on_step(&self, step: u32, total: u32) -> Checkpoint {
        let total = total.max(1);
        let percent = step.min(total) * EXECUTION_PROGRESS_SPAN / total;
        self.registry
            .update_progress(self.id, percent as u8, format!("Step {}/{total}", step.min(total)));

        if self.registry.is_cancelled(self.id) {
            Checkpoint::Cancel
        } else {
            Checkpoint::Continue
        }
    }
}

pub struct Worker {
    registry: Arc<JobRegistry>,
    queue: Arc<JobQueue>,
    budget: ResourceBudgetTracker,
    capability: Arc<dyn ExecutionCapability>,
    collaborators: Collaborators,
    config: WorkerConfig,
    consecutive_failures: u32,
    needs_reload: bool,
    stats: Arc<Mutex<WorkerStats>>,
    live: Option<LiveFlag>,
}

impl Worker {
    pub fn new(
        registry: Arc<JobRegistry>,
        queue: Arc<JobQueue>,
        budget: ResourceBudgetTracker,
        capability: Arc<dyn ExecutionCapability>,
        collaborators: Collaborators,
        config: WorkerConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            budget,
            capability,
            collaborators,
            config,
            consecutive_failures: 0,
            needs_reload: false,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
            live: None,
        }
    }

    /// Clear `flag` once this worker is gone.
    pub(crate) fn with_live_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.live = Some(LiveFlag(flag));
        self
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().clone()
    }

    /// Spawn the worker in a background thread.
    pub fn spawn(self) -> io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = self.stats.clone();

        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || worker_loop(self, shutdown_rx))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }

    /// Run one dequeued job to a terminal state.
    pub fn process_job(&mut self, id: &JobId) -> JobOutcome {
        if self.needs_reload {
            self.reload_backend();
        }

        let Some(job) = self.registry.claim(id) else {
            let outcome = if self.registry.mark_cancelled(id) {
                debug!(job_id = %id, "job cancelled before it was claimed");
                JobOutcome::Cancelled
            } else {
                warn!(job_id = %id, "dequeued job is no longer pending");
                JobOutcome::Skipped
            };
            self.record_outcome(outcome);
            return outcome;
        };

        self.stats.lock().busy = true;
        let outcome = self.run_job(&job);
        self.stats.lock().busy = false;
        self.record_outcome(outcome);
        outcome
    }

    fn run_job(&mut self, job: &Job) -> JobOutcome {
        let started = Instant::now();
        let id = &job.id;
        let params = &job.params;

        let model = params
            .model
            .unwrap_or_else(|| self.budget.recommended_model());
        let profile = model.profile();

        let (mut steps, mut guidance) = match params.quality_mode {
            Some(mode) => (mode.steps(), mode.guidance()),
            None => (params.steps, params.guidance),
        };
        let mut prompt = params.prompt.clone();
        let mut negative_prompt = params.negative_prompt.clone();

        if profile.fixed_steps.is_none() {
            if let Some(tuned) = self.advise(job, steps, guidance) {
                steps = tuned.steps;
                guidance = tuned.guidance;
                prompt = tuned.prompt;
                negative_prompt = tuned.negative_prompt;
            }
        }
        if let Some(fixed) = profile.fixed_steps {
            steps = fixed;
        }
        if let Some(fixed) = profile.fixed_guidance {
            guidance = fixed;
        }

        let (mut width, mut height) = (params.width, params.height);
        let seed = params.seed.unwrap_or_else(random_seed);

        if self.registry.is_cancelled(id) {
            return self.finish_cancelled(id);
        }
        self.registry
            .update_progress(id, 0, format!("Generating with {}", profile.name));

        let registry = self.registry.clone();
        let observer = RegistryProgress {
            registry: &registry,
            id,
        };

        let mut attempt: u32 = 0;
        let output = loop {
            if self.registry.is_cancelled(id) {
                return self.finish_cancelled(id);
            }

            // Other processes share the device, so the budget is re-read
            // before every attempt.
            let estimate = self.budget.estimate(width, height, model);
            let available = self.budget.available();
            let safe = profile.default_size;
            if estimate > available && (width > safe || height > safe) {
                warn!(
                    job_id = %id,
                    attempt,
                    estimate,
                    available,
                    width,
                    height,
                    safe_size = safe,
                    "estimate exceeds available budget, downscaling"
                );
                width = width.min(safe);
                height = height.min(safe);
            }

            let request = SynthesisRequest {
                job_id: id.clone(),
                model,
                prompt: prompt.clone(),
                negative_prompt: negative_prompt.clone(),
                width,
                height,
                steps,
                guidance,
                seed,
                remove_background: params.remove_background,
            };
            debug!(
                job_id = %id,
                attempt,
                model = %model,
                width,
                height,
                steps,
                estimate,
                available,
                "starting attempt"
            );

            match self.capability.run(&request, &observer) {
                Ok(output) => break output,
                Err(ExecutionError::Interrupted) if self.registry.is_cancelled(id) => {
                    return self.finish_cancelled(id);
                }
                Err(ExecutionError::ResourceExhausted(reason)) => {
                    match self.config.retry.next(attempt, width, height) {
                        RetryDecision::Retry {
                            width: next_width,
                            height: next_height,
                        } => {
                            attempt += 1;
                            warn!(
                                job_id = %id,
                                attempt,
                                from_width = width,
                                from_height = height,
                                width = next_width,
                                height = next_height,
                                reason = %reason,
                                "resource exhausted, retrying smaller"
                            );
                            self.registry.record_retry(id, next_width, next_height);
                            self.stats.lock().resource_retries += 1;
                            self.capability.clear_cache();
                            width = next_width;
                            height = next_height;
                        }
                        RetryDecision::GiveUp => {
                            let message = format!(
                                "Out of device memory after {attempt} retries at {width}x{height}: {reason}"
                            );
                            return self.finish_failed(id, &message, false);
                        }
                    }
                }
                Err(err) => return self.finish_failed(id, &err.to_string(), true),
            }
        };

        if self.registry.is_cancelled(id) {
            return self.finish_cancelled(id);
        }

        self.registry.update_progress(id, 85, "Saving image");
        let artifact = match self.collaborators.artifacts.persist(id, &output) {
            Ok(artifact) => artifact,
            Err(e) => return self.finish_failed(id, &format!("failed to save image: {e}"), false),
        };
        self.registry.update_progress(id, 95, "Finalizing");

        let result = GenerationResult {
            image_url: format!("/api/image/{}", artifact.filename),
            artifact,
            seed,
            model,
            width: output.width,
            height: output.height,
            steps,
            guidance_scale: guidance,
            prompt,
            negative_prompt,
            generation_time: started.elapsed().as_secs_f64(),
            retries: attempt,
        };

        if !self.registry.complete(id, result.clone()) {
            return self.finish_cancelled(id);
        }
        self.consecutive_failures = 0;

        info!(
            job_id = %id,
            model = %model,
            width = result.width,
            height = result.height,
            steps,
            retries = attempt,
            generation_time = result.generation_time,
            "generation completed"
        );

        self.record_generation(job, model, &result);
        JobOutcome::Completed
    }

    fn advise(&self, job: &Job, steps: u32, guidance: f32) -> Option<TunedParams> {
        let advisor = self.collaborators.advisor.as_ref()?;
        let tags = &job.params.tags;
        let query = HintQuery {
            scene_type: tags.scene_type.clone(),
            mood: tags.mood.clone(),
            genre: tags.genre.clone(),
            base_steps: steps,
            base_guidance: guidance,
        };

        match advisor.advise(&query) {
            Ok(hints) => {
                let tuned = apply_hints(
                    &hints,
                    steps,
                    guidance,
                    &job.params.prompt,
                    &job.params.negative_prompt,
                );
                debug!(
                    job_id = %job.id,
                    confidence = hints.confidence,
                    steps = tuned.steps,
                    guidance = tuned.guidance,
                    "applied optimization hints"
                );
                Some(tuned)
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "optimization hints unavailable, using baseline");
                None
            }
        }
    }

    fn record_generation(&self, job: &Job, model: ModelClass, result: &GenerationResult) {
        let Some(recorder) = &self.collaborators.recorder else {
            return;
        };
        let record = GenerationRecord {
            job_id: job.id.clone(),
            prompt: result.prompt.clone(),
            negative_prompt: result.negative_prompt.clone(),
            model,
            width: result.width,
            height: result.height,
            steps: result.steps,
            guidance_scale: result.guidance_scale,
            seed: result.seed,
            generation_time: result.generation_time,
            retries: result.retries,
            tags: job.params.tags.clone(),
            filename: result.artifact.filename.clone(),
        };
        if let Err(e) = recorder.record(&record) {
            warn!(job_id = %job.id, error = %e, "failed to record generation");
        }
    }

    fn finish_failed(&mut self, id: &JobId, message: &str, backend_failure: bool) -> JobOutcome {
        if backend_failure {
            self.consecutive_failures += 1;
            if self.consecutive_failures >= self.config.failure_reload_threshold {
                self.needs_reload = true;
                warn!(
                    failures = self.consecutive_failures,
                    "consecutive failure threshold reached, backend reload scheduled"
                );
            }
        }

        if !self.registry.fail(id, message) && self.registry.mark_cancelled(id) {
            return JobOutcome::Cancelled;
        }
        error!(job_id = %id, error = %message, "generation failed");
        JobOutcome::Failed
    }

    fn finish_cancelled(&self, id: &JobId) -> JobOutcome {
        self.registry.mark_cancelled(id);
        info!(job_id = %id, "generation cancelled");
        JobOutcome::Cancelled
    }

    fn reload_backend(&mut self) {
        warn!(
            backend = self.capability.name(),
            failures = self.consecutive_failures,
            "reloading backend after repeated failures"
        );
        match self.capability.reload() {
            Ok(()) => info!(backend = self.capability.name(), "backend reloaded"),
            Err(e) => error!(backend = self.capability.name(), error = %e, "backend reload failed"),
        }
        self.needs_reload = false;
        self.consecutive_failures = 0;
        self.stats.lock().backend_reloads += 1;
    }

    fn record_outcome(&self, outcome: JobOutcome) {
        let mut s = self.stats.lock();
        s.consecutive_failures = self.consecutive_failures;
        match outcome {
            JobOutcome::Completed => s.jobs_succeeded += 1,
            JobOutcome::Failed => s.jobs_failed += 1,
            JobOutcome::Cancelled => s.jobs_cancelled += 1,
            JobOutcome::Skipped => return,
        }
        s.jobs_processed += 1;
    }
}

fn worker_loop(mut worker: Worker, shutdown_rx: mpsc::Receiver<()>) {
    info!(worker = %worker.config.name, backend = worker.capability.name(), "generation worker started");
    let start_time = Instant::now();

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        worker.stats.lock().uptime_secs = start_time.elapsed().as_secs();

        if let Some(id) = worker.queue.dequeue(worker.config.dequeue_timeout) {
            debug!(worker = %worker.config.name, job_id = %id, "dequeued job");
            let outcome = worker.process_job(&id);
            debug!(worker = %worker.config.name, job_id = %id, outcome = ?outcome, "job finished");
        }
    }

    info!(worker = %worker.config.name, "generation worker stopped");
}

fn random_seed() -> u32 {
    (Uuid::new_v4().as_u128() & u128::from(u32::MAX)) as u32
}
