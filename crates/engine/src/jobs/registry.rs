//! In-memory job registry.
//!
//! One coarse lock guards the whole map. Every read hands out a clone, so
//! callers never hold the lock while doing I/O.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use scenecraft_core::JobId;

use super::types::{GenerationResult, Job, JobStatus};
use crate::admission::AdmissionGate;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Job>>,
    gate: Arc<AdmissionGate>,
}

impl JobRegistry {
    /// `gate` receives identifiers back when jobs are swept.
    pub fn new(gate: Arc<AdmissionGate>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            gate,
        }
    }

    /// Insert a new job. Its status is forced to pending.
    pub fn create(&self, mut job: Job) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(RegistryError::AlreadyExists(job.id));
        }
        job.status = JobStatus::Pending;
        job.progress = 0;
        job.cancelled = false;
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Record progress for a job that is still running. Terminal jobs are left
    /// untouched and progress never moves backwards.
    pub fn update_progress(&self, id: &JobId, percent: u8, message: impl Into<String>) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(id) {
            if job.status.is_terminal() {
                return;
            }
            job.progress = percent.min(100).max(job.progress);
            job.progress_message = message.into();
        }
    }

    /// Request cancellation.
    ///
    /// Returns `Ok(true)` when the job was pending or processing. A pending job
    /// is cancelled on the spot; a processing one is only flagged and the
    /// worker finishes the transition.
    pub fn cancel(&self, id: &JobId) -> Result<bool, RegistryError> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        match job.status {
            JobStatus::Pending => {
                job.mark_cancelled();
                Ok(true)
            }
            JobStatus::Processing => {
                job.cancelled = true;
                job.progress_message = "Cancelling".to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn is_cancelled(&self, id: &JobId) -> bool {
        self.jobs.read().get(id).is_some_and(|j| j.cancelled)
    }

    /// Move a pending, uncancelled job to processing and return a snapshot.
    pub fn claim(&self, id: &JobId) -> Option<Job> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(id)?;
        if job.status != JobStatus::Pending || job.cancelled {
            return None;
        }
        job.mark_processing();
        Some(job.clone())
    }

    /// Finish the transition of a flagged job to cancelled. Returns whether
    /// the job is now cancelled.
    pub fn mark_cancelled(&self, id: &JobId) -> bool {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Cancelled => true,
            Some(job) if job.cancelled && !job.status.is_terminal() => {
                job.mark_cancelled();
                true
            }
            _ => false,
        }
    }

    /// Count one resource retry. Returns the new retry count.
    pub fn record_retry(&self, id: &JobId, width: u32, height: u32) -> u32 {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(id) {
            Some(job) if !job.status.is_terminal() => {
                job.retry_count += 1;
                job.progress_message =
                    format!("Retrying at {width}x{height} (attempt {})", job.retry_count + 1);
                job.retry_count
            }
            Some(job) => job.retry_count,
            None => 0,
        }
    }

    /// Mark completed. No-op (returns false) if the job was cancelled or is
    /// already terminal.
    pub fn complete(&self, id: &JobId, result: GenerationResult) -> bool {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(id) {
            Some(job) if !job.cancelled && !job.status.is_terminal() => {
                job.mark_completed(result);
                true
            }
            _ => false,
        }
    }

    /// Mark failed. Same no-op rules as [`complete`](Self::complete).
    pub fn fail(&self, id: &JobId, error: &str) -> bool {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(id) {
            Some(job) if !job.cancelled && !job.status.is_terminal() => {
                job.mark_failed(error);
                true
            }
            _ => false,
        }
    }

    /// Remove a job that never made it into the queue.
    pub fn discard(&self, id: &JobId) -> Option<Job> {
        self.jobs.write().remove(id)
    }

    /// Remove terminal jobs that finished more than `max_age` ago.
    pub fn sweep(&self, max_age: Duration) -> usize {
        self.sweep_at(Utc::now(), max_age)
    }

    pub fn sweep_at(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let cutoff = now - max_age;
        let removed: Vec<JobId> = {
            let mut jobs = self.jobs.write();
            let expired: Vec<JobId> = jobs
                .values()
                .filter(|j| {
                    j.status.is_terminal()
                        && j.completed_at.unwrap_or(j.created_at) < cutoff
                })
                .map(|j| j.id.clone())
                .collect();
            for id in &expired {
                jobs.remove(id);
            }
            expired
        };

        for id in &removed {
            self.gate.release(id);
        }
        if !removed.is_empty() {
            debug!(removed = removed.len(), "swept expired jobs");
        }
        removed.len()
    }

    pub fn stats(&self) -> JobStats {
        let jobs = self.jobs.read();
        let mut stats = JobStats {
            total: jobs.len(),
            ..JobStats::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactRef;
    use scenecraft_core::{GenerationRequest, ModelClass};

    fn registry() -> (Arc<AdmissionGate>, JobRegistry) {
        let gate = Arc::new(AdmissionGate::new(30));
        (gate.clone(), JobRegistry::new(gate))
    }

    fn new_job(gate: &AdmissionGate) -> Job {
        let params = GenerationRequest::new("a quiet harbour").validate(512).unwrap();
        Job::new(gate.generate_id(), params)
    }

    fn result() -> GenerationResult {
        GenerationResult {
            artifact: ArtifactRef {
                filename: "scene_1_abcdefabcdef.png".into(),
                path: "/tmp/scene_1_abcdefabcdef.png".into(),
            },
            image_url: "/api/image/scene_1_abcdefabcdef.png".into(),
            seed: 7,
            model: ModelClass::Sd15,
            width: 512,
            height: 512,
            steps: 20,
            guidance_scale: 7.0,
            prompt: "a quiet harbour".into(),
            negative_prompt: String::new(),
            generation_time: 1.5,
            retries: 0,
        }
    }

    #[test]
    fn create_forces_pending_and_rejects_duplicates() {
        let (gate, reg) = registry();
        let mut job = new_job(&gate);
        job.status = JobStatus::Completed;
        let id = job.id.clone();

        reg.create(job.clone()).unwrap();
        assert_eq!(reg.get(&id).unwrap().status, JobStatus::Pending);
        assert_eq!(reg.create(job), Err(RegistryError::AlreadyExists(id)));
    }

    #[test]
    fn claim_complete_flow() {
        let (gate, reg) = registry();
        let job = new_job(&gate);
        let id = job.id.clone();
        reg.create(job).unwrap();

        let claimed = reg.claim(&id).unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert!(reg.claim(&id).is_none());

        reg.update_progress(&id, 40, "Step 10/20");
        reg.update_progress(&id, 20, "stale");
        assert_eq!(reg.get(&id).unwrap().progress, 40);

        assert!(reg.complete(&id, result()));
        let done = reg.get(&id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.can_rate());

        // terminal states are final
        assert!(!reg.fail(&id, "late"));
        assert_eq!(reg.cancel(&id), Ok(false));
        assert_eq!(reg.get(&id).unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn cancel_pending_is_immediate() {
        let (gate, reg) = registry();
        let job = new_job(&gate);
        let id = job.id.clone();
        reg.create(job).unwrap();

        assert_eq!(reg.cancel(&id), Ok(true));
        let job = reg.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.progress, 0);
        assert!(reg.claim(&id).is_none());
        assert!(reg.mark_cancelled(&id));
    }

    #[test]
    fn cancel_processing_blocks_completion() {
        let (gate, reg) = registry();
        let job = new_job(&gate);
        let id = job.id.clone();
        reg.create(job).unwrap();
        reg.claim(&id).unwrap();

        assert_eq!(reg.cancel(&id), Ok(true));
        assert_eq!(reg.get(&id).unwrap().status, JobStatus::Processing);
        assert!(!reg.complete(&id, result()));
        assert!(!reg.fail(&id, "boom"));
        assert!(reg.mark_cancelled(&id));

        let job = reg.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(!job.can_rate());
    }

    #[test]
    fn cancel_unknown_job_is_not_found() {
        let (_, reg) = registry();
        let id = JobId::generate();
        assert_eq!(reg.cancel(&id), Err(RegistryError::NotFound(id)));
    }

    #[test]
    fn record_retry_counts() {
        let (gate, reg) = registry();
        let job = new_job(&gate);
        let id = job.id.clone();
        reg.create(job).unwrap();
        reg.claim(&id).unwrap();

        assert_eq!(reg.record_retry(&id, 400, 400), 1);
        assert_eq!(reg.record_retry(&id, 256, 256), 2);
        assert_eq!(reg.get(&id).unwrap().retry_count, 2);
    }

    #[test]
    fn sweep_removes_old_terminal_jobs_and_releases_ids() {
        let (gate, reg) = registry();
        let done = new_job(&gate);
        let live = new_job(&gate);
        let (done_id, live_id) = (done.id.clone(), live.id.clone());
        reg.create(done).unwrap();
        reg.create(live).unwrap();
        reg.claim(&done_id).unwrap();
        reg.fail(&done_id, "boom");

        assert_eq!(reg.sweep(Duration::hours(24)), 0);

        let later = Utc::now() + Duration::hours(25);
        assert_eq!(reg.sweep_at(later, Duration::hours(24)), 1);
        assert!(reg.get(&done_id).is_none());
        assert!(reg.get(&live_id).is_some());
        assert!(!gate.exists(&done_id));
        assert!(gate.exists(&live_id));
    }

    #[test]
    fn stats_tracking() {
        let (gate, reg) = registry();
        let ids: Vec<JobId> = (0..4)
            .map(|_| {
                let job = new_job(&gate);
                let id = job.id.clone();
                reg.create(job).unwrap();
                id
            })
            .collect();

        reg.claim(&ids[0]);
        reg.claim(&ids[1]);
        reg.fail(&ids[1], "boom");
        reg.cancel(&ids[2]).unwrap();

        let stats = reg.stats();
        assert_eq!(
            stats,
            JobStats {
                pending: 1,
                processing: 1,
                completed: 0,
                failed: 1,
                cancelled: 1,
                total: 4,
            }
        );

        assert!(reg.discard(&ids[3]).is_some());
        assert_eq!(reg.len(), 3);
    }
}
