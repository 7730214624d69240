use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use scenecraft_engine::{DirectoryArtifactStore, GenerationEngine, WorkerHandle, WorkerStats};

/// Everything a handler needs, shared behind one `Arc`.
pub struct AppServices {
    engine: Arc<GenerationEngine>,
    artifacts: Arc<DirectoryArtifactStore>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl AppServices {
    pub fn new(engine: Arc<GenerationEngine>, artifacts: Arc<DirectoryArtifactStore>) -> Self {
        Self {
            engine,
            artifacts,
            worker: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<GenerationEngine> {
        &self.engine
    }

    pub fn artifacts(&self) -> &Arc<DirectoryArtifactStore> {
        &self.artifacts
    }

    /// Keep the running worker so its stats can be reported and it can be
    /// stopped on shutdown.
    pub fn attach_worker(&self, handle: WorkerHandle) {
        if let Ok(mut slot) = self.worker.lock() {
            if let Some(previous) = slot.replace(handle) {
                warn!("replacing an attached worker");
                previous.shutdown();
            }
        }
    }

    pub fn worker_stats(&self) -> Option<WorkerStats> {
        self.worker
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(WorkerHandle::stats))
    }

    /// Stop the worker after its current job. Blocks.
    pub fn shutdown_worker(&self) {
        let handle = self.worker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            info!("stopping generation worker");
            handle.shutdown();
        }
    }

    /// Expire old jobs, idle throttle records and old images.
    pub fn housekeeping(&self) {
        let report = self.engine.sweep();
        let config = self.engine.config();
        match self.artifacts.cleanup(config.max_kept_images, config.retention) {
            Ok(images_removed) if images_removed > 0 || report.jobs_removed > 0 => {
                info!(
                    jobs_removed = report.jobs_removed,
                    clients_pruned = report.clients_pruned,
                    images_removed,
                    "housekeeping finished"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "image cleanup failed"),
        }
    }
}
