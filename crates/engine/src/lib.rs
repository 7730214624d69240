//! `scenecraft-engine`: admission, scheduling and resource-aware execution of
//! image generation jobs.
//!
//! Requests pass the [`AdmissionGate`] and content policy, land in the
//! [`JobRegistry`] and a bounded [`JobQueue`], and are executed one at a time
//! by a single worker thread against an [`ExecutionCapability`].

pub mod admission;
pub mod artifacts;
pub mod budget;
pub mod capability;
pub mod config;
pub mod content;
pub mod engine;
pub mod jobs;
pub mod learning;
#[cfg(feature = "remote")]
pub mod remote;

pub use admission::{AdmissionGate, RateDecision};
pub use artifacts::{ArtifactError, ArtifactInfo, ArtifactRef, ArtifactStore, DirectoryArtifactStore};
pub use budget::{DeviceCapacity, DeviceKind, DeviceProbe, ResourceBudgetTracker, StaticDeviceProbe};
pub use capability::{
    Checkpoint, ExecutionCapability, ExecutionError, ProgressObserver, SynthesisOutput,
    SynthesisRequest,
};
pub use config::{ConfigError, EngineConfig};
pub use content::{BlocklistPolicy, ContentPolicy, ContentVerdict, PermissivePolicy};
pub use engine::{
    AdmissionError, DeviceStatus, GenerationEngine, JobError, QualityModeInfo, QueueStatus,
    Submitted, SweepReport,
};
pub use jobs::{
    Collaborators, GenerationResult, Job, JobQueue, JobRegistry, JobStatus, WorkerHandle,
    WorkerStats,
};
pub use learning::{GenerationRecord, GenerationRecorder, OptimizationAdvisor, OptimizationHints};
#[cfg(feature = "remote")]
pub use remote::{RemoteBackend, RemoteError};
