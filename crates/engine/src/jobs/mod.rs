//! Job lifecycle: records, registry, queue, resource retries and the worker.
//!
//! ## Components
//!
//! - `Job`: one admitted generation and its tracked state
//! - `JobRegistry`: in-memory store behind a single lock, copy-on-read
//! - `JobQueue`: bounded FIFO of ids between admission and the worker
//! - `RetryPolicy`: shrink-and-retry after resource exhaustion
//! - `Worker`: the single consumer that drives the execution backend

pub mod queue;
pub mod registry;
pub mod retry;
pub mod types;
pub mod worker;

pub use queue::JobQueue;
pub use registry::{JobRegistry, JobStats, RegistryError};
pub use retry::{RetryDecision, RetryPolicy};
pub use types::{GenerationResult, Job, JobStatus, MAX_ERROR_CHARS};
pub use worker::{Collaborators, JobOutcome, Worker, WorkerConfig, WorkerHandle, WorkerStats};
