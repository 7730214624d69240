//! `scenecraft-core`: shared vocabulary of the generation engine.
//!
//! This crate contains **pure** types (no threads, no I/O): identifiers, the
//! validated parameter set, and the model/quality catalogues.

pub mod error;
pub mod id;
pub mod model;
pub mod params;

pub use error::{DomainError, DomainResult};
pub use id::{ClientKey, JobId};
pub use model::{ModelClass, ModelProfile, QualityMode};
pub use params::{GenerationParams, GenerationRequest, SceneTags};
