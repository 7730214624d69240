//! Engine configuration.
//!
//! Every knob has a default that matches a single-GPU workstation deployment.
//! `from_env` overrides them from `SCENECRAFT_*` variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Tunables of the admission/scheduling/execution engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Bounded queue capacity (jobs admitted but not yet claimed).
    pub queue_capacity: usize,
    /// How long `enqueue` may wait for space before reporting "queue full".
    pub enqueue_timeout: Duration,
    /// How long the worker blocks on an empty queue before re-checking shutdown.
    pub dequeue_timeout: Duration,
    /// Resource-exhaustion retries per job (each halves the output size).
    pub max_resource_retries: u32,
    /// Consecutive non-resource failures that force a backend reload.
    pub failure_reload_threshold: u32,
    /// Requests per client per rolling minute.
    pub rate_limit_per_minute: usize,
    /// Smallest edge length a downscale may produce.
    pub min_dimension: u32,
    /// Edge lengths are floored to a multiple of this.
    pub dimension_alignment: u32,
    /// Terminal jobs older than this are swept from the registry.
    pub retention: Duration,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
    /// Where generated images are written.
    pub output_dir: PathBuf,
    /// Upper bound on images kept in `output_dir`.
    pub max_kept_images: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            enqueue_timeout: Duration::from_millis(250),
            dequeue_timeout: Duration::from_secs(1),
            max_resource_retries: 2,
            failure_reload_threshold: 3,
            rate_limit_per_minute: 30,
            min_dimension: 256,
            dimension_alignment: 8,
            retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            output_dir: PathBuf::from("./generated_images"),
            max_kept_images: 500,
        }
    }
}

impl EngineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (used by tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let cfg = Self {
            queue_capacity: parse_or(&lookup, "SCENECRAFT_QUEUE_CAPACITY", d.queue_capacity)?,
            enqueue_timeout: Duration::from_millis(parse_or(
                &lookup,
                "SCENECRAFT_ENQUEUE_TIMEOUT_MS",
                d.enqueue_timeout.as_millis() as u64,
            )?),
            dequeue_timeout: Duration::from_millis(parse_or(
                &lookup,
                "SCENECRAFT_DEQUEUE_TIMEOUT_MS",
                d.dequeue_timeout.as_millis() as u64,
            )?),
            max_resource_retries: parse_or(&lookup, "SCENECRAFT_MAX_RETRIES", d.max_resource_retries)?,
            failure_reload_threshold: parse_or(
                &lookup,
                "SCENECRAFT_FAILURE_THRESHOLD",
                d.failure_reload_threshold,
            )?,
            rate_limit_per_minute: parse_or(&lookup, "SCENECRAFT_RATE_LIMIT", d.rate_limit_per_minute)?,
            min_dimension: parse_or(&lookup, "SCENECRAFT_MIN_DIMENSION", d.min_dimension)?,
            dimension_alignment: d.dimension_alignment,
            retention: Duration::from_secs(
                parse_or(&lookup, "SCENECRAFT_RETENTION_HOURS", 24u64)? * 60 * 60,
            ),
            sweep_interval: Duration::from_secs(parse_or(
                &lookup,
                "SCENECRAFT_SWEEP_INTERVAL_SECS",
                d.sweep_interval.as_secs(),
            )?),
            output_dir: lookup("SCENECRAFT_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.output_dir),
            max_kept_images: parse_or(&lookup, "SCENECRAFT_MAX_IMAGES", d.max_kept_images)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(invalid("SCENECRAFT_QUEUE_CAPACITY", "0", "must be at least 1"));
        }
        if self.rate_limit_per_minute == 0 {
            return Err(invalid("SCENECRAFT_RATE_LIMIT", "0", "must be at least 1"));
        }
        if self.min_dimension == 0 || self.min_dimension % self.dimension_alignment != 0 {
            return Err(invalid(
                "SCENECRAFT_MIN_DIMENSION",
                &self.min_dimension.to_string(),
                "must be a positive multiple of 8",
            ));
        }
        Ok(())
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
