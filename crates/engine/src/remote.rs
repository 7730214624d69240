//! HTTP adapter for an out-of-process synthesis service.
//!
//! Endpoints (relative to the base URL):
//! - `POST /generate` with a [`SynthesisRequest`] body, answering `image/png`
//! - `GET /device` with a [`DeviceReport`]
//! - `POST /cache/clear`, `POST /reload`
//!
//! Failures come back as `{"error_kind": "...", "message": "..."}`. Status 507
//! or `error_kind = "out_of_memory"` means the device ran out of memory.

use std::time::Duration;

use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::budget::{DeviceCapacity, DeviceKind, DeviceProbe};
use crate::capability::{
    Checkpoint, ExecutionCapability, ExecutionError, ProgressObserver, SynthesisOutput,
    SynthesisRequest,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
}

/// Device state as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub kind: DeviceKind,
    pub name: String,
    pub total_units: u64,
    pub available_units: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// The service reports no intermediate steps, so progress moves from 0 to
/// the end of the execution span in one jump. A cancel requested during
/// `POST /generate` is only observed once that call returns.
pub struct RemoteBackend {
    base_url: String,
    client: Client,
    capacity: Mutex<DeviceCapacity>,
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl RemoteBackend {
    /// `fallback` is reported as the device until the service answers
    /// `GET /device`.
    pub fn new(base_url: impl Into<String>, fallback: DeviceCapacity) -> Result<Self, RemoteError> {
        // Generation has no wall-clock limit; only connecting does.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Option::<Duration>::None)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            capacity: Mutex::new(fallback),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetch device state and update the cached capacity.
    pub fn refresh(&self) -> Result<DeviceReport, RemoteError> {
        let response = self
            .client
            .get(self.url("/device"))
            .timeout(CONTROL_TIMEOUT)
            .send()?;
        let response = check_status(response)?;
        let report: DeviceReport = response.json()?;
        *self.capacity.lock() = DeviceCapacity {
            kind: report.kind,
            name: report.name.clone(),
            total_units: report.total_units,
        };
        Ok(report)
    }

    fn post_control(&self, path: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.url(path))
            .timeout(CONTROL_TIMEOUT)
            .send()?;
        check_status(response)?;
        Ok(())
    }
}

fn check_status(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn error_message(body: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    parsed
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| body.trim().to_string())
}

/// Map a failed `/generate` response to an execution error.
pub fn classify_failure(status: u16, body: &str) -> ExecutionError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = error_message(body);
    let message = if message.is_empty() {
        format!("backend returned status {status}")
    } else {
        message
    };

    if status == StatusCode::INSUFFICIENT_STORAGE.as_u16()
        || parsed.error_kind.as_deref() == Some("out_of_memory")
    {
        return ExecutionError::ResourceExhausted(message);
    }
    if parsed.error_kind.as_deref() == Some("interrupted") {
        return ExecutionError::Interrupted;
    }
    ExecutionError::Backend(message)
}

impl ExecutionCapability for RemoteBackend {
    fn name(&self) -> &str {
        "remote"
    }

    fn run(
        &self,
        request: &SynthesisRequest,
        progress: &dyn ProgressObserver,
    ) -> Result<SynthesisOutput, ExecutionError> {
        if progress.on_step(0, request.steps) == Checkpoint::Cancel {
            return Err(ExecutionError::Interrupted);
        }

        let response = self
            .client
            .post(self.url("/generate"))
            .json(request)
            .send()
            .map_err(|e| ExecutionError::backend(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_failure(status.as_u16(), &body));
        }

        let image = response
            .bytes()
            .map_err(|e| ExecutionError::backend(format!("failed to read image: {e}")))?
            .to_vec();
        if image.is_empty() {
            return Err(ExecutionError::backend("backend returned an empty image"));
        }

        progress.on_step(request.steps, request.steps);
        debug!(job_id = %request.job_id, bytes = image.len(), "remote generation finished");

        Ok(SynthesisOutput {
            image,
            width: request.width,
            height: request.height,
        })
    }

    fn clear_cache(&self) {
        if let Err(e) = self.post_control("/cache/clear") {
            warn!(error = %e, "failed to clear remote cache");
        }
    }

    fn reload(&self) -> Result<(), ExecutionError> {
        self.post_control("/reload")
            .map_err(|e| ExecutionError::backend(format!("reload failed: {e}")))
    }
}

impl DeviceProbe for RemoteBackend {
    fn capacity(&self) -> DeviceCapacity {
        self.capacity.lock().clone()
    }

    fn available_units(&self) -> u64 {
        match self.refresh() {
            Ok(report) => report.available_units,
            Err(e) => {
                warn!(error = %e, "device query failed, assuming no free memory");
                0
            }
        }
    }
}
