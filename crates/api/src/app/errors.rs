use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use serde_json::{json, Value};

use scenecraft_engine::{AdmissionError, ArtifactError, JobError};

pub fn admission_error_to_response(err: AdmissionError) -> axum::response::Response {
    match err {
        AdmissionError::RateLimited { retry_after_secs } => {
            let mut response = json_error_with(
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                format!("Too many requests. Try again in {retry_after_secs} seconds."),
                json!({ "retry_after": retry_after_secs }),
            );
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            response
        }
        AdmissionError::QueueFull => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "QUEUE_FULL",
            "Generation queue is full. Please try again shortly.",
        ),
        AdmissionError::ContentBlocked { categories } => json_error_with(
            StatusCode::UNPROCESSABLE_ENTITY,
            "CONTENT_BLOCKED",
            "Prompt contains blocked content.",
            json!({ "blocked_categories": categories }),
        ),
        AdmissionError::Validation(e) => {
            json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
        }
    }
}

pub fn job_error_to_response(err: JobError) -> axum::response::Response {
    match err {
        JobError::InvalidId => json_error(
            StatusCode::BAD_REQUEST,
            "INVALID_JOB_ID",
            "Job id is not in the expected format.",
        ),
        JobError::NotFound => json_error(StatusCode::NOT_FOUND, "JOB_NOT_FOUND", "Job not found."),
        JobError::AlreadyTerminal(status) => json_error(
            StatusCode::CONFLICT,
            "ALREADY_TERMINAL",
            format!("Job is already {status}."),
        ),
    }
}

pub fn artifact_error_to_response(err: ArtifactError) -> axum::response::Response {
    match err {
        ArtifactError::InvalidName(_) => json_error(
            StatusCode::BAD_REQUEST,
            "INVALID_FILENAME",
            "Invalid image filename.",
        ),
        ArtifactError::NotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "IMAGE_NOT_FOUND", "Image not found.")
        }
        ArtifactError::Io(e) => {
            tracing::error!(error = %e, "artifact store i/o failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                "Failed to read image storage.",
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    json_error_with(status, code, message, Value::Null)
}

/// Like [`json_error`], with the fields of `extra` merged into the body.
pub fn json_error_with(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    extra: Value,
) -> axum::response::Response {
    let mut body = json!({
        "error": code,
        "message": message.into(),
    });
    if let (Value::Object(body), Value::Object(extra)) = (&mut body, extra) {
        body.extend(extra);
    }
    (status, axum::Json(body)).into_response()
}
