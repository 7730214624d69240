use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use scenecraft_core::GenerationRequest;
use scenecraft_engine::JobStatus;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ClientContext;

/// Admission may wait on a full queue, so it runs off the async workers.
pub async fn generate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(client): Extension<ClientContext>,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(request) = match body {
        Ok(b) => b,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                rejection.body_text(),
            )
        }
    };

    let engine = services.engine().clone();
    let submitted = tokio::task::spawn_blocking(move || engine.submit(Some(client.key()), request)).await;

    match submitted {
        Ok(Ok(s)) => (StatusCode::ACCEPTED, Json(dto::GenerateResponse::from(s))).into_response(),
        Ok(Err(e)) => errors::admission_error_to_response(e),
        Err(e) => {
            tracing::error!(error = %e, "submit task failed");
            errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "failed to submit job",
            )
        }
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match services.engine().status(&id) {
        Ok(job) => Json(dto::JobResponse::from(job)).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match services.engine().cancel(&id) {
        Ok(job_id) => Json(dto::CancelResponse {
            job_id: job_id.to_string(),
            status: JobStatus::Cancelled,
        })
        .into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}
