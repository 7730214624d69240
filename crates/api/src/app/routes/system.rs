use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Device, queue, job counts, model catalogue and worker counters.
///
/// The device query may go over the network, so it runs on the blocking pool.
pub async fn status(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let engine = services.engine().clone();
    let device = match tokio::task::spawn_blocking(move || engine.device_status()).await {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "device status task failed");
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "failed to query device",
            );
        }
    };

    Json(dto::StatusResponse {
        status: "ok",
        device,
        queue: services.engine().queue_status(),
        worker: services.worker_stats(),
    })
    .into_response()
}
