use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

use scenecraft_engine::{ArtifactError, ArtifactStore};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

const RECENT_IMAGES: usize = 50;

pub async fn get_image(
    Extension(services): Extension<Arc<AppServices>>,
    Path(filename): Path<String>,
) -> axum::response::Response {
    let path = match services.artifacts().resolve(&filename) {
        Ok(p) => p,
        Err(e) => return errors::artifact_error_to_response(e),
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "image/png"),
                (header::CACHE_CONTROL, "public, max-age=86400"),
            ],
            bytes,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            errors::artifact_error_to_response(ArtifactError::NotFound(filename))
        }
        Err(e) => errors::artifact_error_to_response(ArtifactError::Io(e)),
    }
}

pub async fn list_images(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let artifacts = services.artifacts().clone();
    match tokio::task::spawn_blocking(move || artifacts.list_recent(RECENT_IMAGES)).await {
        Ok(Ok(infos)) => {
            let images: Vec<dto::ImageEntry> = infos.into_iter().map(dto::ImageEntry::from).collect();
            Json(dto::ImagesResponse {
                count: images.len(),
                images,
            })
            .into_response()
        }
        Ok(Err(e)) => errors::artifact_error_to_response(e),
        Err(e) => {
            tracing::error!(error = %e, "image listing task failed");
            errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "failed to list images",
            )
        }
    }
}
