use axum::{
    routing::{get, post},
    Router,
};

pub mod images;
pub mod jobs;
pub mod system;

/// Router for the `/api` surface.
pub fn router() -> Router {
    Router::new()
        .route("/api/generate", post(jobs::generate))
        .route("/api/job/:id", get(jobs::get_job))
        .route("/api/job/:id/cancel", post(jobs::cancel_job))
        .route("/api/status", get(system::status))
        .route("/api/images", get(images::list_images))
        .route("/api/image/:filename", get(images::get_image))
}
