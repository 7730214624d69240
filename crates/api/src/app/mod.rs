//! HTTP application wiring (Axum router + shared services).
//!
//! - `services.rs`: the engine, artifact store and worker handle shared by handlers
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so the
/// peer address is available for throttling.
pub fn build_app(services: Arc<AppServices>) -> Router {
    let api = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(middleware::client_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(api)
        .layer(ServiceBuilder::new())
}
