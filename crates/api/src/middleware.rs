use std::net::SocketAddr;

use axum::{
    extract::ConnectInfo,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use scenecraft_core::ClientKey;

use crate::context::ClientContext;

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_CLIENT: &str = "unknown";

pub async fn client_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(req.headers(), peer);

    req.extensions_mut().insert(ClientContext::new(key));
    next.run(req).await
}

/// First `X-Forwarded-For` entry, else the peer IP.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientKey {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, peer) {
        (Some(first), _) => ClientKey::new(first),
        (None, Some(addr)) => ClientKey::new(addr.ip().to_string()),
        (None, None) => ClientKey::new(UNKNOWN_CLIENT),
    }
}
