//! Routes served at the site root rather than under /api/v1
//!
//! - GET /feed.xml - RSS 2.0 feed of published posts
//! - GET /sitemap.xml
//! - GET /stats/script.js - Umami tracker, proxied
//! - POST /api/send - Umami beacon, proxied

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};

use crate::api::middleware::ClientMeta;
use crate::api::{ApiError, AppState};
use crate::services::analytics::{BeaconOrigin, Proxied};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/feed.xml", get(rss))
        .route("/sitemap.xml", get(sitemap))
        .route("/stats/script.js", get(tracker_script))
        .route("/api/send", post(beacon))
}

fn xml(content_type: &'static str, body: String) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn rss(State(state): State<AppState>) -> Result<Response, ApiError> {
    let body = state.feed.rss().await?;
    Ok(xml("application/rss+xml; charset=utf-8", body))
}

async fn sitemap(State(state): State<AppState>) -> Result<Response, ApiError> {
    let body = state.feed.sitemap().await?;
    Ok(xml("application/xml; charset=utf-8", body))
}

async fn tracker_script(State(state): State<AppState>) -> Result<Response, ApiError> {
    let mut proxied = state.analytics.script().await?;
    if proxied.content_type.is_none() {
        proxied.content_type = Some("application/javascript".to_string());
    }
    Ok(relay(proxied))
}

async fn beacon(
    State(state): State<AppState>,
    ClientMeta(meta): ClientMeta,
    body: Bytes,
) -> Result<Response, ApiError> {
    let origin = BeaconOrigin {
        user_agent: meta.user_agent,
        client_ip: meta.ip_address,
    };
    Ok(relay(state.analytics.send(body.to_vec(), origin).await?))
}

/// Pass an upstream reply through unchanged
fn relay(proxied: Proxied) -> Response {
    let status = StatusCode::from_u16(proxied.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, proxied.body).into_response();
    if let Some(value) = proxied
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}
