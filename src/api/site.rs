//! Public site endpoints
//!
//! - GET /api/v1/site - Public settings for the frontend
//! - GET /api/v1/init-status - Whether any account exists yet
//! - POST /api/v1/init-import - Restore a backup into a fresh site
//! - GET /api/v1/health

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::api::common::{ApiJson, BACKUP_BODY_LIMIT};
use crate::api::{ApiError, AppState};
use crate::models::{Backup, InitStatus, PublicSettings};

#[derive(Debug, Serialize)]
pub struct SiteInfoResponse {
    pub version: &'static str,
    #[serde(flatten)]
    pub settings: PublicSettings,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub cache: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/site", get(site_info))
        .route("/init-status", get(init_status))
        .route("/init-import", post(init_import).layer(DefaultBodyLimit::max(BACKUP_BODY_LIMIT)))
        .route("/health", get(health))
}

async fn site_info(State(state): State<AppState>) -> Result<Json<SiteInfoResponse>, ApiError> {
    let settings = state.settings.get_public().await?;
    Ok(Json(SiteInfoResponse {
        version: env!("CARGO_PKG_VERSION"),
        settings,
    }))
}

async fn init_status(State(state): State<AppState>) -> Result<Json<InitStatus>, ApiError> {
    Ok(Json(state.backup.init_status().await?))
}

/// Refused once the site has an account
async fn init_import(
    State(state): State<AppState>,
    ApiJson(backup): ApiJson<Backup>,
) -> Result<StatusCode, ApiError> {
    state.backup.init_import(backup).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match state.pool.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Health check: database unreachable: {}", e);
            false
        }
    };
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if database { "ok" } else { "degraded" },
            database,
            cache: state.cache.inner().backend_name(),
        }),
    )
}
