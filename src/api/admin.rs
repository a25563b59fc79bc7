//! Admin console endpoints
//!
//! Everything here sits behind `require_admin`.
//!
//! - GET/PUT /api/v1/admin/settings
//! - POST /api/v1/admin/email/test
//! - GET /api/v1/admin/users, PUT /users/{id}/role, DELETE /users/{id}
//! - GET/POST /api/v1/admin/whitelist, DELETE /whitelist/{id}
//! - GET /api/v1/admin/backup, POST /api/v1/admin/backup
//! - GET /api/v1/admin/analytics/stats

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use crate::api::common::{ApiJson, ApiPath, ApiQuery, PaginationQuery, BACKUP_BODY_LIMIT};
use crate::api::middleware::AuthenticatedUser;
use crate::api::{ApiError, AppState};
use crate::models::{
    AddWhitelistInput, AdminSettingsView, Backup, PagedResult, UpdateSettingsInput, User, UserRole,
    WhitelistEntry,
};
use crate::services::analytics::StatsRange;

#[derive(Debug, Deserialize, Validate)]
pub struct TestEmailRequest {
    #[validate(email(message = "Invalid email address"))]
    pub to: String,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: UserRole,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/settings", get(get_settings).put(update_settings))
        .route("/email/test", post(send_test_email))
        .route("/users", get(list_users))
        .route("/users/{id}", delete(delete_user))
        .route("/users/{id}/role", put(set_role))
        .route("/whitelist", get(list_whitelist).post(add_whitelist))
        .route("/whitelist/{id}", delete(remove_whitelist))
        .route(
            "/backup",
            get(export_backup)
                .post(import_backup)
                .layer(DefaultBodyLimit::max(BACKUP_BODY_LIMIT)),
        )
        .route("/analytics/stats", get(analytics_stats))
}

/// Secrets are masked in the response
async fn get_settings(State(state): State<AppState>) -> Result<Json<AdminSettingsView>, ApiError> {
    Ok(Json(state.settings.get_admin_view().await?))
}

async fn update_settings(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<UpdateSettingsInput>,
) -> Result<Json<AdminSettingsView>, ApiError> {
    Ok(Json(state.settings.update(input).await?))
}

async fn send_test_email(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<TestEmailRequest>,
) -> Result<StatusCode, ApiError> {
    request.validate()?;
    state.email.send_test(request.to.trim()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_users(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PaginationQuery>,
) -> Result<Json<PagedResult<User>>, ApiError> {
    Ok(Json(state.users.list(&query.params()).await?))
}

async fn set_role(
    State(state): State<AppState>,
    AuthenticatedUser(acting): AuthenticatedUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<SetRoleRequest>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.users.set_role(&acting, id, request.role).await?))
}

async fn delete_user(
    State(state): State<AppState>,
    AuthenticatedUser(acting): AuthenticatedUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.users.delete(&acting, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_whitelist(State(state): State<AppState>) -> Result<Json<Vec<WhitelistEntry>>, ApiError> {
    Ok(Json(state.whitelist.list().await?))
}

async fn add_whitelist(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<AddWhitelistInput>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state.whitelist.add(input).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn remove_whitelist(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.whitelist.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Download a snapshot of the whole site
async fn export_backup(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let backup = state.backup.export().await?;
    let disposition = format!(
        "attachment; filename=\"quire-backup-{}.json\"",
        backup.exported_at.format("%Y%m%d-%H%M%S")
    );
    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(backup)))
}

/// Replace all content with a snapshot. Every session is dropped.
async fn import_backup(
    State(state): State<AppState>,
    ApiJson(backup): ApiJson<Backup>,
) -> Result<StatusCode, ApiError> {
    state.backup.import(backup).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn analytics_stats(
    State(state): State<AppState>,
    ApiQuery(range): ApiQuery<StatsRange>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(state.analytics.stats(range).await?))
}
