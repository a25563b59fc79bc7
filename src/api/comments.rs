//! Comment API endpoints
//!
//! Public:
//! - GET /api/v1/comments/{post_id} - Approved comments of a post, threaded
//! - POST /api/v1/comments - Leave a comment, as a guest or signed in
//!
//! Admin (under /api/v1/admin/comments):
//! - GET / - Moderation queue, filtered by `status`
//! - GET /pending-count
//! - POST /{id}/approve, /{id}/reject, /{id}/spam; DELETE /{id}
//! - POST /batch

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::common::{default_page, default_per_page, ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::{ClientMeta, MaybeUser};
use crate::api::{ApiError, AppState};
use crate::models::{
    AdminComment, CommentAction, CommentStatus, CommentWithMeta, CreateCommentInput,
    ListParams, PagedResult,
};

#[derive(Debug, Deserialize)]
pub struct AdminCommentsQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    pub status: Option<CommentStatus>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub action: CommentAction,
    pub ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub affected: u64,
}

#[derive(Debug, Serialize)]
pub struct PendingCountResponse {
    pub count: i64,
}

/// Reading is public; posting picks up a session when there is one
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_comment))
        .route("/{post_id}", get(list_for_post))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_admin))
        .route("/pending-count", get(pending_count))
        .route("/batch", post(batch))
        .route("/{id}", delete(remove))
        .route("/{id}/approve", post(approve))
        .route("/{id}/reject", post(reject))
        .route("/{id}/spam", post(mark_spam))
}

async fn list_for_post(
    State(state): State<AppState>,
    ApiPath(post_id): ApiPath<i64>,
) -> Result<Json<Vec<CommentWithMeta>>, ApiError> {
    Ok(Json(state.comments.list_for_post(post_id).await?))
}

/// POST /api/v1/comments
///
/// The response carries the stored status so the client can tell the
/// author whether the comment awaits review.
async fn create_comment(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    ClientMeta(meta): ClientMeta,
    ApiJson(input): ApiJson<CreateCommentInput>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state.comments.create(input, user.as_ref(), meta).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn list_admin(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<AdminCommentsQuery>,
) -> Result<Json<PagedResult<AdminComment>>, ApiError> {
    let params = ListParams::new(query.page, query.per_page);
    Ok(Json(state.comments.list_admin(query.status, &params).await?))
}

async fn pending_count(State(state): State<AppState>) -> Result<Json<PendingCountResponse>, ApiError> {
    let count = state.comments.pending_count().await?;
    Ok(Json(PendingCountResponse { count }))
}

async fn approve(State(state): State<AppState>, ApiPath(id): ApiPath<i64>) -> Result<StatusCode, ApiError> {
    state.comments.approve(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reject(State(state): State<AppState>, ApiPath(id): ApiPath<i64>) -> Result<StatusCode, ApiError> {
    state.comments.reject(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_spam(State(state): State<AppState>, ApiPath(id): ApiPath<i64>) -> Result<StatusCode, ApiError> {
    state.comments.mark_spam(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove(State(state): State<AppState>, ApiPath(id): ApiPath<i64>) -> Result<StatusCode, ApiError> {
    state.comments.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn batch(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    let affected = state.comments.batch(request.action, &request.ids).await?;
    Ok(Json(BatchResponse { affected }))
}
