//! Tag API endpoints
//!
//! - GET /api/v1/tags - Tags with published post counts
//! - GET /api/v1/tags/{slug} - One tag and its published posts
//! - POST /api/v1/admin/tags, PUT/DELETE /api/v1/admin/tags/{id}

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;

use crate::api::common::{ApiJson, ApiPath, ApiQuery, PaginationQuery};
use crate::api::{ApiError, AppState};
use crate::models::{PagedResult, PostType, PostWithTags, Tag, TagInput, TagWithCount};

/// A tag page
#[derive(Debug, Serialize)]
pub struct TagPostsResponse {
    pub tag: Tag,
    pub posts: PagedResult<PostWithTags>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tags))
        .route("/{slug}", get(get_tag))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_tag))
        .route("/{id}", put(update_tag).delete(delete_tag))
}

/// GET /api/v1/tags
async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<TagWithCount>>, ApiError> {
    Ok(Json(state.tags.list_with_counts().await?))
}

/// GET /api/v1/tags/{slug}
async fn get_tag(
    State(state): State<AppState>,
    ApiPath(slug): ApiPath<String>,
    ApiQuery(query): ApiQuery<PaginationQuery>,
) -> Result<Json<TagPostsResponse>, ApiError> {
    let tag = state.tags.get_by_slug(&slug).await?;
    let posts = state
        .posts
        .list_published(PostType::Post, Some(&tag.slug), &query.params())
        .await?;
    Ok(Json(TagPostsResponse { tag, posts }))
}

/// POST /api/v1/admin/tags
async fn create_tag(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<TagInput>,
) -> Result<impl IntoResponse, ApiError> {
    let tag = state.tags.create(input).await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

/// PUT /api/v1/admin/tags/{id}
async fn update_tag(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<TagInput>,
) -> Result<Json<Tag>, ApiError> {
    Ok(Json(state.tags.update(id, input).await?))
}

/// DELETE /api/v1/admin/tags/{id}
async fn delete_tag(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.tags.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
