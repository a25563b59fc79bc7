//! Post, page and memo endpoints
//!
//! Public:
//! - GET /api/v1/posts, /pages, /memos - published listings
//! - GET /api/v1/posts/{slug}, /pages/{slug}, /memos/{slug} - one published item
//! - POST /api/v1/view/{id} - count a view
//!
//! Admin (under /api/v1/admin/posts):
//! - GET / - every post, filtered; POST / - create
//! - GET /{id}, PUT /{id}, DELETE /{id}

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{default_page, default_per_page, ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::AuthenticatedUser;
use crate::api::{ApiError, AppState};
use crate::models::{
    CreatePostInput, ListParams, PagedResult, PostFilter, PostStatus, PostType, PostWithTags,
    UpdatePostInput,
};

/// Query for public listings
#[derive(Debug, Deserialize)]
pub struct PublishedQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Tag slug
    pub tag: Option<String>,
}

/// Query for the admin listing
#[derive(Debug, Deserialize)]
pub struct AdminPostsQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    pub post_type: Option<PostType>,
    pub status: Option<PostStatus>,
    pub tag: Option<String>,
    pub search: Option<String>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts))
        .route("/posts/{slug}", get(get_post))
        .route("/pages", get(list_pages))
        .route("/pages/{slug}", get(get_page))
        .route("/memos", get(list_memos))
        .route("/memos/{slug}", get(get_memo))
        .route("/view/{id}", post(increment_view))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_list).post(create))
        .route("/{id}", get(admin_get).put(update).delete(remove))
}

async fn list_of(
    state: &AppState,
    post_type: PostType,
    query: PublishedQuery,
) -> Result<Json<PagedResult<PostWithTags>>, ApiError> {
    let params = ListParams::new(query.page, query.per_page);
    let tag = query.tag.as_deref().filter(|t| !t.is_empty());
    Ok(Json(state.posts.list_published(post_type, tag, &params).await?))
}

async fn one_of(state: &AppState, post_type: PostType, slug: &str) -> Result<Json<PostWithTags>, ApiError> {
    let post = state.posts.get_by_slug(slug, false).await?;
    if post.post.post_type != post_type {
        return Err(ApiError::not_found(format!("{} not found: {}", post_type, slug)));
    }
    Ok(Json(post))
}

/// GET /api/v1/posts
async fn list_posts(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PublishedQuery>,
) -> Result<Json<PagedResult<PostWithTags>>, ApiError> {
    list_of(&state, PostType::Post, query).await
}

/// GET /api/v1/pages
async fn list_pages(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PublishedQuery>,
) -> Result<Json<PagedResult<PostWithTags>>, ApiError> {
    list_of(&state, PostType::Page, query).await
}

/// GET /api/v1/memos
async fn list_memos(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PublishedQuery>,
) -> Result<Json<PagedResult<PostWithTags>>, ApiError> {
    list_of(&state, PostType::Memo, query).await
}

async fn get_post(
    State(state): State<AppState>,
    ApiPath(slug): ApiPath<String>,
) -> Result<Json<PostWithTags>, ApiError> {
    one_of(&state, PostType::Post, &slug).await
}

async fn get_page(
    State(state): State<AppState>,
    ApiPath(slug): ApiPath<String>,
) -> Result<Json<PostWithTags>, ApiError> {
    one_of(&state, PostType::Page, &slug).await
}

async fn get_memo(
    State(state): State<AppState>,
    ApiPath(slug): ApiPath<String>,
) -> Result<Json<PostWithTags>, ApiError> {
    one_of(&state, PostType::Memo, &slug).await
}

/// POST /api/v1/view/{id}
async fn increment_view(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.posts.increment_view(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/admin/posts
async fn admin_list(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<AdminPostsQuery>,
) -> Result<Json<PagedResult<PostWithTags>>, ApiError> {
    let params = ListParams::new(query.page, query.per_page);
    let filter = PostFilter {
        post_type: query.post_type,
        status: query.status,
        tag: query.tag.filter(|t| !t.is_empty()),
        search: query.search.filter(|s| !s.trim().is_empty()),
    };
    Ok(Json(state.posts.list_admin(&filter, &params).await?))
}

/// POST /api/v1/admin/posts
async fn create(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(input): ApiJson<CreatePostInput>,
) -> Result<impl IntoResponse, ApiError> {
    let post = state.posts.create(input, user.id).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// GET /api/v1/admin/posts/{id}
async fn admin_get(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<PostWithTags>, ApiError> {
    Ok(Json(state.posts.get_by_id(id).await?))
}

/// PUT /api/v1/admin/posts/{id}
async fn update(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<UpdatePostInput>,
) -> Result<Json<PostWithTags>, ApiError> {
    Ok(Json(state.posts.update(id, input).await?))
}

/// DELETE /api/v1/admin/posts/{id}
async fn remove(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.posts.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
