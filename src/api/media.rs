//! Media API endpoints (admin)
//!
//! - POST /api/v1/admin/media - Upload one file, multipart field `file`
//! - GET /api/v1/admin/media - Uploaded files, newest first
//! - DELETE /api/v1/admin/media/{id}

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};

use crate::api::common::{ApiPath, ApiQuery, PaginationQuery};
use crate::api::middleware::AuthenticatedUser;
use crate::api::{ApiError, AppState};
use crate::models::{Media, PagedResult};
use crate::services::media::Upload;

/// Multipart framing on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// `max_file_size` lifts axum's default body limit for uploads
pub fn admin_router(max_file_size: u64) -> Router<AppState> {
    let limit = usize::try_from(max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);
    Router::new()
        .route("/", get(list_media).post(upload).layer(DefaultBodyLimit::max(limit)))
        .route("/{id}", delete(remove))
}

async fn upload(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await?.to_vec();

        let media = state
            .media
            .upload(
                Upload {
                    filename,
                    bytes,
                    mime_type,
                },
                Some(user.id),
            )
            .await?;
        return Ok((StatusCode::CREATED, Json(media)));
    }

    Err(ApiError::validation_error("No file provided"))
}

async fn list_media(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PaginationQuery>,
) -> Result<Json<PagedResult<Media>>, ApiError> {
    Ok(Json(state.media.list(&query.params()).await?))
}

async fn remove(State(state): State<AppState>, ApiPath(id): ApiPath<i64>) -> Result<StatusCode, ApiError> {
    state.media.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
