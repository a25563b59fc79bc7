//! Navigation API endpoints

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};

use crate::api::common::{ApiJson, ApiPath};
use crate::api::{ApiError, AppState};
use crate::models::{CreateNavItemInput, NavItem, NavItemTree, NavOrderItem, UpdateNavItemInput};

pub fn public_router() -> Router<AppState> {
    Router::new().route("/", get(tree))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_flat).post(create))
        .route("/order", put(reorder))
        .route("/{id}", put(update).delete(remove))
}

/// Visible items as a tree
async fn tree(State(state): State<AppState>) -> Result<Json<Vec<NavItemTree>>, ApiError> {
    Ok(Json(state.nav.tree().await?))
}

async fn list_flat(State(state): State<AppState>) -> Result<Json<Vec<NavItem>>, ApiError> {
    Ok(Json(state.nav.list_flat().await?))
}

async fn create(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<CreateNavItemInput>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.nav.create(input).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn update(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<UpdateNavItemInput>,
) -> Result<Json<NavItem>, ApiError> {
    Ok(Json(state.nav.update(id, input).await?))
}

async fn reorder(
    State(state): State<AppState>,
    ApiJson(items): ApiJson<Vec<NavOrderItem>>,
) -> Result<StatusCode, ApiError> {
    state.nav.reorder(items).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.nav.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
