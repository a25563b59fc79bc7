//! Authentication API endpoints
//!
//! - POST /api/v1/auth/register - Create an account and sign in
//! - POST /api/v1/auth/login - Sign in
//! - POST /api/v1/auth/logout - Sign out
//! - GET /api/v1/auth/me - Current user
//! - PUT /api/v1/auth/profile - Update name and avatar
//! - PUT /api/v1/auth/password - Change password

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;

use crate::api::common::ApiJson;
use crate::api::middleware::{
    clear_session_cookie, extract_session_token, session_cookie, AuthenticatedUser, ClientMeta,
};
use crate::api::{ApiError, AppState};
use crate::models::{
    ChangePasswordInput, LoginInput, RegisterInput, Session, UpdateProfileInput, User,
};

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
    pub expires_at: String,
}

impl AuthResponse {
    fn new(user: User, session: &Session) -> Self {
        Self {
            user,
            token: session.token.clone(),
            expires_at: session.expires_at.to_rfc3339(),
        }
    }
}

/// Routes open to everyone
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

/// Routes that need a session
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/profile", put(update_profile))
        .route("/password", put(change_password))
}

fn with_cookie(session: &Session) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(cookie) = session_cookie(&session.token) {
        headers.insert(header::SET_COOKIE, cookie);
    }
    headers
}

/// POST /api/v1/auth/register
///
/// The first account becomes the administrator.
async fn register(
    State(state): State<AppState>,
    ClientMeta(meta): ClientMeta,
    ApiJson(input): ApiJson<RegisterInput>,
) -> Result<impl IntoResponse, ApiError> {
    let password = input.password.clone();
    let user = state.users.register(input).await?;

    let outcome = state
        .users
        .login(
            LoginInput {
                email: user.email.clone(),
                password,
            },
            meta,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        with_cookie(&outcome.session),
        Json(AuthResponse::new(outcome.user, &outcome.session)),
    ))
}

/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    ClientMeta(meta): ClientMeta,
    ApiJson(input): ApiJson<LoginInput>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.users.login(input, meta).await?;
    Ok((
        with_cookie(&outcome.session),
        Json(AuthResponse::new(outcome.user, &outcome.session)),
    ))
}

/// POST /api/v1/auth/logout
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = extract_session_token(&headers)
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;
    state.users.logout(&token).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::SET_COOKIE, clear_session_cookie());
    Ok((StatusCode::NO_CONTENT, response_headers))
}

/// GET /api/v1/auth/me
async fn me(AuthenticatedUser(user): AuthenticatedUser) -> Json<User> {
    Json(user)
}

/// PUT /api/v1/auth/profile
async fn update_profile(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(input): ApiJson<UpdateProfileInput>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.users.update_profile(user.id, input).await?))
}

/// PUT /api/v1/auth/password
///
/// Every existing session is revoked; the response carries a new one.
async fn change_password(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ClientMeta(meta): ClientMeta,
    ApiJson(input): ApiJson<ChangePasswordInput>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.users.change_password(user.id, input, meta).await?;
    let user = state.users.get(user.id).await?;
    Ok((with_cookie(&session), Json(AuthResponse::new(user, &session))))
}
