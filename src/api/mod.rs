//! API layer - HTTP handlers and routing
//!
//! JSON endpoints live under `/api/v1`. The RSS feed, the sitemap, the
//! analytics proxy and uploaded files are served from the site root.

pub mod admin;
pub mod auth;
pub mod comments;
pub mod common;
pub mod error;
pub mod feed;
pub mod media;
pub mod middleware;
pub mod nav;
pub mod posts;
pub mod site;
pub mod state;
pub mod tags;

use std::path::Path;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::services::media::LOCAL_URL_PREFIX;

pub use error::ApiError;
pub use state::AppState;

/// Build the `/api/v1` router
pub fn build_api_router(state: AppState, max_upload_size: u64) -> Router<AppState> {
    // Admin routes (need admin role)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .nest("/admin/posts", posts::admin_router())
        .nest("/admin/tags", tags::admin_router())
        .nest("/admin/nav", nav::admin_router())
        .nest("/admin/comments", comments::admin_router())
        .nest("/admin/media", media::admin_router(max_upload_size))
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Protected routes (need auth but not admin)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Comments accept guests and signed-in users alike
    let comment_routes = Router::new()
        .nest("/comments", comments::public_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::optional_auth,
        ));

    // Public routes
    Router::new()
        .merge(posts::public_router())
        .merge(site::router())
        .nest("/tags", tags::public_router())
        .nest("/nav", nav::public_router())
        .nest("/auth", auth::public_router())
        .merge(comment_routes)
        .merge(admin_routes)
        .merge(protected_routes)
}

fn cors_layer(cors_origin: &str) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE];

    if cors_origin.trim() == "*" {
        // Browsers refuse credentials with a wildcard origin
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers);
    }

    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(true),
        Err(e) => {
            tracing::warn!("Ignoring invalid CORS origin {:?}: {}", cors_origin, e);
            CorsLayer::new()
        }
    }
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str, upload_dir: &Path) -> Router {
    let max_upload_size = state.media.upload_config().max_file_size;

    Router::new()
        .nest("/api/v1", build_api_router(state.clone(), max_upload_size))
        .merge(feed::router())
        .nest_service(LOCAL_URL_PREFIX, ServeDir::new(upload_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors_layer(cors_origin)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    use crate::config::Config;
    use crate::db::repositories::test_support::{insert_user, migrated_pool};
    use crate::db::repositories::{SessionRepository, SqlxSessionRepository};
    use crate::db::DynDatabasePool;
    use crate::models::{Session, UserRole};
    use crate::services::test_support::tagged_cache;

    struct Harness {
        server: TestServer,
        pool: DynDatabasePool,
        _uploads: tempfile::TempDir,
    }

    async fn setup() -> Harness {
        let pool = migrated_pool().await;
        let uploads = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.upload.path = uploads.path().to_path_buf();
        let state = AppState::new(pool.clone(), tagged_cache(), &config).unwrap();
        let app = build_router(state, "http://localhost:3000", uploads.path());
        Harness {
            server: TestServer::new(app).unwrap(),
            pool,
            _uploads: uploads,
        }
    }

    async fn session_for(pool: &DynDatabasePool, email: &str, role: UserRole) -> String {
        let user = insert_user(pool, email, role).await;
        let token = format!("test-token-{}", user.id);
        SqlxSessionRepository::new(pool.clone())
            .create(&Session {
                token: token.clone(),
                user_id: user.id,
                expires_at: Utc::now() + Duration::days(1),
                ip_address: None,
                user_agent: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        token
    }

    #[tokio::test]
    async fn test_admin_route_without_session_is_unauthorized() {
        let Harness { server, .. } = setup().await;

        let response = server.get("/api/v1/admin/settings").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_admin_route_rejects_plain_user() {
        let Harness { server, pool, .. } = setup().await;
        insert_user(&pool, "admin@example.com", UserRole::Admin).await;
        let token = session_for(&pool, "reader@example.com", UserRole::User).await;

        let response = server
            .post("/api/v1/admin/tags")
            .authorization_bearer(&token)
            .json(&json!({ "name": "Rust" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_admin_can_create_tag() {
        let Harness { server, pool, .. } = setup().await;
        let token = session_for(&pool, "admin@example.com", UserRole::Admin).await;

        let response = server
            .post("/api/v1/admin/tags")
            .authorization_bearer(&token)
            .json(&json!({ "name": "Rust" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);

        let tags: Value = server.get("/api/v1/tags").await.json();
        assert_eq!(tags.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_session_cookie_authenticates() {
        let Harness { server, pool, .. } = setup().await;
        let token = session_for(&pool, "admin@example.com", UserRole::Admin).await;

        let response = server
            .get("/api/v1/auth/me")
            .add_header(header::COOKIE, HeaderValue::from_str(&format!("session={}", token)).unwrap())
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["email"], "admin@example.com");
    }

    #[tokio::test]
    async fn test_validation_error_shape() {
        let Harness { server, pool, .. } = setup().await;
        let token = session_for(&pool, "admin@example.com", UserRole::Admin).await;

        let response = server
            .post("/api/v1/admin/whitelist")
            .authorization_bearer(&token)
            .json(&json!({ "email": "not-an-email" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(body["error"]["details"]["email"].is_array());
    }

    #[tokio::test]
    async fn test_unknown_post_is_not_found() {
        let Harness { server, .. } = setup().await;

        let response = server.get("/api/v1/posts/missing").await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_first_registration_signs_in_as_admin() {
        let Harness { server, .. } = setup().await;

        let response = server
            .post("/api/v1/auth/register")
            .json(&json!({
                "email": "owner@example.com",
                "name": "Owner",
                "password": "correct horse battery"
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        assert!(response.headers().get(header::SET_COOKIE).is_some());
        let body: Value = response.json();
        assert_eq!(body["user"]["role"], "admin");

        let status: Value = server.get("/api/v1/init-status").await.json();
        assert_eq!(status["initialized"], true);
    }

    #[test]
    fn test_invalid_cors_origin_does_not_panic() {
        let _ = cors_layer("not a header\u{7f}");
        let _ = cors_layer("*");
    }
}
