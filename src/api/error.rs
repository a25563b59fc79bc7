//! API error type
//!
//! Every failure leaves the server as
//! `{"error": {"code": ..., "message": ..., "details": ...}}` with a status
//! derived from the code. Service errors convert into [`ApiError`] so
//! handlers can use `?` directly.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::ValidationErrors;

use crate::services::{
    AnalyticsError, BackupServiceError, CommentServiceError, EmailError, FeedError,
    MediaServiceError, NavServiceError, PostServiceError, SettingsServiceError, TagServiceError,
    UserServiceError, WhitelistServiceError,
};

pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
pub const FORBIDDEN: &str = "FORBIDDEN";
pub const NOT_FOUND: &str = "NOT_FOUND";
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const CONFLICT: &str = "CONFLICT";
pub const RATE_LIMITED: &str = "RATE_LIMITED";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(NOT_FOUND, message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(VALIDATION_ERROR, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(CONFLICT, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(RATE_LIMITED, message)
    }

    /// Log the cause and hide it from the client
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        tracing::error!(error = %cause, "Request failed");
        Self::new(INTERNAL_ERROR, "Internal server error")
    }

    /// Field-level messages under `details`
    pub fn invalid(errors: &ValidationErrors) -> Self {
        let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (field, errs) in errors.field_errors() {
            fields.entry(field.to_string()).or_default().extend(errs.iter().map(|e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string())
            }));
        }
        Self::with_details(
            VALIDATION_ERROR,
            "Validation failed",
            serde_json::to_value(fields).unwrap_or_default(),
        )
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            UNAUTHORIZED => StatusCode::UNAUTHORIZED,
            FORBIDDEN => StatusCode::FORBIDDEN,
            NOT_FOUND => StatusCode::NOT_FOUND,
            VALIDATION_ERROR => StatusCode::BAD_REQUEST,
            CONFLICT => StatusCode::CONFLICT,
            RATE_LIMITED => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation_error(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::validation_error(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::validation_error(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::validation_error(e.body_text())
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        Self::invalid(&errors)
    }
}

impl From<PostServiceError> for ApiError {
    fn from(e: PostServiceError) -> Self {
        match e {
            PostServiceError::NotFound(slug) => Self::not_found(format!("Post not found: {}", slug)),
            PostServiceError::SlugConflict(slug) => Self::conflict(format!("Slug already in use: {}", slug)),
            PostServiceError::Validation(errors) => Self::invalid(&errors),
            PostServiceError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<TagServiceError> for ApiError {
    fn from(e: TagServiceError) -> Self {
        match e {
            TagServiceError::NotFound(what) => Self::not_found(format!("Tag not found: {}", what)),
            TagServiceError::Conflict(msg) => Self::conflict(msg),
            TagServiceError::Validation(errors) => Self::invalid(&errors),
            TagServiceError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<SettingsServiceError> for ApiError {
    fn from(e: SettingsServiceError) -> Self {
        match e {
            SettingsServiceError::Validation(errors) => Self::invalid(&errors),
            other => Self::internal(other),
        }
    }
}

impl From<CommentServiceError> for ApiError {
    fn from(e: CommentServiceError) -> Self {
        match e {
            CommentServiceError::NotFound(what) => Self::not_found(what),
            CommentServiceError::Closed(msg) => Self::forbidden(msg),
            CommentServiceError::Validation(errors) => Self::invalid(&errors),
            CommentServiceError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<UserServiceError> for ApiError {
    fn from(e: UserServiceError) -> Self {
        match e {
            UserServiceError::InvalidCredentials => Self::unauthorized("Invalid email or password"),
            UserServiceError::RateLimited => {
                Self::rate_limited("Too many login attempts, try again later")
            }
            UserServiceError::Forbidden(msg) => Self::forbidden(msg),
            UserServiceError::Conflict(msg) => Self::conflict(msg),
            UserServiceError::NotFound(id) => Self::not_found(format!("User not found: {}", id)),
            UserServiceError::Validation(errors) => Self::invalid(&errors),
            UserServiceError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<NavServiceError> for ApiError {
    fn from(e: NavServiceError) -> Self {
        match e {
            NavServiceError::NotFound(id) => Self::not_found(format!("Nav item not found: {}", id)),
            NavServiceError::InvalidParent(msg) => Self::validation_error(msg),
            NavServiceError::Validation(errors) => Self::invalid(&errors),
            NavServiceError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<WhitelistServiceError> for ApiError {
    fn from(e: WhitelistServiceError) -> Self {
        match e {
            WhitelistServiceError::Conflict(email) => {
                Self::conflict(format!("Already whitelisted: {}", email))
            }
            WhitelistServiceError::NotFound(id) => {
                Self::not_found(format!("Whitelist entry not found: {}", id))
            }
            WhitelistServiceError::Validation(errors) => Self::invalid(&errors),
            WhitelistServiceError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<MediaServiceError> for ApiError {
    fn from(e: MediaServiceError) -> Self {
        match e {
            MediaServiceError::NotFound(id) => Self::not_found(format!("Media not found: {}", id)),
            MediaServiceError::InternalError(e) => Self::internal(e),
            other => Self::validation_error(other.to_string()),
        }
    }
}

impl From<EmailError> for ApiError {
    fn from(e: EmailError) -> Self {
        match e {
            EmailError::NotConfigured | EmailError::InvalidAddress(_) => {
                Self::validation_error(e.to_string())
            }
            EmailError::Transport(msg) => {
                tracing::warn!(error = %msg, "Test email failed");
                Self::new(INTERNAL_ERROR, format!("Failed to send email: {}", msg))
            }
            other => Self::internal(other),
        }
    }
}

impl From<FeedError> for ApiError {
    fn from(e: FeedError) -> Self {
        Self::internal(e)
    }
}

impl From<BackupServiceError> for ApiError {
    fn from(e: BackupServiceError) -> Self {
        match e {
            BackupServiceError::Forbidden(msg) => Self::forbidden(msg),
            BackupServiceError::Validation(errors) => Self::invalid(&errors),
            BackupServiceError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<AnalyticsError> for ApiError {
    fn from(e: AnalyticsError) -> Self {
        match e {
            AnalyticsError::Disabled => Self::not_found("Analytics is not enabled"),
            AnalyticsError::MissingSetting(name) => {
                Self::validation_error(format!("Analytics setting missing: {}", name))
            }
            other => Self::internal(other),
        }
    }
}
