//! User service
//!
//! Registration, password login with server-side sessions, profile changes
//! and the admin user list.
//!
//! - The first account ever registered becomes the administrator. Later
//!   sign-ups need `allow_registration`.
//! - Logins are rate limited per email (failed attempts) and per client IP
//!   (all attempts).
//! - Sessions are random 32-byte hex tokens valid for seven days.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::db::repositories::{is_unique_violation, PostRepository, SessionRepository, UserRepository};
use crate::models::{
    ChangePasswordInput, ListParams, LoginInput, PagedResult, RegisterInput, Session,
    UpdateProfileInput, User, UserRole,
};
use crate::services::password::{hash_password, verify_password};
use crate::services::rate_limiter::LoginRateLimiter;
use crate::services::settings::{SettingsService, SettingsServiceError};
use crate::services::RequestMeta;

/// Session lifetime in days
pub const SESSION_DAYS: i64 = 7;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Too many login attempts, try again later")]
    RateLimited,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("User not found: {0}")]
    NotFound(i64),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<SettingsServiceError> for UserServiceError {
    fn from(e: SettingsServiceError) -> Self {
        UserServiceError::InternalError(anyhow::anyhow!(e))
    }
}

/// A fresh session together with its user
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: Session,
    pub user: User,
}

pub struct UserService {
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionRepository>,
    posts: Arc<dyn PostRepository>,
    settings: Arc<SettingsService>,
    limiter: Arc<LoginRateLimiter>,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
        posts: Arc<dyn PostRepository>,
        settings: Arc<SettingsService>,
        limiter: Arc<LoginRateLimiter>,
    ) -> Self {
        Self {
            users,
            sessions,
            posts,
            settings,
            limiter,
        }
    }

    pub fn limiter(&self) -> &Arc<LoginRateLimiter> {
        &self.limiter
    }

    /// Register a new account. The first one becomes admin.
    pub async fn register(&self, input: RegisterInput) -> Result<User, UserServiceError> {
        input.validate()?;
        let email = input.email.trim().to_lowercase();

        let is_first = self.users.count().await.context("Failed to count users")? == 0;
        if !is_first && !self.settings.get().await?.allow_registration {
            return Err(UserServiceError::Forbidden("Registration is closed".to_string()));
        }
        if self.users.get_by_email(&email).await?.is_some() {
            return Err(UserServiceError::Conflict(format!("Email {} is already registered", email)));
        }

        let role = if is_first { UserRole::Admin } else { UserRole::User };
        let hash = hash_password(&input.password)?;
        let user = User::new(email.clone(), input.name.trim().to_string(), hash, role);

        match self.users.create(&user).await {
            Ok(user) => {
                tracing::info!(user_id = user.id, %role, "User registered");
                Ok(user)
            }
            Err(e) if is_unique_violation(&e) => {
                Err(UserServiceError::Conflict(format!("Email {} is already registered", email)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check credentials and open a session
    pub async fn login(&self, input: LoginInput, meta: RequestMeta) -> Result<LoginOutcome, UserServiceError> {
        input.validate()?;
        let email = input.email.trim().to_lowercase();

        let ip = meta.ip_address.as_deref().and_then(|ip| ip.parse::<IpAddr>().ok());
        if let Some(ip) = ip {
            if self.limiter.is_ip_limited(ip).await {
                tracing::warn!(%ip, "Login rate limited by IP");
                return Err(UserServiceError::RateLimited);
            }
            self.limiter.record_ip_request(ip).await;
        }
        if self.limiter.is_email_limited(&email).await {
            tracing::warn!(email = %email, "Login rate limited by email");
            return Err(UserServiceError::RateLimited);
        }

        let user = match self.users.get_by_email(&email).await? {
            Some(user) if verify_password(&input.password, &user.password_hash)? => user,
            _ => {
                self.limiter.record_failed_attempt(&email).await;
                tracing::info!(email = %email, "Failed login");
                return Err(UserServiceError::InvalidCredentials);
            }
        };
        self.limiter.clear_email_attempts(&email).await;

        let session = self.open_session(user.id, meta).await?;
        tracing::info!(user_id = user.id, "User logged in");
        Ok(LoginOutcome { session, user })
    }

    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.sessions.delete(token).await?;
        Ok(())
    }

    /// The user behind a live session. Expired sessions are removed.
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let Some(session) = self.sessions.get(token).await? else {
            return Ok(None);
        };
        if session.is_expired() {
            if let Err(e) = self.sessions.delete(token).await {
                tracing::warn!("Failed to delete expired session: {:#}", e);
            }
            return Ok(None);
        }
        Ok(self.users.get_by_id(session.user_id).await?)
    }

    /// Change the password and revoke every session of the user. Returns a
    /// new session for the caller.
    pub async fn change_password(
        &self,
        user_id: i64,
        input: ChangePasswordInput,
        meta: RequestMeta,
    ) -> Result<Session, UserServiceError> {
        input.validate()?;
        let user = self.require(user_id).await?;
        if !verify_password(&input.current_password, &user.password_hash)? {
            let mut errors = ValidationErrors::new();
            errors.add(
                "current_password",
                ValidationError::new("mismatch").with_message("Current password is incorrect".into()),
            );
            return Err(errors.into());
        }

        let hash = hash_password(&input.new_password)?;
        self.users.update_password(user_id, &hash).await?;
        let revoked = self.sessions.delete_by_user(user_id).await?;
        tracing::info!(user_id, revoked, "Password changed");
        self.open_session(user_id, meta).await
    }

    pub async fn update_profile(&self, user_id: i64, input: UpdateProfileInput) -> Result<User, UserServiceError> {
        input.validate()?;
        let user = self.require(user_id).await?;
        let name = input.name.map(|n| n.trim().to_string()).unwrap_or(user.name);
        let image = match input.image {
            Some(image) if image.trim().is_empty() => None,
            Some(image) => Some(image),
            None => user.image,
        };
        self.users.update_profile(user_id, &name, image.as_deref()).await?;
        self.require(user_id).await
    }

    pub async fn list(&self, params: &ListParams) -> Result<PagedResult<User>, UserServiceError> {
        let (items, total) = self.users.list(params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn get(&self, id: i64) -> Result<User, UserServiceError> {
        self.require(id).await
    }

    /// Change another user's role. Admins cannot demote themselves.
    pub async fn set_role(&self, acting: &User, id: i64, role: UserRole) -> Result<User, UserServiceError> {
        if acting.id == id && role != UserRole::Admin {
            return Err(UserServiceError::Forbidden("You cannot demote yourself".to_string()));
        }
        self.require(id).await?;
        self.users.update_role(id, role).await?;
        tracing::info!(user_id = id, %role, by = acting.id, "Role changed");
        self.require(id).await
    }

    /// Delete a user without posts. Admins cannot delete themselves.
    pub async fn delete(&self, acting: &User, id: i64) -> Result<(), UserServiceError> {
        if acting.id == id {
            return Err(UserServiceError::Forbidden("You cannot delete yourself".to_string()));
        }
        self.require(id).await?;
        let posts = self.posts.count_by_author(id).await?;
        if posts > 0 {
            return Err(UserServiceError::Conflict(format!("User {} still owns {} posts", id, posts)));
        }
        self.sessions.delete_by_user(id).await?;
        self.users.delete(id).await?;
        tracing::info!(user_id = id, by = acting.id, "User deleted");
        Ok(())
    }

    pub async fn purge_expired_sessions(&self) -> Result<u64, UserServiceError> {
        Ok(self.sessions.delete_expired().await?)
    }

    async fn require(&self, id: i64) -> Result<User, UserServiceError> {
        self.users.get_by_id(id).await?.ok_or(UserServiceError::NotFound(id))
    }

    async fn open_session(&self, user_id: i64, meta: RequestMeta) -> Result<Session, UserServiceError> {
        let now = Utc::now();
        let session = Session {
            token: generate_token()?,
            user_id,
            expires_at: now + Duration::days(SESSION_DAYS),
            ip_address: meta.ip_address,
            user_agent: meta.user_agent,
            created_at: now,
        };
        self.sessions.create(&session).await?;
        Ok(session)
    }
}

/// Random session token, hex encoded
pub fn generate_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut bytes).map_err(|e| anyhow::anyhow!("Failed to generate session token: {}", e))?;
    Ok(bytes.iter().fold(String::with_capacity(TOKEN_BYTES * 2), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    }))
}
