//! Session repository
//!
//! Server-side login sessions keyed by an opaque random token.

use super::DbRow;
use crate::db::DynDatabasePool;
use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Store a new session
    async fn create(&self, session: &Session) -> Result<()>;

    /// Get a session by token, expired or not
    async fn get(&self, token: &str) -> Result<Option<Session>>;

    /// Delete one session
    async fn delete(&self, token: &str) -> Result<()>;

    /// Delete every session of a user
    async fn delete_by_user(&self, user_id: i64) -> Result<u64>;

    /// Remove sessions past their expiry
    async fn delete_expired(&self) -> Result<u64>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query(
                r#"
                INSERT INTO sessions (token, user_id, expires_at, ip_address, user_agent, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&session.token)
            .bind(session.user_id)
            .bind(session.expires_at)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(session.created_at)
            .execute(p)
            .await
            .context("Failed to create session")?;
        });
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<Session>> {
        with_pool!(self.pool, |p| {
            sqlx::query(
                "SELECT token, user_id, expires_at, ip_address, user_agent, created_at \
                 FROM sessions WHERE token = ?",
            )
            .bind(token)
            .fetch_optional(p)
            .await
            .context("Failed to get session")?
            .map(|row| row_to_session(&row))
            .transpose()
        })
    }

    async fn delete(&self, token: &str) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("DELETE FROM sessions WHERE token = ?")
                .bind(token)
                .execute(p)
                .await
                .context("Failed to delete session")?;
        });
        Ok(())
    }

    async fn delete_by_user(&self, user_id: i64) -> Result<u64> {
        Ok(with_pool!(self.pool, |p| {
            sqlx::query("DELETE FROM sessions WHERE user_id = ?")
                .bind(user_id)
                .execute(p)
                .await
                .context("Failed to delete user sessions")?
                .rows_affected()
        }))
    }

    async fn delete_expired(&self) -> Result<u64> {
        Ok(with_pool!(self.pool, |p| {
            sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
                .bind(Utc::now())
                .execute(p)
                .await
                .context("Failed to delete expired sessions")?
                .rows_affected()
        }))
    }
}

fn row_to_session(row: &impl DbRow) -> Result<Session> {
    Ok(Session {
        token: row.get_string("token")?,
        user_id: row.get_i64("user_id")?,
        expires_at: row.get_datetime("expires_at")?,
        ip_address: row.get_opt_string("ip_address")?,
        user_agent: row.get_opt_string("user_agent")?,
        created_at: row.get_datetime("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_user, migrated_pool};
    use crate::models::UserRole;
    use chrono::Duration;

    fn session(token: &str, user_id: i64, ttl: Duration) -> Session {
        let now = Utc::now();
        Session {
            token: token.to_string(),
            user_id,
            expires_at: now + ttl,
            ip_address: Some("127.0.0.1".to_string()),
            user_agent: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let pool = migrated_pool().await;
        let user = insert_user(&pool, "s@b.com", UserRole::User).await;
        let repo = SqlxSessionRepository::new(pool);

        repo.create(&session("tok", user.id, Duration::days(7)))
            .await
            .unwrap();
        let found = repo.get("tok").await.unwrap().unwrap();
        assert_eq!(found.user_id, user.id);
        assert!(!found.is_expired());

        repo.delete("tok").await.unwrap();
        assert!(repo.get("tok").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_expired_keeps_live_sessions() {
        let pool = migrated_pool().await;
        let user = insert_user(&pool, "s@b.com", UserRole::User).await;
        let repo = SqlxSessionRepository::new(pool);

        repo.create(&session("old", user.id, Duration::hours(-1)))
            .await
            .unwrap();
        repo.create(&session("new", user.id, Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(repo.delete_expired().await.unwrap(), 1);
        assert!(repo.get("old").await.unwrap().is_none());
        assert!(repo.get("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_by_user() {
        let pool = migrated_pool().await;
        let user = insert_user(&pool, "s@b.com", UserRole::User).await;
        let repo = SqlxSessionRepository::new(pool);

        for token in ["a", "b"] {
            repo.create(&session(token, user.id, Duration::hours(1)))
                .await
                .unwrap();
        }
        assert_eq!(repo.delete_by_user(user.id).await.unwrap(), 2);
    }
}
