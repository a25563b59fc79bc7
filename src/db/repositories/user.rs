//! User repository
//!
//! Database operations for users.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite and MySQL

use super::{DbRow, InsertId};
use crate::db::DynDatabasePool;
use crate::models::{ListParams, User, UserRole};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;

const USER_COLUMNS: &str =
    "id, email, name, password_hash, role, image, created_at, updated_at";

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, user: &User) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Get user by email (case-insensitive)
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Update name and avatar
    async fn update_profile(&self, id: i64, name: &str, image: Option<&str>) -> Result<()>;

    /// Change a user's role
    async fn update_role(&self, id: i64, role: UserRole) -> Result<()>;

    /// Replace the password hash
    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()>;

    /// Delete a user
    async fn delete(&self, id: i64) -> Result<()>;

    /// Count total users
    async fn count(&self) -> Result<i64>;

    /// Count users with a given role
    async fn count_by_role(&self, role: UserRole) -> Result<i64>;

    /// List users, newest first
    async fn list(&self, params: &ListParams) -> Result<(Vec<User>, i64)>;

    /// Every user, for export
    async fn list_all(&self) -> Result<Vec<User>>;
}

/// SQLx-based user repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        let now = Utc::now();
        let email = user.email.trim().to_lowercase();
        let id = with_pool!(self.pool, |p| {
            sqlx::query(
                r#"
                INSERT INTO users (email, name, password_hash, role, image, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&email)
            .bind(&user.name)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(&user.image)
            .bind(now)
            .bind(now)
            .execute(p)
            .await
            .context("Failed to create user")?
            .insert_id()
        });

        Ok(User {
            id,
            email,
            created_at: now,
            updated_at: now,
            ..user.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get user by ID")?
                .map(|row| row_to_user(&row))
                .transpose()
        })
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS);
        let email = email.trim().to_lowercase();
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .bind(&email)
                .fetch_optional(p)
                .await
                .context("Failed to get user by email")?
                .map(|row| row_to_user(&row))
                .transpose()
        })
    }

    async fn update_profile(&self, id: i64, name: &str, image: Option<&str>) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("UPDATE users SET name = ?, image = ?, updated_at = ? WHERE id = ?")
                .bind(name)
                .bind(image)
                .bind(Utc::now())
                .bind(id)
                .execute(p)
                .await
                .context("Failed to update user profile")?;
        });
        Ok(())
    }

    async fn update_role(&self, id: i64, role: UserRole) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
                .bind(role.as_str())
                .bind(Utc::now())
                .bind(id)
                .execute(p)
                .await
                .context("Failed to update user role")?;
        });
        Ok(())
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
                .bind(password_hash)
                .bind(Utc::now())
                .bind(id)
                .execute(p)
                .await
                .context("Failed to update password")?;
        });
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("DELETE FROM users WHERE id = ?")
                .bind(id)
                .execute(p)
                .await
                .context("Failed to delete user")?;
        });
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        with_pool!(self.pool, |p| {
            let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
                .fetch_one(p)
                .await
                .context("Failed to count users")?;
            row.get_i64("count")
        })
    }

    async fn count_by_role(&self, role: UserRole) -> Result<i64> {
        with_pool!(self.pool, |p| {
            let row = sqlx::query("SELECT COUNT(*) AS count FROM users WHERE role = ?")
                .bind(role.as_str())
                .fetch_one(p)
                .await
                .context("Failed to count users by role")?;
            row.get_i64("count")
        })
    }

    async fn list(&self, params: &ListParams) -> Result<(Vec<User>, i64)> {
        let total = self.count().await?;
        let sql = format!(
            "SELECT {} FROM users ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            USER_COLUMNS
        );
        let users = with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(p)
                .await
                .context("Failed to list users")?
                .iter()
                .map(row_to_user)
                .collect::<Result<Vec<_>>>()?
        });
        Ok((users, total))
    }

    async fn list_all(&self) -> Result<Vec<User>> {
        let sql = format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS);
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .fetch_all(p)
                .await
                .context("Failed to list users")?
                .iter()
                .map(row_to_user)
                .collect()
        })
    }
}

fn row_to_user(row: &impl DbRow) -> Result<User> {
    let role = UserRole::from_str(&row.get_string("role")?).unwrap_or_default();
    Ok(User {
        id: row.get_i64("id")?,
        email: row.get_string("email")?,
        name: row.get_string("name")?,
        password_hash: row.get_string("password_hash")?,
        role,
        image: row.get_opt_string("image")?,
        created_at: row.get_datetime("created_at")?,
        updated_at: row.get_datetime("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;

    fn new_user(email: &str, role: UserRole) -> User {
        User::new(email.to_string(), "Name".to_string(), "hash".to_string(), role)
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let repo = SqlxUserRepository::new(migrated_pool().await);

        let created = repo
            .create(&new_user(" Alice@Example.com ", UserRole::Admin))
            .await
            .unwrap();
        assert!(created.id > 0);
        assert_eq!(created.email, "alice@example.com");

        let by_id = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.role, UserRole::Admin);

        let by_email = repo.get_by_email("ALICE@example.com").await.unwrap();
        assert_eq!(by_email.unwrap().id, created.id);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_unique_violation() {
        let repo = SqlxUserRepository::new(migrated_pool().await);
        repo.create(&new_user("a@b.com", UserRole::User)).await.unwrap();

        let err = repo
            .create(&new_user("a@b.com", UserRole::User))
            .await
            .unwrap_err();
        assert!(crate::db::repositories::is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_update_role_and_password() {
        let repo = SqlxUserRepository::new(migrated_pool().await);
        let user = repo.create(&new_user("u@b.com", UserRole::User)).await.unwrap();

        repo.update_role(user.id, UserRole::Admin).await.unwrap();
        repo.update_password(user.id, "new-hash").await.unwrap();
        repo.update_profile(user.id, "Renamed", Some("https://img/x.png"))
            .await
            .unwrap();

        let user = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert!(user.is_admin());
        assert_eq!(user.password_hash, "new-hash");
        assert_eq!(user.name, "Renamed");
        assert_eq!(user.image.as_deref(), Some("https://img/x.png"));
        assert_eq!(repo.count_by_role(UserRole::Admin).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_paginates() {
        let repo = SqlxUserRepository::new(migrated_pool().await);
        for i in 0..5 {
            repo.create(&new_user(&format!("u{}@b.com", i), UserRole::User))
                .await
                .unwrap();
        }

        let (users, total) = repo.list(&ListParams::new(2, 2)).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(users.len(), 2);

        let (users, _) = repo.list(&ListParams::new(3, 2)).await.unwrap();
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_user() {
        let repo = SqlxUserRepository::new(migrated_pool().await);
        let user = repo.create(&new_user("d@b.com", UserRole::User)).await.unwrap();
        repo.delete(user.id).await.unwrap();
        assert!(repo.get_by_id(user.id).await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
