//! Email whitelist repository

use super::{DbRow, InsertId};
use crate::db::DynDatabasePool;
use crate::models::WhitelistEntry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

#[async_trait]
pub trait WhitelistRepository: Send + Sync {
    /// Entries, newest first
    async fn list(&self) -> Result<Vec<WhitelistEntry>>;
    /// Insert an entry; the email is stored lower-cased
    async fn add(&self, email: &str, note: Option<&str>) -> Result<WhitelistEntry>;
    async fn remove(&self, id: i64) -> Result<bool>;
    /// Case-insensitive membership test
    async fn contains(&self, email: &str) -> Result<bool>;
}

pub struct SqlxWhitelistRepository {
    pool: DynDatabasePool,
}

impl SqlxWhitelistRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn WhitelistRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl WhitelistRepository for SqlxWhitelistRepository {
    async fn list(&self) -> Result<Vec<WhitelistEntry>> {
        with_pool!(self.pool, |p| {
            sqlx::query(
                "SELECT id, email, note, created_at FROM email_whitelist \
                 ORDER BY created_at DESC, id DESC",
            )
            .fetch_all(p)
            .await
            .context("Failed to list whitelist")?
            .iter()
            .map(row_to_entry)
            .collect()
        })
    }

    async fn add(&self, email: &str, note: Option<&str>) -> Result<WhitelistEntry> {
        let email = email.trim().to_lowercase();
        let note = note.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);
        let now = Utc::now();
        let id = with_pool!(self.pool, |p| {
            sqlx::query("INSERT INTO email_whitelist (email, note, created_at) VALUES (?, ?, ?)")
                .bind(&email)
                .bind(&note)
                .bind(now)
                .execute(p)
                .await
                .context("Failed to add whitelist entry")?
                .insert_id()
        });
        Ok(WhitelistEntry {
            id,
            email,
            note,
            created_at: now,
        })
    }

    async fn remove(&self, id: i64) -> Result<bool> {
        Ok(with_pool!(self.pool, |p| {
            sqlx::query("DELETE FROM email_whitelist WHERE id = ?")
                .bind(id)
                .execute(p)
                .await
                .context("Failed to remove whitelist entry")?
                .rows_affected()
                > 0
        }))
    }

    async fn contains(&self, email: &str) -> Result<bool> {
        with_pool!(self.pool, |p| {
            let row = sqlx::query("SELECT COUNT(*) AS count FROM email_whitelist WHERE email = ?")
                .bind(email.trim().to_lowercase())
                .fetch_one(p)
                .await
                .context("Failed to check whitelist")?;
            Ok(row.get_i64("count")? > 0)
        })
    }
}

fn row_to_entry(row: &impl DbRow) -> Result<WhitelistEntry> {
    Ok(WhitelistEntry {
        id: row.get_i64("id")?,
        email: row.get_string("email")?,
        note: row.get_opt_string("note")?,
        created_at: row.get_datetime("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{is_unique_violation, test_support::migrated_pool};

    #[tokio::test]
    async fn test_add_contains_remove() {
        let repo = SqlxWhitelistRepository::new(migrated_pool().await);
        let entry = repo.add(" Friend@Example.COM ", Some("  ")).await.unwrap();
        assert_eq!(entry.email, "friend@example.com");
        assert!(entry.note.is_none());

        assert!(repo.contains("FRIEND@example.com").await.unwrap());
        assert!(!repo.contains("other@example.com").await.unwrap());
        assert_eq!(repo.list().await.unwrap().len(), 1);

        assert!(repo.remove(entry.id).await.unwrap());
        assert!(!repo.contains("friend@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_is_rejected() {
        let repo = SqlxWhitelistRepository::new(migrated_pool().await);
        repo.add("a@b.com", None).await.unwrap();
        let err = repo.add("A@B.com", None).await.unwrap_err();
        assert!(is_unique_violation(&err));
    }
}
