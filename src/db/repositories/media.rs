//! Media repository
//!
//! Metadata rows for uploaded files. The bytes live in a storage backend.

use super::{DbRow, InsertId};
use crate::db::DynDatabasePool;
use crate::models::{ListParams, Media, StorageKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;

const MEDIA_COLUMNS: &str =
    "id, filename, storage_key, url, mime_type, size, storage, uploaded_by, created_at";

#[async_trait]
pub trait MediaRepository: Send + Sync {
    async fn create(&self, media: &Media) -> Result<Media>;
    async fn get_by_id(&self, id: i64) -> Result<Option<Media>>;
    /// Uploads, newest first
    async fn list(&self, params: &ListParams) -> Result<(Vec<Media>, i64)>;
    async fn delete(&self, id: i64) -> Result<bool>;
    /// Every row, for export
    async fn list_all(&self) -> Result<Vec<Media>>;
}

pub struct SqlxMediaRepository {
    pool: DynDatabasePool,
}

impl SqlxMediaRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn MediaRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl MediaRepository for SqlxMediaRepository {
    async fn create(&self, media: &Media) -> Result<Media> {
        let now = Utc::now();
        let id = with_pool!(self.pool, |p| {
            sqlx::query(
                r#"
                INSERT INTO media (filename, storage_key, url, mime_type, size, storage,
                    uploaded_by, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&media.filename)
            .bind(&media.storage_key)
            .bind(&media.url)
            .bind(&media.mime_type)
            .bind(media.size)
            .bind(media.storage.as_str())
            .bind(media.uploaded_by)
            .bind(now)
            .execute(p)
            .await
            .context("Failed to create media")?
            .insert_id()
        });
        Ok(Media {
            id,
            created_at: now,
            ..media.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Media>> {
        let sql = format!("SELECT {} FROM media WHERE id = ?", MEDIA_COLUMNS);
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get media")?
                .map(|row| row_to_media(&row))
                .transpose()
        })
    }

    async fn list(&self, params: &ListParams) -> Result<(Vec<Media>, i64)> {
        let sql = format!(
            "SELECT {} FROM media ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            MEDIA_COLUMNS
        );
        with_pool!(self.pool, |p| {
            let total = sqlx::query("SELECT COUNT(*) AS count FROM media")
                .fetch_one(p)
                .await
                .context("Failed to count media")?
                .get_i64("count")?;
            let items = sqlx::query(&sql)
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(p)
                .await
                .context("Failed to list media")?
                .iter()
                .map(row_to_media)
                .collect::<Result<Vec<_>>>()?;
            Ok((items, total))
        })
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(with_pool!(self.pool, |p| {
            sqlx::query("DELETE FROM media WHERE id = ?")
                .bind(id)
                .execute(p)
                .await
                .context("Failed to delete media")?
                .rows_affected()
                > 0
        }))
    }

    async fn list_all(&self) -> Result<Vec<Media>> {
        let sql = format!("SELECT {} FROM media ORDER BY id", MEDIA_COLUMNS);
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .fetch_all(p)
                .await
                .context("Failed to list media")?
                .iter()
                .map(row_to_media)
                .collect()
        })
    }
}

fn row_to_media(row: &impl DbRow) -> Result<Media> {
    Ok(Media {
        id: row.get_i64("id")?,
        filename: row.get_string("filename")?,
        storage_key: row.get_string("storage_key")?,
        url: row.get_string("url")?,
        mime_type: row.get_string("mime_type")?,
        size: row.get_i64("size")?,
        storage: StorageKind::from_str(&row.get_string("storage")?)?,
        uploaded_by: row.get_opt_i64("uploaded_by")?,
        created_at: row.get_datetime("created_at")?,
    })
}
