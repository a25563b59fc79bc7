//! Tag repository
//!
//! Database operations for tags and the `post_tags` join table.

use super::{query_on, DbRow, InsertId};
use crate::db::DynDatabasePool;
use crate::models::{PostTag, Tag, TagWithCount};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// Tag repository trait
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Create a new tag
    async fn create(&self, tag: &Tag) -> Result<Tag>;

    /// Get tag by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Tag>>;

    /// Get tag by slug
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tag>>;

    /// Get tag by name (case-insensitive)
    async fn get_by_name(&self, name: &str) -> Result<Option<Tag>>;

    /// Check whether a slug is taken by another tag
    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;

    /// Rename a tag
    async fn update(&self, tag: &Tag) -> Result<()>;

    /// Delete a tag. `post_tags` rows go with it.
    async fn delete(&self, id: i64) -> Result<()>;

    /// All tags with the number of published posts carrying each
    async fn list_with_counts(&self) -> Result<Vec<TagWithCount>>;

    /// Tags attached to a post, by name
    async fn list_for_post(&self, post_id: i64) -> Result<Vec<Tag>>;

    /// Tags for several posts at once, as `(post_id, tag)` pairs
    async fn list_for_posts(&self, post_ids: &[i64]) -> Result<Vec<(i64, Tag)>>;

    /// Every tag, for export
    async fn list_all(&self) -> Result<Vec<Tag>>;

    /// Every `post_tags` row, for export
    async fn list_post_tags(&self) -> Result<Vec<PostTag>>;
}

/// SQLx-based tag repository implementation
pub struct SqlxTagRepository {
    pool: DynDatabasePool,
}

impl SqlxTagRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TagRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl TagRepository for SqlxTagRepository {
    async fn create(&self, tag: &Tag) -> Result<Tag> {
        let now = Utc::now();
        let id = with_pool!(self.pool, |p| {
            sqlx::query("INSERT INTO tags (name, slug, created_at) VALUES (?, ?, ?)")
                .bind(&tag.name)
                .bind(&tag.slug)
                .bind(now)
                .execute(p)
                .await
                .context("Failed to create tag")?
                .insert_id()
        });
        Ok(Tag {
            id,
            name: tag.name.clone(),
            slug: tag.slug.clone(),
            created_at: now,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Tag>> {
        with_pool!(self.pool, |p| {
            sqlx::query("SELECT id, name, slug, created_at FROM tags WHERE id = ?")
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get tag by ID")?
                .map(|row| row_to_tag(&row))
                .transpose()
        })
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tag>> {
        with_pool!(self.pool, |p| {
            sqlx::query("SELECT id, name, slug, created_at FROM tags WHERE slug = ?")
                .bind(slug)
                .fetch_optional(p)
                .await
                .context("Failed to get tag by slug")?
                .map(|row| row_to_tag(&row))
                .transpose()
        })
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Tag>> {
        with_pool!(self.pool, |p| {
            sqlx::query("SELECT id, name, slug, created_at FROM tags WHERE LOWER(name) = ?")
                .bind(name.trim().to_lowercase())
                .fetch_optional(p)
                .await
                .context("Failed to get tag by name")?
                .map(|row| row_to_tag(&row))
                .transpose()
        })
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        with_pool!(self.pool, |p| {
            let row = sqlx::query("SELECT COUNT(*) AS count FROM tags WHERE slug = ? AND id <> ?")
                .bind(slug)
                .bind(exclude_id.unwrap_or(0))
                .fetch_one(p)
                .await
                .context("Failed to check tag slug")?;
            Ok(row.get_i64("count")? > 0)
        })
    }

    async fn update(&self, tag: &Tag) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("UPDATE tags SET name = ?, slug = ? WHERE id = ?")
                .bind(&tag.name)
                .bind(&tag.slug)
                .bind(tag.id)
                .execute(p)
                .await
                .context("Failed to update tag")?;
        });
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, |p| {
            let mut tx = p.begin().await.context("Failed to begin transaction")?;
            sqlx::query("DELETE FROM post_tags WHERE tag_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to detach tag from posts")?;
            sqlx::query("DELETE FROM tags WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete tag")?;
            tx.commit().await.context("Failed to commit tag deletion")?;
        });
        Ok(())
    }

    async fn list_with_counts(&self) -> Result<Vec<TagWithCount>> {
        with_pool!(self.pool, |p| {
            sqlx::query(
                r#"
                SELECT t.id, t.name, t.slug, t.created_at, COUNT(po.id) AS post_count
                FROM tags t
                LEFT JOIN post_tags pt ON pt.tag_id = t.id
                LEFT JOIN posts po ON po.id = pt.post_id AND po.status = 'published'
                GROUP BY t.id, t.name, t.slug, t.created_at
                ORDER BY post_count DESC, t.name ASC
                "#,
            )
            .fetch_all(p)
            .await
            .context("Failed to list tags")?
            .iter()
            .map(|row| Ok(TagWithCount::new(row_to_tag(row)?, row.get_i64("post_count")?)))
            .collect()
        })
    }

    async fn list_for_post(&self, post_id: i64) -> Result<Vec<Tag>> {
        with_pool!(self.pool, |p| {
            sqlx::query(
                r#"
                SELECT t.id, t.name, t.slug, t.created_at
                FROM tags t
                INNER JOIN post_tags pt ON pt.tag_id = t.id
                WHERE pt.post_id = ?
                ORDER BY t.name
                "#,
            )
            .bind(post_id)
            .fetch_all(p)
            .await
            .context("Failed to list tags for post")?
            .iter()
            .map(row_to_tag)
            .collect()
        })
    }

    async fn list_for_posts(&self, post_ids: &[i64]) -> Result<Vec<(i64, Tag)>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; post_ids.len()].join(", ");
        let sql = format!(
            r#"
            SELECT pt.post_id, t.id, t.name, t.slug, t.created_at
            FROM tags t
            INNER JOIN post_tags pt ON pt.tag_id = t.id
            WHERE pt.post_id IN ({})
            ORDER BY t.name
            "#,
            placeholders
        );
        with_pool!(self.pool, |p| {
            let mut query = query_on(p, &sql);
            for id in post_ids {
                query = query.bind(*id);
            }
            query
                .fetch_all(p)
                .await
                .context("Failed to list tags for posts")?
                .iter()
                .map(|row| Ok((row.get_i64("post_id")?, row_to_tag(row)?)))
                .collect()
        })
    }

    async fn list_all(&self) -> Result<Vec<Tag>> {
        with_pool!(self.pool, |p| {
            sqlx::query("SELECT id, name, slug, created_at FROM tags ORDER BY id")
                .fetch_all(p)
                .await
                .context("Failed to list tags")?
                .iter()
                .map(row_to_tag)
                .collect()
        })
    }

    async fn list_post_tags(&self) -> Result<Vec<PostTag>> {
        with_pool!(self.pool, |p| {
            sqlx::query("SELECT post_id, tag_id FROM post_tags ORDER BY post_id, tag_id")
                .fetch_all(p)
                .await
                .context("Failed to list post tags")?
                .iter()
                .map(|row| {
                    Ok(PostTag {
                        post_id: row.get_i64("post_id")?,
                        tag_id: row.get_i64("tag_id")?,
                    })
                })
                .collect()
        })
    }
}

pub(crate) fn row_to_tag(row: &impl DbRow) -> Result<Tag> {
    Ok(Tag {
        id: row.get_i64("id")?,
        name: row.get_string("name")?,
        slug: row.get_string("slug")?,
        created_at: row.get_datetime("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;

    #[tokio::test]
    async fn test_create_and_lookup() {
        let repo = SqlxTagRepository::new(migrated_pool().await);
        let tag = repo
            .create(&Tag::new("Rust".to_string(), "rust".to_string()))
            .await
            .unwrap();
        assert!(tag.id > 0);

        assert_eq!(repo.get_by_slug("rust").await.unwrap().unwrap().id, tag.id);
        assert_eq!(repo.get_by_name(" RUST ").await.unwrap().unwrap().id, tag.id);
        assert!(repo.slug_exists("rust", None).await.unwrap());
        assert!(!repo.slug_exists("rust", Some(tag.id)).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_tag() {
        let repo = SqlxTagRepository::new(migrated_pool().await);
        let mut tag = repo
            .create(&Tag::new("Go".to_string(), "go".to_string()))
            .await
            .unwrap();
        tag.name = "Golang".to_string();
        tag.slug = "golang".to_string();
        repo.update(&tag).await.unwrap();

        let loaded = repo.get_by_id(tag.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Golang");
        assert!(repo.get_by_slug("go").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_tags_have_zero_count() {
        let repo = SqlxTagRepository::new(migrated_pool().await);
        repo.create(&Tag::new("A".to_string(), "a".to_string()))
            .await
            .unwrap();

        let tags = repo.list_with_counts().await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].post_count, 0);
        assert!(repo.list_for_posts(&[]).await.unwrap().is_empty());
    }
}
