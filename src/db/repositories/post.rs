//! Post repository
//!
//! Database operations for posts, pages and memos, which share the `posts`
//! table. Tag links live in `post_tags` and are replaced as a set.

use super::{like_pattern, query_on, DbRow, InsertId};
use crate::db::DynDatabasePool;
use crate::models::{ListParams, Post, PostFilter, PostStatus, PostType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;

const POST_COLUMNS: &str = "id, title, slug, content, content_html, excerpt, cover_image, \
     post_type, status, pinned, allow_comments, view_count, author_id, published_at, \
     created_at, updated_at";

/// Post repository trait
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Create a new post
    async fn create(&self, post: &Post) -> Result<Post>;

    /// Persist every editable column of an existing post
    async fn update(&self, post: &Post) -> Result<()>;

    /// Delete a post; comments and tag links cascade
    async fn delete(&self, id: i64) -> Result<()>;

    /// Get post by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Post>>;

    /// Get post by slug
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Post>>;

    /// Check whether a slug is used by a post other than `exclude_id`
    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;

    /// Filtered listing: pinned first, then newest publication first
    async fn list(&self, filter: &PostFilter, params: &ListParams) -> Result<(Vec<Post>, i64)>;

    /// Count posts matching a filter
    async fn count(&self, filter: &PostFilter) -> Result<i64>;

    /// Count posts written by a user
    async fn count_by_author(&self, author_id: i64) -> Result<i64>;

    /// Bump the view counter
    async fn increment_view(&self, id: i64) -> Result<()>;

    /// Replace the tag links of a post
    async fn set_tags(&self, post_id: i64, tag_ids: &[i64]) -> Result<()>;

    /// Every post, for export
    async fn list_all(&self) -> Result<Vec<Post>>;
}

/// SQLx-based post repository implementation
pub struct SqlxPostRepository {
    pool: DynDatabasePool,
}

impl SqlxPostRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PostRepository> {
        Arc::new(Self::new(pool))
    }
}

/// WHERE clause and its string binds for a filter
fn filter_clause(filter: &PostFilter) -> (String, Vec<String>) {
    let mut conditions = Vec::new();
    let mut binds = Vec::new();

    if let Some(post_type) = filter.post_type {
        conditions.push("post_type = ?");
        binds.push(post_type.as_str().to_string());
    }
    if let Some(status) = filter.status {
        conditions.push("status = ?");
        binds.push(status.as_str().to_string());
    }
    if let Some(tag) = filter.tag.as_deref().filter(|t| !t.is_empty()) {
        conditions.push(
            "id IN (SELECT pt.post_id FROM post_tags pt \
             INNER JOIN tags t ON t.id = pt.tag_id WHERE t.slug = ?)",
        );
        binds.push(tag.to_string());
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push("(LOWER(title) LIKE ? ESCAPE '!' OR LOWER(content) LIKE ? ESCAPE '!')");
        let pattern = like_pattern(search);
        binds.push(pattern.clone());
        binds.push(pattern);
    }

    if conditions.is_empty() {
        (String::new(), binds)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), binds)
    }
}

#[async_trait]
impl PostRepository for SqlxPostRepository {
    async fn create(&self, post: &Post) -> Result<Post> {
        let now = Utc::now();
        let id = with_pool!(self.pool, |p| {
            sqlx::query(
                r#"
                INSERT INTO posts (title, slug, content, content_html, excerpt, cover_image,
                    post_type, status, pinned, allow_comments, view_count, author_id,
                    published_at, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&post.title)
            .bind(&post.slug)
            .bind(&post.content)
            .bind(&post.content_html)
            .bind(&post.excerpt)
            .bind(&post.cover_image)
            .bind(post.post_type.as_str())
            .bind(post.status.as_str())
            .bind(post.pinned)
            .bind(post.allow_comments)
            .bind(post.view_count)
            .bind(post.author_id)
            .bind(post.published_at)
            .bind(now)
            .bind(now)
            .execute(p)
            .await
            .context("Failed to create post")?
            .insert_id()
        });

        Ok(Post {
            id,
            created_at: now,
            updated_at: now,
            ..post.clone()
        })
    }

    async fn update(&self, post: &Post) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query(
                r#"
                UPDATE posts SET title = ?, slug = ?, content = ?, content_html = ?,
                    excerpt = ?, cover_image = ?, status = ?, pinned = ?,
                    allow_comments = ?, published_at = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&post.title)
            .bind(&post.slug)
            .bind(&post.content)
            .bind(&post.content_html)
            .bind(&post.excerpt)
            .bind(&post.cover_image)
            .bind(post.status.as_str())
            .bind(post.pinned)
            .bind(post.allow_comments)
            .bind(post.published_at)
            .bind(Utc::now())
            .bind(post.id)
            .execute(p)
            .await
            .context("Failed to update post")?;
        });
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("DELETE FROM posts WHERE id = ?")
                .bind(id)
                .execute(p)
                .await
                .context("Failed to delete post")?;
        });
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Post>> {
        let sql = format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS);
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get post by ID")?
                .map(|row| row_to_post(&row))
                .transpose()
        })
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Post>> {
        let sql = format!("SELECT {} FROM posts WHERE slug = ?", POST_COLUMNS);
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .bind(slug)
                .fetch_optional(p)
                .await
                .context("Failed to get post by slug")?
                .map(|row| row_to_post(&row))
                .transpose()
        })
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        with_pool!(self.pool, |p| {
            let row = sqlx::query("SELECT COUNT(*) AS count FROM posts WHERE slug = ? AND id <> ?")
                .bind(slug)
                .bind(exclude_id.unwrap_or(0))
                .fetch_one(p)
                .await
                .context("Failed to check post slug")?;
            Ok(row.get_i64("count")? > 0)
        })
    }

    async fn list(&self, filter: &PostFilter, params: &ListParams) -> Result<(Vec<Post>, i64)> {
        let total = self.count(filter).await?;
        let (clause, binds) = filter_clause(filter);
        let sql = format!(
            "SELECT {} FROM posts {} \
             ORDER BY pinned DESC, published_at DESC, created_at DESC, id DESC \
             LIMIT ? OFFSET ?",
            POST_COLUMNS, clause
        );

        let posts = with_pool!(self.pool, |p| {
            let mut query = query_on(p, &sql);
            for value in &binds {
                query = query.bind(value);
            }
            query
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(p)
                .await
                .context("Failed to list posts")?
                .iter()
                .map(row_to_post)
                .collect::<Result<Vec<_>>>()?
        });
        Ok((posts, total))
    }

    async fn count(&self, filter: &PostFilter) -> Result<i64> {
        let (clause, binds) = filter_clause(filter);
        let sql = format!("SELECT COUNT(*) AS count FROM posts {}", clause);
        with_pool!(self.pool, |p| {
            let mut query = query_on(p, &sql);
            for value in &binds {
                query = query.bind(value);
            }
            let row = query.fetch_one(p).await.context("Failed to count posts")?;
            row.get_i64("count")
        })
    }

    async fn count_by_author(&self, author_id: i64) -> Result<i64> {
        with_pool!(self.pool, |p| {
            let row = sqlx::query("SELECT COUNT(*) AS count FROM posts WHERE author_id = ?")
                .bind(author_id)
                .fetch_one(p)
                .await
                .context("Failed to count posts by author")?;
            row.get_i64("count")
        })
    }

    async fn increment_view(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("UPDATE posts SET view_count = view_count + 1 WHERE id = ?")
                .bind(id)
                .execute(p)
                .await
                .context("Failed to increment view count")?;
        });
        Ok(())
    }

    async fn set_tags(&self, post_id: i64, tag_ids: &[i64]) -> Result<()> {
        let mut tag_ids = tag_ids.to_vec();
        tag_ids.sort_unstable();
        tag_ids.dedup();

        with_pool!(self.pool, |p| {
            let mut tx = p.begin().await.context("Failed to begin transaction")?;
            sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .context("Failed to clear post tags")?;
            for tag_id in &tag_ids {
                sqlx::query("INSERT INTO post_tags (post_id, tag_id) VALUES (?, ?)")
                    .bind(post_id)
                    .bind(*tag_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to attach tag")?;
            }
            tx.commit().await.context("Failed to commit post tags")?;
        });
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Post>> {
        let sql = format!("SELECT {} FROM posts ORDER BY id", POST_COLUMNS);
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .fetch_all(p)
                .await
                .context("Failed to list posts")?
                .iter()
                .map(row_to_post)
                .collect()
        })
    }
}

fn row_to_post(row: &impl DbRow) -> Result<Post> {
    Ok(Post {
        id: row.get_i64("id")?,
        title: row.get_string("title")?,
        slug: row.get_string("slug")?,
        content: row.get_string("content")?,
        content_html: row.get_string("content_html")?,
        excerpt: row.get_opt_string("excerpt")?,
        cover_image: row.get_opt_string("cover_image")?,
        post_type: PostType::from_str(&row.get_string("post_type")?)?,
        status: PostStatus::from_str(&row.get_string("status")?)?,
        pinned: row.get_bool("pinned")?,
        allow_comments: row.get_bool("allow_comments")?,
        view_count: row.get_i64("view_count")?,
        author_id: row.get_i64("author_id")?,
        published_at: row.get_opt_datetime("published_at")?,
        created_at: row.get_datetime("created_at")?,
        updated_at: row.get_datetime("updated_at")?,
    })
}
