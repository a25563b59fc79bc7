//! Comment repository
//!
//! Database operations for comments and their moderation state.

use super::{query_on, DbRow, InsertId};
use crate::db::DynDatabasePool;
use crate::models::{AdminComment, Comment, CommentAuthor, CommentStatus, ListParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;

const COMMENT_COLUMNS: &str = "c.id, c.post_id, c.parent_id, c.user_id, c.guest_name, \
     c.guest_email, c.content, c.status, c.spam_score, c.ip_address, c.user_agent, c.created_at";

/// Comment repository trait
#[async_trait]
pub trait CommentRepository: Send + Sync {
    /// Create a new comment
    async fn create(&self, comment: &Comment) -> Result<Comment>;

    /// Get comment by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Comment>>;

    /// Get a comment with its author's display data
    async fn get_with_author(&self, id: i64) -> Result<Option<(Comment, CommentAuthor)>>;

    /// Move comments into `status`. Returns the ids that were in a
    /// different status before; missing ids and comments already in
    /// `status` are left out.
    async fn update_status_many(&self, ids: &[i64], status: CommentStatus) -> Result<Vec<i64>>;

    /// Delete one comment; replies cascade
    async fn delete(&self, id: i64) -> Result<bool>;

    /// Delete several comments
    async fn delete_many(&self, ids: &[i64]) -> Result<u64>;

    /// Approved comments of a post with their authors, oldest first
    async fn list_approved_for_post(&self, post_id: i64) -> Result<Vec<(Comment, CommentAuthor)>>;

    /// Moderation queue, newest first, optionally filtered by status
    async fn list_admin(
        &self,
        status: Option<CommentStatus>,
        params: &ListParams,
    ) -> Result<(Vec<AdminComment>, i64)>;

    /// Count comments in a status
    async fn count_by_status(&self, status: CommentStatus) -> Result<i64>;

    /// Every comment, parents before replies, for export
    async fn list_all(&self) -> Result<Vec<Comment>>;
}

/// SQLx-based comment repository implementation
pub struct SqlxCommentRepository {
    pool: DynDatabasePool,
}

impl SqlxCommentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CommentRepository> {
        Arc::new(Self::new(pool))
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait]
impl CommentRepository for SqlxCommentRepository {
    async fn create(&self, comment: &Comment) -> Result<Comment> {
        let now = Utc::now();
        let id = with_pool!(self.pool, |p| {
            sqlx::query(
                r#"
                INSERT INTO comments (post_id, parent_id, user_id, guest_name, guest_email,
                    content, status, spam_score, ip_address, user_agent, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(comment.post_id)
            .bind(comment.parent_id)
            .bind(comment.user_id)
            .bind(&comment.guest_name)
            .bind(&comment.guest_email)
            .bind(&comment.content)
            .bind(comment.status.as_str())
            .bind(comment.spam_score)
            .bind(&comment.ip_address)
            .bind(&comment.user_agent)
            .bind(now)
            .execute(p)
            .await
            .context("Failed to create comment")?
            .insert_id()
        });

        Ok(Comment {
            id,
            created_at: now,
            ..comment.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Comment>> {
        let sql = format!("SELECT {} FROM comments c WHERE c.id = ?", COMMENT_COLUMNS);
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get comment")?
                .map(|row| row_to_comment(&row))
                .transpose()
        })
    }

    async fn get_with_author(&self, id: i64) -> Result<Option<(Comment, CommentAuthor)>> {
        let sql = format!(
            "SELECT {}, u.name AS user_name, u.email AS user_email, u.role AS user_role \
             FROM comments c LEFT JOIN users u ON u.id = c.user_id WHERE c.id = ?",
            COMMENT_COLUMNS
        );
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get comment")?
                .map(|row| Ok((row_to_comment(&row)?, row_to_author(&row)?)))
                .transpose()
        })
    }

    async fn update_status_many(&self, ids: &[i64], status: CommentStatus) -> Result<Vec<i64>> {
        const SQL: &str = "UPDATE comments SET status = ? WHERE id = ? AND status <> ?";
        let mut changed = Vec::with_capacity(ids.len());
        // Conditional per row: only the caller that made the change gets the id
        for &id in ids {
            let affected = with_pool!(self.pool, |p| {
                sqlx::query(SQL)
                    .bind(status.as_str())
                    .bind(id)
                    .bind(status.as_str())
                    .execute(p)
                    .await
                    .context("Failed to update comment status")?
                    .rows_affected()
            });
            if affected > 0 && !changed.contains(&id) {
                changed.push(id);
            }
        }
        Ok(changed)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.delete_many(&[id]).await? > 0)
    }

    async fn delete_many(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!("DELETE FROM comments WHERE id IN ({})", placeholders(ids.len()));
        Ok(with_pool!(self.pool, |p| {
            let mut query = query_on(p, &sql);
            for id in ids {
                query = query.bind(*id);
            }
            query
                .execute(p)
                .await
                .context("Failed to delete comments")?
                .rows_affected()
        }))
    }

    async fn list_approved_for_post(&self, post_id: i64) -> Result<Vec<(Comment, CommentAuthor)>> {
        let sql = format!(
            "SELECT {}, u.name AS user_name, u.email AS user_email, u.role AS user_role \
             FROM comments c LEFT JOIN users u ON u.id = c.user_id \
             WHERE c.post_id = ? AND c.status = 'approved' \
             ORDER BY c.created_at ASC, c.id ASC",
            COMMENT_COLUMNS
        );
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .bind(post_id)
                .fetch_all(p)
                .await
                .context("Failed to list comments")?
                .iter()
                .map(|row| Ok((row_to_comment(row)?, row_to_author(row)?)))
                .collect()
        })
    }

    async fn list_admin(
        &self,
        status: Option<CommentStatus>,
        params: &ListParams,
    ) -> Result<(Vec<AdminComment>, i64)> {
        let clause = if status.is_some() { "WHERE c.status = ?" } else { "" };
        let count_sql = format!("SELECT COUNT(*) AS count FROM comments c {}", clause);
        let list_sql = format!(
            "SELECT {}, po.title AS post_title, po.slug AS post_slug, \
             u.name AS user_name, u.email AS user_email, u.role AS user_role \
             FROM comments c \
             INNER JOIN posts po ON po.id = c.post_id \
             LEFT JOIN users u ON u.id = c.user_id \
             {} ORDER BY c.created_at DESC, c.id DESC LIMIT ? OFFSET ?",
            COMMENT_COLUMNS, clause
        );
        let status = status.map(|s| s.as_str());

        with_pool!(self.pool, |p| {
            let mut count_query = query_on(p, &count_sql);
            let mut list_query = query_on(p, &list_sql);
            if let Some(status) = status {
                count_query = count_query.bind(status);
                list_query = list_query.bind(status);
            }

            let total = count_query
                .fetch_one(p)
                .await
                .context("Failed to count comments")?
                .get_i64("count")?;
            let items = list_query
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(p)
                .await
                .context("Failed to list comments")?
                .iter()
                .map(|row| {
                    let comment = row_to_comment(row)?;
                    let author = row_to_author(row)?;
                    Ok(AdminComment {
                        comment,
                        post_title: row.get_string("post_title")?,
                        post_slug: row.get_string("post_slug")?,
                        author_name: author.name,
                        author_email: author.email,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((items, total))
        })
    }

    async fn count_by_status(&self, status: CommentStatus) -> Result<i64> {
        with_pool!(self.pool, |p| {
            let row = sqlx::query("SELECT COUNT(*) AS count FROM comments WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(p)
                .await
                .context("Failed to count comments")?;
            row.get_i64("count")
        })
    }

    async fn list_all(&self) -> Result<Vec<Comment>> {
        let sql = format!("SELECT {} FROM comments c ORDER BY c.id", COMMENT_COLUMNS);
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .fetch_all(p)
                .await
                .context("Failed to list comments")?
                .iter()
                .map(row_to_comment)
                .collect()
        })
    }
}

fn row_to_comment(row: &impl DbRow) -> Result<Comment> {
    Ok(Comment {
        id: row.get_i64("id")?,
        post_id: row.get_i64("post_id")?,
        parent_id: row.get_opt_i64("parent_id")?,
        user_id: row.get_opt_i64("user_id")?,
        guest_name: row.get_opt_string("guest_name")?,
        guest_email: row.get_opt_string("guest_email")?,
        content: row.get_string("content")?,
        status: CommentStatus::from_str(&row.get_string("status")?)?,
        spam_score: row.get_opt_f64("spam_score")?,
        ip_address: row.get_opt_string("ip_address")?,
        user_agent: row.get_opt_string("user_agent")?,
        created_at: row.get_datetime("created_at")?,
    })
}

/// Registered authors win over the guest fields
fn row_to_author(row: &impl DbRow) -> Result<CommentAuthor> {
    match row.get_opt_string("user_name")? {
        Some(name) => Ok(CommentAuthor {
            name,
            email: row.get_opt_string("user_email")?,
            is_admin: row.get_opt_string("user_role")?.as_deref() == Some("admin"),
        }),
        None => Ok(CommentAuthor {
            name: row
                .get_opt_string("guest_name")?
                .unwrap_or_else(|| "Anonymous".to_string()),
            email: row.get_opt_string("guest_email")?,
            is_admin: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_user, migrated_pool};
    use crate::db::repositories::{PostRepository, SqlxPostRepository};
    use crate::models::{Post, PostStatus, PostType, UserRole};

    async fn setup() -> (SqlxCommentRepository, i64, i64) {
        let pool = migrated_pool().await;
        let admin = insert_user(&pool, "admin@b.com", UserRole::Admin).await;
        let now = Utc::now();
        let post = SqlxPostRepository::new(pool.clone())
            .create(&Post {
                id: 0,
                title: "Post".to_string(),
                slug: "post".to_string(),
                content: "x".to_string(),
                content_html: "<p>x</p>".to_string(),
                excerpt: None,
                cover_image: None,
                post_type: PostType::Post,
                status: PostStatus::Published,
                pinned: false,
                allow_comments: true,
                view_count: 0,
                author_id: admin.id,
                published_at: Some(now),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        (SqlxCommentRepository::new(pool), post.id, admin.id)
    }

    fn guest_comment(post_id: i64, status: CommentStatus) -> Comment {
        Comment {
            id: 0,
            post_id,
            parent_id: None,
            user_id: None,
            guest_name: Some("Guest".to_string()),
            guest_email: Some("guest@example.com".to_string()),
            content: "Nice post".to_string(),
            status,
            spam_score: Some(0.1),
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_only_approved_are_listed_publicly() {
        let (repo, post_id, admin_id) = setup().await;
        repo.create(&guest_comment(post_id, CommentStatus::Approved))
            .await
            .unwrap();
        repo.create(&guest_comment(post_id, CommentStatus::Pending))
            .await
            .unwrap();
        repo.create(&Comment {
            user_id: Some(admin_id),
            guest_name: None,
            guest_email: None,
            ..guest_comment(post_id, CommentStatus::Approved)
        })
        .await
        .unwrap();

        let listed = repo.list_approved_for_post(post_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].1.name, "Guest");
        assert!(!listed[0].1.is_admin);
        assert!(listed[1].1.is_admin);
        assert_eq!(listed[1].1.email.as_deref(), Some("admin@b.com"));
    }

    #[tokio::test]
    async fn test_batch_status_and_delete() {
        let (repo, post_id, _) = setup().await;
        let a = repo
            .create(&guest_comment(post_id, CommentStatus::Pending))
            .await
            .unwrap();
        let b = repo
            .create(&guest_comment(post_id, CommentStatus::Pending))
            .await
            .unwrap();

        let changed = repo
            .update_status_many(&[a.id, b.id], CommentStatus::Spam)
            .await
            .unwrap();
        assert_eq!(changed, vec![a.id, b.id]);
        assert_eq!(repo.count_by_status(CommentStatus::Spam).await.unwrap(), 2);

        let again = repo
            .update_status_many(&[a.id, b.id, 9999], CommentStatus::Spam)
            .await
            .unwrap();
        assert!(again.is_empty());

        assert!(repo.delete(a.id).await.unwrap());
        assert!(!repo.delete(a.id).await.unwrap());
        assert!(repo.update_status_many(&[], CommentStatus::Approved).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_admin_filters_by_status() {
        let (repo, post_id, _) = setup().await;
        for status in [CommentStatus::Pending, CommentStatus::Pending, CommentStatus::Spam] {
            repo.create(&guest_comment(post_id, status)).await.unwrap();
        }

        let (items, total) = repo
            .list_admin(Some(CommentStatus::Pending), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(items[0].post_slug, "post");
        assert_eq!(items[0].author_name, "Guest");

        let (_, total) = repo.list_admin(None, &ListParams::default()).await.unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_replies_cascade_on_delete() {
        let (repo, post_id, _) = setup().await;
        let parent = repo
            .create(&guest_comment(post_id, CommentStatus::Approved))
            .await
            .unwrap();
        let reply = repo
            .create(&Comment {
                parent_id: Some(parent.id),
                ..guest_comment(post_id, CommentStatus::Approved)
            })
            .await
            .unwrap();

        repo.delete(parent.id).await.unwrap();
        assert!(repo.get_by_id(reply.id).await.unwrap().is_none());
    }
}
