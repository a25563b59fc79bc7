//! Backup restore
//!
//! Replaces every content table with a snapshot inside one transaction.
//! Rows keep their ids, so references between tables stay valid. Sessions
//! are dropped.

use super::settings::settings_update_query;
use crate::db::DynDatabasePool;
use crate::models::Backup;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Tables cleared before a restore, children first
const CLEAR_ORDER: &[&str] = &[
    "post_tags",
    "comments",
    "media",
    "sessions",
    "posts",
    "tags",
    "nav_items",
    "email_whitelist",
    "users",
    "settings",
];

#[async_trait]
pub trait BackupRepository: Send + Sync {
    /// Replace all content with `backup`. Nothing changes on error.
    async fn restore(&self, backup: &Backup) -> Result<()>;
}

pub struct SqlxBackupRepository {
    pool: DynDatabasePool,
}

impl SqlxBackupRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn BackupRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl BackupRepository for SqlxBackupRepository {
    async fn restore(&self, b: &Backup) -> Result<()> {
        let mut comments: Vec<_> = b.comments.iter().collect();
        comments.sort_by_key(|c| c.id);

        with_pool!(self.pool, |p| {
            let mut tx = p.begin().await.context("Failed to begin restore")?;

            for table in CLEAR_ORDER {
                sqlx::query(&format!("DELETE FROM {}", table))
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to clear {}", table))?;
            }

            for u in &b.users {
                sqlx::query(
                    "INSERT INTO users (id, email, name, password_hash, role, image, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(u.id)
                .bind(&u.email)
                .bind(&u.name)
                .bind(&u.password_hash)
                .bind(u.role.as_str())
                .bind(&u.image)
                .bind(u.created_at)
                .bind(u.updated_at)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to restore user {}", u.id))?;
            }

            for t in &b.tags {
                sqlx::query("INSERT INTO tags (id, name, slug, created_at) VALUES (?, ?, ?, ?)")
                    .bind(t.id)
                    .bind(&t.name)
                    .bind(&t.slug)
                    .bind(t.created_at)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to restore tag {}", t.id))?;
            }

            for post in &b.posts {
                sqlx::query(
                    r#"
                    INSERT INTO posts (id, title, slug, content, content_html, excerpt, cover_image,
                        post_type, status, pinned, allow_comments, view_count, author_id,
                        published_at, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(post.id)
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
                .bind(post.created_at)
                .bind(post.updated_at)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to restore post {}", post.id))?;
            }

            for pt in &b.post_tags {
                sqlx::query("INSERT INTO post_tags (post_id, tag_id) VALUES (?, ?)")
                    .bind(pt.post_id)
                    .bind(pt.tag_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to restore post tag")?;
            }

            for c in &comments {
                sqlx::query(
                    r#"
                    INSERT INTO comments (id, post_id, parent_id, user_id, guest_name, guest_email,
                        content, status, spam_score, ip_address, user_agent, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(c.id)
                .bind(c.post_id)
                .bind(c.parent_id)
                .bind(c.user_id)
                .bind(&c.guest_name)
                .bind(&c.guest_email)
                .bind(&c.content)
                .bind(c.status.as_str())
                .bind(c.spam_score)
                .bind(&c.ip_address)
                .bind(&c.user_agent)
                .bind(c.created_at)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to restore comment {}", c.id))?;
            }

            for m in &b.media {
                sqlx::query(
                    r#"
                    INSERT INTO media (id, filename, storage_key, url, mime_type, size, storage,
                        uploaded_by, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(m.id)
                .bind(&m.filename)
                .bind(&m.storage_key)
                .bind(&m.url)
                .bind(&m.mime_type)
                .bind(m.size)
                .bind(m.storage.as_str())
                .bind(m.uploaded_by)
                .bind(m.created_at)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to restore media {}", m.id))?;
            }

            // Parents may have higher ids than their children, so links are
            // set once every row exists
            for n in &b.nav_items {
                sqlx::query(
                    "INSERT INTO nav_items (id, parent_id, title, url, open_new_tab, sort_order, visible) \
                     VALUES (?, NULL, ?, ?, ?, ?, ?)",
                )
                .bind(n.id)
                .bind(&n.title)
                .bind(&n.url)
                .bind(n.open_new_tab)
                .bind(n.sort_order)
                .bind(n.visible)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to restore nav item {}", n.id))?;
            }
            for n in b.nav_items.iter().filter(|n| n.parent_id.is_some()) {
                sqlx::query("UPDATE nav_items SET parent_id = ? WHERE id = ?")
                    .bind(n.parent_id)
                    .bind(n.id)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to link nav item {}", n.id))?;
            }

            for w in &b.email_whitelist {
                sqlx::query("INSERT INTO email_whitelist (id, email, note, created_at) VALUES (?, ?, ?, ?)")
                    .bind(w.id)
                    .bind(&w.email)
                    .bind(&w.note)
                    .bind(w.created_at)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to restore whitelist entry {}", w.id))?;
            }

            sqlx::query("INSERT INTO settings (id) VALUES (1)")
                .execute(&mut *tx)
                .await
                .context("Failed to seed settings row")?;
            settings_update_query!(&b.settings)
                .execute(&mut *tx)
                .await
                .context("Failed to restore settings")?;

            tx.commit().await.context("Failed to commit restore")?;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_user, migrated_pool};
    use crate::db::repositories::{
        NavItemRepository, SettingsRepository, SqlxNavItemRepository, SqlxSettingsRepository,
        SqlxUserRepository, UserRepository,
    };
    use crate::models::{BackupUser, NavItem, Settings, UserRole, BACKUP_VERSION};
    use chrono::Utc;

    fn snapshot() -> Backup {
        let now = Utc::now();
        Backup {
            version: BACKUP_VERSION,
            exported_at: now,
            users: vec![BackupUser {
                id: 42,
                email: "restored@example.com".to_string(),
                name: "Restored".to_string(),
                password_hash: "hash".to_string(),
                role: UserRole::Admin,
                image: None,
                created_at: now,
                updated_at: now,
            }],
            posts: vec![],
            tags: vec![],
            post_tags: vec![],
            comments: vec![],
            media: vec![],
            nav_items: vec![
                NavItem {
                    parent_id: Some(9),
                    ..NavItem { id: 3, ..NavItem::new("Child".to_string(), "/child".to_string()) }
                },
                NavItem { id: 9, ..NavItem::new("Parent".to_string(), "/parent".to_string()) },
            ],
            settings: Settings {
                site_name: "Restored Blog".to_string(),
                ..Settings::default()
            },
            email_whitelist: vec![],
        }
    }

    #[tokio::test]
    async fn test_restore_replaces_everything() {
        let pool = migrated_pool().await;
        insert_user(&pool, "old@example.com", UserRole::Admin).await;

        SqlxBackupRepository::new(pool.clone()).restore(&snapshot()).await.unwrap();

        let users = SqlxUserRepository::new(pool.clone()).list_all().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, 42);

        let nav = SqlxNavItemRepository::new(pool.clone()).list().await.unwrap();
        assert_eq!(nav.len(), 2);
        let child = nav.iter().find(|n| n.id == 3).unwrap();
        assert_eq!(child.parent_id, Some(9));

        let settings = SqlxSettingsRepository::new(pool).get().await.unwrap();
        assert_eq!(settings.site_name, "Restored Blog");
    }

    #[tokio::test]
    async fn test_failed_restore_rolls_back() {
        let pool = migrated_pool().await;
        insert_user(&pool, "old@example.com", UserRole::Admin).await;

        let mut broken = snapshot();
        let duplicate = broken.users[0].clone();
        broken.users.push(duplicate);
        assert!(SqlxBackupRepository::new(pool.clone()).restore(&broken).await.is_err());

        let users = SqlxUserRepository::new(pool).list_all().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].email, "old@example.com");
    }
}
