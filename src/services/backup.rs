//! Backup export and import
//!
//! Export reads every content table into a [`Backup`]. Import replaces all
//! content with a snapshot in one transaction and drops every cache tag.
//! A fresh install can restore a snapshot before any account exists.

use std::sync::Arc;

use chrono::Utc;
use validator::{ValidationError, ValidationErrors};

use crate::cache::{keys, TaggedCache};
use crate::db::repositories::{
    BackupRepository, CommentRepository, MediaRepository, NavItemRepository, PostRepository,
    SettingsRepository, TagRepository, UserRepository, WhitelistRepository,
};
use crate::models::{Backup, BackupUser, InitStatus, BACKUP_VERSION};

#[derive(Debug, thiserror::Error)]
pub enum BackupServiceError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Repositories read by an export
pub struct BackupSources {
    pub users: Arc<dyn UserRepository>,
    pub posts: Arc<dyn PostRepository>,
    pub tags: Arc<dyn TagRepository>,
    pub comments: Arc<dyn CommentRepository>,
    pub media: Arc<dyn MediaRepository>,
    pub nav: Arc<dyn NavItemRepository>,
    pub settings: Arc<dyn SettingsRepository>,
    pub whitelist: Arc<dyn WhitelistRepository>,
}

pub struct BackupService {
    sources: BackupSources,
    repo: Arc<dyn BackupRepository>,
    cache: Arc<TaggedCache>,
}

impl BackupService {
    pub fn new(sources: BackupSources, repo: Arc<dyn BackupRepository>, cache: Arc<TaggedCache>) -> Self {
        Self { sources, repo, cache }
    }

    pub async fn export(&self) -> Result<Backup, BackupServiceError> {
        let s = &self.sources;
        let (users, posts, tags, post_tags, comments, media, nav_items, settings, email_whitelist) =
            futures::try_join!(
                s.users.list_all(),
                s.posts.list_all(),
                s.tags.list_all(),
                s.tags.list_post_tags(),
                s.comments.list_all(),
                s.media.list_all(),
                s.nav.list(),
                s.settings.get(),
                s.whitelist.list(),
            )?;
        let backup = Backup {
            version: BACKUP_VERSION,
            exported_at: Utc::now(),
            users: users.into_iter().map(BackupUser::from).collect(),
            posts,
            tags,
            post_tags,
            comments,
            media,
            nav_items,
            settings,
            email_whitelist,
        };
        tracing::info!(
            posts = backup.posts.len(),
            comments = backup.comments.len(),
            users = backup.users.len(),
            "Backup exported"
        );
        Ok(backup)
    }

    /// Replace all content with `backup`
    pub async fn import(&self, backup: Backup) -> Result<(), BackupServiceError> {
        check_version(&backup)?;
        self.repo.restore(&backup).await?;
        self.cache.invalidate_tags(keys::ALL).await;
        // Per-post keys are not all indexed under a shared tag name
        self.cache.clear().await;
        tracing::info!(
            version = backup.version,
            posts = backup.posts.len(),
            users = backup.users.len(),
            "Backup imported"
        );
        Ok(())
    }

    pub async fn init_status(&self) -> Result<InitStatus, BackupServiceError> {
        Ok(InitStatus {
            initialized: self.sources.users.count().await? > 0,
        })
    }

    /// Restore a snapshot on a site with no accounts yet
    pub async fn init_import(&self, backup: Backup) -> Result<(), BackupServiceError> {
        if self.init_status().await?.initialized {
            return Err(BackupServiceError::Forbidden(
                "Site is already initialized".to_string(),
            ));
        }
        self.import(backup).await
    }
}

fn check_version(backup: &Backup) -> Result<(), ValidationErrors> {
    if backup.version == 0 || backup.version > BACKUP_VERSION {
        let mut errors = ValidationErrors::new();
        errors.add(
            "version",
            ValidationError::new("unsupported")
                .with_message(format!("Unsupported backup version {}", backup.version).into()),
        );
        return Err(errors);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_user, migrated_pool};
    use crate::db::repositories::{
        SqlxBackupRepository, SqlxCommentRepository, SqlxMediaRepository, SqlxNavItemRepository,
        SqlxPostRepository, SqlxSettingsRepository, SqlxTagRepository, SqlxUserRepository,
        SqlxWhitelistRepository,
    };
    use crate::db::DynDatabasePool;
    use crate::models::{Post, PostStatus, PostType, Tag, UserRole};
    use crate::services::test_support::tagged_cache;
    use std::time::Duration;

    fn service(pool: &DynDatabasePool, cache: Arc<TaggedCache>) -> BackupService {
        BackupService::new(
            BackupSources {
                users: SqlxUserRepository::boxed(pool.clone()),
                posts: SqlxPostRepository::boxed(pool.clone()),
                tags: SqlxTagRepository::boxed(pool.clone()),
                comments: SqlxCommentRepository::boxed(pool.clone()),
                media: SqlxMediaRepository::boxed(pool.clone()),
                nav: SqlxNavItemRepository::boxed(pool.clone()),
                settings: SqlxSettingsRepository::boxed(pool.clone()),
                whitelist: SqlxWhitelistRepository::boxed(pool.clone()),
            },
            SqlxBackupRepository::boxed(pool.clone()),
            cache,
        )
    }

    async fn seed(pool: &DynDatabasePool) {
        let author = insert_user(pool, "admin@example.com", UserRole::Admin).await;
        let tags = SqlxTagRepository::new(pool.clone());
        let tag = tags.create(&Tag::new("Rust".to_string(), "rust".to_string())).await.unwrap();
        let posts = SqlxPostRepository::new(pool.clone());
        let now = Utc::now();
        let post = posts
            .create(&Post {
                id: 0,
                title: "Hello".to_string(),
                slug: "hello".to_string(),
                content: "Body".to_string(),
                content_html: "<p>Body</p>".to_string(),
                excerpt: Some("Body".to_string()),
                cover_image: None,
                post_type: PostType::Post,
                status: PostStatus::Published,
                pinned: false,
                allow_comments: true,
                view_count: 3,
                author_id: author.id,
                published_at: Some(now),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        posts.set_tags(post.id, &[tag.id]).await.unwrap();
        SqlxWhitelistRepository::new(pool.clone())
            .add("friend@example.com", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_export_then_import_into_fresh_site() {
        let source = migrated_pool().await;
        seed(&source).await;
        let backup = service(&source, tagged_cache()).export().await.unwrap();
        assert_eq!(backup.version, BACKUP_VERSION);
        assert_eq!(backup.users.len(), 1);
        assert_eq!(backup.users[0].password_hash, "hash");
        assert_eq!(backup.post_tags.len(), 1);

        let json = serde_json::to_string(&backup).unwrap();
        let parsed: Backup = serde_json::from_str(&json).unwrap();

        let target = migrated_pool().await;
        let fresh = service(&target, tagged_cache());
        assert!(!fresh.init_status().await.unwrap().initialized);
        fresh.init_import(parsed).await.unwrap();
        assert!(fresh.init_status().await.unwrap().initialized);

        let restored = fresh.export().await.unwrap();
        assert_eq!(restored.users[0].email, "admin@example.com");
        assert_eq!(restored.posts[0].slug, "hello");
        assert_eq!(restored.posts[0].view_count, 3);
        assert_eq!(restored.post_tags, backup.post_tags);
        assert_eq!(restored.email_whitelist.len(), 1);
        assert_eq!(restored.nav_items.len(), backup.nav_items.len());
    }

    #[tokio::test]
    async fn test_init_import_refused_once_initialized() {
        let pool = migrated_pool().await;
        seed(&pool).await;
        let service = service(&pool, tagged_cache());
        let backup = service.export().await.unwrap();
        assert!(matches!(
            service.init_import(backup).await,
            Err(BackupServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_import_busts_cache() {
        let pool = migrated_pool().await;
        seed(&pool).await;
        let cache = tagged_cache();
        let service = service(&pool, cache.clone());
        let backup = service.export().await.unwrap();

        let ttl = Duration::from_secs(60);
        cache.set_tagged("settings:row", &1, ttl, &[keys::SETTINGS]).await;
        cache.set_tagged("post:hello", &2, ttl, &[keys::POSTS, &keys::post("hello")]).await;

        service.import(backup).await.unwrap();
        assert_eq!(cache.get::<i32>("settings:row").await, None);
        assert_eq!(cache.get::<i32>("post:hello").await, None);
    }

    #[tokio::test]
    async fn test_unsupported_version_rejected() {
        let pool = migrated_pool().await;
        let service = service(&pool, tagged_cache());
        let mut backup = service.export().await.unwrap();
        backup.version = BACKUP_VERSION + 1;
        assert!(matches!(
            service.import(backup).await,
            Err(BackupServiceError::Validation(_))
        ));
    }
}
