//! Shared application state
//!
//! Built once at start-up from the pool, the cache and the configuration.
//! Handlers receive it through axum's `State` extractor.

use std::sync::Arc;

use anyhow::Result;

use crate::cache::TaggedCache;
use crate::config::Config;
use crate::db::repositories::{
    SqlxBackupRepository, SqlxCommentRepository, SqlxMediaRepository, SqlxNavItemRepository,
    SqlxPostRepository, SqlxSessionRepository, SqlxSettingsRepository, SqlxTagRepository,
    SqlxUserRepository, SqlxWhitelistRepository,
};
use crate::db::DynDatabasePool;
use crate::services::{
    AnalyticsService, BackupService, BackupSources, CommentService, EmailService, FeedService,
    LoginRateLimiter, MarkdownRenderer, MediaService, NavigationService, PostService, SecretBox,
    SettingsService, SpamDetector, TagService, UserService, WhitelistService,
};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub cache: Arc<TaggedCache>,
    pub settings: Arc<SettingsService>,
    pub posts: Arc<PostService>,
    pub tags: Arc<TagService>,
    pub comments: Arc<CommentService>,
    pub whitelist: Arc<WhitelistService>,
    pub nav: Arc<NavigationService>,
    pub media: Arc<MediaService>,
    pub users: Arc<UserService>,
    pub email: Arc<EmailService>,
    pub feed: Arc<FeedService>,
    pub backup: Arc<BackupService>,
    pub analytics: Arc<AnalyticsService>,
}

impl AppState {
    /// Wire every service on top of a migrated pool
    pub fn new(pool: DynDatabasePool, cache: Arc<TaggedCache>, config: &Config) -> Result<Self> {
        let app_url = config.app.base_url();

        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let post_repo = SqlxPostRepository::boxed(pool.clone());
        let tag_repo = SqlxTagRepository::boxed(pool.clone());
        let comment_repo = SqlxCommentRepository::boxed(pool.clone());
        let media_repo = SqlxMediaRepository::boxed(pool.clone());
        let nav_repo = SqlxNavItemRepository::boxed(pool.clone());
        let settings_repo = SqlxSettingsRepository::boxed(pool.clone());
        let whitelist_repo = SqlxWhitelistRepository::boxed(pool.clone());

        let settings = Arc::new(SettingsService::new(
            settings_repo.clone(),
            cache.clone(),
            SecretBox::new(&config.app.encryption_key),
        ));
        let email = Arc::new(EmailService::new(settings.clone(), app_url)?);
        let tags = Arc::new(TagService::new(tag_repo.clone(), cache.clone()));
        let posts = Arc::new(PostService::new(
            post_repo.clone(),
            tag_repo.clone(),
            tags.clone(),
            cache.clone(),
            Arc::new(MarkdownRenderer::new()),
        ));
        let comments = Arc::new(CommentService::new(
            comment_repo.clone(),
            post_repo.clone(),
            whitelist_repo.clone(),
            settings.clone(),
            SpamDetector::new(),
            email.clone(),
        ));
        let users = Arc::new(UserService::new(
            user_repo.clone(),
            SqlxSessionRepository::boxed(pool.clone()),
            post_repo.clone(),
            settings.clone(),
            Arc::new(LoginRateLimiter::new()),
        ));
        let feed = Arc::new(FeedService::new(
            post_repo.clone(),
            tag_repo.clone(),
            settings.clone(),
            cache.clone(),
            app_url,
        )?);
        let backup = Arc::new(BackupService::new(
            BackupSources {
                users: user_repo,
                posts: post_repo,
                tags: tag_repo,
                comments: comment_repo,
                media: media_repo.clone(),
                nav: nav_repo.clone(),
                settings: settings_repo,
                whitelist: whitelist_repo.clone(),
            },
            SqlxBackupRepository::boxed(pool.clone()),
            cache.clone(),
        ));

        Ok(Self {
            whitelist: Arc::new(WhitelistService::new(whitelist_repo)),
            nav: Arc::new(NavigationService::new(nav_repo, cache.clone())),
            media: Arc::new(MediaService::new(media_repo, settings.clone(), config.upload.clone())),
            analytics: Arc::new(AnalyticsService::new(settings.clone())),
            pool,
            cache,
            settings,
            posts,
            tags,
            comments,
            users,
            email,
            feed,
            backup,
        })
    }
}
