//! Services layer - Business logic
//!
//! Services own the rules of the blog: validation, slug allocation,
//! moderation, cache invalidation and the calls out to mail, spam scoring,
//! object storage and analytics. Handlers in [`crate::api`] only translate
//! between HTTP and these types.

pub mod analytics;
pub mod backup;
pub mod comment;
pub mod crypto;
pub mod email;
pub mod feed;
pub mod markdown;
pub mod media;
pub mod navigation;
pub mod password;
pub mod post;
pub mod rate_limiter;
pub mod settings;
pub mod slug;
pub mod spam;
pub mod tag;
pub mod user;
pub mod whitelist;

pub use analytics::{AnalyticsError, AnalyticsService};
pub use backup::{BackupService, BackupServiceError, BackupSources};
pub use comment::{CommentService, CommentServiceError};
pub use crypto::SecretBox;
pub use email::{EmailError, EmailService};
pub use feed::{FeedError, FeedService};
pub use markdown::MarkdownRenderer;
pub use media::{MediaService, MediaServiceError};
pub use navigation::{NavServiceError, NavigationService};
pub use post::{PostService, PostServiceError};
pub use rate_limiter::LoginRateLimiter;
pub use settings::{SettingsService, SettingsServiceError};
pub use spam::SpamDetector;
pub use tag::{TagService, TagServiceError};
pub use user::{UserService, UserServiceError};
pub use whitelist::{WhitelistService, WhitelistServiceError};

/// Client details recorded with comments and logins
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::cache::{Cache, MemoryCache, TaggedCache};

    pub fn tagged_cache() -> Arc<TaggedCache> {
        Arc::new(TaggedCache::new(
            Arc::new(Cache::Memory(MemoryCache::new())),
            Duration::from_secs(60),
        ))
    }
}
