//! Data models
//!
//! Database entities, API inputs and the small views derived from them.

mod backup;
mod comment;
mod media;
mod nav_item;
mod pagination;
mod post;
mod session;
mod settings;
mod tag;
mod user;
mod whitelist;

pub use backup::{Backup, BackupUser, InitStatus, BACKUP_VERSION};
pub use comment::{
    AdminComment, Comment, CommentAction, CommentAuthor, CommentStatus, CommentWithMeta,
    CreateCommentInput,
};
pub use media::{Media, StorageKind};
pub use nav_item::{CreateNavItemInput, NavItem, NavItemTree, NavOrderItem, UpdateNavItemInput};
pub use pagination::{total_pages, ListParams, PagedResult, MAX_PER_PAGE};
pub use post::{CreatePostInput, Post, PostFilter, PostStatus, PostType, PostWithTags, UpdatePostInput};
pub use session::Session;
pub use settings::{
    normalize_optional, AdminSettingsView, PublicSettings, SecretUpdate, Settings, UpdateSettingsInput,
    DEFAULT_SPAM_HIGH_THRESHOLD, DEFAULT_SPAM_LOW_THRESHOLD,
};
pub use tag::{PostTag, Tag, TagInput, TagWithCount};
pub use user::{ChangePasswordInput, LoginInput, RegisterInput, UpdateProfileInput, User, UserRole};
pub use whitelist::{AddWhitelistInput, WhitelistEntry};
