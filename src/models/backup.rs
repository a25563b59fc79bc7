//! Backup snapshot model
//!
//! A snapshot is a JSON document with every content table. Password hashes
//! are included so accounts survive a restore; secret settings stay in the
//! encrypted form they have in the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Comment, Media, NavItem, Post, PostTag, Settings, Tag, User, UserRole, WhitelistEntry};

/// Format version written by this build
pub const BACKUP_VERSION: u32 = 1;

/// User row as exported, password hash included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupUser {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: UserRole,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for BackupUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            password_hash: u.password_hash,
            role: u.role,
            image: u.image,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub users: Vec<BackupUser>,
    pub posts: Vec<Post>,
    pub tags: Vec<Tag>,
    pub post_tags: Vec<PostTag>,
    pub comments: Vec<Comment>,
    pub media: Vec<Media>,
    pub nav_items: Vec<NavItem>,
    pub settings: Settings,
    pub email_whitelist: Vec<WhitelistEntry>,
}

/// Whether the site has been set up
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitStatus {
    pub initialized: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_user_keeps_password_hash() {
        let user = User::new("a@b.com".to_string(), "A".to_string(), "argon-hash".to_string(), UserRole::Admin);
        let json = serde_json::to_string(&BackupUser::from(user)).unwrap();
        assert!(json.contains("argon-hash"));
    }
}
