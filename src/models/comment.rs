//! Comment model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Moderation state of a comment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommentStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Spam,
}

impl CommentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Spam => "spam",
        }
    }
}

impl std::fmt::Display for CommentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "spam" => Ok(Self::Spam),
            _ => Err(anyhow::anyhow!("Invalid comment status: {}", s)),
        }
    }
}

/// Comment entity. Authored either by a signed-in user or by a guest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub user_id: Option<i64>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub content: String,
    pub status: CommentStatus,
    /// Score returned by spam detection, when it ran
    pub spam_score: Option<f64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Display data of whoever wrote a comment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentAuthor {
    pub name: String,
    pub email: Option<String>,
    pub is_admin: bool,
}

/// Comment with author display data and nested replies, as shown publicly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentWithMeta {
    pub id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub author_name: String,
    pub avatar_url: String,
    /// Written by a registered administrator
    pub is_admin: bool,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub replies: Vec<CommentWithMeta>,
}

impl CommentWithMeta {
    /// Generate Gravatar URL from email
    pub fn gravatar_url(email: Option<&str>) -> String {
        match email {
            Some(e) if !e.trim().is_empty() => {
                let hash = format!("{:x}", md5::compute(e.trim().to_lowercase()));
                format!("https://www.gravatar.com/avatar/{}?d=mp&s=80", hash)
            }
            _ => "https://www.gravatar.com/avatar/?d=mp&s=80".to_string(),
        }
    }
}

/// Comment row joined with the post title, for the admin console
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminComment {
    #[serde(flatten)]
    pub comment: Comment,
    pub post_title: String,
    pub post_slug: String,
    pub author_name: String,
    pub author_email: Option<String>,
}

/// Input for creating a comment
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateCommentInput {
    pub post_id: i64,
    pub parent_id: Option<i64>,
    #[validate(length(min = 1, max = 50, message = "Name must be 1 to 50 characters"))]
    pub guest_name: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub guest_email: Option<String>,
    #[validate(length(min = 1, max = 5000, message = "Comment must be 1 to 5000 characters"))]
    pub content: String,
}

/// Bulk moderation action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentAction {
    Approve,
    Reject,
    Spam,
    Delete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gravatar_url_normalizes_email() {
        let a = CommentWithMeta::gravatar_url(Some(" Foo@Example.com "));
        let b = CommentWithMeta::gravatar_url(Some("foo@example.com"));
        assert_eq!(a, b);
        assert!(a.contains("b48def645758b95537d4424c84d1a9ff"));
    }

    #[test]
    fn test_gravatar_url_default() {
        assert_eq!(
            CommentWithMeta::gravatar_url(None),
            "https://www.gravatar.com/avatar/?d=mp&s=80"
        );
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            CommentStatus::Pending,
            CommentStatus::Approved,
            CommentStatus::Rejected,
            CommentStatus::Spam,
        ] {
            assert_eq!(status.as_str().parse::<CommentStatus>().unwrap(), status);
        }
    }
}
