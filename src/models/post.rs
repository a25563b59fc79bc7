//! Post model
//!
//! A single table backs three kinds of content, discriminated by
//! [`PostType`]: regular posts, standalone pages and title-less memos.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::Tag;

/// Post entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Unique identifier
    pub id: i64,
    /// Title (empty for memos)
    pub title: String,
    /// URL-friendly slug
    pub slug: String,
    /// Markdown content
    pub content: String,
    /// Rendered HTML content
    pub content_html: String,
    /// Plain-text summary
    pub excerpt: Option<String>,
    /// Cover image URL
    pub cover_image: Option<String>,
    /// Content kind
    pub post_type: PostType,
    /// Publication status
    pub status: PostStatus,
    /// Pinned posts sort before everything else
    pub pinned: bool,
    /// Whether visitors may comment
    pub allow_comments: bool,
    /// View count
    pub view_count: i64,
    /// Author user ID
    pub author_id: i64,
    /// First publication timestamp
    pub published_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn is_published(&self) -> bool {
        self.status == PostStatus::Published
    }
}

/// Content kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    #[default]
    Post,
    Page,
    Memo,
}

impl PostType {
    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Post => "post",
            PostType::Page => "page",
            PostType::Memo => "memo",
        }
    }
}

impl std::str::FromStr for PostType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "post" => Ok(PostType::Post),
            "page" => Ok(PostType::Page),
            "memo" => Ok(PostType::Memo),
            _ => Err(anyhow::anyhow!("Invalid post type: {}", s)),
        }
    }
}

impl std::fmt::Display for PostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publication status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    /// Not visible to the public
    #[default]
    Draft,
    /// Visible to the public
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
        }
    }
}

impl std::str::FromStr for PostStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(PostStatus::Draft),
            "published" => Ok(PostStatus::Published),
            _ => Err(anyhow::anyhow!("Invalid post status: {}", s)),
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post with its tags, as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostWithTags {
    #[serde(flatten)]
    pub post: Post,
    pub tags: Vec<Tag>,
}

/// Filter for list queries
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostFilter {
    pub post_type: Option<PostType>,
    pub status: Option<PostStatus>,
    /// Only posts carrying this tag slug
    pub tag: Option<String>,
    /// Case-insensitive substring of title or content
    pub search: Option<String>,
}

impl PostFilter {
    /// Filter for the public listing of one content kind
    pub fn published(post_type: PostType) -> Self {
        Self {
            post_type: Some(post_type),
            status: Some(PostStatus::Published),
            ..Default::default()
        }
    }
}

/// Input for creating a post, page or memo
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CreatePostInput {
    #[serde(default)]
    #[validate(length(max = 200, message = "Title must be at most 200 characters"))]
    pub title: String,
    /// Explicit slug; derived from the title when absent
    #[validate(length(max = 200, message = "Slug must be at most 200 characters"))]
    pub slug: Option<String>,
    #[validate(length(min = 1, message = "Content cannot be empty"))]
    pub content: String,
    #[validate(length(max = 500, message = "Excerpt must be at most 500 characters"))]
    pub excerpt: Option<String>,
    #[validate(url(message = "Cover image must be a valid URL"))]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub post_type: PostType,
    #[serde(default)]
    pub status: PostStatus,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default = "default_allow_comments")]
    pub allow_comments: bool,
    /// Tag names; unknown tags are created
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_allow_comments() -> bool {
    true
}

/// Input for updating a post. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdatePostInput {
    #[validate(length(max = 200, message = "Title must be at most 200 characters"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Slug must be 1 to 200 characters"))]
    pub slug: Option<String>,
    #[validate(length(min = 1, message = "Content cannot be empty"))]
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub cover_image: Option<String>,
    pub status: Option<PostStatus>,
    pub pinned: Option<bool>,
    pub allow_comments: Option<bool>,
    /// Replaces the tag set when present
    pub tags: Option<Vec<String>>,
}

impl UpdatePostInput {
    /// Check if any field is set
    pub fn has_changes(&self) -> bool {
        self.title.is_some()
            || self.slug.is_some()
            || self.content.is_some()
            || self.excerpt.is_some()
            || self.cover_image.is_some()
            || self.status.is_some()
            || self.pinned.is_some()
            || self.allow_comments.is_some()
            || self.tags.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_post_type_parse() {
        assert_eq!(PostType::from_str("MEMO").unwrap(), PostType::Memo);
        assert!(PostType::from_str("note").is_err());
        assert_eq!(PostType::Page.to_string(), "page");
    }

    #[test]
    fn test_create_input_validation() {
        let input = CreatePostInput {
            title: "Hello".to_string(),
            content: String::new(),
            cover_image: Some("not a url".to_string()),
            ..Default::default()
        };
        let errors = input.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("content"));
        assert!(fields.contains_key("cover_image"));
    }

    #[test]
    fn test_update_input_has_changes() {
        assert!(!UpdatePostInput::default().has_changes());
        let input = UpdatePostInput {
            pinned: Some(true),
            ..Default::default()
        };
        assert!(input.has_changes());
    }
}
