//! Tag service
//!
//! Tags are attached to posts by name; unknown names are created on the
//! fly. Post payloads embed their tags, so every tag mutation busts the
//! `posts` tag as well as `tags`.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use validator::{Validate, ValidationErrors};

use crate::cache::{keys, TaggedCache};
use crate::db::repositories::{is_unique_violation, TagRepository};
use crate::models::{Tag, TagInput, TagWithCount};
use crate::services::slug::{generate_slug, unique_slug};

const COUNTS_KEY: &str = "tags:counts";
const FALLBACK_SLUG: &str = "tag";

#[derive(Debug, thiserror::Error)]
pub enum TagServiceError {
    #[error("Tag not found: {0}")]
    NotFound(String),

    #[error("Tag already exists: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct TagService {
    repo: Arc<dyn TagRepository>,
    cache: Arc<TaggedCache>,
}

impl TagService {
    pub fn new(repo: Arc<dyn TagRepository>, cache: Arc<TaggedCache>) -> Self {
        Self { repo, cache }
    }

    /// Every tag with its number of published posts, most used first
    pub async fn list_with_counts(&self) -> Result<Vec<TagWithCount>, TagServiceError> {
        let repo = &self.repo;
        let tags = self
            .cache
            .get_or_load(COUNTS_KEY, &[keys::TAGS], || async move {
                repo.list_with_counts().await
            })
            .await?;
        Ok(tags)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Tag, TagServiceError> {
        self.repo
            .get_by_slug(slug)
            .await
            .context("Failed to get tag by slug")?
            .ok_or_else(|| TagServiceError::NotFound(slug.to_string()))
    }

    pub async fn create(&self, input: TagInput) -> Result<Tag, TagServiceError> {
        input.validate()?;
        let name = input.name.trim();

        if self.repo.get_by_name(name).await?.is_some() {
            return Err(TagServiceError::Conflict(name.to_string()));
        }
        let slug = self.resolve_slug(name, input.slug.as_deref(), None).await?;

        let created = self
            .repo
            .create(&Tag::new(name.to_string(), slug))
            .await
            .map_err(|e| conflict_or_internal(e, name))?;

        self.bust().await;
        tracing::info!(tag = %created.slug, "Tag created");
        Ok(created)
    }

    pub async fn update(&self, id: i64, input: TagInput) -> Result<Tag, TagServiceError> {
        input.validate()?;
        let mut tag = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| TagServiceError::NotFound(id.to_string()))?;
        let name = input.name.trim();

        if let Some(other) = self.repo.get_by_name(name).await? {
            if other.id != id {
                return Err(TagServiceError::Conflict(name.to_string()));
            }
        }

        // Keep the slug stable on rename unless a new one is asked for
        if input.slug.is_some() {
            tag.slug = self.resolve_slug(name, input.slug.as_deref(), Some(id)).await?;
        }
        tag.name = name.to_string();

        self.repo
            .update(&tag)
            .await
            .map_err(|e| conflict_or_internal(e, name))?;
        self.bust().await;
        Ok(tag)
    }

    /// Delete a tag. Posts keep existing; only their link to the tag goes.
    pub async fn delete(&self, id: i64) -> Result<(), TagServiceError> {
        let tag = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| TagServiceError::NotFound(id.to_string()))?;
        self.repo.delete(tag.id).await?;
        self.bust().await;
        tracing::info!(tag = %tag.slug, "Tag deleted");
        Ok(())
    }

    /// Resolve tag names to tags, creating the missing ones.
    ///
    /// Names are trimmed and compared case-insensitively; blanks and
    /// duplicates are dropped. The result keeps the order of first mention.
    pub async fn get_or_create_by_names(&self, names: &[String]) -> Result<Vec<Tag>, TagServiceError> {
        let mut seen = HashSet::new();
        let mut tags = Vec::new();
        let mut created_any = false;

        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            if !seen.insert(name.to_lowercase()) {
                continue;
            }
            if let Some(tag) = self.repo.get_by_name(name).await? {
                tags.push(tag);
                continue;
            }

            let slug = self.resolve_slug(name, None, None).await?;
            match self.repo.create(&Tag::new(name.to_string(), slug)).await {
                Ok(tag) => {
                    created_any = true;
                    tags.push(tag);
                }
                // Lost a race with a concurrent create of the same name
                Err(e) if is_unique_violation(&e) => {
                    let tag = self
                        .repo
                        .get_by_name(name)
                        .await?
                        .ok_or_else(|| TagServiceError::InternalError(e))?;
                    tags.push(tag);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if created_any {
            self.bust().await;
        }
        Ok(tags)
    }

    /// An explicit slug must be free; a derived one is made unique
    async fn resolve_slug(
        &self,
        name: &str,
        requested: Option<&str>,
        exclude_id: Option<i64>,
    ) -> Result<String, TagServiceError> {
        let repo = &self.repo;
        if let Some(requested) = requested.map(generate_slug).filter(|s| !s.is_empty()) {
            if repo.slug_exists(&requested, exclude_id).await? {
                return Err(TagServiceError::Conflict(requested));
            }
            return Ok(requested);
        }

        let base = match generate_slug(name) {
            s if s.is_empty() => FALLBACK_SLUG.to_string(),
            s => s,
        };
        let slug = unique_slug(&base, |candidate| async move {
            repo.slug_exists(&candidate, exclude_id).await
        })
        .await?;
        Ok(slug)
    }

    async fn bust(&self) {
        self.cache.invalidate_tags(&[keys::TAGS, keys::POSTS]).await;
    }
}

fn conflict_or_internal(e: anyhow::Error, name: &str) -> TagServiceError {
    if is_unique_violation(&e) {
        TagServiceError::Conflict(name.to_string())
    } else {
        TagServiceError::InternalError(e)
    }
}
