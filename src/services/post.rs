//! Post service
//!
//! Posts, pages and memos share one table and one service. Markdown is
//! rendered and the excerpt derived on write, so reads never touch the
//! renderer. Public reads are cached under `posts` and `post:<slug>`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::cache::{keys, TaggedCache};
use crate::db::repositories::{is_unique_violation, PostRepository, TagRepository};
use crate::models::{
    CreatePostInput, ListParams, PagedResult, Post, PostFilter, PostStatus, PostType, PostWithTags,
    Tag, UpdatePostInput,
};
use crate::services::markdown::{self, MarkdownRenderer};
use crate::services::slug::{generate_slug, memo_slug, unique_slug};
use crate::services::tag::{TagService, TagServiceError};

const FALLBACK_SLUG: &str = "post";

#[derive(Debug, thiserror::Error)]
pub enum PostServiceError {
    #[error("Post not found: {0}")]
    NotFound(String),

    #[error("Slug already in use: {0}")]
    SlugConflict(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<TagServiceError> for PostServiceError {
    fn from(e: TagServiceError) -> Self {
        match e {
            TagServiceError::Validation(errors) => PostServiceError::Validation(errors),
            TagServiceError::InternalError(e) => PostServiceError::InternalError(e),
            other => PostServiceError::InternalError(anyhow::anyhow!(other)),
        }
    }
}

pub struct PostService {
    repo: Arc<dyn PostRepository>,
    tag_repo: Arc<dyn TagRepository>,
    tags: Arc<TagService>,
    cache: Arc<TaggedCache>,
    renderer: Arc<MarkdownRenderer>,
}

impl PostService {
    pub fn new(
        repo: Arc<dyn PostRepository>,
        tag_repo: Arc<dyn TagRepository>,
        tags: Arc<TagService>,
        cache: Arc<TaggedCache>,
        renderer: Arc<MarkdownRenderer>,
    ) -> Self {
        Self {
            repo,
            tag_repo,
            tags,
            cache,
            renderer,
        }
    }

    pub async fn create(&self, input: CreatePostInput, author_id: i64) -> Result<PostWithTags, PostServiceError> {
        input.validate()?;
        let title = input.title.trim().to_string();
        if input.post_type != PostType::Memo && title.is_empty() {
            return Err(field_error("title", "required", "Title is required"));
        }

        let slug = match input.slug.as_deref().map(generate_slug) {
            Some(slug) if !slug.is_empty() => {
                if self.repo.slug_exists(&slug, None).await? {
                    return Err(PostServiceError::SlugConflict(slug));
                }
                slug
            }
            Some(_) => return Err(field_error("slug", "slug", "Slug must contain letters or digits")),
            None if input.post_type == PostType::Memo => memo_slug(),
            None => self.derive_slug(&title, None).await?,
        };

        let now = Utc::now();
        let post = Post {
            id: 0,
            title,
            slug,
            content_html: self.renderer.render(&input.content),
            excerpt: Some(excerpt_for(input.excerpt.as_deref(), &input.content)),
            content: input.content,
            cover_image: input.cover_image.and_then(non_empty),
            post_type: input.post_type,
            status: input.status,
            pinned: input.pinned,
            allow_comments: input.allow_comments,
            view_count: 0,
            author_id,
            published_at: (input.status == PostStatus::Published).then_some(now),
            created_at: now,
            updated_at: now,
        };

        let post = self.repo.create(&post).await.map_err(|e| {
            if is_unique_violation(&e) {
                PostServiceError::SlugConflict(post.slug.clone())
            } else {
                PostServiceError::InternalError(e)
            }
        })?;

        let tags = self.tags.get_or_create_by_names(&input.tags).await?;
        let tag_ids: Vec<i64> = tags.iter().map(|t| t.id).collect();
        self.repo.set_tags(post.id, &tag_ids).await?;

        self.bust(&[&post.slug]).await;
        tracing::info!(post_id = post.id, slug = %post.slug, kind = %post.post_type, "Post created");
        Ok(PostWithTags { post, tags })
    }

    pub async fn update(&self, id: i64, input: UpdatePostInput) -> Result<PostWithTags, PostServiceError> {
        input.validate()?;
        let mut post = self.find(id).await?;
        let old_slug = post.slug.clone();

        if let Some(title) = &input.title {
            let title = title.trim();
            if post.post_type != PostType::Memo && title.is_empty() {
                return Err(field_error("title", "required", "Title is required"));
            }
            post.title = title.to_string();
        }

        if let Some(slug) = &input.slug {
            let slug = generate_slug(slug);
            if slug.is_empty() {
                return Err(field_error("slug", "slug", "Slug must contain letters or digits"));
            }
            if slug != post.slug {
                if self.repo.slug_exists(&slug, Some(post.id)).await? {
                    return Err(PostServiceError::SlugConflict(slug));
                }
                post.slug = slug;
            }
        }

        if let Some(content) = input.content {
            // An excerpt derived from the old body follows the new one
            let auto_excerpt = post.excerpt.as_deref() == Some(markdown::excerpt(&post.content).as_str());
            post.content_html = self.renderer.render(&content);
            post.content = content;
            if auto_excerpt && input.excerpt.is_none() {
                post.excerpt = Some(markdown::excerpt(&post.content));
            }
        }
        if let Some(excerpt) = input.excerpt.as_deref() {
            post.excerpt = Some(excerpt_for(Some(excerpt), &post.content));
        }
        if let Some(cover) = input.cover_image {
            post.cover_image = non_empty(cover);
        }
        if let Some(status) = input.status {
            post.status = status;
            if status == PostStatus::Published && post.published_at.is_none() {
                post.published_at = Some(Utc::now());
            }
        }
        if let Some(pinned) = input.pinned {
            post.pinned = pinned;
        }
        if let Some(allow) = input.allow_comments {
            post.allow_comments = allow;
        }

        self.repo.update(&post).await.map_err(|e| {
            if is_unique_violation(&e) {
                PostServiceError::SlugConflict(post.slug.clone())
            } else {
                PostServiceError::InternalError(e)
            }
        })?;

        let tags = match &input.tags {
            Some(names) => {
                let tags = self.tags.get_or_create_by_names(names).await?;
                let tag_ids: Vec<i64> = tags.iter().map(|t| t.id).collect();
                self.repo.set_tags(post.id, &tag_ids).await?;
                tags
            }
            None => self.tag_repo.list_for_post(post.id).await?,
        };

        let post = self.find(id).await?;
        self.bust(&[&old_slug, &post.slug]).await;
        tracing::info!(post_id = post.id, slug = %post.slug, "Post updated");
        Ok(PostWithTags { post, tags })
    }

    pub async fn delete(&self, id: i64) -> Result<(), PostServiceError> {
        let post = self.find(id).await?;
        self.repo.delete(post.id).await?;
        self.bust(&[&post.slug]).await;
        tracing::info!(post_id = post.id, slug = %post.slug, "Post deleted");
        Ok(())
    }

    /// Any post by id, for the admin console
    pub async fn get_by_id(&self, id: i64) -> Result<PostWithTags, PostServiceError> {
        let post = self.find(id).await?;
        let tags = self.tag_repo.list_for_post(post.id).await?;
        Ok(PostWithTags { post, tags })
    }

    /// A post by slug. Drafts are only returned when `include_drafts` is set;
    /// public callers get `NotFound` for them.
    pub async fn get_by_slug(&self, slug: &str, include_drafts: bool) -> Result<PostWithTags, PostServiceError> {
        if include_drafts {
            let post = self
                .repo
                .get_by_slug(slug)
                .await?
                .ok_or_else(|| PostServiceError::NotFound(slug.to_string()))?;
            let tags = self.tag_repo.list_for_post(post.id).await?;
            return Ok(PostWithTags { post, tags });
        }

        let cache_key = keys::post(slug);
        let post_tag = keys::post(slug);
        let cached: Option<PostWithTags> = self
            .cache
            .get_or_load(&cache_key, &[keys::POSTS, &post_tag], || async {
                let post = match self.repo.get_by_slug(slug).await? {
                    Some(post) if post.is_published() => post,
                    _ => return Ok::<_, anyhow::Error>(None),
                };
                let tags = self.tag_repo.list_for_post(post.id).await?;
                Ok(Some(PostWithTags { post, tags }))
            })
            .await?;

        cached.ok_or_else(|| PostServiceError::NotFound(slug.to_string()))
    }

    /// Published content of one kind, optionally narrowed to a tag
    pub async fn list_published(
        &self,
        post_type: PostType,
        tag_slug: Option<&str>,
        params: &ListParams,
    ) -> Result<PagedResult<PostWithTags>, PostServiceError> {
        let filter = PostFilter {
            tag: tag_slug.map(str::to_string),
            ..PostFilter::published(post_type)
        };
        let cache_key = format!(
            "posts:{}:{}:{}:{}",
            post_type,
            tag_slug.unwrap_or("*"),
            params.page,
            params.per_page
        );

        let page = self
            .cache
            .get_or_load(&cache_key, &[keys::POSTS], || self.load_page(&filter, params))
            .await?;
        Ok(page)
    }

    /// Every post matching `filter`, drafts included
    pub async fn list_admin(
        &self,
        filter: &PostFilter,
        params: &ListParams,
    ) -> Result<PagedResult<PostWithTags>, PostServiceError> {
        Ok(self.load_page(filter, params).await?)
    }

    pub async fn increment_view(&self, id: i64) -> Result<(), PostServiceError> {
        self.repo
            .increment_view(id)
            .await
            .context("Failed to increment view count")?;
        Ok(())
    }

    async fn load_page(&self, filter: &PostFilter, params: &ListParams) -> anyhow::Result<PagedResult<PostWithTags>> {
        let (posts, total) = self.repo.list(filter, params).await?;
        let items = self.attach_tags(posts).await?;
        Ok(PagedResult::new(items, total, params))
    }

    async fn attach_tags(&self, posts: Vec<Post>) -> anyhow::Result<Vec<PostWithTags>> {
        let ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
        let mut by_post: HashMap<i64, Vec<Tag>> = HashMap::new();
        for (post_id, tag) in self.tag_repo.list_for_posts(&ids).await? {
            by_post.entry(post_id).or_default().push(tag);
        }

        Ok(posts
            .into_iter()
            .map(|post| {
                let tags = by_post.remove(&post.id).unwrap_or_default();
                PostWithTags { post, tags }
            })
            .collect())
    }

    async fn find(&self, id: i64) -> Result<Post, PostServiceError> {
        self.repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| PostServiceError::NotFound(id.to_string()))
    }

    async fn derive_slug(&self, title: &str, exclude_id: Option<i64>) -> anyhow::Result<String> {
        let base = match generate_slug(title) {
            s if s.is_empty() => FALLBACK_SLUG.to_string(),
            s => s,
        };
        let repo = &self.repo;
        unique_slug(&base, |candidate| async move {
            repo.slug_exists(&candidate, exclude_id).await
        })
        .await
    }

    async fn bust(&self, slugs: &[&str]) {
        self.cache.invalidate_tag(keys::POSTS).await;
        for slug in slugs {
            self.cache.invalidate_tag(&keys::post(slug)).await;
        }
    }
}

/// The supplied excerpt when it has text, else one derived from the body
fn excerpt_for(supplied: Option<&str>, content: &str) -> String {
    match supplied.map(str::trim).filter(|s| !s.is_empty()) {
        Some(excerpt) => excerpt.to_string(),
        None => markdown::excerpt(content),
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn field_error(field: &'static str, code: &'static str, message: &'static str) -> PostServiceError {
    let mut errors = ValidationErrors::new();
    errors.add(field, ValidationError::new(code).with_message(message.into()));
    PostServiceError::Validation(errors)
}
