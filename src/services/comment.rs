//! Comment service and moderation pipeline
//!
//! A new comment's status is decided in this order:
//! 1. written by an admin: approved
//! 2. author email on the whitelist: approved
//! 3. spam scoring configured: bucketed by score, pending if scoring fails
//! 4. otherwise pending when review is required, else approved
//!
//! Email notifications run in background tasks. Their failures are logged
//! and never reach the commenter.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::db::repositories::{CommentRepository, PostRepository, WhitelistRepository};
use crate::models::{
    AdminComment, Comment, CommentAction, CommentAuthor, CommentStatus, CommentWithMeta,
    CreateCommentInput, ListParams, PagedResult, Post, Settings, User,
};
use crate::services::email::EmailService;
use crate::services::settings::{SettingsService, SettingsServiceError};
use crate::services::spam::{bucket, SpamApiConfig, SpamContext, SpamDetector};
use crate::services::RequestMeta;

#[derive(Debug, thiserror::Error)]
pub enum CommentServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Commenting is switched off for the site or the post
    #[error("Comments are closed: {0}")]
    Closed(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<SettingsServiceError> for CommentServiceError {
    fn from(e: SettingsServiceError) -> Self {
        CommentServiceError::InternalError(anyhow::anyhow!(e))
    }
}

/// Outcome of moderation for a new comment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub status: CommentStatus,
    pub spam_score: Option<f64>,
}

impl Verdict {
    fn plain(status: CommentStatus) -> Self {
        Self {
            status,
            spam_score: None,
        }
    }
}

pub struct CommentService {
    repo: Arc<dyn CommentRepository>,
    posts: Arc<dyn PostRepository>,
    whitelist: Arc<dyn WhitelistRepository>,
    settings: Arc<SettingsService>,
    spam: SpamDetector,
    email: Arc<EmailService>,
}

impl CommentService {
    pub fn new(
        repo: Arc<dyn CommentRepository>,
        posts: Arc<dyn PostRepository>,
        whitelist: Arc<dyn WhitelistRepository>,
        settings: Arc<SettingsService>,
        spam: SpamDetector,
        email: Arc<EmailService>,
    ) -> Self {
        Self {
            repo,
            posts,
            whitelist,
            settings,
            spam,
            email,
        }
    }

    /// Create a comment from a guest (`author = None`) or a signed-in user
    pub async fn create(
        &self,
        input: CreateCommentInput,
        author: Option<&User>,
        meta: RequestMeta,
    ) -> Result<Comment, CommentServiceError> {
        input.validate()?;
        let settings = self.settings.get().await?;
        if !settings.comments_enabled {
            return Err(CommentServiceError::Closed("Comments are disabled".to_string()));
        }

        let post = self
            .posts
            .get_by_id(input.post_id)
            .await?
            .filter(Post::is_published)
            .ok_or_else(|| CommentServiceError::NotFound(format!("Post {}", input.post_id)))?;
        if !post.allow_comments {
            return Err(CommentServiceError::Closed("Comments are closed for this post".to_string()));
        }

        let (guest_name, guest_email) = match author {
            Some(_) => (None, None),
            None => {
                let name = input.guest_name.as_deref().map(str::trim).filter(|n| !n.is_empty());
                let email = input.guest_email.as_deref().map(str::trim).filter(|e| !e.is_empty());
                match (name, email) {
                    (Some(name), Some(email)) => (Some(name.to_string()), Some(email.to_lowercase())),
                    _ => {
                        let mut errors = ValidationErrors::new();
                        if name.is_none() {
                            errors.add("guest_name", required("Name is required"));
                        }
                        if email.is_none() {
                            errors.add("guest_email", required("Email is required"));
                        }
                        return Err(errors.into());
                    }
                }
            }
        };

        let parent = match input.parent_id {
            Some(parent_id) => {
                let parent = self.repo.get_by_id(parent_id).await?;
                match parent {
                    Some(parent) if parent.post_id == post.id => Some(parent),
                    _ => {
                        let mut errors = ValidationErrors::new();
                        errors.add(
                            "parent_id",
                            ValidationError::new("parent")
                                .with_message("Parent comment does not belong to this post".into()),
                        );
                        return Err(errors.into());
                    }
                }
            }
            None => None,
        };

        let author_name = author
            .map(|u| u.name.clone())
            .or_else(|| guest_name.clone())
            .unwrap_or_default();
        let author_email = author.map(|u| u.email.clone()).or_else(|| guest_email.clone());
        let content = input.content.trim().to_string();

        let verdict = self
            .moderate(
                &settings,
                author,
                &SpamContext {
                    author_name: &author_name,
                    author_email: author_email.as_deref(),
                    content: &content,
                    post_title: &post.title,
                },
            )
            .await?;

        let comment = Comment {
            id: 0,
            post_id: post.id,
            parent_id: parent.as_ref().map(|p| p.id),
            user_id: author.map(|u| u.id),
            guest_name,
            guest_email,
            content,
            status: verdict.status,
            spam_score: verdict.spam_score,
            ip_address: meta.ip_address,
            user_agent: meta.user_agent,
            created_at: Utc::now(),
        };
        let comment = self.repo.create(&comment).await?;
        tracing::info!(
            comment_id = comment.id,
            post_id = post.id,
            status = %comment.status,
            score = ?comment.spam_score,
            "Comment created"
        );

        if !author.is_some_and(User::is_admin) {
            self.notify_admin(&settings, &post, &comment, &author_name);
        }
        if comment.status == CommentStatus::Approved {
            self.notify_reply(&settings, &post, &comment, &author_name, author_email.as_deref())
                .await;
        }

        Ok(comment)
    }

    /// Decide the initial status of a comment
    pub async fn moderate(
        &self,
        settings: &Settings,
        author: Option<&User>,
        ctx: &SpamContext<'_>,
    ) -> Result<Verdict, CommentServiceError> {
        if author.is_some_and(User::is_admin) {
            return Ok(Verdict::plain(CommentStatus::Approved));
        }

        if let Some(email) = ctx.author_email {
            if self.whitelist.contains(&email.to_lowercase()).await? {
                return Ok(Verdict::plain(CommentStatus::Approved));
            }
        }

        if settings.spam_detection_ready() {
            let config = SpamApiConfig {
                api_base: settings.spam_api_base.clone().unwrap_or_default(),
                api_key: settings.spam_api_key.clone().unwrap_or_default(),
                model: settings.spam_model.clone().unwrap_or_default(),
            };
            return Ok(match self.spam.score(&config, ctx).await {
                Ok(score) => Verdict {
                    status: bucket(score, settings.spam_low_threshold, settings.spam_high_threshold),
                    spam_score: Some(score),
                },
                Err(e) => {
                    tracing::warn!("Spam scoring failed, holding comment for review: {}", e);
                    Verdict::plain(CommentStatus::Pending)
                }
            });
        }

        Ok(Verdict::plain(if settings.comment_require_review {
            CommentStatus::Pending
        } else {
            CommentStatus::Approved
        }))
    }

    /// Approve a comment. The reply notification goes out only when the
    /// comment was not approved already.
    pub async fn approve(&self, id: i64) -> Result<(), CommentServiceError> {
        if self.set_status(id, CommentStatus::Approved).await? {
            self.notify_reply_by_id(id).await;
        }
        Ok(())
    }

    pub async fn reject(&self, id: i64) -> Result<(), CommentServiceError> {
        self.set_status(id, CommentStatus::Rejected).await.map(drop)
    }

    pub async fn mark_spam(&self, id: i64) -> Result<(), CommentServiceError> {
        self.set_status(id, CommentStatus::Spam).await.map(drop)
    }

    /// Delete a comment and its replies
    pub async fn delete(&self, id: i64) -> Result<(), CommentServiceError> {
        if !self.repo.delete(id).await? {
            return Err(CommentServiceError::NotFound(format!("Comment {}", id)));
        }
        tracing::info!(comment_id = id, "Comment deleted");
        Ok(())
    }

    /// Apply one moderation action to many comments. Returns how many rows
    /// changed; unknown ids are skipped.
    pub async fn batch(&self, action: CommentAction, ids: &[i64]) -> Result<u64, CommentServiceError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let affected = match action {
            CommentAction::Approve => {
                let changed = self.repo.update_status_many(ids, CommentStatus::Approved).await?;
                for &id in &changed {
                    self.notify_reply_by_id(id).await;
                }
                changed.len() as u64
            }
            CommentAction::Reject => self.repo.update_status_many(ids, CommentStatus::Rejected).await?.len() as u64,
            CommentAction::Spam => self.repo.update_status_many(ids, CommentStatus::Spam).await?.len() as u64,
            CommentAction::Delete => self.repo.delete_many(ids).await?,
        };
        tracing::info!(?action, requested = ids.len(), affected, "Batch moderation");
        Ok(affected)
    }

    /// Approved comments of a published post, threaded
    pub async fn list_for_post(&self, post_id: i64) -> Result<Vec<CommentWithMeta>, CommentServiceError> {
        let published = self
            .posts
            .get_by_id(post_id)
            .await?
            .is_some_and(|p| p.is_published());
        if !published {
            return Err(CommentServiceError::NotFound(format!("Post {}", post_id)));
        }

        let comments = self.repo.list_approved_for_post(post_id).await?;
        Ok(build_comment_tree(comments))
    }

    pub async fn list_admin(
        &self,
        status: Option<CommentStatus>,
        params: &ListParams,
    ) -> Result<PagedResult<AdminComment>, CommentServiceError> {
        let (items, total) = self.repo.list_admin(status, params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn pending_count(&self) -> Result<i64, CommentServiceError> {
        Ok(self.repo.count_by_status(CommentStatus::Pending).await?)
    }

    /// `Ok(false)` when the comment already had `status`
    async fn set_status(&self, id: i64, status: CommentStatus) -> Result<bool, CommentServiceError> {
        let changed = !self.repo.update_status_many(&[id], status).await?.is_empty();
        if !changed && self.repo.get_by_id(id).await?.is_none() {
            return Err(CommentServiceError::NotFound(format!("Comment {}", id)));
        }
        if changed {
            tracing::info!(comment_id = id, %status, "Comment moderated");
        }
        Ok(changed)
    }

    fn notify_admin(&self, settings: &Settings, post: &Post, comment: &Comment, author: &str) {
        if !settings.notify_admin_on_comment {
            return;
        }
        let Some(to) = settings.admin_email.clone() else {
            return;
        };
        match self.email.render_new_comment(settings, &to, post, comment, author) {
            Ok(email) => self.dispatch(settings.clone(), email),
            Err(e) => tracing::warn!("Failed to render comment notification: {}", e),
        }
    }

    /// Tell the parent comment's author about an approved reply
    async fn notify_reply(
        &self,
        settings: &Settings,
        post: &Post,
        reply: &Comment,
        reply_author: &str,
        reply_email: Option<&str>,
    ) {
        if !settings.notify_reply {
            return;
        }
        let Some(parent_id) = reply.parent_id else {
            return;
        };

        let parent_author = match self.repo.get_with_author(parent_id).await {
            Ok(Some((_, author))) => author,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(parent_id, "Failed to load parent comment for notification: {:#}", e);
                return;
            }
        };
        let Some(to) = parent_author.email.as_deref() else {
            return;
        };
        if reply_email.is_some_and(|own| own.eq_ignore_ascii_case(to)) {
            return;
        }

        match self
            .email
            .render_reply(settings, to, &parent_author.name, post, reply, reply_author)
        {
            Ok(email) => self.dispatch(settings.clone(), email),
            Err(e) => tracing::warn!("Failed to render reply notification: {}", e),
        }
    }

    async fn notify_reply_by_id(&self, id: i64) {
        let settings = match self.settings.get().await {
            Ok(settings) if settings.notify_reply => settings,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!("Failed to load settings for notification: {}", e);
                return;
            }
        };
        let (reply, author) = match self.repo.get_with_author(id).await {
            Ok(Some(found)) => found,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(comment_id = id, "Failed to load comment for notification: {:#}", e);
                return;
            }
        };
        if reply.parent_id.is_none() {
            return;
        }
        let post = match self.posts.get_by_id(reply.post_id).await {
            Ok(Some(post)) => post,
            _ => return,
        };
        self.notify_reply(&settings, &post, &reply, &author.name, author.email.as_deref())
            .await;
    }

    fn dispatch(&self, settings: Settings, email: crate::services::email::OutgoingEmail) {
        let mailer = self.email.clone();
        tokio::spawn(async move {
            let to = email.to.clone();
            if let Err(e) = mailer.send(&settings, email).await {
                tracing::warn!(to = %to, "Notification email failed: {}", e);
            }
        });
    }
}

fn required(message: &'static str) -> ValidationError {
    ValidationError::new("required").with_message(message.into())
}

/// Nest comments under their parents, oldest first at every level.
/// Replies whose parent is not in the list are dropped.
pub fn build_comment_tree(comments: Vec<(Comment, CommentAuthor)>) -> Vec<CommentWithMeta> {
    let mut children: HashMap<Option<i64>, Vec<CommentWithMeta>> = HashMap::new();
    for (comment, author) in comments {
        children.entry(comment.parent_id).or_default().push(CommentWithMeta {
            id: comment.id,
            post_id: comment.post_id,
            parent_id: comment.parent_id,
            avatar_url: CommentWithMeta::gravatar_url(author.email.as_deref()),
            author_name: author.name,
            is_admin: author.is_admin,
            content: comment.content,
            created_at: comment.created_at,
            replies: Vec::new(),
        });
    }
    for siblings in children.values_mut() {
        siblings.sort_by_key(|c| (c.created_at, c.id));
    }

    fn attach(parent: Option<i64>, children: &mut HashMap<Option<i64>, Vec<CommentWithMeta>>) -> Vec<CommentWithMeta> {
        let Some(nodes) = children.remove(&parent) else {
            return Vec::new();
        };
        nodes
            .into_iter()
            .map(|mut node| {
                node.replies = attach(Some(node.id), children);
                node
            })
            .collect()
    }

    attach(None, &mut children)
}
