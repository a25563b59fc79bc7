//! RSS feed and XML sitemap
//!
//! Both documents are rendered by tera. Template names end in `.xml`, so
//! tera escapes every interpolated value, using XML entities rather than
//! tera's HTML set. Rendered output is cached and dropped with the posts,
//! tags and settings it was built from.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tera::{Context as TeraContext, Tera};

use crate::cache::{keys, TaggedCache};
use crate::db::repositories::{PostRepository, TagRepository};
use crate::models::{ListParams, Post, PostFilter, PostType};
use crate::services::settings::{SettingsService, SettingsServiceError};

/// Items in the RSS feed
pub const FEED_SIZE: u32 = 20;

const RSS_TEMPLATE: &str = "rss.xml";
const SITEMAP_TEMPLATE: &str = "sitemap.xml";

const RSS_KEY: &str = "feed:rss";
const SITEMAP_KEY: &str = "feed:sitemap";

const TEMPLATES: &[(&str, &str)] = &[
    (
        RSS_TEMPLATE,
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>{{ title }}</title>
    <link>{{ link }}</link>
    <description>{{ description }}</description>
    <atom:link href="{{ link }}/feed.xml" rel="self" type="application/rss+xml"/>
{%- if last_build %}
    <lastBuildDate>{{ last_build }}</lastBuildDate>
{%- endif %}
{%- for item in items %}
    <item>
      <title>{{ item.title }}</title>
      <link>{{ item.link }}</link>
      <guid isPermaLink="true">{{ item.link }}</guid>
      <pubDate>{{ item.pub_date }}</pubDate>
      <description>{{ item.description }}</description>
    </item>
{%- endfor %}
  </channel>
</rss>
"#,
    ),
    (
        SITEMAP_TEMPLATE,
        r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
{%- for url in urls %}
  <url>
    <loc>{{ url.loc }}</loc>
{%- if url.lastmod %}
    <lastmod>{{ url.lastmod }}</lastmod>
{%- endif %}
  </url>
{%- endfor %}
</urlset>
"#,
    ),
];

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Failed to render feed: {0}")]
    Template(#[from] tera::Error),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<SettingsServiceError> for FeedError {
    fn from(e: SettingsServiceError) -> Self {
        FeedError::InternalError(anyhow::anyhow!(e))
    }
}

#[derive(Debug, Serialize)]
struct FeedItem {
    title: String,
    link: String,
    pub_date: String,
    description: String,
}

#[derive(Debug, Serialize)]
struct SitemapUrl {
    loc: String,
    lastmod: Option<String>,
}

pub struct FeedService {
    posts: Arc<dyn PostRepository>,
    tags: Arc<dyn TagRepository>,
    settings: Arc<SettingsService>,
    cache: Arc<TaggedCache>,
    templates: Tera,
    app_url: String,
}

impl FeedService {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        tags: Arc<dyn TagRepository>,
        settings: Arc<SettingsService>,
        cache: Arc<TaggedCache>,
        app_url: &str,
    ) -> Result<Self, FeedError> {
        let mut templates = Tera::default();
        templates.add_raw_templates(TEMPLATES.iter().copied())?;
        templates.set_escape_fn(escape_xml);
        Ok(Self {
            posts,
            tags,
            settings,
            cache,
            templates,
            app_url: app_url.trim_end_matches('/').to_string(),
        })
    }

    /// RSS 2.0 document of the newest published posts
    pub async fn rss(&self) -> Result<String, FeedError> {
        self.cache
            .get_or_load(RSS_KEY, &[keys::POSTS, keys::SETTINGS], || self.render_rss())
            .await
    }

    /// Sitemap of the home page, published posts and pages, and tags
    pub async fn sitemap(&self) -> Result<String, FeedError> {
        self.cache
            .get_or_load(SITEMAP_KEY, &[keys::POSTS, keys::TAGS], || self.render_sitemap())
            .await
    }

    async fn render_rss(&self) -> Result<String, FeedError> {
        let settings = self.settings.get().await?;
        let (posts, _) = self
            .posts
            .list(&PostFilter::published(PostType::Post), &ListParams::new(1, FEED_SIZE))
            .await
            .context("Failed to load feed posts")?;

        let mut posts = posts;
        // Pinned posts lead the listing but the feed is purely chronological
        posts.sort_by(|a, b| published(b).cmp(&published(a)));

        let items: Vec<FeedItem> = posts
            .iter()
            .map(|post| FeedItem {
                title: post.title.clone(),
                link: self.link_for(post),
                pub_date: published(post).to_rfc2822(),
                description: post.excerpt.clone().unwrap_or_default(),
            })
            .collect();

        let mut ctx = TeraContext::new();
        ctx.insert("title", &settings.site_name);
        ctx.insert("description", &settings.site_description);
        ctx.insert("link", &self.app_url);
        ctx.insert("last_build", &posts.first().map(|p| published(p).to_rfc2822()));
        ctx.insert("items", &items);
        Ok(self.templates.render(RSS_TEMPLATE, &ctx)?)
    }

    async fn render_sitemap(&self) -> Result<String, FeedError> {
        let posts = self.posts.list_all().await.context("Failed to load posts")?;
        let tags = self.tags.list_all().await.context("Failed to load tags")?;

        let mut urls = vec![SitemapUrl {
            loc: format!("{}/", self.app_url),
            lastmod: None,
        }];
        urls.extend(
            posts
                .iter()
                .filter(|p| p.is_published() && p.post_type != PostType::Memo)
                .map(|post| SitemapUrl {
                    loc: self.link_for(post),
                    lastmod: Some(post.updated_at.format("%Y-%m-%d").to_string()),
                }),
        );
        urls.extend(tags.iter().map(|tag| SitemapUrl {
            loc: format!("{}/tags/{}", self.app_url, tag.slug),
            lastmod: None,
        }));

        let mut ctx = TeraContext::new();
        ctx.insert("urls", &urls);
        Ok(self.templates.render(SITEMAP_TEMPLATE, &ctx)?)
    }

    fn link_for(&self, post: &Post) -> String {
        let section = match post.post_type {
            PostType::Post => "posts",
            PostType::Page => "pages",
            PostType::Memo => "memos",
        };
        format!("{}/{}/{}", self.app_url, section, post.slug)
    }
}

/// Escape the five XML special characters
pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn published(post: &Post) -> chrono::DateTime<chrono::Utc> {
    post.published_at.unwrap_or(post.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_user, migrated_pool};
    use crate::db::repositories::{SqlxPostRepository, SqlxSettingsRepository, SqlxTagRepository};
    use crate::models::{PostStatus, Tag, UserRole};
    use crate::services::crypto::SecretBox;
    use crate::services::test_support::tagged_cache;
    use chrono::{Duration, Utc};

    struct Fixture {
        service: FeedService,
        posts: Arc<dyn PostRepository>,
        tags: Arc<dyn TagRepository>,
        author_id: i64,
    }

    async fn fixture() -> Fixture {
        let pool = migrated_pool().await;
        let author = insert_user(&pool, "admin@example.com", UserRole::Admin).await;
        let posts = SqlxPostRepository::boxed(pool.clone());
        let tags = SqlxTagRepository::boxed(pool.clone());
        let settings = Arc::new(SettingsService::new(
            SqlxSettingsRepository::boxed(pool),
            tagged_cache(),
            SecretBox::new("test-key"),
        ));
        let service = FeedService::new(
            posts.clone(),
            tags.clone(),
            settings,
            tagged_cache(),
            "https://blog.example.com/",
        )
        .unwrap();
        Fixture {
            service,
            posts,
            tags,
            author_id: author.id,
        }
    }

    async fn add_post(f: &Fixture, slug: &str, post_type: PostType, status: PostStatus, age_days: i64) {
        let at = Utc::now() - Duration::days(age_days);
        f.posts
            .create(&Post {
                id: 0,
                title: format!("Title {}", slug),
                slug: slug.to_string(),
                content: String::new(),
                content_html: String::new(),
                excerpt: Some(format!("About {} & more", slug)),
                cover_image: None,
                post_type,
                status,
                pinned: false,
                allow_comments: true,
                view_count: 0,
                author_id: f.author_id,
                published_at: (status == PostStatus::Published).then_some(at),
                created_at: at,
                updated_at: at,
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a < b & \"c\" 'd' > e/f"), "a &lt; b &amp; &quot;c&quot; &apos;d&apos; &gt; e/f");
    }

    #[tokio::test]
    async fn test_rss_lists_newest_published_posts() {
        let f = fixture().await;
        for i in 0..25 {
            add_post(&f, &format!("p{}", i), PostType::Post, PostStatus::Published, i).await;
        }
        add_post(&f, "draft", PostType::Post, PostStatus::Draft, 0).await;
        add_post(&f, "about", PostType::Page, PostStatus::Published, 0).await;

        let xml = f.service.rss().await.unwrap();
        assert_eq!(xml.matches("<item>").count(), FEED_SIZE as usize);
        assert!(xml.contains("<link>https://blog.example.com/posts/p0</link>"));
        assert!(!xml.contains("/posts/p24"));
        assert!(!xml.contains("draft"));
        assert!(!xml.contains("/pages/about"));
        assert!(xml.contains("About p0 &amp; more"));
        assert!(xml.find("/posts/p0<").unwrap() < xml.find("/posts/p1<").unwrap());
    }

    #[tokio::test]
    async fn test_sitemap_covers_posts_pages_and_tags() {
        let f = fixture().await;
        add_post(&f, "hello", PostType::Post, PostStatus::Published, 1).await;
        add_post(&f, "about", PostType::Page, PostStatus::Published, 1).await;
        add_post(&f, "secret", PostType::Post, PostStatus::Draft, 1).await;
        f.tags
            .create(&Tag::new("Rust".to_string(), "rust".to_string()))
            .await
            .unwrap();

        let xml = f.service.sitemap().await.unwrap();
        assert!(xml.contains("<loc>https://blog.example.com/</loc>"));
        assert!(xml.contains("<loc>https://blog.example.com/posts/hello</loc>"));
        assert!(xml.contains("<loc>https://blog.example.com/pages/about</loc>"));
        assert!(xml.contains("<loc>https://blog.example.com/tags/rust</loc>"));
        assert!(!xml.contains("secret"));
    }

    #[tokio::test]
    async fn test_empty_feed_is_valid() {
        let f = fixture().await;
        let xml = f.service.rss().await.unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<title>Quire</title>"));
        assert!(!xml.contains("<item>"));
        assert!(!xml.contains("lastBuildDate"));
    }
}
