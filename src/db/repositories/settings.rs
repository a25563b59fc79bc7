//! Settings repository
//!
//! Reads and writes the singleton settings row. Secret columns are passed
//! through as stored; encryption is the settings service's job.

use super::DbRow;
use crate::db::{Backend, DynDatabasePool};
use crate::models::Settings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

const SETTINGS_COLUMNS: &str = "site_name, site_description, site_url, site_logo, site_favicon, \
     footer_text, posts_per_page, allow_registration, comments_enabled, comment_require_review, \
     notify_admin_on_comment, notify_reply, admin_email, smtp_host, smtp_port, smtp_username, \
     smtp_password, smtp_from, smtp_secure, spam_detection_enabled, spam_api_base, spam_api_key, \
     spam_model, spam_low_threshold, spam_high_threshold, s3_enabled, s3_endpoint, s3_region, \
     s3_bucket, s3_access_key, s3_secret_key, s3_public_url, umami_enabled, umami_url, \
     umami_website_id, umami_api_key, updated_at";

/// `UPDATE` of the singleton row from a [`Settings`] value, unexecuted.
/// The database type is inferred from the executor it runs on.
macro_rules! settings_update_query {
    ($s:expr) => {{
        let s: &$crate::models::Settings = $s;
        sqlx::query(
            r#"
            UPDATE settings SET
                site_name = ?, site_description = ?, site_url = ?, site_logo = ?,
                site_favicon = ?, footer_text = ?, posts_per_page = ?, allow_registration = ?,
                comments_enabled = ?, comment_require_review = ?, notify_admin_on_comment = ?,
                notify_reply = ?, admin_email = ?, smtp_host = ?, smtp_port = ?,
                smtp_username = ?, smtp_password = ?, smtp_from = ?, smtp_secure = ?,
                spam_detection_enabled = ?, spam_api_base = ?, spam_api_key = ?,
                spam_model = ?, spam_low_threshold = ?, spam_high_threshold = ?,
                s3_enabled = ?, s3_endpoint = ?, s3_region = ?, s3_bucket = ?,
                s3_access_key = ?, s3_secret_key = ?, s3_public_url = ?,
                umami_enabled = ?, umami_url = ?, umami_website_id = ?, umami_api_key = ?,
                updated_at = ?
            WHERE id = 1
            "#,
        )
        .bind(&s.site_name)
        .bind(&s.site_description)
        .bind(&s.site_url)
        .bind(&s.site_logo)
        .bind(&s.site_favicon)
        .bind(&s.footer_text)
        .bind(s.posts_per_page)
        .bind(s.allow_registration)
        .bind(s.comments_enabled)
        .bind(s.comment_require_review)
        .bind(s.notify_admin_on_comment)
        .bind(s.notify_reply)
        .bind(&s.admin_email)
        .bind(&s.smtp_host)
        .bind(s.smtp_port)
        .bind(&s.smtp_username)
        .bind(&s.smtp_password)
        .bind(&s.smtp_from)
        .bind(s.smtp_secure)
        .bind(s.spam_detection_enabled)
        .bind(&s.spam_api_base)
        .bind(&s.spam_api_key)
        .bind(&s.spam_model)
        .bind(s.spam_low_threshold)
        .bind(s.spam_high_threshold)
        .bind(s.s3_enabled)
        .bind(&s.s3_endpoint)
        .bind(&s.s3_region)
        .bind(&s.s3_bucket)
        .bind(&s.s3_access_key)
        .bind(&s.s3_secret_key)
        .bind(&s.s3_public_url)
        .bind(s.umami_enabled)
        .bind(&s.umami_url)
        .bind(&s.umami_website_id)
        .bind(&s.umami_api_key)
        .bind(s.updated_at)
    }};
}
pub(crate) use settings_update_query;

/// Repository trait for the settings row
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Load the row, or defaults when it is missing
    async fn get(&self) -> Result<Settings>;

    /// Overwrite the row
    async fn save(&self, settings: &Settings) -> Result<()>;
}

/// SQLx-based settings repository
pub struct SqlxSettingsRepository {
    pool: DynDatabasePool,
}

impl SqlxSettingsRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SettingsRepository> {
        Arc::new(Self::new(pool))
    }

    async fn ensure_row(&self) -> Result<()> {
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                sqlx::query("INSERT OR IGNORE INTO settings (id) VALUES (1)")
                    .execute(p)
                    .await
                    .context("Failed to seed settings row")?;
            }
            Backend::Mysql(p) => {
                sqlx::query("INSERT IGNORE INTO settings (id) VALUES (1)")
                    .execute(p)
                    .await
                    .context("Failed to seed settings row")?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsRepository for SqlxSettingsRepository {
    async fn get(&self) -> Result<Settings> {
        let sql = format!("SELECT {} FROM settings WHERE id = 1", SETTINGS_COLUMNS);
        let settings = with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .fetch_optional(p)
                .await
                .context("Failed to load settings")?
                .map(|row| row_to_settings(&row))
                .transpose()?
        });
        Ok(settings.unwrap_or_default())
    }

    async fn save(&self, s: &Settings) -> Result<()> {
        self.ensure_row().await?;
        with_pool!(self.pool, |p| {
            settings_update_query!(s)
                .execute(p)
                .await
                .context("Failed to save settings")?;
        });
        Ok(())
    }
}

fn row_to_settings(row: &impl DbRow) -> Result<Settings> {
    Ok(Settings {
        site_name: row.get_string("site_name")?,
        site_description: row.get_string("site_description")?,
        site_url: row.get_opt_string("site_url")?,
        site_logo: row.get_opt_string("site_logo")?,
        site_favicon: row.get_opt_string("site_favicon")?,
        footer_text: row.get_opt_string("footer_text")?,
        posts_per_page: row.get_i32("posts_per_page")?,
        allow_registration: row.get_bool("allow_registration")?,
        comments_enabled: row.get_bool("comments_enabled")?,
        comment_require_review: row.get_bool("comment_require_review")?,
        notify_admin_on_comment: row.get_bool("notify_admin_on_comment")?,
        notify_reply: row.get_bool("notify_reply")?,
        admin_email: row.get_opt_string("admin_email")?,
        smtp_host: row.get_opt_string("smtp_host")?,
        smtp_port: row.get_i32("smtp_port")?,
        smtp_username: row.get_opt_string("smtp_username")?,
        smtp_password: row.get_opt_string("smtp_password")?,
        smtp_from: row.get_opt_string("smtp_from")?,
        smtp_secure: row.get_bool("smtp_secure")?,
        spam_detection_enabled: row.get_bool("spam_detection_enabled")?,
        spam_api_base: row.get_opt_string("spam_api_base")?,
        spam_api_key: row.get_opt_string("spam_api_key")?,
        spam_model: row.get_opt_string("spam_model")?,
        spam_low_threshold: row.get_f64("spam_low_threshold")?,
        spam_high_threshold: row.get_f64("spam_high_threshold")?,
        s3_enabled: row.get_bool("s3_enabled")?,
        s3_endpoint: row.get_opt_string("s3_endpoint")?,
        s3_region: row.get_opt_string("s3_region")?,
        s3_bucket: row.get_opt_string("s3_bucket")?,
        s3_access_key: row.get_opt_string("s3_access_key")?,
        s3_secret_key: row.get_opt_string("s3_secret_key")?,
        s3_public_url: row.get_opt_string("s3_public_url")?,
        umami_enabled: row.get_bool("umami_enabled")?,
        umami_url: row.get_opt_string("umami_url")?,
        umami_website_id: row.get_opt_string("umami_website_id")?,
        umami_api_key: row.get_opt_string("umami_api_key")?,
        updated_at: row.get_datetime("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;

    #[tokio::test]
    async fn test_seeded_defaults() {
        let repo = SqlxSettingsRepository::new(migrated_pool().await);
        let settings = repo.get().await.unwrap();
        assert_eq!(settings.site_name, "Quire");
        assert_eq!(settings.posts_per_page, 10);
        assert!(settings.comment_require_review);
        assert!((settings.spam_low_threshold - 0.3).abs() < f64::EPSILON);
        assert_eq!(settings.smtp_port, 587);
    }

    #[tokio::test]
    async fn test_save_round_trip() {
        let repo = SqlxSettingsRepository::new(migrated_pool().await);
        let mut settings = repo.get().await.unwrap();
        settings.site_name = "My Blog".to_string();
        settings.spam_api_key = Some("enc:v1:opaque".to_string());
        settings.spam_high_threshold = 0.9;
        settings.s3_enabled = true;
        repo.save(&settings).await.unwrap();

        let loaded = repo.get().await.unwrap();
        assert_eq!(loaded.site_name, "My Blog");
        assert_eq!(loaded.spam_api_key.as_deref(), Some("enc:v1:opaque"));
        assert!((loaded.spam_high_threshold - 0.9).abs() < f64::EPSILON);
        assert!(loaded.s3_enabled);
    }

    #[tokio::test]
    async fn test_save_recreates_missing_row() {
        let pool = migrated_pool().await;
        pool.execute("DELETE FROM settings").await.unwrap();
        let repo = SqlxSettingsRepository::new(pool);

        assert_eq!(repo.get().await.unwrap().site_name, "Quire");
        let settings = Settings {
            site_name: "Back".to_string(),
            ..Settings::default()
        };
        repo.save(&settings).await.unwrap();
        assert_eq!(repo.get().await.unwrap().site_name, "Back");
    }
}
