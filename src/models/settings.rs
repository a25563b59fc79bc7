//! Site settings model
//!
//! Settings live in a single row (`id = 1`). [`Settings`] is the decrypted,
//! in-process form. Secret columns are encrypted in the database and never
//! leave the server: the public projection drops them and the admin view
//! only reports whether each one is set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidateEmail, ValidationError};

/// Default score below which a comment is approved automatically
pub const DEFAULT_SPAM_LOW_THRESHOLD: f64 = 0.3;
/// Default score above which a comment is marked as spam
pub const DEFAULT_SPAM_HIGH_THRESHOLD: f64 = 0.8;

/// Full settings row with secrets in plaintext
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    // Site
    pub site_name: String,
    pub site_description: String,
    pub site_url: Option<String>,
    pub site_logo: Option<String>,
    pub site_favicon: Option<String>,
    pub footer_text: Option<String>,
    pub posts_per_page: i32,
    pub allow_registration: bool,

    // Comments
    pub comments_enabled: bool,
    pub comment_require_review: bool,
    pub notify_admin_on_comment: bool,
    pub notify_reply: bool,
    pub admin_email: Option<String>,

    // SMTP
    pub smtp_host: Option<String>,
    pub smtp_port: i32,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub smtp_secure: bool,

    // Spam detection
    pub spam_detection_enabled: bool,
    pub spam_api_base: Option<String>,
    pub spam_api_key: Option<String>,
    pub spam_model: Option<String>,
    pub spam_low_threshold: f64,
    pub spam_high_threshold: f64,

    // S3-compatible storage
    pub s3_enabled: bool,
    pub s3_endpoint: Option<String>,
    pub s3_region: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub s3_public_url: Option<String>,

    // Umami analytics
    pub umami_enabled: bool,
    pub umami_url: Option<String>,
    pub umami_website_id: Option<String>,
    pub umami_api_key: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            site_name: "Quire".to_string(),
            site_description: "A personal blog".to_string(),
            site_url: None,
            site_logo: None,
            site_favicon: None,
            footer_text: None,
            posts_per_page: 10,
            allow_registration: false,
            comments_enabled: true,
            comment_require_review: true,
            notify_admin_on_comment: false,
            notify_reply: false,
            admin_email: None,
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_from: None,
            smtp_secure: true,
            spam_detection_enabled: false,
            spam_api_base: None,
            spam_api_key: None,
            spam_model: None,
            spam_low_threshold: DEFAULT_SPAM_LOW_THRESHOLD,
            spam_high_threshold: DEFAULT_SPAM_HIGH_THRESHOLD,
            s3_enabled: false,
            s3_endpoint: None,
            s3_region: None,
            s3_bucket: None,
            s3_access_key: None,
            s3_secret_key: None,
            s3_public_url: None,
            umami_enabled: false,
            umami_url: None,
            umami_website_id: None,
            umami_api_key: None,
            updated_at: Utc::now(),
        }
    }
}

fn filled(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Settings {
    /// Spam scoring is switched on and has an endpoint, key and model
    pub fn spam_detection_ready(&self) -> bool {
        self.spam_detection_enabled
            && filled(&self.spam_api_base).is_some()
            && filled(&self.spam_api_key).is_some()
            && filled(&self.spam_model).is_some()
    }

    /// SMTP has enough configuration to send mail
    pub fn smtp_ready(&self) -> bool {
        filled(&self.smtp_host).is_some() && filled(&self.smtp_from).is_some()
    }

    /// S3 storage is switched on and fully configured
    pub fn s3_ready(&self) -> bool {
        self.s3_enabled
            && filled(&self.s3_bucket).is_some()
            && filled(&self.s3_access_key).is_some()
            && filled(&self.s3_secret_key).is_some()
    }

    /// Umami proxying is switched on and has a target
    pub fn umami_ready(&self) -> bool {
        self.umami_enabled && filled(&self.umami_url).is_some()
    }

    /// Project to the fields safe for anonymous visitors
    pub fn to_public(&self) -> PublicSettings {
        PublicSettings {
            site_name: self.site_name.clone(),
            site_description: self.site_description.clone(),
            site_url: self.site_url.clone(),
            site_logo: self.site_logo.clone(),
            site_favicon: self.site_favicon.clone(),
            footer_text: self.footer_text.clone(),
            posts_per_page: self.posts_per_page,
            allow_registration: self.allow_registration,
            comments_enabled: self.comments_enabled,
            umami_enabled: self.umami_ready(),
        }
    }

    /// Admin console view with secrets masked
    pub fn to_admin_view(&self) -> AdminSettingsView {
        let mut settings = self.clone();
        let has_smtp_password = filled(&settings.smtp_password).is_some();
        let has_spam_api_key = filled(&settings.spam_api_key).is_some();
        let has_s3_secret_key = filled(&settings.s3_secret_key).is_some();
        let has_umami_api_key = filled(&settings.umami_api_key).is_some();
        settings.smtp_password = None;
        settings.spam_api_key = None;
        settings.s3_secret_key = None;
        settings.umami_api_key = None;
        AdminSettingsView {
            settings,
            has_smtp_password,
            has_spam_api_key,
            has_s3_secret_key,
            has_umami_api_key,
        }
    }
}

/// Settings visible to anonymous visitors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicSettings {
    pub site_name: String,
    pub site_description: String,
    pub site_url: Option<String>,
    pub site_logo: Option<String>,
    pub site_favicon: Option<String>,
    pub footer_text: Option<String>,
    pub posts_per_page: i32,
    pub allow_registration: bool,
    pub comments_enabled: bool,
    pub umami_enabled: bool,
}

/// Settings as shown in the admin console
#[derive(Debug, Clone, Serialize)]
pub struct AdminSettingsView {
    #[serde(flatten)]
    pub settings: Settings,
    pub has_smtp_password: bool,
    pub has_spam_api_key: bool,
    pub has_s3_secret_key: bool,
    pub has_umami_api_key: bool,
}

/// Partial settings update.
///
/// Every field is optional and `None` leaves it unchanged. For nullable
/// text fields an empty string clears the value. For secret fields the same
/// holds: `None` keeps the stored secret, `Some("")` removes it and any other
/// value replaces it.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[validate(schema(function = "validate_thresholds"))]
pub struct UpdateSettingsInput {
    #[validate(length(min = 1, max = 100, message = "Site name must be 1 to 100 characters"))]
    pub site_name: Option<String>,
    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub site_description: Option<String>,
    #[validate(custom(function = "url_or_empty"))]
    pub site_url: Option<String>,
    pub site_logo: Option<String>,
    pub site_favicon: Option<String>,
    pub footer_text: Option<String>,
    #[validate(range(min = 1, max = 100, message = "Posts per page must be between 1 and 100"))]
    pub posts_per_page: Option<i32>,
    pub allow_registration: Option<bool>,

    pub comments_enabled: Option<bool>,
    pub comment_require_review: Option<bool>,
    pub notify_admin_on_comment: Option<bool>,
    pub notify_reply: Option<bool>,
    #[validate(custom(function = "email_or_empty"))]
    pub admin_email: Option<String>,

    pub smtp_host: Option<String>,
    #[validate(range(min = 1, max = 65535, message = "SMTP port must be between 1 and 65535"))]
    pub smtp_port: Option<i32>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[validate(custom(function = "email_or_empty"))]
    pub smtp_from: Option<String>,
    pub smtp_secure: Option<bool>,

    pub spam_detection_enabled: Option<bool>,
    #[validate(custom(function = "url_or_empty"))]
    pub spam_api_base: Option<String>,
    pub spam_api_key: Option<String>,
    pub spam_model: Option<String>,
    #[validate(range(min = 0.0, max = 1.0, message = "Threshold must be between 0 and 1"))]
    pub spam_low_threshold: Option<f64>,
    #[validate(range(min = 0.0, max = 1.0, message = "Threshold must be between 0 and 1"))]
    pub spam_high_threshold: Option<f64>,

    pub s3_enabled: Option<bool>,
    #[validate(custom(function = "url_or_empty"))]
    pub s3_endpoint: Option<String>,
    pub s3_region: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    #[validate(custom(function = "url_or_empty"))]
    pub s3_public_url: Option<String>,

    pub umami_enabled: Option<bool>,
    #[validate(custom(function = "url_or_empty"))]
    pub umami_url: Option<String>,
    pub umami_website_id: Option<String>,
    pub umami_api_key: Option<String>,
}

fn url_or_empty(value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.is_empty() || value.starts_with("http://") || value.starts_with("https://") {
        return Ok(());
    }
    Err(ValidationError::new("url").with_message("Must be an http(s) URL".into()))
}

fn email_or_empty(value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.is_empty() || value.validate_email() {
        return Ok(());
    }
    Err(ValidationError::new("email").with_message("Invalid email address".into()))
}

fn validate_thresholds(input: &UpdateSettingsInput) -> Result<(), ValidationError> {
    if let (Some(low), Some(high)) = (input.spam_low_threshold, input.spam_high_threshold) {
        if low > high {
            return Err(ValidationError::new("thresholds")
                .with_message("Low threshold must not exceed high threshold".into()));
        }
    }
    Ok(())
}

/// Store a nullable text field: empty input clears it
pub fn normalize_optional(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl UpdateSettingsInput {
    /// Apply every non-secret field onto `settings`. Secrets are handled by
    /// the settings service, which encrypts them.
    pub fn apply_plain(&self, settings: &mut Settings) {
        if let Some(v) = &self.site_name {
            settings.site_name = v.trim().to_string();
        }
        if let Some(v) = &self.site_description {
            settings.site_description = v.clone();
        }
        macro_rules! nullable {
            ($($field:ident),*) => {
                $(
                    if let Some(v) = &self.$field {
                        settings.$field = normalize_optional(v.clone());
                    }
                )*
            };
        }
        macro_rules! plain {
            ($($field:ident),*) => {
                $(
                    if let Some(v) = self.$field {
                        settings.$field = v;
                    }
                )*
            };
        }
        nullable!(
            site_url,
            site_logo,
            site_favicon,
            footer_text,
            admin_email,
            smtp_host,
            smtp_username,
            smtp_from,
            spam_api_base,
            spam_model,
            s3_endpoint,
            s3_region,
            s3_bucket,
            s3_access_key,
            s3_public_url,
            umami_url,
            umami_website_id
        );
        plain!(
            posts_per_page,
            allow_registration,
            comments_enabled,
            comment_require_review,
            notify_admin_on_comment,
            notify_reply,
            smtp_port,
            smtp_secure,
            spam_detection_enabled,
            spam_low_threshold,
            spam_high_threshold,
            s3_enabled,
            umami_enabled
        );
    }
}

/// How an update treats one secret field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretUpdate {
    Keep,
    Clear,
    Set(String),
}

impl SecretUpdate {
    pub fn from_input(value: &Option<String>) -> Self {
        match value {
            None => SecretUpdate::Keep,
            Some(v) if v.trim().is_empty() => SecretUpdate::Clear,
            Some(v) => SecretUpdate::Set(v.trim().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_projection_has_no_secrets() {
        let settings = Settings {
            smtp_password: Some("hunter2".to_string()),
            spam_api_key: Some("sk-123".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&settings.to_public()).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("sk-123"));
        assert!(!json.contains("smtp"));
    }

    #[test]
    fn test_admin_view_masks_secrets() {
        let settings = Settings {
            s3_secret_key: Some("secret".to_string()),
            ..Default::default()
        };
        let view = settings.to_admin_view();
        assert!(view.has_s3_secret_key);
        assert!(!view.has_smtp_password);
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("\"secret\""));
    }

    #[test]
    fn test_secret_update_semantics() {
        assert_eq!(SecretUpdate::from_input(&None), SecretUpdate::Keep);
        assert_eq!(
            SecretUpdate::from_input(&Some("  ".to_string())),
            SecretUpdate::Clear
        );
        assert_eq!(
            SecretUpdate::from_input(&Some("k".to_string())),
            SecretUpdate::Set("k".to_string())
        );
    }

    #[test]
    fn test_threshold_validation() {
        let input = UpdateSettingsInput {
            spam_low_threshold: Some(0.9),
            spam_high_threshold: Some(0.2),
            ..Default::default()
        };
        assert!(input.validate().is_err());

        let input = UpdateSettingsInput {
            spam_low_threshold: Some(1.5),
            ..Default::default()
        };
        let errors = input.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("spam_low_threshold"));
    }

    #[test]
    fn test_apply_plain_clears_empty_strings() {
        let mut settings = Settings {
            smtp_host: Some("smtp.example.com".to_string()),
            ..Default::default()
        };
        let input = UpdateSettingsInput {
            smtp_host: Some(String::new()),
            posts_per_page: Some(20),
            ..Default::default()
        };
        input.apply_plain(&mut settings);
        assert_eq!(settings.smtp_host, None);
        assert_eq!(settings.posts_per_page, 20);
    }

    #[test]
    fn test_spam_detection_ready() {
        let mut settings = Settings {
            spam_detection_enabled: true,
            spam_api_base: Some("https://api.example.com/v1".to_string()),
            spam_api_key: Some("k".to_string()),
            ..Default::default()
        };
        assert!(!settings.spam_detection_ready());
        settings.spam_model = Some("gpt-4o-mini".to_string());
        assert!(settings.spam_detection_ready());
    }
}
