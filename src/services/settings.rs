//! Settings service
//!
//! The settings row is cached in its stored form (secrets still sealed)
//! under the `settings` tag and decrypted on every read, so plaintext
//! secrets never reach the cache backend.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::cache::{keys, TaggedCache};
use crate::db::repositories::SettingsRepository;
use crate::models::{AdminSettingsView, PublicSettings, SecretUpdate, Settings, UpdateSettingsInput};
use crate::services::crypto::{is_encrypted, CryptoError, SecretBox};

const CACHE_KEY: &str = "settings:row";

#[derive(Debug, Error)]
pub enum SettingsServiceError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Failed to encrypt secret: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct SettingsService {
    repo: Arc<dyn SettingsRepository>,
    cache: Arc<TaggedCache>,
    secrets: SecretBox,
}

impl SettingsService {
    pub fn new(repo: Arc<dyn SettingsRepository>, cache: Arc<TaggedCache>, secrets: SecretBox) -> Self {
        Self { repo, cache, secrets }
    }

    /// Settings with secrets in plaintext
    pub async fn get(&self) -> Result<Settings, SettingsServiceError> {
        let stored = self.stored().await?;
        Ok(self.open_secrets(stored))
    }

    /// Fields safe for anonymous visitors
    pub async fn get_public(&self) -> Result<PublicSettings, SettingsServiceError> {
        Ok(self.stored().await?.to_public())
    }

    /// Admin console view, secrets reported only as present or absent
    pub async fn get_admin_view(&self) -> Result<AdminSettingsView, SettingsServiceError> {
        Ok(self.stored().await?.to_admin_view())
    }

    /// Apply a partial update and return the new admin view.
    ///
    /// The merged thresholds are checked again, since the input may carry
    /// only one of them.
    pub async fn update(&self, input: UpdateSettingsInput) -> Result<AdminSettingsView, SettingsServiceError> {
        input.validate()?;

        let mut settings = self.repo.get().await?;
        input.apply_plain(&mut settings);

        if settings.spam_low_threshold > settings.spam_high_threshold {
            let mut errors = ValidationErrors::new();
            errors.add(
                "spam_low_threshold",
                ValidationError::new("thresholds")
                    .with_message("Low threshold must not exceed high threshold".into()),
            );
            return Err(errors.into());
        }

        self.seal(&mut settings.smtp_password, &input.smtp_password)?;
        self.seal(&mut settings.spam_api_key, &input.spam_api_key)?;
        self.seal(&mut settings.s3_secret_key, &input.s3_secret_key)?;
        self.seal(&mut settings.umami_api_key, &input.umami_api_key)?;
        settings.updated_at = Utc::now();

        self.repo.save(&settings).await?;
        self.cache.invalidate_tag(keys::SETTINGS).await;
        tracing::info!("Settings updated");

        Ok(settings.to_admin_view())
    }

    async fn stored(&self) -> Result<Settings, SettingsServiceError> {
        let repo = &self.repo;
        let settings = self
            .cache
            .get_or_load(CACHE_KEY, &[keys::SETTINGS], || async move { repo.get().await })
            .await?;
        Ok(settings)
    }

    /// Apply one secret update. Kept values that are still plaintext are
    /// sealed on the way through.
    fn seal(&self, current: &mut Option<String>, input: &Option<String>) -> Result<(), CryptoError> {
        match SecretUpdate::from_input(input) {
            SecretUpdate::Keep => {
                if let Some(value) = current.as_ref().filter(|v| !v.is_empty() && !is_encrypted(v)) {
                    *current = Some(self.secrets.encrypt(value)?);
                }
            }
            SecretUpdate::Clear => *current = None,
            SecretUpdate::Set(value) => *current = Some(self.secrets.encrypt(&value)?),
        }
        Ok(())
    }

    fn open_secrets(&self, mut settings: Settings) -> Settings {
        for (name, field) in [
            ("smtp_password", &mut settings.smtp_password),
            ("spam_api_key", &mut settings.spam_api_key),
            ("s3_secret_key", &mut settings.s3_secret_key),
            ("umami_api_key", &mut settings.umami_api_key),
        ] {
            if let Some(stored) = field.take() {
                match self.secrets.decrypt(&stored) {
                    Ok(plain) => *field = Some(plain),
                    Err(e) => {
                        tracing::warn!(field = name, "Cannot decrypt stored secret, ignoring it: {}", e);
                    }
                }
            }
        }
        settings
    }
}
