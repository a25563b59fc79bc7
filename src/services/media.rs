//! Media uploads
//!
//! Objects go to a [`MediaStorage`] backend chosen per upload: S3-compatible
//! storage when it is enabled and fully configured in settings, the local
//! upload directory otherwise. Local files are served under `/uploads`.
//! Keys have the form `YYYY/MM/<uuid>.<ext>`.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::db::repositories::MediaRepository;
use crate::models::{ListParams, Media, PagedResult, Settings, StorageKind};
use crate::services::settings::{SettingsService, SettingsServiceError};

/// URL prefix the local upload directory is served under
pub const LOCAL_URL_PREFIX: &str = "/uploads";

#[derive(Debug, thiserror::Error)]
pub enum MediaServiceError {
    #[error("File type not allowed: {0}")]
    UnsupportedType(String),

    #[error("File too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("Empty file")]
    Empty,

    #[error("Media not found: {0}")]
    NotFound(i64),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<SettingsServiceError> for MediaServiceError {
    fn from(e: SettingsServiceError) -> Self {
        MediaServiceError::InternalError(anyhow::anyhow!(e))
    }
}

/// Where uploaded bytes are kept
#[async_trait]
pub trait MediaStorage: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Store an object and return its public URL
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Files under a local directory
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            anyhow::bail!("Invalid storage key: {}", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl MediaStorage for LocalStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(format!("{}/{}", LOCAL_URL_PREFIX, key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(key, "Local media file already gone");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }
}

#[cfg(feature = "s3-storage")]
pub use s3::S3Storage;

#[cfg(feature = "s3-storage")]
mod s3 {
    use super::*;
    use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::Client;

    /// Objects in an S3-compatible bucket
    pub struct S3Storage {
        client: Client,
        bucket: String,
        public_url: String,
    }

    impl S3Storage {
        /// Build a client from settings. `None` without bucket and credentials.
        pub fn from_settings(settings: &Settings) -> Option<Self> {
            let field = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
            let bucket = field(&settings.s3_bucket)?;
            let access_key = field(&settings.s3_access_key)?;
            let secret_key = field(&settings.s3_secret_key)?;
            let endpoint = field(&settings.s3_endpoint);
            let region = field(&settings.s3_region).unwrap_or_else(|| "us-east-1".to_string());
            let public_url = field(&settings.s3_public_url).unwrap_or_else(|| match &endpoint {
                Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), bucket),
                None => format!("https://{}.s3.{}.amazonaws.com", bucket, region),
            });

            let mut builder = aws_sdk_s3::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new(region))
                .credentials_provider(Credentials::new(access_key, secret_key, None, None, "quire-settings"));
            // Custom endpoints (MinIO, R2, ...) expect path-style addressing
            if let Some(endpoint) = endpoint {
                builder = builder.endpoint_url(endpoint).force_path_style(true);
            }

            Some(Self {
                client: Client::from_conf(builder.build()),
                bucket,
                public_url: public_url.trim_end_matches('/').to_string(),
            })
        }
    }

    #[async_trait]
    impl MediaStorage for S3Storage {
        fn kind(&self) -> StorageKind {
            StorageKind::S3
        }

        async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_type(content_type)
                .body(ByteStream::from(bytes))
                .send()
                .await
                .with_context(|| format!("Failed to upload {} to bucket {}", key, self.bucket))?;
            Ok(format!("{}/{}", self.public_url, key))
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .with_context(|| format!("Failed to delete {} from bucket {}", key, self.bucket))?;
            Ok(())
        }
    }
}

/// An uploaded file before validation
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

pub struct MediaService {
    repo: Arc<dyn MediaRepository>,
    settings: Arc<SettingsService>,
    config: UploadConfig,
    local: Arc<LocalStorage>,
}

impl MediaService {
    pub fn new(repo: Arc<dyn MediaRepository>, settings: Arc<SettingsService>, config: UploadConfig) -> Self {
        let local = Arc::new(LocalStorage::new(config.path.clone()));
        Self {
            repo,
            settings,
            config,
            local,
        }
    }

    pub fn upload_config(&self) -> &UploadConfig {
        &self.config
    }

    /// Validate, store and record an upload
    pub async fn upload(&self, upload: Upload, uploaded_by: Option<i64>) -> Result<Media, MediaServiceError> {
        let mime_type = upload.mime_type.trim().to_lowercase();
        if !self.config.is_type_allowed(&mime_type) {
            return Err(MediaServiceError::UnsupportedType(mime_type));
        }
        let size = upload.bytes.len() as u64;
        if size == 0 {
            return Err(MediaServiceError::Empty);
        }
        if size > self.config.max_file_size {
            return Err(MediaServiceError::TooLarge {
                size,
                max: self.config.max_file_size,
            });
        }

        let settings = self.settings.get().await?;
        let storage = self.storage_for_upload(&settings);
        let now = Utc::now();
        let key = format!(
            "{:04}/{:02}/{}.{}",
            now.year(),
            now.month(),
            Uuid::new_v4(),
            self.config.extension_for(&mime_type)
        );

        let url = storage.put(&key, upload.bytes, &mime_type).await?;
        let media = Media {
            id: 0,
            filename: sanitize_filename(&upload.filename),
            storage_key: key,
            url,
            mime_type,
            size: size as i64,
            storage: storage.kind(),
            uploaded_by,
            created_at: now,
        };

        match self.repo.create(&media).await {
            Ok(media) => {
                tracing::info!(media_id = media.id, key = %media.storage_key, storage = media.storage.as_str(), "Media uploaded");
                Ok(media)
            }
            Err(e) => {
                if let Err(cleanup) = storage.delete(&media.storage_key).await {
                    tracing::warn!(key = %media.storage_key, "Failed to remove orphaned object: {:#}", cleanup);
                }
                Err(e.into())
            }
        }
    }

    pub async fn list(&self, params: &ListParams) -> Result<PagedResult<Media>, MediaServiceError> {
        let (items, total) = self.repo.list(params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Delete the stored object, then the row
    pub async fn delete(&self, id: i64) -> Result<(), MediaServiceError> {
        let media = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or(MediaServiceError::NotFound(id))?;

        let storage = self.storage_for_existing(&media).await?;
        storage.delete(&media.storage_key).await?;
        self.repo.delete(id).await?;
        tracing::info!(media_id = id, "Media deleted");
        Ok(())
    }

    fn storage_for_upload(&self, settings: &Settings) -> Arc<dyn MediaStorage> {
        if settings.s3_ready() {
            #[cfg(feature = "s3-storage")]
            if let Some(s3) = S3Storage::from_settings(settings) {
                return Arc::new(s3);
            }
            #[cfg(not(feature = "s3-storage"))]
            tracing::warn!("S3 storage is enabled in settings but this build lacks the s3-storage feature");
        }
        self.local.clone()
    }

    async fn storage_for_existing(&self, media: &Media) -> Result<Arc<dyn MediaStorage>, MediaServiceError> {
        match media.storage {
            StorageKind::Local => Ok(self.local.clone()),
            StorageKind::S3 => {
                #[cfg(feature = "s3-storage")]
                {
                    let settings = self.settings.get().await?;
                    if let Some(s3) = S3Storage::from_settings(&settings) {
                        return Ok(Arc::new(s3));
                    }
                }
                Err(anyhow::anyhow!("S3 storage is not configured, cannot delete {}", media.storage_key).into())
            }
        }
    }
}

/// Keep the last path segment of a client-supplied name
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() {
        "upload".to_string()
    } else {
        base.chars().take(255).collect()
    }
}
