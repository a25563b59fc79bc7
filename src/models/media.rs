//! Media model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an uploaded object lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    S3,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::S3 => "s3",
        }
    }
}

impl std::str::FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageKind::Local),
            "s3" => Ok(StorageKind::S3),
            _ => Err(anyhow::anyhow!("Invalid storage kind: {}", s)),
        }
    }
}

/// Uploaded file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: i64,
    /// Original file name as uploaded
    pub filename: String,
    /// Object key inside the storage backend
    pub storage_key: String,
    /// Public URL
    pub url: String,
    pub mime_type: String,
    pub size: i64,
    pub storage: StorageKind,
    pub uploaded_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}
