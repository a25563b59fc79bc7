//! Email whitelist
//!
//! Guest comments from whitelisted addresses skip spam scoring and are
//! approved straight away. Addresses are stored lower-cased.

use std::sync::Arc;

use validator::{Validate, ValidationErrors};

use crate::db::repositories::{is_unique_violation, WhitelistRepository};
use crate::models::{AddWhitelistInput, WhitelistEntry};

#[derive(Debug, thiserror::Error)]
pub enum WhitelistServiceError {
    #[error("Email already whitelisted: {0}")]
    Conflict(String),

    #[error("Whitelist entry not found: {0}")]
    NotFound(i64),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct WhitelistService {
    repo: Arc<dyn WhitelistRepository>,
}

impl WhitelistService {
    pub fn new(repo: Arc<dyn WhitelistRepository>) -> Self {
        Self { repo }
    }

    pub async fn list(&self) -> Result<Vec<WhitelistEntry>, WhitelistServiceError> {
        Ok(self.repo.list().await?)
    }

    pub async fn add(&self, input: AddWhitelistInput) -> Result<WhitelistEntry, WhitelistServiceError> {
        input.validate()?;
        let email = input.email.trim().to_lowercase();

        if self.repo.contains(&email).await? {
            return Err(WhitelistServiceError::Conflict(email));
        }
        match self.repo.add(&email, input.note.as_deref()).await {
            Ok(entry) => {
                tracing::info!(email = %entry.email, "Email whitelisted");
                Ok(entry)
            }
            Err(e) if is_unique_violation(&e) => Err(WhitelistServiceError::Conflict(email)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove(&self, id: i64) -> Result<(), WhitelistServiceError> {
        if !self.repo.remove(id).await? {
            return Err(WhitelistServiceError::NotFound(id));
        }
        Ok(())
    }

    pub async fn contains(&self, email: &str) -> Result<bool, WhitelistServiceError> {
        Ok(self.repo.contains(&email.trim().to_lowercase()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;
    use crate::db::repositories::SqlxWhitelistRepository;

    async fn service() -> WhitelistService {
        WhitelistService::new(SqlxWhitelistRepository::boxed(migrated_pool().await))
    }

    fn input(email: &str) -> AddWhitelistInput {
        AddWhitelistInput {
            email: email.to_string(),
            note: Some("friend".to_string()),
        }
    }

    #[tokio::test]
    async fn test_add_lowercases_and_contains() {
        let service = service().await;
        let entry = service.add(input("Friend@Example.COM")).await.unwrap();
        assert_eq!(entry.email, "friend@example.com");
        assert!(service.contains(" FRIEND@example.com ").await.unwrap());
        assert!(!service.contains("other@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_conflicts() {
        let service = service().await;
        service.add(input("a@example.com")).await.unwrap();
        assert!(matches!(
            service.add(input("A@example.com")).await,
            Err(WhitelistServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_email_rejected() {
        let service = service().await;
        assert!(matches!(
            service.add(input("not-an-email")).await,
            Err(WhitelistServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_remove() {
        let service = service().await;
        let entry = service.add(input("a@example.com")).await.unwrap();
        service.remove(entry.id).await.unwrap();
        assert!(service.list().await.unwrap().is_empty());
        assert!(matches!(
            service.remove(entry.id).await,
            Err(WhitelistServiceError::NotFound(_))
        ));
    }
}
