//! Umami analytics proxy
//!
//! The tracker script and its beacon are served from the blog's own origin
//! and forwarded to the configured Umami instance. Admins read aggregate
//! stats through the same instance using the stored API key.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::models::Settings;
use crate::services::settings::{SettingsService, SettingsServiceError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Analytics is disabled")]
    Disabled,

    #[error("Analytics setting missing: {0}")]
    MissingSetting(&'static str),

    #[error("Analytics request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<SettingsServiceError> for AnalyticsError {
    fn from(e: SettingsServiceError) -> Self {
        AnalyticsError::InternalError(anyhow::anyhow!(e))
    }
}

/// Upstream reply passed back to the client as-is
#[derive(Debug, Clone)]
pub struct Proxied {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Who sent a beacon
#[derive(Debug, Clone, Default)]
pub struct BeaconOrigin {
    pub user_agent: Option<String>,
    pub client_ip: Option<String>,
}

/// Time window in epoch milliseconds
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StatsRange {
    pub start_at: i64,
    pub end_at: i64,
}

pub struct AnalyticsService {
    settings: Arc<SettingsService>,
    http: reqwest::Client,
}

impl AnalyticsService {
    pub fn new(settings: Arc<SettingsService>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { settings, http }
    }

    /// `{umami_url}/script.js`
    pub async fn script(&self) -> Result<Proxied, AnalyticsError> {
        let base = self.base_url().await?.0;
        let response = self.http.get(format!("{}/script.js", base)).send().await?;
        read(response).await
    }

    /// Forward a tracking beacon to `{umami_url}/api/send`
    pub async fn send(&self, body: Vec<u8>, origin: BeaconOrigin) -> Result<Proxied, AnalyticsError> {
        let base = self.base_url().await?.0;
        let mut request = self
            .http
            .post(format!("{}/api/send", base))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(ua) = origin.user_agent.as_deref() {
            request = request.header(reqwest::header::USER_AGENT, ua);
        }
        if let Some(ip) = origin.client_ip.as_deref() {
            request = request.header("x-forwarded-for", ip);
        }
        read(request.send().await?).await
    }

    /// Website summary stats for the admin dashboard
    pub async fn stats(&self, range: StatsRange) -> Result<serde_json::Value, AnalyticsError> {
        let (base, settings) = self.base_url().await?;
        let website_id = filled(&settings.umami_website_id).ok_or(AnalyticsError::MissingSetting("umami_website_id"))?;
        let api_key = filled(&settings.umami_api_key).ok_or(AnalyticsError::MissingSetting("umami_api_key"))?;

        let response = self
            .http
            .get(format!("{}/api/websites/{}/stats", base, website_id))
            .query(&[("startAt", range.start_at), ("endAt", range.end_at)])
            .header("x-umami-api-key", api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn base_url(&self) -> Result<(String, Settings), AnalyticsError> {
        let settings = self.settings.get().await?;
        if !settings.umami_ready() {
            return Err(AnalyticsError::Disabled);
        }
        let base = filled(&settings.umami_url)
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or(AnalyticsError::Disabled)?;
        Ok((base, settings))
    }
}

async fn read(response: reqwest::Response) -> Result<Proxied, AnalyticsError> {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.bytes().await?.to_vec();
    if status >= 400 {
        tracing::warn!(status, "Umami returned an error");
    }
    Ok(Proxied { status, content_type, body })
}

fn filled(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;
    use crate::db::repositories::SqlxSettingsRepository;
    use crate::models::UpdateSettingsInput;
    use crate::services::crypto::SecretBox;
    use crate::services::test_support::tagged_cache;
    use axum::{
        extract::Query,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;

    async fn spawn_umami() -> String {
        let app = Router::new()
            .route("/script.js", get(|| async { ([("content-type", "application/javascript")], "umami()") }))
            .route(
                "/api/send",
                post(|headers: HeaderMap| async move {
                    let ua = headers.get("user-agent").and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
                    let ip = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
                    Json(json!({ "ua": ua, "ip": ip }))
                }),
            )
            .route(
                "/api/websites/{id}/stats",
                get(
                    |axum::extract::Path(id): axum::extract::Path<String>,
                     Query(q): Query<HashMap<String, String>>,
                     headers: HeaderMap| async move {
                        if headers.get("x-umami-api-key").and_then(|v| v.to_str().ok()) != Some("key-1") {
                            return (StatusCode::UNAUTHORIZED, Json(json!({})));
                        }
                        (
                            StatusCode::OK,
                            Json(json!({ "website": id, "startAt": q.get("startAt"), "pageviews": { "value": 7 } })),
                        )
                    },
                ),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    async fn service(enabled: bool, umami_url: Option<String>, api_key: &str) -> AnalyticsService {
        let pool = migrated_pool().await;
        let settings = Arc::new(SettingsService::new(
            SqlxSettingsRepository::boxed(pool),
            tagged_cache(),
            SecretBox::new("test-key"),
        ));
        settings
            .update(UpdateSettingsInput {
                umami_enabled: Some(enabled),
                umami_url,
                umami_website_id: Some("site-1".to_string()),
                umami_api_key: Some(api_key.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        AnalyticsService::new(settings)
    }

    #[tokio::test]
    async fn test_disabled_refuses_everything() {
        let service = service(false, Some("http://127.0.0.1:1".to_string()), "key-1").await;
        assert!(matches!(service.script().await, Err(AnalyticsError::Disabled)));
        let range = StatsRange { start_at: 0, end_at: 1 };
        assert!(matches!(service.stats(range).await, Err(AnalyticsError::Disabled)));
    }

    #[tokio::test]
    async fn test_script_and_beacon_are_forwarded() {
        let url = spawn_umami().await;
        let svc = service(true, Some(url), "key-1").await;

        let script = svc.script().await.unwrap();
        assert_eq!(script.status, 200);
        assert_eq!(script.body, b"umami()");
        assert_eq!(script.content_type.as_deref(), Some("application/javascript"));

        let reply = svc
            .send(
                br#"{"type":"event"}"#.to_vec(),
                BeaconOrigin {
                    user_agent: Some("Browser/1.0".to_string()),
                    client_ip: Some("203.0.113.9".to_string()),
                },
            )
            .await
            .unwrap();
        let echoed: Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(echoed["ua"], "Browser/1.0");
        assert_eq!(echoed["ip"], "203.0.113.9");
    }

    #[tokio::test]
    async fn test_stats_uses_api_key() {
        let url = spawn_umami().await;
        let svc = service(true, Some(url.clone()), "key-1").await;
        let stats = svc.stats(StatsRange { start_at: 1000, end_at: 2000 }).await.unwrap();
        assert_eq!(stats["website"], "site-1");
        assert_eq!(stats["startAt"], "1000");
        assert_eq!(stats["pageviews"]["value"], 7);

        let wrong_key = service(true, Some(url), "nope").await;
        assert!(matches!(
            wrong_key.stats(StatsRange { start_at: 0, end_at: 1 }).await,
            Err(AnalyticsError::Request(_))
        ));
    }
}
