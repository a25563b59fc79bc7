//! Login sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-side login session. The token is the primary key and is what the
/// client sends back as a Bearer header or `session` cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// True once `expires_at` has passed
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}
