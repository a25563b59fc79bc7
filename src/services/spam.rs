//! Spam scoring
//!
//! Comments are scored by an OpenAI-compatible chat completions endpoint.
//! The model is asked for a single probability; the first number in `[0, 1]`
//! found in its reply is taken as the score. Scores are bucketed against the
//! low and high thresholds from settings.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::CommentStatus;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const SYSTEM_PROMPT: &str = "You are a spam filter for blog comments. \
Rate how likely the comment is spam, advertising, phishing or abusive content. \
Reply with a single number between 0 and 1, where 0 means certainly legitimate \
and 1 means certainly spam. Do not explain.";

static SCORE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:0(?:\.\d+)?|1(?:\.0+)?)").expect("hardcoded score regex is invalid")
});

#[derive(Debug, Error)]
pub enum SpamError {
    #[error("Spam API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Spam API returned status {0}")]
    Status(u16),

    #[error("Spam API reply has no score: {0:?}")]
    NoScore(String),
}

/// Endpoint and credentials, taken from settings
#[derive(Debug, Clone)]
pub struct SpamApiConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

/// What the model gets to see of a comment
#[derive(Debug, Clone)]
pub struct SpamContext<'a> {
    pub author_name: &'a str,
    pub author_email: Option<&'a str>,
    pub content: &'a str,
    pub post_title: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    #[serde(default)]
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Clone)]
pub struct SpamDetector {
    http: reqwest::Client,
}

impl Default for SpamDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SpamDetector {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// Probability in `[0, 1]` that the comment is spam
    pub async fn score(&self, config: &SpamApiConfig, ctx: &SpamContext<'_>) -> Result<f64, SpamError> {
        let url = format!("{}/chat/completions", config.api_base.trim_end_matches('/'));
        let request = ChatCompletionRequest {
            model: &config.model,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: describe(ctx),
                },
            ],
            temperature: 0.0,
            max_tokens: 8,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&config.api_key)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SpamError::Status(response.status().as_u16()));
        }

        let completion: ChatCompletionResponse = response.json().await?;
        let reply = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let score = parse_score(&reply).ok_or(SpamError::NoScore(reply))?;
        tracing::debug!(score, "Comment scored");
        Ok(score)
    }
}

fn describe(ctx: &SpamContext<'_>) -> String {
    format!(
        "Post: {}\nAuthor: {}\nEmail: {}\nComment:\n{}",
        ctx.post_title,
        ctx.author_name,
        ctx.author_email.unwrap_or("(none)"),
        ctx.content
    )
}

/// First number in `[0, 1]` in `text`, clamped
pub fn parse_score(text: &str) -> Option<f64> {
    SCORE_PATTERN
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|score| score.clamp(0.0, 1.0))
}

/// Moderation status for a score: below `low` is approved, above `high`
/// is spam, anything in between waits for review.
pub fn bucket(score: f64, low: f64, high: f64) -> CommentStatus {
    if score < low {
        CommentStatus::Approved
    } else if score > high {
        CommentStatus::Spam
    } else {
        CommentStatus::Pending
    }
}
