//! Outgoing email
//!
//! SMTP settings are read from the settings service on every send, so
//! changes in the admin console apply without a restart. Bodies are plain
//! text rendered from tera templates.

use std::sync::Arc;

use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use tera::{Context as TeraContext, Tera};
use thiserror::Error;

use crate::models::{Comment, Post, Settings};
use crate::services::settings::{SettingsService, SettingsServiceError};

const TEST_TEMPLATE: &str = "test.txt";
const NEW_COMMENT_TEMPLATE: &str = "new_comment.txt";
const REPLY_TEMPLATE: &str = "reply.txt";

const TEMPLATES: &[(&str, &str)] = &[
    (
        TEST_TEMPLATE,
        "This is a test message from {{ site_name }}.\n\n\
         If you can read this, outgoing mail is configured correctly.\n",
    ),
    (
        NEW_COMMENT_TEMPLATE,
        "{{ author }} commented on \"{{ post_title }}\":\n\n\
         {{ content }}\n\n\
         Status: {{ status }}\n\
         Moderate: {{ admin_url }}\n",
    ),
    (
        REPLY_TEMPLATE,
        "Hello {{ recipient }},\n\n\
         {{ author }} replied to your comment on \"{{ post_title }}\":\n\n\
         {{ content }}\n\n\
         Read the conversation: {{ post_url }}\n",
    ),
];

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("SMTP is not configured")]
    NotConfigured,

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Failed to render email: {0}")]
    Template(#[from] tera::Error),

    #[error("Failed to send email: {0}")]
    Transport(String),

    #[error("Failed to load settings: {0}")]
    Settings(#[from] SettingsServiceError),
}

/// A rendered message ready to hand to SMTP
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub struct EmailService {
    settings: Arc<SettingsService>,
    templates: Tera,
    app_url: String,
}

impl EmailService {
    pub fn new(settings: Arc<SettingsService>, app_url: &str) -> Result<Self, EmailError> {
        let mut templates = Tera::default();
        templates.add_raw_templates(TEMPLATES.iter().copied())?;
        Ok(Self {
            settings,
            templates,
            app_url: app_url.trim_end_matches('/').to_string(),
        })
    }

    /// Send a test message, for checking SMTP settings from the admin console
    pub async fn send_test(&self, to: &str) -> Result<(), EmailError> {
        let settings = self.settings.get().await?;
        let mut ctx = TeraContext::new();
        ctx.insert("site_name", &settings.site_name);

        let email = OutgoingEmail {
            to: to.to_string(),
            subject: format!("[{}] Test email", settings.site_name),
            body: self.templates.render(TEST_TEMPLATE, &ctx)?,
        };
        self.send(&settings, email).await
    }

    /// Message to the site admin about a new comment
    pub fn render_new_comment(
        &self,
        settings: &Settings,
        to: &str,
        post: &Post,
        comment: &Comment,
        author: &str,
    ) -> Result<OutgoingEmail, EmailError> {
        let mut ctx = TeraContext::new();
        ctx.insert("author", author);
        ctx.insert("post_title", &post.title);
        ctx.insert("content", &comment.content);
        ctx.insert("status", comment.status.as_str());
        ctx.insert("admin_url", &format!("{}/admin/comments", self.app_url));

        Ok(OutgoingEmail {
            to: to.to_string(),
            subject: format!("[{}] New comment on {}", settings.site_name, post.title),
            body: self.templates.render(NEW_COMMENT_TEMPLATE, &ctx)?,
        })
    }

    /// Message to a comment's author about an approved reply
    pub fn render_reply(
        &self,
        settings: &Settings,
        to: &str,
        recipient: &str,
        post: &Post,
        reply: &Comment,
        author: &str,
    ) -> Result<OutgoingEmail, EmailError> {
        let mut ctx = TeraContext::new();
        ctx.insert("recipient", recipient);
        ctx.insert("author", author);
        ctx.insert("post_title", &post.title);
        ctx.insert("content", &reply.content);
        ctx.insert("post_url", &format!("{}/posts/{}", self.app_url, post.slug));

        Ok(OutgoingEmail {
            to: to.to_string(),
            subject: format!("[{}] New reply to your comment", settings.site_name),
            body: self.templates.render(REPLY_TEMPLATE, &ctx)?,
        })
    }

    /// Deliver a message over the configured SMTP server
    pub async fn send(&self, settings: &Settings, email: OutgoingEmail) -> Result<(), EmailError> {
        let (Some(host), Some(from)) = (
            settings.smtp_host.as_deref().filter(|h| !h.is_empty()),
            settings.smtp_from.as_deref().filter(|f| !f.is_empty()),
        ) else {
            return Err(EmailError::NotConfigured);
        };

        let message = Message::builder()
            .from(
                format!("{} <{}>", settings.site_name, from)
                    .parse()
                    .map_err(|_| EmailError::InvalidAddress(from.to_string()))?,
            )
            .to(email
                .to
                .parse()
                .map_err(|_| EmailError::InvalidAddress(email.to.clone()))?)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .map_err(|e| EmailError::Transport(format!("Failed to build message: {}", e)))?;

        let port = u16::try_from(settings.smtp_port).unwrap_or(587);
        let builder = if !settings.smtp_secure {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        } else if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| EmailError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| EmailError::Transport(e.to_string()))?
        };
        let mut builder = builder.port(port);
        if let Some(username) = settings.smtp_username.as_deref().filter(|u| !u.is_empty()) {
            let password = settings.smtp_password.clone().unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.to_string(), password));
        }

        builder
            .build()
            .send(message)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        tracing::info!(to = %email.to, "Email sent");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod smtp_sink {
    //! Local SMTP server that accepts every message and records recipients

    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    /// Recipients of completed messages, in arrival order
    pub type Delivered = Arc<Mutex<Vec<String>>>;

    pub async fn spawn() -> (u16, Delivered) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let delivered = Delivered::default();
        let sink = delivered.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(session(stream, sink.clone()));
            }
        });
        (port, delivered)
    }

    async fn session(stream: TcpStream, delivered: Delivered) {
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        if write.write_all(b"220 sink ESMTP\r\n").await.is_err() {
            return;
        }

        let mut recipients = Vec::new();
        let mut in_data = false;
        while let Ok(Some(line)) = lines.next_line().await {
            let reply: &[u8] = if in_data {
                if line != "." {
                    continue;
                }
                in_data = false;
                delivered.lock().unwrap().append(&mut recipients);
                b"250 queued\r\n"
            } else {
                let command = line.to_ascii_uppercase();
                if let Some(rest) = command.strip_prefix("RCPT TO:") {
                    let start = line.len() - rest.len();
                    let address = line[start..].trim().trim_start_matches('<');
                    recipients.push(address.split('>').next().unwrap_or(address).to_string());
                    b"250 OK\r\n"
                } else if command.starts_with("DATA") {
                    in_data = true;
                    b"354 End data with <CR><LF>.<CR><LF>\r\n"
                } else if command.starts_with("QUIT") {
                    let _ = write.write_all(b"221 Bye\r\n").await;
                    return;
                } else if command.starts_with("EHLO") || command.starts_with("HELO") {
                    b"250 sink\r\n"
                } else {
                    b"250 OK\r\n"
                }
            };
            if write.write_all(reply).await.is_err() {
                return;
            }
        }
    }
}
