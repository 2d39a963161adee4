//! SMTP notification sink, used when Pushover is not configured.
//!
//! Sends the notification as a plain-text email to the user's own
//! address via lettre.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use super::{NotificationSink, Priority, failed};
use crate::error::SinkError;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub to_address: String,
}

impl SmtpConfig {
    /// Build from environment variables. Shares credentials with the
    /// IMAP source; returns `None` when no SMTP host can be derived or
    /// no recipient is known.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("EMAIL_SMTP_HOST").ok().or_else(|| {
            std::env::var("EMAIL_IMAP_HOST")
                .ok()
                .map(|h| h.replace("imap", "smtp"))
        })?;

        let port: u16 = std::env::var("EMAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let from_address =
            std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        let to_address = std::env::var("EMAIL_NOTIFY_ADDRESS")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| from_address.clone());
        if to_address.is_empty() {
            return None;
        }

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
            to_address,
        })
    }
}

pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, title: &str, body: &str, priority: Priority) -> Result<Message, SinkError> {
        Message::builder()
            .from(self.config.from_address.parse().map_err(|e| SinkError::InvalidInput {
                sink: "smtp".into(),
                reason: format!("Invalid from address: {e}"),
            })?)
            .to(self.config.to_address.parse().map_err(|e| SinkError::InvalidInput {
                sink: "smtp".into(),
                reason: format!("Invalid to address: {e}"),
            })?)
            .subject(subject_line(title, priority))
            .body(body.to_string())
            .map_err(|e| failed("smtp", format!("Failed to build email: {e}")))
    }
}

#[async_trait]
impl NotificationSink for SmtpNotifier {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn notify(&self, title: &str, body: &str, priority: Priority) -> Result<(), SinkError> {
        let email = self.build_message(title, body, priority)?;
        let config = self.config.clone();

        // lettre's SmtpTransport is blocking.
        tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            );
            let transport = SmtpTransport::relay(&config.host)
                .map_err(|e| failed("smtp", format!("SMTP relay error: {e}")))?
                .port(config.port)
                .credentials(creds)
                .build();
            transport
                .send(&email)
                .map_err(|e| failed("smtp", format!("SMTP send failed: {e}")))?;
            Ok::<_, SinkError>(())
        })
        .await
        .map_err(|e| failed("smtp", format!("send task failed: {e}")))??;

        tracing::info!(to = %self.config.to_address, "Notification email sent");
        Ok(())
    }
}

fn subject_line(title: &str, priority: Priority) -> String {
    match priority {
        Priority::High => format!("[URGENT] {title}"),
        _ => title.to_string(),
    }
}
