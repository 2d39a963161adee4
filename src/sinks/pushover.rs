//! Pushover notification sink.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{NotificationSink, Priority, failed};
use crate::error::SinkError;

const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

/// Pushover caps titles at 250 and messages at 1024 characters.
const MAX_TITLE_CHARS: usize = 250;
const MAX_MESSAGE_CHARS: usize = 1024;

#[derive(Debug, Clone)]
pub struct PushoverConfig {
    pub api_token: SecretString,
    pub user_key: SecretString,
}

impl PushoverConfig {
    /// Read `PUSHOVER_API_TOKEN` / `PUSHOVER_USER_KEY`; `None` when either is unset.
    pub fn from_env() -> Option<Self> {
        let api_token = std::env::var("PUSHOVER_API_TOKEN").ok().filter(|v| !v.is_empty())?;
        let user_key = std::env::var("PUSHOVER_USER_KEY").ok().filter(|v| !v.is_empty())?;
        Some(Self {
            api_token: SecretString::from(api_token),
            user_key: SecretString::from(user_key),
        })
    }
}

pub struct PushoverNotifier {
    config: PushoverConfig,
    client: reqwest::Client,
}

impl PushoverNotifier {
    pub fn new(config: PushoverConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn payload(&self, title: &str, body: &str, priority: Priority) -> serde_json::Value {
        serde_json::json!({
            "token": self.config.api_token.expose_secret(),
            "user": self.config.user_key.expose_secret(),
            "title": truncate(title, MAX_TITLE_CHARS),
            "message": truncate(non_empty(body, title), MAX_MESSAGE_CHARS),
            "priority": pushover_priority(priority),
        })
    }
}

#[async_trait]
impl NotificationSink for PushoverNotifier {
    fn name(&self) -> &str {
        "pushover"
    }

    async fn notify(&self, title: &str, body: &str, priority: Priority) -> Result<(), SinkError> {
        let resp = self
            .client
            .post(PUSHOVER_API_URL)
            .json(&self.payload(title, body, priority))
            .send()
            .await
            .map_err(|e| failed("pushover", e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(failed("pushover", format!("HTTP {status}: {err}")));
        }

        tracing::info!(priority = priority.label(), "Pushover notification sent");
        Ok(())
    }
}

fn pushover_priority(priority: Priority) -> i8 {
    match priority {
        Priority::Low => -1,
        Priority::Normal => 0,
        Priority::High => 1,
    }
}

/// Pushover rejects an empty message.
fn non_empty<'a>(body: &'a str, fallback: &'a str) -> &'a str {
    if body.trim().is_empty() { fallback } else { body }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}
