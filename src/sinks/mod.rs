//! Side-effect sinks driven by action dispatch.
//!
//! Remote sinks (Google Calendar, Pushover) are preferred; when their
//! credentials are absent the binary falls back to a local reminder
//! store and an SMTP notifier.

pub mod calendar;
pub mod email;
pub mod local;
pub mod pushover;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SinkError;

pub use calendar::{CalendarConfig, GoogleCalendarSink};
pub use email::{SmtpConfig, SmtpNotifier};
pub use local::LocalReminderStore;
pub use pushover::{PushoverConfig, PushoverNotifier};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// Schedules a reminder for a message.
#[async_trait]
pub trait ReminderSink: Send + Sync {
    fn name(&self) -> &str;

    async fn set_reminder(
        &self,
        message_id: &str,
        due: DateTime<Utc>,
        note: &str,
    ) -> Result<(), SinkError>;
}

/// Pushes a notification to the user.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, title: &str, body: &str, priority: Priority) -> Result<(), SinkError>;
}

/// Shorthand for a `SinkError::Failed`.
pub(crate) fn failed(sink: &str, reason: impl Into<String>) -> SinkError {
    SinkError::Failed {
        sink: sink.to_string(),
        reason: reason.into(),
    }
}
