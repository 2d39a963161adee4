//! Google Calendar reminder sink.
//!
//! Each reminder becomes a one-hour event at the due time with popup
//! alarms 30 and 10 minutes before, written in the user's timezone.
//! Authentication is a pre-issued OAuth bearer token; refreshing it is
//! left to whoever provisions it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};

use super::{ReminderSink, failed};
use crate::error::SinkError;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

const EVENT_LENGTH_MINUTES: i64 = 60;
const POPUP_MINUTES: [u32; 2] = [30, 10];
const MAX_EVENT_TITLE_CHARS: usize = 80;

#[derive(Debug, Clone)]
pub struct CalendarConfig {
    pub token: SecretString,
    pub calendar_id: String,
}

impl CalendarConfig {
    /// Read `GOOGLE_CALENDAR_TOKEN` (required) and `GOOGLE_CALENDAR_ID`
    /// (default `primary`).
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("GOOGLE_CALENDAR_TOKEN").ok().filter(|v| !v.is_empty())?;
        let calendar_id = std::env::var("GOOGLE_CALENDAR_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "primary".to_string());
        Some(Self {
            token: SecretString::from(token),
            calendar_id,
        })
    }
}

pub struct GoogleCalendarSink {
    config: CalendarConfig,
    timezone: Tz,
    client: reqwest::Client,
}

impl GoogleCalendarSink {
    pub fn new(config: CalendarConfig) -> Self {
        Self {
            config,
            timezone: Tz::UTC,
            client: reqwest::Client::new(),
        }
    }

    /// Zone the event times are written in.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// The calendar id is a single path segment; `#` and friends get
    /// percent-encoded.
    fn events_url(&self) -> Result<Url, SinkError> {
        let mut url = Url::parse(CALENDAR_API_BASE)
            .map_err(|e| failed("google_calendar", format!("bad API base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| failed("google_calendar", "API base cannot take a path"))?
            .push("calendars")
            .push(&self.config.calendar_id)
            .push("events");
        Ok(url)
    }
}

#[async_trait]
impl ReminderSink for GoogleCalendarSink {
    fn name(&self) -> &str {
        "google_calendar"
    }

    async fn set_reminder(
        &self,
        message_id: &str,
        due: DateTime<Utc>,
        note: &str,
    ) -> Result<(), SinkError> {
        let resp = self
            .client
            .post(self.events_url()?)
            .bearer_auth(self.config.token.expose_secret())
            .json(&event_body(message_id, due, note, self.timezone))
            .send()
            .await
            .map_err(|e| failed("google_calendar", e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(failed("google_calendar", "calendar token rejected (401)"));
        }
        if !status.is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(failed("google_calendar", format!("HTTP {status}: {err}")));
        }

        tracing::info!(message_id, due = %due, "Calendar reminder created");
        Ok(())
    }
}

/// Build the `events.insert` request body.
fn event_body(message_id: &str, due: DateTime<Utc>, note: &str, tz: Tz) -> serde_json::Value {
    let start = due.with_timezone(&tz);
    let end = start + Duration::minutes(EVENT_LENGTH_MINUTES);
    let overrides: Vec<_> = POPUP_MINUTES
        .iter()
        .map(|m| serde_json::json!({ "method": "popup", "minutes": m }))
        .collect();

    serde_json::json!({
        "summary": event_title(note),
        "description": format!("{note}\n\nMessage: {message_id}"),
        "start": { "dateTime": start.to_rfc3339(), "timeZone": tz.name() },
        "end": { "dateTime": end.to_rfc3339(), "timeZone": tz.name() },
        "reminders": { "useDefault": false, "overrides": overrides },
    })
}

/// First line of the note, shortened to fit a calendar title.
fn event_title(note: &str) -> String {
    let first = note.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("Email reminder");
    if first.chars().count() <= MAX_EVENT_TITLE_CHARS {
        return first.to_string();
    }
    let mut title: String = first.chars().take(MAX_EVENT_TITLE_CHARS - 1).collect();
    title.push('…');
    title
}
