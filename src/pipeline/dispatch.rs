//! Action dispatch: reminders and notifications for actionable findings.
//!
//! The dispatcher keeps a per-run ledger keyed by message id. A message
//! id is dispatched at most once; asking again returns the record of the
//! first dispatch without touching the sinks.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono_tz::Tz;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::SinkError;
use crate::pipeline::controller::panic_message;
use crate::pipeline::types::{ActionRecord, Finding, Urgency};
use crate::sinks::{NotificationSink, Priority, ReminderSink};

pub struct ActionDispatcher {
    reminders: Arc<dyn ReminderSink>,
    notifier: Arc<dyn NotificationSink>,
    timezone: Tz,
    ledger: Mutex<HashMap<String, ActionRecord>>,
}

impl ActionDispatcher {
    pub fn new(reminders: Arc<dyn ReminderSink>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            reminders,
            notifier,
            timezone: Tz::UTC,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Zone the "Due" line of notifications is written in.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Dispatch every finding that is urgent or carries a deadline.
    ///
    /// Returns one record per distinct selected message id, in finding
    /// order. Sink failures are recorded on the record.
    pub async fn dispatch(&self, findings: &[Finding]) -> Vec<ActionRecord> {
        let mut ledger = self.ledger.lock().await;
        let mut records: Vec<ActionRecord> = Vec::new();

        for finding in findings.iter().filter(|f| f.needs_dispatch()) {
            if records.iter().any(|r| r.message_id == finding.message_id) {
                debug!(message_id = %finding.message_id, "Duplicate finding in batch, skipped");
                continue;
            }
            if let Some(existing) = ledger.get(&finding.message_id) {
                debug!(message_id = %finding.message_id, "Already dispatched this run");
                records.push(existing.clone());
                continue;
            }

            let record = self.dispatch_one(finding).await;
            ledger.insert(finding.message_id.clone(), record.clone());
            records.push(record);
        }

        info!(
            dispatched = records.len(),
            reminders = records.iter().filter(|r| r.reminder_set).count(),
            notifications = records.iter().filter(|r| r.notification_sent).count(),
            errors = records.iter().filter(|r| r.error.is_some()).count(),
            "Action dispatch complete"
        );
        records
    }

    /// Every record dispatched so far this run.
    pub async fn ledger(&self) -> Vec<ActionRecord> {
        self.ledger.lock().await.values().cloned().collect()
    }

    async fn dispatch_one(&self, finding: &Finding) -> ActionRecord {
        let mut record = ActionRecord::new(&finding.message_id);

        if let Some(due) = finding.deadline {
            let note = reminder_note(finding);
            let call = self.reminders.set_reminder(&finding.message_id, due, &note);
            match call_sink(call).await {
                Ok(()) => record.reminder_set = true,
                Err(e) => {
                    warn!(
                        message_id = %finding.message_id,
                        sink = self.reminders.name(),
                        error = %e,
                        "Reminder failed"
                    );
                    record.push_error(format!("reminder: {e}"));
                }
            }
        }

        if finding.urgency == Urgency::High {
            let title = notification_title(finding);
            let body = notification_body(finding, self.timezone);
            let call = self.notifier.notify(&title, &body, Priority::High);
            match call_sink(call).await {
                Ok(()) => record.notification_sent = true,
                Err(e) => {
                    warn!(
                        message_id = %finding.message_id,
                        sink = self.notifier.name(),
                        error = %e,
                        "Notification failed"
                    );
                    record.push_error(format!("notification: {e}"));
                }
            }
        }

        record
    }
}

/// Await one sink call. A panic inside the sink becomes an error so the
/// other side of the record and the rest of the batch still go through.
async fn call_sink(call: impl Future<Output = Result<(), SinkError>>) -> Result<(), String> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(payload) => Err(format!("sink panicked: {}", panic_message(payload.as_ref()))),
    }
}

/// Summary (or subject) followed by any links.
fn reminder_note(finding: &Finding) -> String {
    let mut note = if finding.summary.is_empty() {
        finding.subject.clone()
    } else {
        finding.summary.clone()
    };
    if !finding.links.is_empty() {
        note.push_str("\n\nLinks:\n");
        note.push_str(&finding.links.join("\n"));
    }
    note
}

/// Subject, else summary, else a generic title.
fn notification_title(finding: &Finding) -> String {
    [finding.subject.trim(), finding.summary.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or("Email needs attention")
        .to_string()
}

fn notification_body(finding: &Finding, tz: Tz) -> String {
    let mut body = finding
        .action_items
        .iter()
        .map(|item| format!("• {item}"))
        .collect::<Vec<_>>()
        .join("\n");
    if body.is_empty() {
        body = finding.summary.clone();
    }
    if let Some(due) = finding.deadline {
        let local = due.with_timezone(&tz);
        body.push_str(&format!("\n\nDue: {}", local.format("%a %Y-%m-%d %H:%M %Z")));
    }
    if !finding.links.is_empty() {
        body.push_str("\n\n");
        body.push_str(&finding.links.join("\n"));
    }
    body
}
