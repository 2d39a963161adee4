//! End-to-end runs of the triage pipeline over stub adapters.
//!
//! The mail source, oracle and sinks are in-memory stand-ins that record
//! every call, so each test can assert on exactly which side effects a
//! run produced.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use inbox_triage::error::{LlmError, OracleError, SinkError, SourceError};
use inbox_triage::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use inbox_triage::oracle::{ClassificationOracle, LlmOracle, Policy, Verdict};
use inbox_triage::pipeline::types::{
    Disposition, Extraction, ExtractionPolicy, FilterPolicy, Judgment, Message, ReadOutcome,
    RunState, Urgency,
};
use inbox_triage::pipeline::{PipelineController, PipelineSettings, RetryPolicy, RunReport};
use inbox_triage::sinks::{
    LocalReminderStore, NotificationSink, Priority, ReminderSink,
};
use inbox_triage::source::MailSource;

// ── Stub mail source ────────────────────────────────────────────────

#[derive(Default)]
struct StubMailbox {
    messages: Vec<Message>,
    bodies: HashMap<String, String>,
    unavailable: bool,
    fail_mark_read: HashSet<String>,
    marked: Mutex<Vec<String>>,
}

impl StubMailbox {
    fn new(entries: &[(&str, &str, &str)]) -> Self {
        Self {
            messages: entries
                .iter()
                .map(|(id, subject, _)| Message::new(*id, *subject, "sender@uni.edu", ""))
                .collect(),
            bodies: entries
                .iter()
                .map(|(id, _, body)| (id.to_string(), body.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn marked(&self) -> Vec<String> {
        self.marked.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSource for StubMailbox {
    fn name(&self) -> &str {
        "stub"
    }

    async fn list_unread(&self, limit: usize) -> Result<Vec<Message>, SourceError> {
        if self.unavailable {
            return Err(SourceError::Unavailable("connection refused".into()));
        }
        Ok(self.messages.iter().take(limit).cloned().collect())
    }

    async fn fetch_body(&self, message_id: &str) -> Result<String, SourceError> {
        self.bodies
            .get(message_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                id: message_id.to_string(),
            })
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), SourceError> {
        self.marked.lock().unwrap().push(message_id.to_string());
        if self.fail_mark_read.contains(message_id) {
            return Err(SourceError::MarkRead {
                id: message_id.to_string(),
                reason: "STORE failed".into(),
            });
        }
        Ok(())
    }
}

// ── Stub oracle ─────────────────────────────────────────────────────

fn friday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 16, 9, 0, 0).unwrap()
}

fn monday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 19, 9, 0, 0).unwrap()
}

/// Rejects promotions, extracts deadlines from "Friday"/"Monday",
/// times out on subjects containing `timeout_on`, panics on extraction
/// when `panic_on_extract` is set.
#[derive(Default)]
struct StubOracle {
    timeout_on: Option<&'static str>,
    panic_on_extract: bool,
    calls: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl ClassificationOracle for StubOracle {
    async fn classify(&self, text: &str, policy: Policy<'_>) -> Result<Verdict, OracleError> {
        self.calls.lock().unwrap().push(policy.label());
        match policy {
            Policy::Filter(_) => {
                if let Some(needle) = self.timeout_on
                    && text.contains(needle)
                {
                    return Err(OracleError::Timeout(Duration::from_secs(30)));
                }
                let promo = text.contains("sale");
                Ok(Verdict::Judgment(Judgment {
                    important: !promo,
                    category: if promo { "promotion" } else { "academic" }.into(),
                    rationale: "stub".into(),
                }))
            }
            Policy::Extraction(_) => {
                if self.panic_on_extract {
                    panic!("oracle crashed");
                }
                let deadline = if text.contains("Friday") {
                    Some(friday())
                } else if text.contains("Monday") {
                    Some(monday())
                } else {
                    None
                };
                Ok(Verdict::Extraction(Extraction {
                    summary: text.lines().last().unwrap_or_default().to_string(),
                    action_items: deadline.iter().map(|_| "Prepare".to_string()).collect(),
                    urgency: if deadline.is_some() { Urgency::High } else { Urgency::None },
                    deadline,
                    note: None,
                }))
            }
        }
    }
}

// ── Recording sinks ─────────────────────────────────────────────────

#[derive(Default)]
struct RecordingSinks {
    reminders: Mutex<Vec<(String, DateTime<Utc>)>>,
    notifications: Mutex<Vec<String>>,
    panic_on_notify: bool,
}

#[async_trait]
impl ReminderSink for RecordingSinks {
    fn name(&self) -> &str {
        "recording"
    }

    async fn set_reminder(
        &self,
        message_id: &str,
        due: DateTime<Utc>,
        _note: &str,
    ) -> Result<(), SinkError> {
        self.reminders
            .lock()
            .unwrap()
            .push((message_id.to_string(), due));
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for RecordingSinks {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, title: &str, _body: &str, _priority: Priority) -> Result<(), SinkError> {
        if self.panic_on_notify {
            panic!("notifier crashed");
        }
        self.notifications.lock().unwrap().push(title.to_string());
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

fn settings() -> PipelineSettings {
    PipelineSettings {
        fetch_limit: 10,
        concurrency: 3,
        retry: RetryPolicy::new(2, Duration::ZERO),
        timezone: chrono_tz::Tz::UTC,
    }
}

fn controller(
    source: &Arc<StubMailbox>,
    oracle: Arc<dyn ClassificationOracle>,
    sinks: &Arc<RecordingSinks>,
) -> PipelineController {
    PipelineController::new(
        source.clone(),
        oracle,
        sinks.clone(),
        sinks.clone(),
        FilterPolicy::new("Exclude promotional content."),
        ExtractionPolicy::default(),
        settings(),
    )
    .unwrap()
}

fn abc_inbox() -> StubMailbox {
    StubMailbox::new(&[
        ("A", "Quiz Friday", "Quiz on chapter 3 this Friday."),
        ("B", "50% off sale", "Everything must go."),
        ("C", "Assignment due Monday", "Submit the essay by Monday."),
    ])
}

fn assert_each_message_once(report: &RunReport, source: &StubMailbox) {
    let ids: Vec<_> = report.entries.iter().map(|e| e.message_id.clone()).collect();
    let expected: Vec<_> = source.messages.iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids, expected, "every fetched message reported once, in order");
    assert_eq!(source.marked(), expected, "every fetched message marked read once");
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn quiz_sale_assignment_scenario() {
    let source = Arc::new(abc_inbox());
    let sinks = Arc::new(RecordingSinks::default());
    let report = controller(&source, Arc::new(StubOracle::default()), &sinks)
        .run()
        .await;

    assert_eq!(report.final_state(), RunState::Done);
    assert_eq!(
        report.states,
        vec![
            RunState::Fetching,
            RunState::Triaging,
            RunState::Analyzing,
            RunState::Dispatching,
            RunState::Finalizing,
            RunState::Done,
        ]
    );
    assert_each_message_once(&report, &source);

    assert_eq!(report.entry("B").unwrap().disposition, Disposition::Rejected);
    assert_eq!(report.entry("B").unwrap().category.as_deref(), Some("promotion"));

    let finding_ids: Vec<_> = report.findings().map(|f| f.message_id.as_str()).collect();
    assert_eq!(finding_ids, vec!["A", "C"]);
    let a = report.entry("A").unwrap().finding.as_ref().unwrap();
    assert_eq!(a.deadline, Some(friday()));
    assert_eq!(a.urgency, Urgency::High);
    let c = report.entry("C").unwrap().finding.as_ref().unwrap();
    assert_eq!(c.deadline, Some(monday()));

    let records: Vec<_> = report.action_records().collect();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.reminder_set && r.notification_sent));
    assert_eq!(report.count(Disposition::Actioned), 2);

    assert_eq!(
        *sinks.reminders.lock().unwrap(),
        vec![("A".to_string(), friday()), ("C".to_string(), monday())]
    );
    assert_eq!(
        *sinks.notifications.lock().unwrap(),
        vec!["Quiz Friday".to_string(), "Assignment due Monday".to_string()]
    );
}

#[tokio::test]
async fn subject_timeout_fails_open() {
    let source = Arc::new(abc_inbox());
    let sinks = Arc::new(RecordingSinks::default());
    let oracle = Arc::new(StubOracle {
        timeout_on: Some("50% off"),
        ..Default::default()
    });
    let report = controller(&source, oracle.clone(), &sinks).run().await;

    let b = report.entry("B").unwrap();
    assert_ne!(b.disposition, Disposition::Rejected);
    assert!(b.category.is_none());
    assert!(b.triage_error.as_deref().unwrap().contains("timed out"));
    assert!(b.finding.is_some(), "B went through body analysis");
    assert!(b.read.is_marked());
    assert_eq!(b.disposition, Disposition::Errored);

    // Two attempts at B's subject, one judgment each for A and C.
    let calls = oracle.calls.lock().unwrap();
    assert_eq!(calls.iter().filter(|c| **c == "judgment").count(), 4);
    assert_eq!(calls.iter().filter(|c| **c == "extraction").count(), 3);
    assert_each_message_once(&report, &source);
}

#[tokio::test]
async fn body_fetch_failure_still_finalizes() {
    let mut mailbox = abc_inbox();
    mailbox.bodies.remove("C");
    let source = Arc::new(mailbox);
    let sinks = Arc::new(RecordingSinks::default());
    let report = controller(&source, Arc::new(StubOracle::default()), &sinks)
        .run()
        .await;

    let c = report.entry("C").unwrap();
    let finding = c.finding.as_ref().unwrap();
    assert!(finding.action_items.is_empty());
    assert_eq!(finding.urgency, Urgency::None);
    assert!(finding.error.as_deref().unwrap().contains("not found"));
    assert!(c.action.is_none());
    assert_eq!(c.disposition, Disposition::Errored);
    assert!(c.read.is_marked());

    assert_eq!(report.action_records().count(), 1);
    assert_each_message_once(&report, &source);
}

#[tokio::test]
async fn mark_read_failure_is_recorded_and_others_continue() {
    let mut mailbox = abc_inbox();
    mailbox.fail_mark_read.insert("A".to_string());
    let source = Arc::new(mailbox);
    let sinks = Arc::new(RecordingSinks::default());
    let report = controller(&source, Arc::new(StubOracle::default()), &sinks)
        .run()
        .await;

    assert!(matches!(
        &report.entry("A").unwrap().read,
        ReadOutcome::Failed(reason) if reason.contains("STORE failed")
    ));
    assert!(report.entry("B").unwrap().read.is_marked());
    assert!(report.entry("C").unwrap().read.is_marked());
    assert_eq!(report.read_failures(), 1);
    assert_eq!(report.final_state(), RunState::Done);
    assert_each_message_once(&report, &source);
}

#[tokio::test]
async fn unavailable_source_stops_at_fetching() {
    let source = Arc::new(StubMailbox {
        unavailable: true,
        ..abc_inbox()
    });
    let sinks = Arc::new(RecordingSinks::default());
    let oracle = Arc::new(StubOracle::default());
    let report = controller(&source, oracle.clone(), &sinks).run().await;

    assert_eq!(report.states, vec![RunState::Fetching]);
    assert!(report.entries.is_empty());
    assert!(report.fetch_error.as_deref().unwrap().contains("connection refused"));
    assert!(source.marked().is_empty());
    assert!(oracle.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn no_candidates_skips_to_finalizing() {
    let source = Arc::new(StubMailbox::new(&[
        ("X", "Flash sale", "Buy now."),
        ("Y", "Weekend sale", "Buy more."),
    ]));
    let sinks = Arc::new(RecordingSinks::default());
    let oracle = Arc::new(StubOracle::default());
    let report = controller(&source, oracle.clone(), &sinks).run().await;

    assert_eq!(
        report.states,
        vec![
            RunState::Fetching,
            RunState::Triaging,
            RunState::Finalizing,
            RunState::Done,
        ]
    );
    assert_eq!(report.count(Disposition::Rejected), 2);
    assert!(!oracle.calls.lock().unwrap().contains(&"extraction"));
    assert!(sinks.reminders.lock().unwrap().is_empty());
    assert_each_message_once(&report, &source);
}

#[tokio::test]
async fn empty_inbox_completes() {
    let source = Arc::new(StubMailbox::default());
    let sinks = Arc::new(RecordingSinks::default());
    let report = controller(&source, Arc::new(StubOracle::default()), &sinks)
        .run()
        .await;
    assert_eq!(report.final_state(), RunState::Done);
    assert!(report.entries.is_empty());
}

#[tokio::test]
async fn analysis_panic_still_marks_everything_read() {
    let source = Arc::new(abc_inbox());
    let sinks = Arc::new(RecordingSinks::default());
    let oracle = Arc::new(StubOracle {
        panic_on_extract: true,
        ..Default::default()
    });
    let report = controller(&source, oracle, &sinks).run().await;

    assert_eq!(report.final_state(), RunState::Done);
    assert!(report.notes.iter().any(|n| n.contains("analysis stage panicked")));
    assert_eq!(report.findings().count(), 2);
    assert!(report.findings().all(|f| f.error.is_some() && !f.needs_dispatch()));
    assert!(sinks.reminders.lock().unwrap().is_empty());
    assert_each_message_once(&report, &source);
}

#[tokio::test]
async fn notifier_panic_keeps_one_record_per_dispatchable_finding() {
    let source = Arc::new(abc_inbox());
    let sinks = Arc::new(RecordingSinks {
        panic_on_notify: true,
        ..Default::default()
    });
    let report = controller(&source, Arc::new(StubOracle::default()), &sinks)
        .run()
        .await;

    assert_eq!(report.final_state(), RunState::Done);
    for id in ["A", "C"] {
        let entry = report.entry(id).unwrap();
        assert!(entry.finding.as_ref().unwrap().needs_dispatch());
        let action = entry.action.as_ref().expect("record for dispatchable finding");
        assert!(action.reminder_set, "{id}: reminder was set before the panic");
        assert!(!action.notification_sent);
        assert!(action.error.as_deref().unwrap().contains("notifier crashed"));
        assert_eq!(entry.disposition, Disposition::Errored);
    }
    assert_eq!(report.action_records().count(), 2);
    assert_eq!(
        *sinks.reminders.lock().unwrap(),
        vec![("A".to_string(), friday()), ("C".to_string(), monday())]
    );
    assert_each_message_once(&report, &source);
}

#[tokio::test]
async fn fetch_limit_bounds_the_run() {
    let source = Arc::new(abc_inbox());
    let sinks = Arc::new(RecordingSinks::default());
    let controller = PipelineController::new(
        source.clone(),
        Arc::new(StubOracle::default()),
        sinks.clone(),
        sinks.clone(),
        FilterPolicy::default(),
        ExtractionPolicy::default(),
        PipelineSettings {
            fetch_limit: 2,
            ..settings()
        },
    )
    .unwrap();
    let report = controller.run().await;
    assert_eq!(report.entries.len(), 2);
    assert_eq!(source.marked(), vec!["A", "B"]);
}

// ── Full stack: LLM oracle over a scripted provider ────────────────

/// Answers judgment prompts by subject keyword and extraction prompts
/// with a fixed Friday deadline.
struct ScriptedLlm;

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let system = request.system_prompt();
        let user = request.user_prompt();
        let content = if system.contains("triage engine") {
            let promo = user.contains("sale");
            format!(
                r#"{{"important": {}, "category": "{}", "rationale": "scripted"}}"#,
                !promo,
                if promo { "promotion" } else { "academic" }
            )
        } else {
            "```json\n{\"summary\": \"Quiz on Friday\", \"action_items\": [\"Revise\"], \"urgency\": \"high\", \"deadline\": \"2026-01-16\"}\n```".to_string()
        };
        Ok(CompletionResponse {
            content,
            input_tokens: 50,
            output_tokens: 10,
            finish_reason: FinishReason::Stop,
        })
    }
}

#[tokio::test]
async fn llm_oracle_with_local_reminders() {
    let source = Arc::new(StubMailbox::new(&[
        ("A", "Quiz Friday", "Quiz on Friday. Details: https://uni.edu/quiz"),
        ("B", "50% off sale", "Everything must go."),
    ]));
    let oracle = Arc::new(LlmOracle::new(Arc::new(ScriptedLlm)));
    let reminders = Arc::new(LocalReminderStore::new_memory().await.unwrap());
    let notifier = Arc::new(RecordingSinks::default());

    let controller = PipelineController::new(
        source.clone(),
        oracle.clone(),
        reminders.clone(),
        notifier.clone(),
        FilterPolicy::default(),
        ExtractionPolicy::default(),
        settings(),
    )
    .unwrap();
    let report = controller.run().await;

    let a = report.entry("A").unwrap();
    assert_eq!(a.disposition, Disposition::Actioned);
    let finding = a.finding.as_ref().unwrap();
    assert_eq!(finding.deadline, Some(friday()));
    assert_eq!(finding.links, vec!["https://uni.edu/quiz"]);

    let stored = reminders.upcoming(friday() - chrono::Duration::days(7)).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].message_id, "A");
    assert!(stored[0].note.contains("https://uni.edu/quiz"));
    assert_eq!(*notifier.notifications.lock().unwrap(), vec!["Quiz Friday".to_string()]);

    // Two judgments and one extraction.
    assert_eq!(oracle.usage().input_tokens, 150);
    assert_each_message_once(&report, &source);
}
