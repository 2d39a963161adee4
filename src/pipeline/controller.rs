//! Pipeline controller: Fetching → Triaging → Analyzing → Dispatching →
//! Finalizing → Done.
//!
//! Stages run strictly in sequence. Once fetching succeeds, finalization
//! always runs: a panic inside triage, analysis or dispatch is caught,
//! noted on the report, and replaced by the stage's failure fallback.

use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use futures::FutureExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::oracle::ClassificationOracle;
use crate::pipeline::analysis::BodyAnalysis;
use crate::pipeline::dispatch::ActionDispatcher;
use crate::pipeline::finalize::{Finalizer, StageResults};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::triage::{SubjectTriage, TriageOutcome};
use crate::pipeline::types::{
    ActionRecord, Disposition, ExtractionPolicy, FilterPolicy, Finding, Message, RunReport,
    RunState,
};
use crate::sinks::{NotificationSink, ReminderSink};
use crate::source::MailSource;

/// Run-level knobs, fixed before a run starts.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub fetch_limit: usize,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Zone deadlines are shown in.
    pub timezone: Tz,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch_limit: 10,
            concurrency: 4,
            retry: RetryPolicy::default(),
            timezone: Tz::UTC,
        }
    }
}

pub struct PipelineController {
    source: Arc<dyn MailSource>,
    reminders: Arc<dyn ReminderSink>,
    notifier: Arc<dyn NotificationSink>,
    triage: SubjectTriage,
    analysis: BodyAnalysis,
    finalizer: Finalizer,
    settings: PipelineSettings,
}

impl PipelineController {
    /// Fails only if a filter keyword cannot be compiled.
    pub fn new(
        source: Arc<dyn MailSource>,
        oracle: Arc<dyn ClassificationOracle>,
        reminders: Arc<dyn ReminderSink>,
        notifier: Arc<dyn NotificationSink>,
        filter_policy: FilterPolicy,
        extraction_policy: ExtractionPolicy,
        settings: PipelineSettings,
    ) -> Result<Self, regex::Error> {
        let triage = SubjectTriage::new(Arc::clone(&oracle), filter_policy)?
            .with_retry(settings.retry)
            .with_concurrency(settings.concurrency);
        let analysis = BodyAnalysis::new(Arc::clone(&source), oracle, extraction_policy)
            .with_retry(settings.retry)
            .with_concurrency(settings.concurrency);
        let finalizer = Finalizer::new(Arc::clone(&source));

        Ok(Self {
            source,
            reminders,
            notifier,
            triage,
            analysis,
            finalizer,
            settings,
        })
    }

    /// Execute one run. Never fails: a run that cannot list messages
    /// returns a report stuck at `Fetching` with the fetch error.
    pub async fn run(&self) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut states = vec![RunState::Fetching];
        let mut notes = Vec::new();
        info!(%run_id, source = self.source.name(), "Triage run started");

        let source = &self.source;
        let limit = self.settings.fetch_limit;
        let messages = match self
            .settings
            .retry
            .run("list_unread", || async move { source.list_unread(limit).await })
            .await
        {
            Ok(messages) => dedupe_by_id(messages),
            Err(e) => {
                error!(%run_id, error = %e, "Fetching failed, run aborted");
                return RunReport::fetch_failed(run_id, started_at, e.to_string());
            }
        };
        info!(%run_id, fetched = messages.len(), "Fetched unread messages");

        states.push(RunState::Triaging);
        let triage = guard(self.triage.run(&messages), "triage", &mut notes)
            .await
            .unwrap_or_else(|| TriageOutcome::fail_open(&messages, "triage aborted"));

        let mut findings: Vec<Finding> = Vec::new();
        let mut actions: Vec<ActionRecord> = Vec::new();

        if !triage.has_candidates() {
            info!(%run_id, "No candidates, skipping analysis and dispatch");
        } else {
            let mut candidates: Vec<Message> = triage.candidates().cloned().collect();
            states.push(RunState::Analyzing);
            findings = guard(self.analysis.run(&mut candidates), "analysis", &mut notes)
                .await
                .unwrap_or_else(|| {
                    candidates
                        .iter()
                        .map(|m| Finding::failed(m, "analysis aborted"))
                        .collect()
                });

            states.push(RunState::Dispatching);
            let dispatcher =
                ActionDispatcher::new(Arc::clone(&self.reminders), Arc::clone(&self.notifier))
                    .with_timezone(self.settings.timezone);
            actions = match guard(dispatcher.dispatch(&findings), "dispatch", &mut notes).await {
                Some(actions) => actions,
                None => aborted_dispatch(dispatcher.ledger().await, &findings),
            };
        }

        states.push(RunState::Finalizing);
        let entries = self
            .finalizer
            .finalize(StageResults {
                messages: &messages,
                triage: &triage,
                findings: &findings,
                actions: &actions,
            })
            .await;
        states.push(RunState::Done);

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            states,
            fetch_error: None,
            notes,
            entries,
        };
        info!(
            %run_id,
            messages = report.entries.len(),
            rejected = report.count(Disposition::Rejected),
            analyzed = report.count(Disposition::Analyzed),
            actioned = report.count(Disposition::Actioned),
            errored = report.count(Disposition::Errored),
            read_failures = report.read_failures(),
            "Triage run complete"
        );
        report
    }
}

/// Run a stage, turning a panic into `None` plus a run note.
async fn guard<T>(
    stage: impl Future<Output = T>,
    name: &str,
    notes: &mut Vec<String>,
) -> Option<T> {
    match AssertUnwindSafe(stage).catch_unwind().await {
        Ok(value) => Some(value),
        Err(payload) => {
            let note = format!("{name} stage panicked: {}", panic_message(payload.as_ref()));
            error!(stage = name, "{note}");
            notes.push(note);
            None
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Drop repeated ids so each message is finalized once.
fn dedupe_by_id(mut messages: Vec<Message>) -> Vec<Message> {
    let before = messages.len();
    let mut seen = HashSet::new();
    messages.retain(|m| seen.insert(m.id.clone()));
    if messages.len() < before {
        warn!(dropped = before - messages.len(), "Source listed duplicate message ids");
    }
    messages
}

/// Records after a dispatch panic: whatever reached the ledger, plus an
/// errored record for every dispatchable finding that never got one.
fn aborted_dispatch(mut records: Vec<ActionRecord>, findings: &[Finding]) -> Vec<ActionRecord> {
    for finding in findings.iter().filter(|f| f.needs_dispatch()) {
        if !records.iter().any(|r| r.message_id == finding.message_id) {
            let mut record = ActionRecord::new(&finding.message_id);
            record.push_error("dispatch aborted");
            records.push(record);
        }
    }
    ordered_like(records, findings)
}

fn ordered_like(mut records: Vec<ActionRecord>, findings: &[Finding]) -> Vec<ActionRecord> {
    records.sort_by_key(|r| {
        findings
            .iter()
            .position(|f| f.message_id == r.message_id)
            .unwrap_or(usize::MAX)
    });
    records
}
