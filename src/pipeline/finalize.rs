//! Finalization: mark every fetched message read, then build the report
//! entries.

use std::sync::Arc;

use tracing::{info, warn};

use crate::pipeline::triage::{TriageDecision, TriageOutcome};
use crate::pipeline::types::{
    ActionRecord, Disposition, Finding, Message, ReadOutcome, ReportEntry,
};
use crate::source::MailSource;

/// Everything the earlier stages produced for one run.
#[derive(Debug, Clone, Copy)]
pub struct StageResults<'a> {
    pub messages: &'a [Message],
    pub triage: &'a TriageOutcome,
    pub findings: &'a [Finding],
    pub actions: &'a [ActionRecord],
}

pub struct Finalizer {
    source: Arc<dyn MailSource>,
}

impl Finalizer {
    pub fn new(source: Arc<dyn MailSource>) -> Self {
        Self { source }
    }

    /// Call `mark_read` once per message, in fetch order. A failure is
    /// recorded for that message and the rest continue.
    pub async fn mark_all_read(&self, messages: &[Message]) -> Vec<ReadOutcome> {
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            let outcome = match self.source.mark_read(&message.id).await {
                Ok(()) => ReadOutcome::Marked,
                Err(e) => {
                    warn!(message_id = %message.id, error = %e, "Failed to mark message read");
                    ReadOutcome::Failed(e.to_string())
                }
            };
            outcomes.push(outcome);
        }
        info!(
            marked = outcomes.iter().filter(|o| o.is_marked()).count(),
            failed = outcomes.iter().filter(|o| !o.is_marked()).count(),
            "Messages marked read"
        );
        outcomes
    }

    /// Mark everything read and return one report entry per message.
    pub async fn finalize(&self, results: StageResults<'_>) -> Vec<ReportEntry> {
        let reads = self.mark_all_read(results.messages).await;
        results
            .messages
            .iter()
            .zip(reads)
            .map(|(message, read)| build_entry(message, &results, read))
            .collect()
    }
}

fn build_entry(message: &Message, results: &StageResults<'_>, read: ReadOutcome) -> ReportEntry {
    let decision = results.triage.decision(&message.id);
    let finding = results
        .findings
        .iter()
        .find(|f| f.message_id == message.id)
        .cloned();
    let action = results
        .actions
        .iter()
        .find(|a| a.message_id == message.id)
        .cloned();

    ReportEntry {
        message_id: message.id.clone(),
        subject: message.subject.clone(),
        sender: message.sender.clone(),
        date: message.date.clone(),
        category: decision.and_then(|d| d.judgment.as_ref().map(|j| j.category.clone())),
        rationale: decision.and_then(|d| d.judgment.as_ref().map(|j| j.rationale.clone())),
        triage_error: decision.and_then(|d| d.error.clone()),
        disposition: disposition(decision, finding.as_ref(), action.as_ref()),
        finding,
        action,
        read,
    }
}

fn disposition(
    decision: Option<&TriageDecision>,
    finding: Option<&Finding>,
    action: Option<&ActionRecord>,
) -> Disposition {
    if decision.is_some_and(|d| !d.is_candidate()) {
        return Disposition::Rejected;
    }
    let Some(finding) = finding else {
        return Disposition::Errored;
    };
    let errored = decision.is_some_and(|d| d.error.is_some())
        || finding.error.is_some()
        || action.is_some_and(|a| a.error.is_some());
    match (errored, action) {
        (true, _) => Disposition::Errored,
        (false, Some(_)) => Disposition::Actioned,
        (false, None) => Disposition::Analyzed,
    }
}
