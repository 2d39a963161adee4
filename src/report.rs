//! Human-readable run report.
//!
//! One section per fetched message with its category, summary, action
//! items, dispatch outcome and read status.

use std::fmt::Write as _;
use std::path::Path;

use tracing::info;

use crate::error::ReportError;
use crate::pipeline::types::{ActionRecord, Disposition, ReadOutcome, ReportEntry, RunReport};

/// Render the report as Markdown.
pub fn render_markdown(report: &RunReport) -> String {
    let mut out = String::with_capacity(1024 + report.entries.len() * 512);

    let _ = writeln!(out, "# Inbox triage report\n");
    let _ = writeln!(out, "- Run: `{}`", report.run_id);
    let _ = writeln!(
        out,
        "- Started: {}",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(
        out,
        "- Finished: {}",
        report.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let states: Vec<_> = report.states.iter().map(|s| s.label()).collect();
    let _ = writeln!(out, "- States: {}", states.join(" → "));

    if let Some(err) = &report.fetch_error {
        let _ = writeln!(out, "\n**Fetching failed:** {err}");
        return out;
    }

    let _ = writeln!(
        out,
        "- Messages: {} ({} rejected, {} analyzed, {} actioned, {} errored)",
        report.entries.len(),
        report.count(Disposition::Rejected),
        report.count(Disposition::Analyzed),
        report.count(Disposition::Actioned),
        report.count(Disposition::Errored),
    );
    if report.read_failures() > 0 {
        let _ = writeln!(out, "- Mark-read failures: {}", report.read_failures());
    }

    if !report.notes.is_empty() {
        let _ = writeln!(out, "\n## Notes\n");
        for note in &report.notes {
            let _ = writeln!(out, "- {note}");
        }
    }

    if report.entries.is_empty() {
        let _ = writeln!(out, "\nNo unread messages.");
        return out;
    }

    for entry in &report.entries {
        render_entry(&mut out, entry);
    }
    out
}

fn render_entry(out: &mut String, entry: &ReportEntry) {
    let subject = if entry.subject.is_empty() {
        "(no subject)"
    } else {
        entry.subject.as_str()
    };
    let _ = writeln!(out, "\n## {subject}\n");
    let _ = writeln!(out, "- From: {}", entry.sender);
    if let Some(date) = &entry.date {
        let _ = writeln!(out, "- Date: {date}");
    }
    let _ = writeln!(out, "- Outcome: {}", entry.disposition.label());
    if let Some(category) = &entry.category {
        let _ = writeln!(out, "- Category: {category}");
    }
    if let Some(rationale) = entry.rationale.as_deref().filter(|r| !r.is_empty()) {
        let _ = writeln!(out, "- Rationale: {rationale}");
    }
    if let Some(err) = &entry.triage_error {
        let _ = writeln!(out, "- Triage error: {err}");
    }

    if let Some(finding) = &entry.finding {
        if !finding.summary.is_empty() {
            let _ = writeln!(out, "- Summary: {}", finding.summary);
        }
        let _ = writeln!(out, "- Urgency: {}", finding.urgency.label());
        if let Some(deadline) = finding.deadline {
            let _ = writeln!(out, "- Deadline: {}", deadline.format("%a %Y-%m-%d %H:%M UTC"));
        }
        if let Some(err) = &finding.error {
            let _ = writeln!(out, "- Analysis note: {err}");
        }
        if !finding.action_items.is_empty() {
            let _ = writeln!(out, "- Action items:");
            for item in &finding.action_items {
                let _ = writeln!(out, "  - {item}");
            }
        }
        if !finding.links.is_empty() {
            let _ = writeln!(out, "- Links:");
            for link in &finding.links {
                let _ = writeln!(out, "  - {link}");
            }
        }
    }

    if let Some(action) = &entry.action {
        let _ = writeln!(out, "- Dispatch: {}", describe_action(action));
    }

    match &entry.read {
        ReadOutcome::Marked => {
            let _ = writeln!(out, "- Read: marked");
        }
        ReadOutcome::Failed(reason) => {
            let _ = writeln!(out, "- Read: FAILED ({reason})");
        }
    }
}

fn describe_action(action: &ActionRecord) -> String {
    let mut parts = Vec::new();
    if action.reminder_set {
        parts.push("reminder set".to_string());
    }
    if action.notification_sent {
        parts.push("notification sent".to_string());
    }
    if let Some(err) = &action.error {
        parts.push(format!("errors: {err}"));
    }
    if parts.is_empty() {
        "nothing sent".to_string()
    } else {
        parts.join(", ")
    }
}

/// Render and write the report, creating parent directories.
pub async fn write_report(report: &RunReport, path: &Path) -> Result<(), ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, render_markdown(report)).await?;
    info!(path = %path.display(), entries = report.entries.len(), "Report written");
    Ok(())
}
