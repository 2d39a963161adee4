//! Shared types for the triage pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Message ─────────────────────────────────────────────────────────

/// An unread message as listed by the mail source.
///
/// Identity is `id`, unique within a run. Listing never fetches the body;
/// body analysis pulls it on demand through the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Source-native identifier (IMAP UID, Gmail id, ...).
    pub id: String,
    pub subject: String,
    pub sender: String,
    /// Short preview of the body, used by subject triage.
    pub snippet: String,
    /// Raw Date header, if the source provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Cleaned body, filled in on the candidate copy by body analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        sender: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            sender: sender.into(),
            snippet: snippet.into(),
            date: None,
            body: None,
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }
}

// ── Policies ────────────────────────────────────────────────────────

/// What a matching filter rule asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Include,
    Exclude,
}

impl RuleAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::Exclude => "exclude",
        }
    }
}

/// A keyword/topic rule of a [`FilterPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub keyword: String,
    pub action: RuleAction,
}

/// Policy for subject triage: ordered keyword rules plus free-text criteria.
///
/// Loaded once per run and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPolicy {
    pub rules: Vec<FilterRule>,
    pub criteria: String,
}

impl FilterPolicy {
    pub fn new(criteria: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            criteria: criteria.into(),
        }
    }

    pub fn with_rule(mut self, keyword: impl Into<String>, action: RuleAction) -> Self {
        self.rules.push(FilterRule {
            keyword: keyword.into(),
            action,
        });
        self
    }

    /// Parse a compact rule list: `+quiz,+deadline,-sale`.
    ///
    /// A leading `+` includes, `-` excludes. Bare keywords are includes.
    pub fn parse_rules(list: &str) -> Result<Vec<FilterRule>, String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| {
                let (action, keyword) = match entry.as_bytes()[0] {
                    b'+' => (RuleAction::Include, &entry[1..]),
                    b'-' => (RuleAction::Exclude, &entry[1..]),
                    _ => (RuleAction::Include, entry),
                };
                let keyword = keyword.trim();
                if keyword.is_empty() {
                    return Err(format!("empty keyword in rule '{entry}'"));
                }
                Ok(FilterRule {
                    keyword: keyword.to_string(),
                    action,
                })
            })
            .collect()
    }
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self::new(
            "Important: academic deadlines, exams, quizzes, assignments, interviews, \
             official notices that require action. Not important: promotions, sales, \
             newsletters, social media notifications, marketing.",
        )
    }
}

/// Policy for body analysis: what counts as urgent, how deadlines are
/// phrased, and how action items should read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionPolicy {
    pub instructions: String,
}

impl ExtractionPolicy {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self::new(
            "Urgency is high when something must be done or attended within the next \
             7 days (exams, submissions, interviews, payments). Normal when action is \
             needed later. None for pure information. Extract the deadline as an ISO-8601 \
             date or date-time when one is stated. Action items are short imperative \
             sentences.",
        )
    }
}

// ── Oracle outputs ──────────────────────────────────────────────────

/// Subject-level judgment. Consumed by the triage stage; only the
/// category and rationale survive into the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    pub important: bool,
    pub category: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    None,
    Normal,
    High,
}

impl Urgency {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// Body-level extraction as returned by the oracle, before it is bound
/// to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub summary: String,
    pub action_items: Vec<String>,
    pub urgency: Urgency,
    pub deadline: Option<DateTime<Utc>>,
    /// Set when the oracle answered but part of the answer was unusable
    /// (e.g. a deadline that could not be parsed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ── Finding ─────────────────────────────────────────────────────────

/// Structured result of analyzing one candidate's body. Immutable once
/// produced; exactly one per candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub message_id: String,
    /// Subject of the source message, used as the notification title.
    pub subject: String,
    pub summary: String,
    pub action_items: Vec<String>,
    pub urgency: Urgency,
    pub deadline: Option<DateTime<Utc>>,
    /// Notable links from the body.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Finding {
    pub fn from_extraction(message: &Message, extraction: Extraction, links: Vec<String>) -> Self {
        Self {
            message_id: message.id.clone(),
            subject: message.subject.clone(),
            summary: extraction.summary,
            action_items: extraction.action_items,
            urgency: extraction.urgency,
            deadline: extraction.deadline,
            links,
            error: extraction.note,
        }
    }

    /// Fallback finding for a candidate whose analysis failed: no action
    /// items, no urgency, the failure noted.
    pub fn failed(message: &Message, error: impl Into<String>) -> Self {
        Self {
            message_id: message.id.clone(),
            subject: message.subject.clone(),
            summary: String::new(),
            action_items: Vec::new(),
            urgency: Urgency::None,
            deadline: None,
            links: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Whether this finding must go through action dispatch.
    pub fn needs_dispatch(&self) -> bool {
        self.urgency == Urgency::High || self.deadline.is_some()
    }
}

// ── Dispatch ────────────────────────────────────────────────────────

/// Outcome of dispatching one finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub message_id: String,
    pub reminder_set: bool,
    pub notification_sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionRecord {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            reminder_set: false,
            notification_sent: false,
            error: None,
        }
    }

    /// Append an error note, keeping earlier ones.
    pub fn push_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.error = Some(match self.error.take() {
            Some(existing) => format!("{existing}; {error}"),
            None => error,
        });
    }
}

// ── Report ──────────────────────────────────────────────────────────

/// Controller state. Transitions are strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Fetching,
    Triaging,
    Analyzing,
    Dispatching,
    Finalizing,
    Done,
}

impl RunState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Triaging => "triaging",
            Self::Analyzing => "analyzing",
            Self::Dispatching => "dispatching",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        }
    }
}

/// Final outcome recorded for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Judged unimportant at subject triage.
    Rejected,
    /// Analyzed; nothing to dispatch.
    Analyzed,
    /// Analyzed and dispatched without errors.
    Actioned,
    /// Carried through, but some step recorded a failure.
    Errored,
}

impl Disposition {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Analyzed => "analyzed",
            Self::Actioned => "actioned",
            Self::Errored => "errored",
        }
    }
}

/// Result of the mark-read call for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ReadOutcome {
    Marked,
    Failed(String),
}

impl ReadOutcome {
    pub fn is_marked(&self) -> bool {
        matches!(self, Self::Marked)
    }
}

/// One entry per fetched message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Category from subject triage (absent when the oracle failed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finding: Option<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionRecord>,
    pub disposition: Disposition,
    pub read: ReadOutcome,
}

/// The sole durable output of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// States visited, in order.
    pub states: Vec<RunState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
    /// Run-level notes (caught stage panics and the like).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    pub entries: Vec<ReportEntry>,
}

impl RunReport {
    /// Empty report for a run that never got past fetching.
    pub fn fetch_failed(run_id: Uuid, started_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            states: vec![RunState::Fetching],
            fetch_error: Some(error.into()),
            notes: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// The last state the controller reached.
    pub fn final_state(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Fetching)
    }

    pub fn entry(&self, message_id: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.message_id == message_id)
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.entries.iter().filter_map(|e| e.finding.as_ref())
    }

    pub fn action_records(&self) -> impl Iterator<Item = &ActionRecord> {
        self.entries.iter().filter_map(|e| e.action.as_ref())
    }

    pub fn count(&self, disposition: Disposition) -> usize {
        self.entries
            .iter()
            .filter(|e| e.disposition == disposition)
            .count()
    }

    pub fn read_failures(&self) -> usize {
        self.entries.iter().filter(|e| !e.read.is_marked()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message::new("m-1", "Quiz Friday", "prof@uni.edu", "Quiz on chapter 3")
    }

    #[test]
    fn parse_rules_signs_and_bare_keywords() {
        let rules = FilterPolicy::parse_rules("+quiz, -sale ,deadline").unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].action, RuleAction::Include);
        assert_eq!(rules[0].keyword, "quiz");
        assert_eq!(rules[1].action, RuleAction::Exclude);
        assert_eq!(rules[1].keyword, "sale");
        assert_eq!(rules[2].action, RuleAction::Include);
    }

    #[test]
    fn parse_rules_rejects_empty_keyword() {
        assert!(FilterPolicy::parse_rules("+quiz,-").is_err());
    }

    #[test]
    fn parse_rules_empty_spec_is_empty() {
        assert!(FilterPolicy::parse_rules(" , ").unwrap().is_empty());
    }

    #[test]
    fn failed_finding_has_no_actions() {
        let finding = Finding::failed(&message(), "body fetch failed");
        assert_eq!(finding.message_id, "m-1");
        assert!(finding.action_items.is_empty());
        assert_eq!(finding.urgency, Urgency::None);
        assert!(finding.deadline.is_none());
        assert!(!finding.needs_dispatch());
        assert_eq!(finding.error.as_deref(), Some("body fetch failed"));
    }

    #[test]
    fn needs_dispatch_on_high_urgency_or_deadline() {
        let mut finding = Finding::failed(&message(), "x");
        finding.urgency = Urgency::Normal;
        assert!(!finding.needs_dispatch());
        finding.urgency = Urgency::High;
        assert!(finding.needs_dispatch());
        finding.urgency = Urgency::None;
        finding.deadline = Some(Utc::now());
        assert!(finding.needs_dispatch());
    }

    #[test]
    fn action_record_accumulates_errors() {
        let mut record = ActionRecord::new("m-1");
        record.push_error("reminder failed");
        record.push_error("notify failed");
        assert_eq!(
            record.error.as_deref(),
            Some("reminder failed; notify failed")
        );
    }

    #[test]
    fn run_states_are_ordered() {
        assert!(RunState::Fetching < RunState::Triaging);
        assert!(RunState::Dispatching < RunState::Finalizing);
        assert!(RunState::Finalizing < RunState::Done);
    }

    #[test]
    fn urgency_serializes_lowercase() {
        let json = serde_json::to_value(Urgency::High).unwrap();
        assert_eq!(json, "high");
        let parsed: Urgency = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(parsed, Urgency::None);
    }

    #[test]
    fn fetch_failed_report_is_empty() {
        let report = RunReport::fetch_failed(Uuid::new_v4(), Utc::now(), "imap down");
        assert!(report.entries.is_empty());
        assert_eq!(report.final_state(), RunState::Fetching);
        assert_eq!(report.fetch_error.as_deref(), Some("imap down"));
    }
}
