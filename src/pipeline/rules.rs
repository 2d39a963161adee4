//! Local keyword evaluation for [`FilterPolicy`] rules.
//!
//! Runs before each subject-triage oracle call. Matches are handed to the
//! oracle as signals alongside the free-text criteria; they never decide
//! a message on their own, so every message still gets a judgment.

use regex::Regex;
use tracing::debug;

use crate::pipeline::types::{FilterPolicy, Message, RuleAction};

/// Which field a rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    Sender,
    Subject,
    Snippet,
}

impl RuleField {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Subject => "subject",
            Self::Snippet => "snippet",
        }
    }
}

/// A rule hit on one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub keyword: String,
    pub action: RuleAction,
    pub field: RuleField,
}

impl RuleMatch {
    /// One-line rendering for prompts and logs.
    pub fn describe(&self) -> String {
        format!(
            "{} rule '{}' matched {}",
            self.action.label(),
            self.keyword,
            self.field.label()
        )
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    keyword: String,
    action: RuleAction,
    regex: Regex,
}

/// Compiled form of a policy's keyword rules.
#[derive(Debug, Clone)]
pub struct RulesEngine {
    rules: Vec<CompiledRule>,
}

impl RulesEngine {
    /// Compile every rule of `policy` into a case-insensitive whole-word regex.
    pub fn from_policy(policy: &FilterPolicy) -> Result<Self, regex::Error> {
        let rules = policy
            .rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    keyword: rule.keyword.clone(),
                    action: rule.action,
                    regex: Regex::new(&keyword_pattern(&rule.keyword))?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// Evaluate all rules against a message, in policy order.
    ///
    /// Each rule reports at most one match: the first field it hits,
    /// checked subject → sender → snippet.
    pub fn evaluate(&self, message: &Message) -> Vec<RuleMatch> {
        let fields = [
            (RuleField::Subject, message.subject.as_str()),
            (RuleField::Sender, message.sender.as_str()),
            (RuleField::Snippet, message.snippet.as_str()),
        ];

        let mut matches = Vec::new();
        for rule in &self.rules {
            if let Some((field, _)) = fields.iter().find(|(_, value)| rule.regex.is_match(value)) {
                debug!(
                    id = %message.id,
                    keyword = %rule.keyword,
                    action = rule.action.label(),
                    field = field.label(),
                    "Filter rule matched"
                );
                matches.push(RuleMatch {
                    keyword: rule.keyword.clone(),
                    action: rule.action,
                    field: *field,
                });
            }
        }
        matches
    }
}

/// Word boundaries only go on sides where the keyword has a word
/// character; `\b` next to `%` or `+` would never match.
fn keyword_pattern(keyword: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let lead = if keyword.starts_with(is_word) { r"\b" } else { "" };
    let trail = if keyword.ends_with(is_word) { r"\b" } else { "" };
    format!(r"(?i){lead}{}{trail}", regex::escape(keyword))
}
