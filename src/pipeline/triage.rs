//! Subject triage: one oracle judgment per fetched message.
//!
//! Keyword rule hits are passed to the oracle as signals rather than
//! deciding on their own. An oracle failure keeps the message as a
//! candidate.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::oracle::{ClassificationOracle, Policy};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::rules::{RuleMatch, RulesEngine};
use crate::pipeline::types::{FilterPolicy, Judgment, Message};

/// Triage result for one message.
#[derive(Debug, Clone)]
pub struct TriageDecision {
    pub message: Message,
    /// `None` when the oracle failed.
    pub judgment: Option<Judgment>,
    pub signals: Vec<RuleMatch>,
    pub error: Option<String>,
}

impl TriageDecision {
    /// Candidates are messages judged important, plus every message the
    /// oracle could not judge.
    pub fn is_candidate(&self) -> bool {
        self.judgment.as_ref().is_none_or(|j| j.important)
    }
}

/// Decisions for a whole batch, in input order.
#[derive(Debug, Clone, Default)]
pub struct TriageOutcome {
    pub decisions: Vec<TriageDecision>,
}

impl TriageOutcome {
    /// Every message kept as an unjudged candidate with `error` noted.
    pub fn fail_open(messages: &[Message], error: &str) -> Self {
        Self {
            decisions: messages
                .iter()
                .map(|message| TriageDecision {
                    message: message.clone(),
                    judgment: None,
                    signals: Vec::new(),
                    error: Some(error.to_string()),
                })
                .collect(),
        }
    }

    pub fn candidates(&self) -> impl Iterator<Item = &Message> {
        self.decisions
            .iter()
            .filter(|d| d.is_candidate())
            .map(|d| &d.message)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &Message> {
        self.decisions
            .iter()
            .filter(|d| !d.is_candidate())
            .map(|d| &d.message)
    }

    pub fn decision(&self, message_id: &str) -> Option<&TriageDecision> {
        self.decisions.iter().find(|d| d.message.id == message_id)
    }

    pub fn has_candidates(&self) -> bool {
        self.decisions.iter().any(TriageDecision::is_candidate)
    }
}

pub struct SubjectTriage {
    oracle: Arc<dyn ClassificationOracle>,
    policy: FilterPolicy,
    rules: RulesEngine,
    retry: RetryPolicy,
    concurrency: usize,
}

impl SubjectTriage {
    /// Fails only if a policy keyword cannot be compiled.
    pub fn new(
        oracle: Arc<dyn ClassificationOracle>,
        policy: FilterPolicy,
    ) -> Result<Self, regex::Error> {
        let rules = RulesEngine::from_policy(&policy)?;
        Ok(Self {
            oracle,
            policy,
            rules,
            retry: RetryPolicy::default(),
            concurrency: 1,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Judge every message. Never fails; per-message errors are carried
    /// on the decision.
    pub async fn run(&self, messages: &[Message]) -> TriageOutcome {
        let decisions: Vec<TriageDecision> = stream::iter(messages.iter().cloned())
            .map(|message| self.judge(message))
            .buffered(self.concurrency)
            .collect()
            .await;

        let outcome = TriageOutcome { decisions };
        info!(
            fetched = messages.len(),
            candidates = outcome.candidates().count(),
            rejected = outcome.rejected().count(),
            "Subject triage complete"
        );
        outcome
    }

    async fn judge(&self, message: Message) -> TriageDecision {
        let signals = self.rules.evaluate(&message);
        let text = render_subject_text(&message, &signals);
        let (oracle, policy, text) = (&self.oracle, &self.policy, text.as_str());

        let result = self
            .retry
            .run("triage", || async move {
                oracle
                    .classify(text, Policy::Filter(policy))
                    .await?
                    .into_judgment()
            })
            .await;

        match result {
            Ok(judgment) => {
                debug!(
                    message_id = %message.id,
                    important = judgment.important,
                    category = %judgment.category,
                    "Subject judged"
                );
                TriageDecision {
                    message,
                    judgment: Some(judgment),
                    signals,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    error = %e,
                    "Subject triage failed, keeping message as candidate"
                );
                TriageDecision {
                    message,
                    judgment: None,
                    signals,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// The oracle input for one subject: headers, preview and rule signals.
fn render_subject_text(message: &Message, signals: &[RuleMatch]) -> String {
    let mut text = format!("From: {}\n", message.sender);
    if let Some(date) = &message.date {
        text.push_str(&format!("Date: {date}\n"));
    }
    text.push_str(&format!("Subject: {}\n", message.subject));
    if !message.snippet.is_empty() {
        text.push_str(&format!("Preview: {}\n", message.snippet));
    }
    if !signals.is_empty() {
        text.push_str("\nSignals:\n");
        for signal in signals {
            text.push_str(&format!("- {}\n", signal.describe()));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::OracleError;
    use crate::oracle::Verdict;
    use crate::pipeline::types::RuleAction;

    /// Judges by keyword; fails for texts containing `fail_on`.
    struct KeywordOracle {
        fail_on: Option<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    impl KeywordOracle {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                fail_on,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ClassificationOracle for KeywordOracle {
        async fn classify(&self, text: &str, _policy: Policy<'_>) -> Result<Verdict, OracleError> {
            self.seen.lock().unwrap().push(text.to_string());
            if let Some(needle) = self.fail_on
                && text.contains(needle)
            {
                return Err(OracleError::Malformed("garbled".into()));
            }
            let promo = text.contains("sale");
            Ok(Verdict::Judgment(Judgment {
                important: !promo,
                category: if promo { "promotion" } else { "academic" }.into(),
                rationale: "test".into(),
            }))
        }
    }

    fn inbox() -> Vec<Message> {
        vec![
            Message::new("A", "Quiz Friday", "prof@uni.edu", "Chapter 3"),
            Message::new("B", "50% off sale", "shop@store.com", "Today only"),
            Message::new("C", "Assignment due Monday", "ta@uni.edu", "Submit online"),
        ]
    }

    fn triage(oracle: Arc<KeywordOracle>, policy: FilterPolicy) -> SubjectTriage {
        SubjectTriage::new(oracle, policy)
            .unwrap()
            .with_retry(RetryPolicy::none())
            .with_concurrency(2)
    }

    #[tokio::test]
    async fn partitions_preserving_order() {
        let oracle = Arc::new(KeywordOracle::new(None));
        let outcome = triage(oracle, FilterPolicy::default()).run(&inbox()).await;

        let candidates: Vec<_> = outcome.candidates().map(|m| m.id.as_str()).collect();
        let rejected: Vec<_> = outcome.rejected().map(|m| m.id.as_str()).collect();
        assert_eq!(candidates, vec!["A", "C"]);
        assert_eq!(rejected, vec!["B"]);
        assert_eq!(outcome.decisions.len(), 3);
    }

    #[tokio::test]
    async fn oracle_failure_keeps_message_as_candidate() {
        let oracle = Arc::new(KeywordOracle::new(Some("50% off")));
        let outcome = triage(oracle, FilterPolicy::default()).run(&inbox()).await;

        let b = outcome.decision("B").unwrap();
        assert!(b.is_candidate());
        assert!(b.judgment.is_none());
        assert!(b.error.as_deref().unwrap().contains("garbled"));
        assert_eq!(outcome.candidates().count(), 3);
    }

    #[tokio::test]
    async fn rule_hits_reach_the_oracle_as_signals() {
        let oracle = Arc::new(KeywordOracle::new(None));
        let policy = FilterPolicy::default().with_rule("sale", RuleAction::Exclude);
        let outcome = triage(oracle.clone(), policy).run(&inbox()).await;

        assert_eq!(outcome.decision("B").unwrap().signals.len(), 1);
        let seen = oracle.seen.lock().unwrap();
        assert!(
            seen.iter()
                .any(|t| t.contains("exclude rule 'sale' matched subject"))
        );
    }

    #[tokio::test]
    async fn empty_batch_has_no_candidates() {
        let oracle = Arc::new(KeywordOracle::new(None));
        let outcome = triage(oracle, FilterPolicy::default()).run(&[]).await;
        assert!(!outcome.has_candidates());
    }

    #[test]
    fn subject_text_includes_headers() {
        let message = Message::new("A", "Quiz", "prof@uni.edu", "ch 3").with_date("Mon, 12 Jan 2026");
        let text = render_subject_text(&message, &[]);
        assert!(text.contains("From: prof@uni.edu"));
        assert!(text.contains("Date: Mon, 12 Jan 2026"));
        assert!(text.contains("Subject: Quiz"));
        assert!(text.contains("Preview: ch 3"));
        assert!(!text.contains("Signals"));
    }
}
