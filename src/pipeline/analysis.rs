//! Body analysis: fetch, clean and extract one finding per candidate.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::oracle::{ClassificationOracle, Policy};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::types::{ExtractionPolicy, Finding, Message};
use crate::source::MailSource;
use crate::source::clean::prepare_body;

pub struct BodyAnalysis {
    source: Arc<dyn MailSource>,
    oracle: Arc<dyn ClassificationOracle>,
    policy: ExtractionPolicy,
    retry: RetryPolicy,
    concurrency: usize,
}

impl BodyAnalysis {
    pub fn new(
        source: Arc<dyn MailSource>,
        oracle: Arc<dyn ClassificationOracle>,
        policy: ExtractionPolicy,
    ) -> Self {
        Self {
            source,
            oracle,
            policy,
            retry: RetryPolicy::default(),
            concurrency: 1,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// One finding per candidate, in candidate order. A candidate whose
    /// body cannot be fetched or whose extraction fails still gets a
    /// finding, with the failure noted.
    ///
    /// Each fetched body is stored, cleaned, on its own candidate.
    pub async fn run(&self, candidates: &mut [Message]) -> Vec<Finding> {
        let findings: Vec<Finding> = stream::iter(candidates.iter_mut())
            .map(|message| self.analyze(message))
            .buffered(self.concurrency)
            .collect()
            .await;

        info!(
            candidates = findings.len(),
            failed = findings.iter().filter(|f| f.error.is_some()).count(),
            actionable = findings.iter().filter(|f| f.needs_dispatch()).count(),
            "Body analysis complete"
        );
        findings
    }

    async fn analyze(&self, message: &mut Message) -> Finding {
        let source = &self.source;
        let id = message.id.as_str();
        let raw = match self
            .retry
            .run("fetch_body", || async move { source.fetch_body(id).await })
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Body fetch failed");
                return Finding::failed(message, format!("body fetch failed: {e}"));
            }
        };

        let prepared = prepare_body(&raw);
        message.body = Some(prepared.text);
        let message = &*message;
        let text = render_body_text(message, message.body.as_deref().unwrap_or_default());
        let (oracle, policy, text) = (&self.oracle, &self.policy, text.as_str());

        let result = self
            .retry
            .run("extract", || async move {
                oracle
                    .classify(text, Policy::Extraction(policy))
                    .await?
                    .into_extraction()
            })
            .await;

        match result {
            Ok(extraction) => {
                debug!(
                    message_id = %message.id,
                    urgency = extraction.urgency.label(),
                    has_deadline = extraction.deadline.is_some(),
                    action_items = extraction.action_items.len(),
                    "Body analyzed"
                );
                Finding::from_extraction(message, extraction, prepared.links)
            }
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Extraction failed");
                Finding::failed(message, format!("extraction failed: {e}"))
            }
        }
    }
}

/// The oracle input for one body.
fn render_body_text(message: &Message, body: &str) -> String {
    let mut text = format!("From: {}\nSubject: {}\n", message.sender, message.subject);
    if let Some(date) = &message.date {
        text.push_str(&format!("Date: {date}\n"));
    }
    text.push('\n');
    if body.is_empty() {
        text.push_str("(empty body)");
    } else {
        text.push_str(body);
    }
    text
}
