//! LLM-backed classification oracle.
//!
//! The policy goes into the system prompt, the stage-rendered message
//! text into the user prompt. Responses are JSON objects; markdown
//! wrapping and surrounding chatter are tolerated.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::error::OracleError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::oracle::{ClassificationOracle, Policy, Verdict};
use crate::pipeline::types::{
    Extraction, ExtractionPolicy, FilterPolicy, Judgment, RuleAction, Urgency,
};

/// Max tokens for a subject judgment (runs on every message).
const JUDGMENT_MAX_TOKENS: u32 = 512;

/// Max tokens for a body extraction.
const EXTRACTION_MAX_TOKENS: u32 = 1024;

const TEMPERATURE: f32 = 0.1;

/// Input text is cut to this many characters.
const MAX_INPUT_CHARS: usize = 6000;

/// Date-only deadlines are placed at this local hour.
const DATE_ONLY_DEADLINE_HOUR: u32 = 9;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Cumulative token usage across all oracle calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

pub struct LlmOracle {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
    /// "Today" and offset-less deadlines are read in this zone.
    timezone: Tz,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            timeout: DEFAULT_TIMEOUT,
            timezone: Tz::UTC,
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl ClassificationOracle for LlmOracle {
    async fn classify(&self, text: &str, policy: Policy<'_>) -> Result<Verdict, OracleError> {
        let (system_prompt, max_tokens) = match policy {
            Policy::Filter(p) => (build_judgment_system_prompt(p), JUDGMENT_MAX_TOKENS),
            Policy::Extraction(p) => (
                build_extraction_system_prompt(p, Utc::now().with_timezone(&self.timezone)),
                EXTRACTION_MAX_TOKENS,
            ),
        };
        let user_prompt: String = text.chars().take(MAX_INPUT_CHARS).collect();

        let request = CompletionRequest::new(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ])
        .with_temperature(TEMPERATURE)
        .with_max_tokens(max_tokens);

        let response = tokio::time::timeout(self.timeout, self.llm.complete(request))
            .await
            .map_err(|_| OracleError::Timeout(self.timeout))??;

        self.input_tokens
            .fetch_add(u64::from(response.input_tokens), Ordering::Relaxed);
        self.output_tokens
            .fetch_add(u64::from(response.output_tokens), Ordering::Relaxed);

        let verdict = match policy {
            Policy::Filter(_) => parse_judgment(&response.content).map(Verdict::Judgment),
            Policy::Extraction(_) => {
                parse_extraction(&response.content, self.timezone).map(Verdict::Extraction)
            }
        };
        match &verdict {
            Ok(v) => debug!(kind = v.label(), "Oracle verdict parsed"),
            Err(e) => warn!(
                raw_response = %response.content,
                error = %e,
                "Failed to parse oracle response"
            ),
        }
        verdict
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_judgment_system_prompt(policy: &FilterPolicy) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(
        "You are an email triage engine. Decide from the sender, subject and preview \
         whether a message is important to the user under their policy.\n\n",
    );
    prompt.push_str(&format!("Policy:\n{}\n", policy.criteria));

    let includes = rule_keywords(policy, RuleAction::Include);
    if !includes.is_empty() {
        prompt.push_str(&format!("Always consider important: {}\n", includes.join(", ")));
    }
    let excludes = rule_keywords(policy, RuleAction::Exclude);
    if !excludes.is_empty() {
        prompt.push_str(&format!("Never consider important: {}\n", excludes.join(", ")));
    }

    prompt.push_str(
        "\nRespond with ONLY a JSON object:\n\
         {\"important\": true, \"category\": \"...\", \"rationale\": \"...\"}\n\n\
         Rules:\n\
         - category is one or two words (e.g. \"academic\", \"promotion\", \"personal\")\n\
         - rationale is one short sentence\n\
         - When in doubt, mark the message important",
    );
    prompt
}

fn build_extraction_system_prompt(policy: &ExtractionPolicy, now: DateTime<Tz>) -> String {
    format!(
        "You extract actionable details from an email body.\n\n\
         Today is {today} ({zone}). Give deadlines in this local time.\n\n\
         Policy:\n{instructions}\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"summary\": \"...\", \"action_items\": [\"...\"], \"urgency\": \"none|normal|high\", \"deadline\": \"YYYY-MM-DDTHH:MM\" or null}}\n\n\
         Rules:\n\
         - summary is at most two sentences\n\
         - action_items may be empty\n\
         - deadline resolves relative dates (\"Friday\") against today; use YYYY-MM-DD when no time is given\n\
         - deadline is null when the email states none",
        today = now.format("%A, %Y-%m-%d"),
        zone = now.timezone().name(),
        instructions = policy.instructions,
    )
}

fn rule_keywords(policy: &FilterPolicy, action: RuleAction) -> Vec<&str> {
    policy
        .rules
        .iter()
        .filter(|r| r.action == action)
        .map(|r| r.keyword.as_str())
        .collect()
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct JudgmentResponse {
    important: bool,
    #[serde(default)]
    category: String,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, serde::Deserialize)]
struct ExtractionResponse {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    action_items: Vec<String>,
    #[serde(default)]
    urgency: String,
    #[serde(default)]
    deadline: Option<String>,
}

fn parse_judgment(raw: &str) -> Result<Judgment, OracleError> {
    let json_str = extract_json_object(raw);
    let response: JudgmentResponse = serde_json::from_str(&json_str)
        .map_err(|e| OracleError::Malformed(format!("JSON parse error: {e}")))?;

    Ok(Judgment {
        important: response.important,
        category: if response.category.trim().is_empty() {
            "uncategorized".into()
        } else {
            response.category.trim().to_lowercase()
        },
        rationale: response.rationale.trim().to_string(),
    })
}

fn parse_extraction(raw: &str, tz: Tz) -> Result<Extraction, OracleError> {
    let json_str = extract_json_object(raw);
    let response: ExtractionResponse = serde_json::from_str(&json_str)
        .map_err(|e| OracleError::Malformed(format!("JSON parse error: {e}")))?;

    let urgency = parse_urgency(&response.urgency)?;

    let mut note = None;
    let deadline = match response.deadline.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) if s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("none") => None,
        Some(s) => {
            let parsed = parse_deadline(s, tz);
            if parsed.is_none() {
                note = Some(format!("unparseable deadline '{s}'"));
            }
            parsed
        }
    };

    Ok(Extraction {
        summary: response.summary.trim().to_string(),
        action_items: response
            .action_items
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
        urgency,
        deadline,
        note,
    })
}

fn parse_urgency(raw: &str) -> Result<Urgency, OracleError> {
    match raw.trim().to_lowercase().as_str() {
        "" | "none" => Ok(Urgency::None),
        "low" | "normal" | "medium" => Ok(Urgency::Normal),
        "high" | "urgent" | "critical" => Ok(Urgency::High),
        other => Err(OracleError::Malformed(format!("unknown urgency '{other}'"))),
    }
}

/// Parse an ISO-8601-ish deadline.
///
/// Values with an offset are taken as-is. Values without one are local
/// times in `tz`; date-only values land at 09:00 local. A local time that
/// falls in a DST gap does not parse.
pub fn parse_deadline(s: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let local = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .into_iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(DATE_ONLY_DEADLINE_HOUR, 0, 0))
        })?;
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
