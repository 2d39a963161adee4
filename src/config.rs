//! Run configuration, read once from the environment before any run.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::pipeline::controller::PipelineSettings;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::types::{ExtractionPolicy, FilterPolicy};

/// Pipeline, policy and output configuration.
///
/// Adapter credentials (IMAP, Pushover, SMTP, Calendar) are read by each
/// adapter's own `from_env`.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub fetch_limit: usize,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub filter_policy: FilterPolicy,
    pub extraction_policy: ExtractionPolicy,
    pub report_path: PathBuf,
    /// Cron expression (with seconds field). `None` runs once.
    pub schedule: Option<cron::Schedule>,
    pub log_dir: Option<PathBuf>,
    pub reminder_db: PathBuf,
    /// IANA zone for "today" and for deadlines given without an offset.
    pub timezone: Tz,
    pub llm: LlmConfig,
}

impl TriageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let fetch_limit = parse_or(&var, "TRIAGE_FETCH_LIMIT", 10usize)?;
        if fetch_limit == 0 {
            return Err(invalid("TRIAGE_FETCH_LIMIT", "must be at least 1"));
        }
        let concurrency = parse_or(&var, "TRIAGE_CONCURRENCY", 4usize)?.max(1);
        let retry = RetryPolicy::new(
            parse_or(&var, "TRIAGE_RETRY_ATTEMPTS", 2u32)?,
            Duration::from_millis(parse_or(&var, "TRIAGE_RETRY_BACKOFF_MS", 500u64)?),
        );

        let mut filter_policy = var("TRIAGE_FILTER_CRITERIA")
            .map(FilterPolicy::new)
            .unwrap_or_default();
        if let Some(rules) = var("TRIAGE_FILTER_RULES") {
            filter_policy.rules =
                FilterPolicy::parse_rules(&rules).map_err(|e| invalid("TRIAGE_FILTER_RULES", e))?;
        }
        let extraction_policy = var("TRIAGE_EXTRACTION_POLICY")
            .map(ExtractionPolicy::new)
            .unwrap_or_default();

        let schedule = var("TRIAGE_SCHEDULE")
            .map(|expr| {
                cron::Schedule::from_str(&expr)
                    .map_err(|e| invalid("TRIAGE_SCHEDULE", format!("invalid cron '{expr}': {e}")))
            })
            .transpose()?;
        let timezone = match var("TRIAGE_TIMEZONE") {
            Some(name) => Tz::from_str(name.trim())
                .map_err(|e| invalid("TRIAGE_TIMEZONE", format!("'{name}': {e}")))?,
            None => Tz::UTC,
        };

        Ok(Self {
            fetch_limit,
            concurrency,
            retry,
            filter_policy,
            extraction_policy,
            report_path: PathBuf::from(var("TRIAGE_REPORT_PATH").unwrap_or_else(|| "report.md".into())),
            schedule,
            log_dir: var("TRIAGE_LOG_DIR").map(PathBuf::from),
            reminder_db: PathBuf::from(
                var("TRIAGE_REMINDER_DB").unwrap_or_else(|| "./data/reminders.db".into()),
            ),
            timezone,
            llm: llm_config(&var)?,
        })
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            fetch_limit: self.fetch_limit,
            concurrency: self.concurrency,
            retry: self.retry,
            timezone: self.timezone,
        }
    }
}

fn llm_config(var: &impl Fn(&str) -> Option<String>) -> Result<LlmConfig, ConfigError> {
    let backend = match var("TRIAGE_LLM_BACKEND") {
        Some(s) => LlmBackend::from_str(&s).map_err(|e| invalid("TRIAGE_LLM_BACKEND", e))?,
        None => LlmBackend::Anthropic,
    };
    let key_var = backend.api_key_var();
    let api_key = var(key_var).ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;
    let model = var("TRIAGE_LLM_MODEL").unwrap_or_else(|| backend.default_model().to_string());

    Ok(LlmConfig {
        backend,
        api_key: SecretString::from(api_key),
        model,
    })
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|e| invalid(key, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::pipeline::types::RuleAction;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_with_only_api_key() {
        let config = TriageConfig::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "sk-ant")])).unwrap();
        assert_eq!(config.fetch_limit, 10);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.report_path, PathBuf::from("report.md"));
        assert!(config.schedule.is_none());
        assert_eq!(config.timezone, Tz::UTC);
        assert!(config.filter_policy.rules.is_empty());
        assert_eq!(config.llm.backend, LlmBackend::Anthropic);
        assert_eq!(config.llm.model, LlmBackend::Anthropic.default_model());
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let err = TriageConfig::from_lookup(lookup(&[("TRIAGE_LLM_BACKEND", "openai")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(k) if k == "OPENAI_API_KEY"));
    }

    #[test]
    fn reads_policy_and_schedule() {
        let config = TriageConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("TRIAGE_FILTER_CRITERIA", "academic deadlines only"),
            ("TRIAGE_FILTER_RULES", "+quiz,-sale"),
            ("TRIAGE_SCHEDULE", "0 */30 * * * *"),
            ("TRIAGE_FETCH_LIMIT", "25"),
            ("TRIAGE_TIMEZONE", "Asia/Kolkata"),
        ]))
        .unwrap();
        assert_eq!(config.filter_policy.criteria, "academic deadlines only");
        assert_eq!(config.filter_policy.rules.len(), 2);
        assert_eq!(config.filter_policy.rules[1].action, RuleAction::Exclude);
        assert!(config.schedule.is_some());
        assert_eq!(config.settings().fetch_limit, 25);
        assert_eq!(config.timezone, chrono_tz::Asia::Kolkata);
        assert_eq!(config.settings().timezone, chrono_tz::Asia::Kolkata);
    }

    #[test]
    fn rejects_bad_values() {
        for (key, value) in [
            ("TRIAGE_FETCH_LIMIT", "many"),
            ("TRIAGE_FETCH_LIMIT", "0"),
            ("TRIAGE_SCHEDULE", "every day"),
            ("TRIAGE_FILTER_RULES", "+quiz,-"),
            ("TRIAGE_LLM_BACKEND", "groq"),
            ("TRIAGE_TIMEZONE", "Mars/Olympus_Mons"),
        ] {
            let result = TriageConfig::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "k"), (key, value)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { .. })),
                "{key}={value} should be rejected"
            );
        }
    }
}
