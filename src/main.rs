use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use inbox_triage::config::TriageConfig;
use inbox_triage::error::ConfigError;
use inbox_triage::llm::create_provider;
use inbox_triage::logging;
use inbox_triage::oracle::LlmOracle;
use inbox_triage::pipeline::{PipelineController, RunReport};
use inbox_triage::report::write_report;
use inbox_triage::sinks::{
    CalendarConfig, GoogleCalendarSink, LocalReminderStore, NotificationSink, PushoverConfig,
    PushoverNotifier, ReminderSink, SmtpConfig, SmtpNotifier,
};
use inbox_triage::source::{ImapConfig, ImapMailSource, MailSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = TriageConfig::from_env()?;
    let _log_guard = logging::init(config.log_dir.as_deref())?;

    eprintln!("📬 Inbox Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Fetch limit: {}", config.fetch_limit);
    eprintln!("   Report: {}", config.report_path.display());
    eprintln!("   Timezone: {}", config.timezone.name());

    // ── Mail source ─────────────────────────────────────────────────────
    let imap = ImapConfig::from_env()
        .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".to_string()))?;
    eprintln!("   IMAP: {} ({})", imap.host, imap.mailbox);
    let source: Arc<dyn MailSource> = Arc::new(ImapMailSource::new(imap));

    // ── Oracle ──────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    let oracle = Arc::new(LlmOracle::new(llm).with_timezone(config.timezone));

    // ── Sinks (remote first, local fallback) ────────────────────────────
    let reminders: Arc<dyn ReminderSink> = match CalendarConfig::from_env() {
        Some(calendar) => {
            eprintln!("   Reminders: Google Calendar ({})", calendar.calendar_id);
            Arc::new(GoogleCalendarSink::new(calendar).with_timezone(config.timezone))
        }
        None => {
            let store = LocalReminderStore::new_local(&config.reminder_db).await?;
            let pending = store.upcoming(Utc::now()).await?;
            eprintln!(
                "   Reminders: local ({}, {} upcoming)",
                config.reminder_db.display(),
                pending.len()
            );
            for reminder in &pending {
                tracing::info!(
                    message_id = %reminder.message_id,
                    due = %reminder.due_at.with_timezone(&config.timezone),
                    note = %reminder.note,
                    "Upcoming reminder"
                );
            }
            Arc::new(store)
        }
    };

    let notifier: Arc<dyn NotificationSink> = match PushoverConfig::from_env() {
        Some(pushover) => {
            eprintln!("   Notifications: Pushover");
            Arc::new(PushoverNotifier::new(pushover))
        }
        None => {
            let smtp = SmtpConfig::from_env()
                .ok_or_else(|| ConfigError::MissingEnvVar("PUSHOVER_API_TOKEN".to_string()))?;
            eprintln!("   Notifications: email to {}", smtp.to_address);
            Arc::new(SmtpNotifier::new(smtp))
        }
    };

    let controller = PipelineController::new(
        source,
        oracle.clone(),
        reminders,
        notifier,
        config.filter_policy.clone(),
        config.extraction_policy.clone(),
        config.settings(),
    )
    .map_err(|e| ConfigError::InvalidValue {
        key: "TRIAGE_FILTER_RULES".to_string(),
        message: e.to_string(),
    })?;

    let Some(schedule) = &config.schedule else {
        eprintln!();
        let report = run_once(&controller, &oracle, &config.report_path).await;
        if let Some(err) = report.fetch_error {
            anyhow::bail!("run aborted: {err}");
        }
        return Ok(());
    };

    eprintln!("   Schedule: {schedule}\n");
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            tracing::warn!("Schedule has no upcoming fire times, exiting");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tracing::info!(next = %next, "Next run scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
        run_once(&controller, &oracle, &config.report_path).await;
    }

    Ok(())
}

/// One independent run: triage, log token usage, write the report.
async fn run_once(controller: &PipelineController, oracle: &LlmOracle, report_path: &Path) -> RunReport {
    let before = oracle.usage();
    let report = controller.run().await;
    let after = oracle.usage();
    tracing::info!(
        run_id = %report.run_id,
        input_tokens = after.input_tokens - before.input_tokens,
        output_tokens = after.output_tokens - before.output_tokens,
        "LLM token usage"
    );

    // The read flags are already set; a failed write only loses the artifact.
    if let Err(e) = write_report(&report, report_path).await {
        tracing::error!(path = %report_path.display(), error = %e, "Failed to write report");
    }
    report
}
