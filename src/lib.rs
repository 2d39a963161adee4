//! Inbox triage: scan unread mail, pick out what matters, extract the
//! actionable detail, raise reminders and notifications, mark mail read.

pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod oracle;
pub mod pipeline;
pub mod report;
pub mod sinks;
pub mod source;
