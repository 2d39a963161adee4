//! The triage pipeline.
//!
//! Every run flows strictly forward through four stages:
//! 1. [`SubjectTriage`]: oracle judgment per subject, fail-open
//! 2. [`BodyAnalysis`]: body fetch and extraction, one [`Finding`] per candidate
//! 3. [`ActionDispatcher`]: reminders and notifications, at most once per message
//! 4. [`Finalizer`]: mark every fetched message read, assemble the report
//!
//! [`PipelineController`] sequences them and guarantees finalization.

pub mod analysis;
pub mod controller;
pub mod dispatch;
pub mod finalize;
pub mod retry;
pub mod rules;
pub mod triage;
pub mod types;

pub use analysis::BodyAnalysis;
pub use controller::{PipelineController, PipelineSettings};
pub use dispatch::ActionDispatcher;
pub use finalize::Finalizer;
pub use retry::RetryPolicy;
pub use triage::{SubjectTriage, TriageDecision, TriageOutcome};
pub use types::{Finding, Message, RunReport};
