//! Classification oracle: text in, structured judgment out.
//!
//! One trait serves both stages. The policy variant of the request
//! selects the behavior, and the verdict variant mirrors it: a filter
//! policy yields a [`Judgment`], an extraction policy an [`Extraction`].

pub mod llm;

use async_trait::async_trait;

use crate::error::OracleError;
use crate::pipeline::types::{Extraction, ExtractionPolicy, FilterPolicy, Judgment};

pub use llm::LlmOracle;

/// Policy context for one oracle call.
#[derive(Debug, Clone, Copy)]
pub enum Policy<'a> {
    Filter(&'a FilterPolicy),
    Extraction(&'a ExtractionPolicy),
}

impl Policy<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Filter(_) => "judgment",
            Self::Extraction(_) => "extraction",
        }
    }
}

/// Oracle output, tagged by the policy that requested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Judgment(Judgment),
    Extraction(Extraction),
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Judgment(_) => "judgment",
            Self::Extraction(_) => "extraction",
        }
    }

    /// Unwrap a judgment, or report the mismatch.
    pub fn into_judgment(self) -> Result<Judgment, OracleError> {
        match self {
            Self::Judgment(j) => Ok(j),
            other => Err(OracleError::UnexpectedVerdict {
                expected: "judgment",
                got: other.label(),
            }),
        }
    }

    /// Unwrap an extraction, or report the mismatch.
    pub fn into_extraction(self) -> Result<Extraction, OracleError> {
        match self {
            Self::Extraction(e) => Ok(e),
            other => Err(OracleError::UnexpectedVerdict {
                expected: "extraction",
                got: other.label(),
            }),
        }
    }
}

/// The classification engine consumed by the triage and analysis stages.
///
/// Implementations must be safe to call concurrently; stages fan out
/// independent calls within a bounded window.
#[async_trait]
pub trait ClassificationOracle: Send + Sync {
    async fn classify(&self, text: &str, policy: Policy<'_>) -> Result<Verdict, OracleError>;
}
