//! Mail source adapters.
//!
//! The pipeline only sees the [`MailSource`] trait: list unread, fetch a
//! body on demand, mark one message read. Credentials and connection
//! handling stay inside the adapter.

pub mod clean;
pub mod imap;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::pipeline::types::Message;

pub use imap::{ImapConfig, ImapMailSource};

/// Trait for mail source adapters: pure I/O, no triage logic.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Adapter name for logging (e.g. "imap").
    fn name(&self) -> &str;

    /// List up to `limit` unread messages without changing their read state.
    ///
    /// Fails with [`SourceError::Unavailable`] when the service cannot be
    /// reached.
    async fn list_unread(&self, limit: usize) -> Result<Vec<Message>, SourceError>;

    /// Fetch the full body of a message.
    ///
    /// Fails with [`SourceError::NotFound`] when the id no longer exists.
    async fn fetch_body(&self, message_id: &str) -> Result<String, SourceError>;

    /// Mark a single message read.
    async fn mark_read(&self, message_id: &str) -> Result<(), SourceError>;
}
