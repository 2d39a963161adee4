//! Local reminder store: the reminder sink used when no calendar is
//! configured. Reminders land in a libSQL table.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ReminderSink, failed};
use crate::error::SinkError;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS reminders (
        id TEXT PRIMARY KEY,
        message_id TEXT NOT NULL,
        due_at TEXT NOT NULL,
        note TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_reminders_due ON reminders(due_at);
"#;

/// A reminder as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReminder {
    pub id: Uuid,
    pub message_id: String,
    pub due_at: DateTime<Utc>,
    pub note: String,
}

pub struct LocalReminderStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LocalReminderStore {
    /// Open (or create) a local database file.
    pub async fn new_local(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| failed("local", format!("Failed to create database directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| failed("local", format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_db(db).await?;
        info!(path = %path.display(), "Reminder store opened");
        Ok(store)
    }

    /// In-memory store (for tests).
    pub async fn new_memory() -> Result<Self, SinkError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| failed("local", format!("Failed to create in-memory database: {e}")))?;
        Self::from_db(db).await
    }

    async fn from_db(db: LibSqlDatabase) -> Result<Self, SinkError> {
        let conn = db
            .connect()
            .map_err(|e| failed("local", format!("Failed to create connection: {e}")))?;
        conn.execute_batch(SCHEMA)
            .await
            .map_err(|e| failed("local", format!("Failed to create schema: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Reminders due at or after `from`, soonest first.
    pub async fn upcoming(&self, from: DateTime<Utc>) -> Result<Vec<StoredReminder>, SinkError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, message_id, due_at, note FROM reminders WHERE due_at >= ?1 ORDER BY due_at",
                params![from.to_rfc3339()],
            )
            .await
            .map_err(|e| failed("local", format!("upcoming: {e}")))?;

        let mut reminders = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| failed("local", format!("upcoming: {e}")))?
        {
            reminders.push(
                row_to_reminder(&row).map_err(|e| failed("local", format!("row parse: {e}")))?,
            );
        }
        Ok(reminders)
    }
}

fn row_to_reminder(row: &libsql::Row) -> Result<StoredReminder, libsql::Error> {
    let id: String = row.get(0)?;
    let due_at: String = row.get(2)?;
    Ok(StoredReminder {
        id: id.parse().unwrap_or_default(),
        message_id: row.get(1)?,
        due_at: DateTime::parse_from_rfc3339(&due_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
        note: row.get(3)?,
    })
}

#[async_trait]
impl ReminderSink for LocalReminderStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn set_reminder(
        &self,
        message_id: &str,
        due: DateTime<Utc>,
        note: &str,
    ) -> Result<(), SinkError> {
        let id = Uuid::new_v4();
        self.conn
            .execute(
                "INSERT INTO reminders (id, message_id, due_at, note, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    message_id,
                    due.to_rfc3339(),
                    note,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| failed("local", format!("insert reminder: {e}")))?;

        debug!(reminder_id = %id, message_id, due = %due, "Reminder stored locally");
        Ok(())
    }
}
