//! Durable store: message log and follow-up records (SQLite).
//!
//! Two tables: `messages` is an append-only log of inbound messages, used only
//! to answer "has this contact spoken to us since timestamp T?"; `followups`
//! holds missed-contact events awaiting a notify-or-skip decision. Timestamps
//! are unix milliseconds. Rows in `followups` are never deleted; resolved
//! records remain as an audit trail.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

/// Body of the log entry the missed-call ingress writes for the event itself.
/// Excluded from reply detection so a system-generated entry never counts as
/// a genuine reply.
pub const MISSED_CALL_SENTINEL: &str = "__missed_call__";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  from_number TEXT NOT NULL,
  body TEXT NOT NULL DEFAULT '',
  received_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_from ON messages(from_number, received_at);

CREATE TABLE IF NOT EXISTS followups (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  from_number TEXT NOT NULL,
  missed_at INTEGER NOT NULL,
  done INTEGER NOT NULL DEFAULT 0,
  attempts INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_followups_done ON followups(done, missed_at);
"#;

/// Storage failure (transient; the engine retries on the next tick).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("creating database directory: {0}")]
    CreateDir(#[from] std::io::Error),
}

/// Follow-up lifecycle. `Resolved` is terminal; there is no way back to
/// `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpState {
    Pending,
    Resolved,
}

/// A missed-contact event awaiting a notify-or-skip decision.
#[derive(Debug, Clone)]
pub struct FollowUp {
    pub id: i64,
    /// Normalized contact identifier (digits only).
    pub from_number: String,
    pub missed_at: DateTime<Utc>,
    pub state: FollowUpState,
    /// Failed notification attempts so far. Used only for loud logging.
    pub attempts: u32,
}

/// One inbound message from a contact. Immutable once created.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: i64,
    pub from_number: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Follow-up records: create, list pending past the grace window, resolve.
#[async_trait]
pub trait FollowupStore: Send + Sync {
    /// Open a Pending follow-up for a normalized number, missed_at = now.
    async fn create(&self, from_number: &str) -> Result<FollowUp, StorageError>;

    /// All Pending follow-ups whose missed_at is at least `older_than` in the
    /// past. Order is arbitrary.
    async fn list_pending(&self, older_than: Duration) -> Result<Vec<FollowUp>, StorageError>;

    /// Transition a record to Resolved. Resolving an already-resolved record
    /// is a no-op, not an error.
    async fn mark_resolved(&self, id: i64) -> Result<(), StorageError>;

    /// Record one failed notification attempt; returns the new attempt count.
    async fn record_attempt(&self, id: i64) -> Result<u32, StorageError>;
}

/// Append-only inbound message log.
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn append(&self, from_number: &str, body: &str) -> Result<InboundMessage, StorageError>;

    /// True iff at least one message from `from_number` was received strictly
    /// after `since`, not counting sentinel entries.
    async fn exists_since(
        &self,
        from_number: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StorageError>;
}

fn to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// SQLite-backed implementation of both store ports. One connection guarded
/// by a mutex; a single engine instance owns the store exclusively.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file, creating the parent directory if
    /// needed, and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database (for tests).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fetch one follow-up by id (resolved or not).
    pub async fn get_followup(&self, id: i64) -> Result<Option<FollowUp>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, from_number, missed_at, done, attempts FROM followups WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], row_to_followup)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Shift a follow-up's missed_at into the past (test clock control).
    #[cfg(test)]
    pub async fn backdate_followup(&self, id: i64, by: Duration) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE followups SET missed_at = missed_at - ?1 WHERE id = ?2",
            params![by.as_millis() as i64, id],
        )?;
        Ok(())
    }
}

fn row_to_followup(row: &rusqlite::Row<'_>) -> rusqlite::Result<FollowUp> {
    let done: i64 = row.get(3)?;
    Ok(FollowUp {
        id: row.get(0)?,
        from_number: row.get(1)?,
        missed_at: to_datetime(row.get(2)?),
        state: if done == 0 {
            FollowUpState::Pending
        } else {
            FollowUpState::Resolved
        },
        attempts: row.get::<_, i64>(4)? as u32,
    })
}

#[async_trait]
impl FollowupStore for SqliteStore {
    async fn create(&self, from_number: &str) -> Result<FollowUp, StorageError> {
        let now = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO followups (from_number, missed_at) VALUES (?1, ?2)",
            params![from_number, now.timestamp_millis()],
        )?;
        Ok(FollowUp {
            id: conn.last_insert_rowid(),
            from_number: from_number.to_string(),
            missed_at: now,
            state: FollowUpState::Pending,
            attempts: 0,
        })
    }

    async fn list_pending(&self, older_than: Duration) -> Result<Vec<FollowUp>, StorageError> {
        let cutoff = Utc::now().timestamp_millis() - older_than.as_millis() as i64;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, from_number, missed_at, done, attempts FROM followups
             WHERE done = 0 AND missed_at <= ?1",
        )?;
        let rows = stmt.query_map(params![cutoff], row_to_followup)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn mark_resolved(&self, id: i64) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;
        conn.execute("UPDATE followups SET done = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn record_attempt(&self, id: i64) -> Result<u32, StorageError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE followups SET attempts = attempts + 1 WHERE id = ?1",
            params![id],
        )?;
        let attempts: i64 = conn.query_row(
            "SELECT attempts FROM followups WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(attempts as u32)
    }
}

#[async_trait]
impl MessageLog for SqliteStore {
    async fn append(&self, from_number: &str, body: &str) -> Result<InboundMessage, StorageError> {
        let now = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO messages (from_number, body, received_at) VALUES (?1, ?2, ?3)",
            params![from_number, body, now.timestamp_millis()],
        )?;
        Ok(InboundMessage {
            id: conn.last_insert_rowid(),
            from_number: from_number.to_string(),
            body: body.to_string(),
            received_at: now,
        })
    }

    async fn exists_since(
        &self,
        from_number: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let conn = self.conn.lock().await;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM messages
                 WHERE from_number = ?1 AND received_at > ?2 AND body != ?3
                 LIMIT 1",
                params![from_number, since.timestamp_millis(), MISSED_CALL_SENTINEL],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(found.is_some())
    }
}
