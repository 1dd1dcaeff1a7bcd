//! SQLite persistence for workflow sessions.
//!
//! A session is one row: the serialized [`WorkflowState`], the narration
//! log, and a little metadata for listing. Saves are idempotent upserts with
//! last-write-wins semantics; there are no merge rules. WAL mode is enabled
//! so a save never blocks a concurrent read.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension};

use crate::messages::MessageEntry;
use crate::state::WorkflowState;

/// One persisted workflow session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    /// Derived from the first uploaded file name.
    pub title: String,
    pub last_document_id: Option<String>,
    pub chat_state: WorkflowState,
    pub messages: Vec<MessageEntry>,
    pub updated_at: DateTime<Local>,
}

/// Listing row; the heavy state/message columns are not loaded.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub last_document_id: Option<String>,
    pub updated_at: DateTime<Local>,
}

/// Session database wrapper.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open (creating if needed) the session database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening session database {}", path.display()))?;

        // WAL mode for better concurrent access
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                last_document_id TEXT,
                chat_state TEXT NOT NULL,
                messages TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_updated_at
            ON sessions(updated_at DESC);

            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (1)",
            [],
        )?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.conn.lock().unwrap();
        let version: i32 =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })?;
        Ok(version)
    }

    /// Write (or overwrite) a session record. Idempotent: saving the same
    /// record twice leaves one row with identical content.
    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        let chat_state =
            serde_json::to_string(&record.chat_state).context("serializing workflow state")?;
        let messages =
            serde_json::to_string(&record.messages).context("serializing message log")?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO sessions (session_id, title, last_document_id, chat_state, messages, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(session_id) DO UPDATE SET
                title = excluded.title,
                last_document_id = excluded.last_document_id,
                chat_state = excluded.chat_state,
                messages = excluded.messages,
                updated_at = excluded.updated_at
            "#,
            params![
                record.session_id,
                record.title,
                record.last_document_id,
                chat_state,
                messages,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                r#"
                SELECT session_id, title, last_document_id, chat_state, messages, updated_at
                FROM sessions WHERE session_id = ?1
                "#,
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((session_id, title, last_document_id, chat_state, messages, updated_at)) = row
        else {
            return Ok(None);
        };

        Ok(Some(SessionRecord {
            session_id,
            title,
            last_document_id,
            chat_state: serde_json::from_str(&chat_state)
                .context("deserializing workflow state")?,
            messages: serde_json::from_str(&messages).context("deserializing message log")?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    /// All sessions, most recently updated first.
    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT session_id, title, last_document_id, updated_at
            FROM sessions ORDER BY updated_at DESC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (session_id, title, last_document_id, updated_at) = row?;
            sessions.push(SessionSummary {
                session_id,
                title,
                last_document_id,
                updated_at: parse_timestamp(&updated_at)?,
            });
        }
        Ok(sessions)
    }

    /// Delete a session; returns whether it existed.
    pub fn delete(&self, session_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(deleted > 0)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Local>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("parsing timestamp {raw}"))?
        .with_timezone(&Local))
}
