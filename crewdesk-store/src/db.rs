//! SQLite connection handling and schema migration.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::StoreError;

/// Shared handle over one SQLite connection.
///
/// Statements are short; the connection sits behind a mutex and runs with
/// WAL journaling so readers do not block the writer.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run a closure with the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let conn = self.lock();
        Ok(f(&conn)?)
    }

    /// Run a closure inside a transaction; commit on Ok, rollback on Err.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Idempotent schema creation.
fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS teams (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memberships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            team_id INTEGER NOT NULL REFERENCES teams(id),
            role TEXT NOT NULL DEFAULT 'member',
            UNIQUE(user_id, team_id)
        );

        CREATE TABLE IF NOT EXISTS team_settings (
            team_id INTEGER PRIMARY KEY REFERENCES teams(id),
            workspace_path TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS team_projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            team_id INTEGER NOT NULL REFERENCES teams(id),
            name TEXT NOT NULL,
            slug TEXT NOT NULL DEFAULT '',
            path TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS team_skills (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            team_id INTEGER NOT NULL REFERENCES teams(id),
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS team_requirements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            team_id INTEGER NOT NULL REFERENCES teams(id),
            project_id INTEGER,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'incoming',
            priority TEXT NOT NULL DEFAULT 'medium',
            source_team TEXT NOT NULL DEFAULT '',
            delivery_state TEXT,
            delivery_from_team_id INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_sessions (
            session_id TEXT PRIMARY KEY,
            team_id INTEGER NOT NULL REFERENCES teams(id),
            user_id INTEGER NOT NULL,
            role TEXT NOT NULL DEFAULT 'general',
            provider TEXT NOT NULL DEFAULT '',
            model TEXT NOT NULL DEFAULT '',
            project_id INTEGER,
            title TEXT NOT NULL DEFAULT '',
            remote_session_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            team_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            ordinal INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            tool_calls_json TEXT,
            tool_call_id TEXT,
            attachments_json TEXT,
            events_json TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(session_id, ordinal)
        );

        CREATE TABLE IF NOT EXISTS file_records (
            file_id TEXT PRIMARY KEY,
            team_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            project_id INTEGER,
            session_id TEXT,
            kind TEXT NOT NULL DEFAULT 'file',
            filename TEXT NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'application/octet-stream',
            size_bytes INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_attachments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id INTEGER NOT NULL REFERENCES chat_messages(id),
            file_id TEXT NOT NULL,
            direction TEXT NOT NULL CHECK (direction IN ('input', 'output'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session ON chat_messages(session_id, ordinal);
        CREATE INDEX IF NOT EXISTS idx_messages_team ON chat_messages(team_id);
        CREATE INDEX IF NOT EXISTS idx_sessions_team ON chat_sessions(team_id, updated_at);
        CREATE INDEX IF NOT EXISTS idx_files_team ON file_records(team_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_requirements_team ON team_requirements(team_id, status);
        "#,
    )
}

/// Wall-clock UTC timestamp for stored rows.
pub fn utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
