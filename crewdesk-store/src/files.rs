//! File record metadata.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::db::{utc_now, Database};
use crate::error::StoreError;

/// Durable metadata for an uploaded or generated file.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub file_id: String,
    pub team_id: i64,
    pub user_id: i64,
    pub project_id: Option<i64>,
    pub session_id: Option<String>,
    pub kind: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: String,
}

fn row_to_record(r: &rusqlite::Row<'_>) -> Result<FileRecord, rusqlite::Error> {
    Ok(FileRecord {
        file_id: r.get(0)?,
        team_id: r.get(1)?,
        user_id: r.get(2)?,
        project_id: r.get(3)?,
        session_id: r.get(4)?,
        kind: r.get(5)?,
        filename: r.get(6)?,
        content_type: r.get(7)?,
        size_bytes: r.get(8)?,
        created_at: r.get(9)?,
    })
}

const RECORD_COLUMNS: &str = "file_id, team_id, user_id, project_id, session_id, kind, filename, content_type, size_bytes, created_at";

impl Database {
    pub fn insert_file_record(&self, record: &FileRecord) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO file_records(
                    file_id, team_id, user_id, project_id, session_id,
                    kind, filename, content_type, size_bytes, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.file_id,
                    record.team_id,
                    record.user_id,
                    record.project_id,
                    record.session_id,
                    record.kind,
                    record.filename,
                    record.content_type,
                    record.size_bytes,
                    utc_now(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_file(&self, team_id: i64, file_id: &str) -> Result<Option<FileRecord>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM file_records WHERE file_id = ?1 AND team_id = ?2"),
                params![file_id, team_id],
                |r| row_to_record(r),
            )
            .optional()
        })
    }

    pub fn list_files(&self, team_id: i64, limit: usize) -> Result<Vec<FileRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM file_records
                 WHERE team_id = ?1 ORDER BY created_at DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![team_id, limit as i64], |r| row_to_record(r))?;
            rows.collect()
        })
    }

    /// Delete the row. The caller unlinks the file afterwards - record
    /// deletion precedes unlinking so a crash never leaves a live row
    /// pointing at nothing.
    pub fn delete_file_record(&self, team_id: i64, file_id: &str) -> Result<(), StoreError> {
        let deleted = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM file_records WHERE file_id = ?1 AND team_id = ?2",
                params![file_id, team_id],
            )
        })?;
        if deleted == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Lookup by id alone; token validation compares teams afterwards.
    pub fn get_file_any_team(&self, file_id: &str) -> Result<Option<FileRecord>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM file_records WHERE file_id = ?1"),
                params![file_id],
                |r| row_to_record(r),
            )
            .optional()
        })
    }

    /// Whether any file record exists for this id, regardless of team.
    pub fn file_record_exists(&self, file_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM file_records WHERE file_id = ?1",
                params![file_id],
                |r| r.get(0),
            )
            .optional()
        })?;
        Ok(found.is_some())
    }
}
