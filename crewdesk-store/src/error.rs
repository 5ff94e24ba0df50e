//! Storage errors.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Row missing for the calling team; surfaces as HTTP 404.
    #[error("not found")]
    NotFound,

    /// Invalid or expired token, or token/team mismatch; surfaces as 401/403.
    #[error("unauthorized: {0}")]
    Auth(String),

    /// Write raced another writer; the caller retries.
    #[error("conflict: {0}")]
    Conflict(String),
}
