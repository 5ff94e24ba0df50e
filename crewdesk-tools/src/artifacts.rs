//! Artifact registration seam.
//!
//! Tools produce artifacts (documents, screenshots, prototype bundles) but
//! never touch the artifact root or the database directly; they go through
//! this trait. The storage layer provides the implementation and owns file
//! ids, tokens, and transactionality.

use async_trait::async_trait;

/// A new artifact to register.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    /// `image`, `file`, or `generated`.
    pub kind: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub team_id: i64,
    pub user_id: i64,
    pub session_id: Option<String>,
    pub project_id: Option<i64>,
}

/// What registration hands back to the tool.
#[derive(Debug, Clone)]
pub struct RegisteredArtifact {
    pub file_id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Tokenized absolute download URL.
    pub download_url: String,
    /// Tokenized inline preview URL, when the type is previewable.
    pub preview_url: Option<String>,
}

/// Bytes of a previously registered artifact.
#[derive(Debug, Clone)]
pub struct ArtifactContent {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Storage-side artifact operations available to tools.
#[async_trait]
pub trait ArtifactRegistrar: Send + Sync {
    /// Atomically persist bytes and the metadata row. On failure nothing
    /// survives: no file, no row.
    async fn register(&self, artifact: NewArtifact) -> Result<RegisteredArtifact, String>;

    /// Read an artifact registered under the same team.
    async fn read(&self, file_id: &str, team_id: i64) -> Result<ArtifactContent, String>;
}
