//! Artifact store: opaque files under one root, tokenized retrieval, GC.
//!
//! File ids are minted here: a 22-character base62 token carrying the
//! original extension (`a1B2…xY.pptx`). Registration is atomic - bytes are
//! written to a temp name, renamed into place, and the metadata row is
//! inserted; if the insert fails the file is unlinked. Download tokens are
//! short-lived JWTs bound to `(file_id, team_id)`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::db::{utc_now, Database};
use crate::error::StoreError;
use crate::files::FileRecord;

const FILE_ID_LEN: usize = 22;
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Claims for a download token.
#[derive(Debug, Serialize, Deserialize)]
struct DownloadClaims {
    scope: String,
    fid: String,
    tid: i64,
    iat: i64,
    exp: i64,
}

/// Input for registration.
#[derive(Debug, Clone)]
pub struct NewArtifactRecord {
    pub kind: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub team_id: i64,
    pub user_id: i64,
    pub project_id: Option<i64>,
    pub session_id: Option<String>,
}

/// A registered artifact with its tokenized URLs.
#[derive(Debug, Clone, Serialize)]
pub struct StoredArtifact {
    pub file_id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub download_url: String,
    pub preview_url: Option<String>,
}

/// Content types served inline by the preview endpoint.
fn previewable(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/") || ct.starts_with("image/") || ct.contains("html") || ct.contains("json")
}

/// Valid stored file id: our minted shape, or at least nothing that can
/// traverse out of the artifact root.
fn valid_file_id(file_id: &str) -> bool {
    !file_id.is_empty()
        && file_id.len() <= 200
        && !file_id.contains("..")
        && file_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
        && !file_id.starts_with('.')
}

pub struct ArtifactStore {
    root: PathBuf,
    db: Database,
    jwt_secret: String,
    public_base_url: String,
    token_ttl: Duration,
}

impl ArtifactStore {
    pub fn new(
        root: impl Into<PathBuf>,
        db: Database,
        jwt_secret: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            db,
            jwt_secret: jwt_secret.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mint an opaque URL-safe id preserving the filename extension.
    pub fn new_file_id(filename: &str) -> String {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(FILE_ID_LEN)
            .map(char::from)
            .collect();
        match Path::new(filename).extension().and_then(|e| e.to_str()) {
            Some(ext) if !ext.is_empty() => format!("{token}.{}", ext.to_ascii_lowercase()),
            _ => token,
        }
    }

    fn path_for(&self, file_id: &str) -> Result<PathBuf, StoreError> {
        if !valid_file_id(file_id) {
            return Err(StoreError::NotFound);
        }
        Ok(self.root.join(file_id))
    }

    /// Atomically persist bytes plus the metadata row.
    pub async fn register(&self, artifact: NewArtifactRecord) -> Result<StoredArtifact, StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let file_id = Self::new_file_id(&artifact.filename);
        let final_path = self.root.join(&file_id);
        let tmp_path = self.root.join(format!(".tmp-{file_id}"));

        tokio::fs::write(&tmp_path, &artifact.bytes).await?;
        if let Err(err) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        let record = FileRecord {
            file_id: file_id.clone(),
            team_id: artifact.team_id,
            user_id: artifact.user_id,
            project_id: artifact.project_id,
            session_id: artifact.session_id.clone(),
            kind: artifact.kind.clone(),
            filename: artifact.filename.clone(),
            content_type: artifact.content_type.clone(),
            size_bytes: artifact.bytes.len() as i64,
            created_at: utc_now(),
        };
        if let Err(err) = self.db.insert_file_record(&record) {
            // No row, no file.
            let _ = tokio::fs::remove_file(&final_path).await;
            return Err(err);
        }

        debug!(%file_id, kind = %artifact.kind, "registered artifact");
        let token = self.issue_download_token(&file_id, artifact.team_id)?;
        Ok(StoredArtifact {
            download_url: self.download_url(&file_id, &token),
            preview_url: previewable(&artifact.content_type)
                .then(|| self.preview_url(&file_id, &token)),
            file_id,
            filename: artifact.filename,
            content_type: artifact.content_type,
            size_bytes: artifact.bytes.len() as u64,
        })
    }

    pub fn download_url(&self, file_id: &str, token: &str) -> String {
        format!("{}/files/{file_id}?token={token}", self.public_base_url)
    }

    pub fn preview_url(&self, file_id: &str, token: &str) -> String {
        format!("{}/files/preview/{file_id}?token={token}", self.public_base_url)
    }

    /// Short-lived signed token bound to `(file_id, team_id)`.
    pub fn issue_download_token(&self, file_id: &str, team_id: i64) -> Result<String, StoreError> {
        let now = chrono::Utc::now().timestamp();
        let claims = DownloadClaims {
            scope: "download".to_string(),
            fid: file_id.to_string(),
            tid: team_id,
            iat: now,
            exp: now + self.token_ttl.as_secs() as i64,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| StoreError::Auth(e.to_string()))
    }

    fn decode_token(&self, token: &str, file_id: &str) -> Result<i64, StoreError> {
        let data = jsonwebtoken::decode::<DownloadClaims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| StoreError::Auth(format!("invalid download token: {e}")))?;
        if data.claims.scope != "download" {
            return Err(StoreError::Auth("invalid token scope".to_string()));
        }
        if data.claims.fid != file_id {
            return Err(StoreError::Auth("token does not match file".to_string()));
        }
        Ok(data.claims.tid)
    }

    /// Resolve a tokenized download to `(path, content_type, filename)`.
    ///
    /// A token minted for a sibling team fails authorization, not lookup -
    /// the file exists, the caller's team just doesn't own it.
    pub fn resolve_for_download(
        &self,
        file_id: &str,
        token: &str,
    ) -> Result<(PathBuf, String, String), StoreError> {
        let team_id = self.decode_token(token, file_id)?;
        let record = self
            .db
            .get_file_any_team(file_id)?
            .ok_or(StoreError::NotFound)?;
        if record.team_id != team_id {
            return Err(StoreError::Auth("token team mismatch".to_string()));
        }
        let path = self.path_for(file_id)?;
        if !path.is_file() {
            return Err(StoreError::NotFound);
        }
        Ok((path, record.content_type, record.filename))
    }

    /// Read bytes for a team-scoped consumer (no token; the principal's
    /// team is the authority).
    pub async fn read_for_team(
        &self,
        file_id: &str,
        team_id: i64,
    ) -> Result<(FileRecord, Vec<u8>), StoreError> {
        let record = self
            .db
            .get_file(team_id, file_id)?
            .ok_or(StoreError::NotFound)?;
        let bytes = tokio::fs::read(self.path_for(file_id)?).await?;
        Ok((record, bytes))
    }

    /// Delete an artifact: row first, then the file.
    pub async fn delete(&self, file_id: &str, team_id: i64) -> Result<(), StoreError> {
        self.db.delete_file_record(team_id, file_id)?;
        let _ = tokio::fs::remove_file(self.path_for(file_id)?).await;
        Ok(())
    }

    /// Background sweep: unlink files older than `outputs_ttl` whose row
    /// is gone. Never touches a file with a live record.
    pub async fn gc_sweep(&self, outputs_ttl: Duration) -> Result<usize, StoreError> {
        let mut removed = 0usize;
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(_) => return Ok(0),
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let age = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|m| m.elapsed().ok());
            let old_enough = age.map(|a| a > outputs_ttl).unwrap_or(false);
            if !old_enough {
                continue;
            }
            if self.db.file_record_exists(&name)? {
                continue;
            }
            if tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            } else {
                warn!(file = %name, "gc sweep failed to remove file");
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ArtifactStore {
        let db = Database::open_in_memory().unwrap();
        ArtifactStore::new(dir.path(), db, "secret", "http://localhost:8080")
    }

    fn artifact(team_id: i64) -> NewArtifactRecord {
        NewArtifactRecord {
            kind: "generated".to_string(),
            filename: "report.html".to_string(),
            content_type: "text/html".to_string(),
            bytes: b"<html></html>".to_vec(),
            team_id,
            user_id: 1,
            project_id: None,
            session_id: Some("s1".to_string()),
        }
    }

    // ==================== File ids ====================

    #[test]
    fn test_file_id_shape() {
        let id = ArtifactStore::new_file_id("deck.PPTX");
        assert!(id.ends_with(".pptx"));
        let stem = id.trim_end_matches(".pptx");
        assert_eq!(stem.len(), 22);
        assert!(stem.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_file_id_without_extension() {
        let id = ArtifactStore::new_file_id("README");
        assert_eq!(id.len(), 22);
    }

    #[test]
    fn test_file_id_validation() {
        assert!(valid_file_id("a1B2c3.pptx"));
        assert!(!valid_file_id("../../etc/passwd"));
        assert!(!valid_file_id(".hidden"));
        assert!(!valid_file_id("a/b.txt"));
        assert!(!valid_file_id(""));
    }

    // ==================== Register ====================

    #[tokio::test]
    async fn test_register_writes_file_and_row() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stored = store.register(artifact(7)).await.unwrap();

        assert!(dir.path().join(&stored.file_id).is_file());
        assert!(stored.download_url.contains(&stored.file_id));
        assert!(stored.preview_url.is_some());
        assert!(store.db.get_file(7, &stored.file_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_same_bytes_twice_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let first = store.register(artifact(7)).await.unwrap();
        let second = store.register(artifact(7)).await.unwrap();
        assert_ne!(first.file_id, second.file_id);
    }

    // ==================== Tokens ====================

    #[tokio::test]
    async fn test_download_token_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stored = store.register(artifact(7)).await.unwrap();

        let token = store.issue_download_token(&stored.file_id, 7).unwrap();
        let (path, content_type, filename) =
            store.resolve_for_download(&stored.file_id, &token).unwrap();
        assert!(path.is_file());
        assert_eq!(content_type, "text/html");
        assert_eq!(filename, "report.html");
    }

    #[tokio::test]
    async fn test_sibling_team_token_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stored = store.register(artifact(7)).await.unwrap();

        // A token minted for team 8 fails authorization - the file
        // belongs to team 7.
        let token = store.issue_download_token(&stored.file_id, 8).unwrap();
        assert!(matches!(
            store.resolve_for_download(&stored.file_id, &token),
            Err(StoreError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_token_for_other_file_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stored = store.register(artifact(7)).await.unwrap();
        let other = store.register(artifact(7)).await.unwrap();

        let token = store.issue_download_token(&other.file_id, 7).unwrap();
        assert!(matches!(
            store.resolve_for_download(&stored.file_id, &token),
            Err(StoreError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stored = store.register(artifact(7)).await.unwrap();
        let result = store.resolve_for_download(&stored.file_id, "not-a-token");
        assert!(matches!(result, Err(StoreError::Auth(_))));
    }

    // ==================== Delete / GC ====================

    #[tokio::test]
    async fn test_delete_removes_row_then_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stored = store.register(artifact(7)).await.unwrap();
        store.delete(&stored.file_id, 7).await.unwrap();
        assert!(!dir.path().join(&stored.file_id).exists());
        assert!(store.db.get_file(7, &stored.file_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_gc_never_deletes_live_rows() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stored = store.register(artifact(7)).await.unwrap();

        // Everything is "old" with a zero TTL, but the row is live.
        let removed = store.gc_sweep(Duration::from_secs(0)).await.unwrap();
        assert_eq!(removed, 0);
        assert!(dir.path().join(&stored.file_id).exists());
    }

    #[tokio::test]
    async fn test_gc_removes_orphaned_old_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(dir.path().join("orphan.bin"), b"x").unwrap();

        let removed = store.gc_sweep(Duration::from_secs(0)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("orphan.bin").exists());
    }

    #[tokio::test]
    async fn test_read_for_team_enforces_tenancy() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stored = store.register(artifact(7)).await.unwrap();

        assert!(store.read_for_team(&stored.file_id, 7).await.is_ok());
        assert!(matches!(
            store.read_for_team(&stored.file_id, 8).await,
            Err(StoreError::NotFound)
        ));
    }
}
