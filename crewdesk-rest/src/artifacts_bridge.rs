//! Adapter between the tools' artifact seam and the storage layer.

use async_trait::async_trait;
use crewdesk_store::artifacts::{ArtifactStore, NewArtifactRecord};
use crewdesk_tools::artifacts::{ArtifactContent, ArtifactRegistrar, NewArtifact, RegisteredArtifact};
use std::sync::Arc;

/// Lets tool handlers register and read artifacts without knowing the
/// storage layer.
pub struct StoreArtifactRegistrar {
    store: Arc<ArtifactStore>,
}

impl StoreArtifactRegistrar {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ArtifactRegistrar for StoreArtifactRegistrar {
    async fn register(&self, artifact: NewArtifact) -> Result<RegisteredArtifact, String> {
        let stored = self
            .store
            .register(NewArtifactRecord {
                kind: artifact.kind,
                filename: artifact.filename,
                content_type: artifact.content_type,
                bytes: artifact.bytes,
                team_id: artifact.team_id,
                user_id: artifact.user_id,
                project_id: artifact.project_id,
                session_id: artifact.session_id,
            })
            .await
            .map_err(|e| e.to_string())?;
        Ok(RegisteredArtifact {
            file_id: stored.file_id,
            filename: stored.filename,
            content_type: stored.content_type,
            size_bytes: stored.size_bytes,
            download_url: stored.download_url,
            preview_url: stored.preview_url,
        })
    }

    async fn read(&self, file_id: &str, team_id: i64) -> Result<ArtifactContent, String> {
        let (record, bytes) = self
            .store
            .read_for_team(file_id, team_id)
            .await
            .map_err(|e| match e {
                crewdesk_store::StoreError::NotFound => "file not found".to_string(),
                other => other.to_string(),
            })?;
        Ok(ArtifactContent {
            filename: record.filename,
            content_type: record.content_type,
            bytes,
        })
    }
}
