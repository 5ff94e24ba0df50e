//! JSON session snapshots for grep-style history search.
//!
//! After each committed turn the session's durable messages are mirrored,
//! best effort, to `data_dir/history/<team_id>/<session_id>.json`. The
//! search endpoint greps these files (and optionally the workspace) without
//! touching the database.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::error::StoreError;
use crate::sessions::MessageRow;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub session_id: String,
    pub line: String,
}

#[derive(Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

fn safe_component(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn team_dir(&self, team_id: i64) -> PathBuf {
        self.root.join(team_id.to_string())
    }

    fn session_path(&self, team_id: i64, session_id: &str) -> Option<PathBuf> {
        if !safe_component(session_id) {
            return None;
        }
        Some(self.team_dir(team_id).join(format!("{session_id}.json")))
    }

    /// Mirror a session's messages. Errors are swallowed by callers - the
    /// snapshot is advisory.
    pub async fn write(
        &self,
        team_id: i64,
        session_id: &str,
        title: &str,
        messages: &[MessageRow],
    ) -> Result<(), StoreError> {
        let Some(path) = self.session_path(team_id, session_id) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let snapshot = json!({
            "session_id": session_id,
            "team_id": team_id,
            "title": title,
            "messages": messages,
        });
        tokio::fs::write(&path, serde_json::to_vec_pretty(&snapshot).unwrap_or_default()).await?;
        debug!(%session_id, "session snapshot written");
        Ok(())
    }

    pub async fn delete(&self, team_id: i64, session_id: &str) {
        if let Some(path) = self.session_path(team_id, session_id) {
            let _ = tokio::fs::remove_file(path).await;
        }
    }

    /// Case-insensitive substring search over the team's snapshots.
    pub async fn search(
        &self,
        team_id: i64,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();
        let mut dir = match tokio::fs::read_dir(self.team_dir(team_id)).await {
            Ok(dir) => dir,
            Err(_) => return Ok(hits),
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            if hits.len() >= limit {
                break;
            }
            let path = entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let session_id = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            for line in content.lines() {
                if hits.len() >= limit {
                    break;
                }
                if line.to_lowercase().contains(&needle) {
                    hits.push(SearchHit {
                        session_id: session_id.clone(),
                        line: line.trim().chars().take(400).collect(),
                    });
                }
            }
        }
        Ok(hits)
    }
}

/// Grep files under a workspace subtree. Shared by `/history/search` when
/// `include_workspace` is set.
pub async fn search_workspace(
    root: &Path,
    query: &str,
    limit: usize,
) -> Result<Vec<(String, String)>, StoreError> {
    let needle = query.to_lowercase();
    let mut hits: Vec<(String, String)> = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    const MAX_FILE_BYTES: u64 = 1_000_000;

    while let Some(dir) = stack.pop() {
        if hits.len() >= limit {
            break;
        }
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if hits.len() >= limit {
                break;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            let small_enough = entry
                .metadata()
                .await
                .map(|m| m.len() <= MAX_FILE_BYTES)
                .unwrap_or(false);
            if !small_enough {
                continue;
            }
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            for line in content.lines() {
                if hits.len() >= limit {
                    break;
                }
                if line.to_lowercase().contains(&needle) {
                    hits.push((rel.clone(), line.trim().chars().take(400).collect()));
                }
            }
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn message(role: &str, content: &str) -> MessageRow {
        MessageRow {
            id: 1,
            ordinal: 1,
            role: role.to_string(),
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
            attachments: vec![],
            events: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_write_and_search() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store
            .write(1, "abc123", "t", &[message("user", "find the gateway config")])
            .await
            .unwrap();

        let hits = store.search(1, "GATEWAY", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].session_id, "abc123");

        // Other teams see nothing.
        assert!(store.search(2, "gateway", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_respects_limit() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let messages: Vec<MessageRow> =
            (0..20).map(|i| message("user", &format!("needle {i}"))).collect();
        store.write(1, "s1", "t", &messages).await.unwrap();

        let hits = store.search(1, "needle", 5).await.unwrap();
        assert_eq!(hits.len(), 5);
    }

    #[tokio::test]
    async fn test_delete_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.write(1, "s1", "t", &[message("user", "x")]).await.unwrap();
        store.delete(1, "s1").await;
        assert!(store.search(1, "x", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsafe_session_id_not_written() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store
            .write(1, "../escape", "t", &[message("user", "x")])
            .await
            .unwrap();
        assert!(!dir.path().join("../escape.json").exists());
    }

    #[tokio::test]
    async fn test_workspace_search() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() { magic_token(); }").unwrap();
        std::fs::write(dir.path().join(".hidden"), "magic_token").unwrap();

        let hits = search_workspace(dir.path(), "magic_token", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "src/main.rs");
    }
}
