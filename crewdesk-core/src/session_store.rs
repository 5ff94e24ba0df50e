//! In-memory session cache.
//!
//! Live sessions are held in a keyed map of slots; each slot carries its own
//! `tokio::sync::Mutex` so concurrent turns for the same `session_id`
//! serialize while different sessions run in parallel. The outer map lock is
//! only held for lookups and pruning, never across a turn.
//!
//! Eviction: TTL by last-seen on every access, then LRU overflow once the
//! map exceeds `max_sessions`. Durable history is unaffected - an evicted
//! session rehydrates from the store on its next turn.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::session::SessionState;
use crate::types::SessionId;

#[derive(Debug, Clone, Copy)]
pub struct SessionCacheConfig {
    /// Idle time before a session is dropped from memory (0 = no TTL).
    pub ttl: Duration,
    /// Maximum live sessions (0 = unbounded).
    pub max_sessions: usize,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120 * 60),
            max_sessions: 200,
        }
    }
}

/// One live session: per-session lock plus bookkeeping readable without it.
#[derive(Debug)]
pub struct SessionSlot {
    pub team_id: i64,
    /// Held for the whole turn, from entry until persistence commits.
    pub state: Mutex<SessionState>,
    /// Millis since cache epoch; updated on every access.
    last_seen: AtomicU64,
}

impl SessionSlot {
    fn mark_seen(&self, epoch: Instant) {
        self.last_seen
            .store(epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn last_seen_ms(&self) -> u64 {
        self.last_seen.load(Ordering::Relaxed)
    }
}

/// Errors from cache access.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionCacheError {
    /// The id exists but belongs to another team; callers surface NotFound.
    #[error("session not found")]
    NotOwned,
}

pub struct SessionCache {
    config: SessionCacheConfig,
    epoch: Instant,
    inner: Mutex<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionCache {
    pub fn new(config: SessionCacheConfig) -> Self {
        Self {
            config,
            epoch: Instant::now(),
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn prune_locked(&self, map: &mut HashMap<String, Arc<SessionSlot>>) {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let ttl_ms = self.config.ttl.as_millis() as u64;
        if ttl_ms > 0 {
            map.retain(|_, slot| now_ms.saturating_sub(slot.last_seen_ms()) <= ttl_ms);
        }
        if self.config.max_sessions > 0 && map.len() > self.config.max_sessions {
            let mut by_seen: Vec<(String, u64)> = map
                .iter()
                .map(|(id, slot)| (id.clone(), slot.last_seen_ms()))
                .collect();
            by_seen.sort_by_key(|(_, seen)| *seen);
            let excess = map.len() - self.config.max_sessions;
            for (id, _) in by_seen.into_iter().take(excess) {
                map.remove(&id);
            }
        }
    }

    /// Fetch a live session for the calling team.
    ///
    /// Returns `Ok(None)` on a miss (the caller may rehydrate and
    /// `insert`), and `Err(NotOwned)` when the id is live under another
    /// team.
    pub async fn get(
        &self,
        session_id: &SessionId,
        team_id: i64,
    ) -> Result<Option<Arc<SessionSlot>>, SessionCacheError> {
        let mut map = self.inner.lock().await;
        self.prune_locked(&mut map);
        match map.get(session_id.as_str()) {
            Some(slot) if slot.team_id == team_id => {
                slot.mark_seen(self.epoch);
                Ok(Some(slot.clone()))
            }
            Some(_) => Err(SessionCacheError::NotOwned),
            None => Ok(None),
        }
    }

    /// Insert a freshly built session, resolving creation races by
    /// returning whichever slot won.
    pub async fn insert(
        &self,
        state: SessionState,
    ) -> Result<Arc<SessionSlot>, SessionCacheError> {
        let team_id = state.team_id;
        let id = state.session_id.as_str().to_string();
        let mut map = self.inner.lock().await;
        self.prune_locked(&mut map);
        if let Some(existing) = map.get(&id) {
            if existing.team_id != team_id {
                return Err(SessionCacheError::NotOwned);
            }
            existing.mark_seen(self.epoch);
            return Ok(existing.clone());
        }
        let slot = Arc::new(SessionSlot {
            team_id,
            state: Mutex::new(state),
            last_seen: AtomicU64::new(0),
        });
        slot.mark_seen(self.epoch);
        map.insert(id, slot.clone());
        self.prune_locked(&mut map);
        Ok(slot)
    }

    /// Drop a session from memory (durable rows untouched).
    pub async fn remove(&self, session_id: &SessionId) {
        let mut map = self.inner.lock().await;
        map.remove(session_id.as_str());
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn state(id: &str, team: i64) -> SessionState {
        SessionState::new(
            SessionId(id.to_string()),
            team,
            1,
            "general",
            "mock",
            "test-model",
            PathBuf::from("/tmp"),
        )
    }

    fn cache(max: usize, ttl: Duration) -> SessionCache {
        SessionCache::new(SessionCacheConfig {
            ttl,
            max_sessions: max,
        })
    }

    #[tokio::test]
    async fn test_insert_then_get() {
        let cache = cache(10, Duration::from_secs(60));
        cache.insert(state("s1", 7)).await.unwrap();
        let slot = cache.get(&SessionId("s1".into()), 7).await.unwrap().unwrap();
        assert_eq!(slot.team_id, 7);
    }

    #[tokio::test]
    async fn test_team_mismatch_is_not_owned() {
        let cache = cache(10, Duration::from_secs(60));
        cache.insert(state("s1", 7)).await.unwrap();
        let err = cache.get(&SessionId("s1".into()), 8).await.unwrap_err();
        assert_eq!(err, SessionCacheError::NotOwned);
    }

    #[tokio::test]
    async fn test_insert_race_returns_winner() {
        let cache = cache(10, Duration::from_secs(60));
        let first = cache.insert(state("s1", 7)).await.unwrap();
        {
            first.state.lock().await.messages.push(crate::types::ChatMessage::user("kept"));
        }
        let second = cache.insert(state("s1", 7)).await.unwrap();
        assert_eq!(second.state.lock().await.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_over_capacity() {
        let cache = cache(2, Duration::from_secs(600));
        cache.insert(state("s1", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.insert(state("s2", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // Touch s1 so s2 becomes the LRU victim.
        cache.get(&SessionId("s1".into()), 1).await.unwrap();
        cache.insert(state("s3", 1)).await.unwrap();

        assert!(cache.len().await <= 2);
        assert!(cache.get(&SessionId("s2".into()), 1).await.unwrap().is_none());
        assert!(cache.get(&SessionId("s1".into()), 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = cache(10, Duration::from_millis(20));
        cache.insert(state("s1", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get(&SessionId("s1".into()), 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let cache = cache(10, Duration::from_secs(60));
        cache.insert(state("s1", 1)).await.unwrap();
        cache.remove(&SessionId("s1".into())).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_per_session_lock_serializes_turns() {
        let cache = cache(10, Duration::from_secs(60));
        let slot = cache.insert(state("s1", 1)).await.unwrap();

        let guard = slot.state.lock().await;
        // A second turn for the same session must wait.
        assert!(slot.state.try_lock().is_err());
        drop(guard);
        assert!(slot.state.try_lock().is_ok());
    }
}
