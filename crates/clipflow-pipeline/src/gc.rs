//! Expired-session sweeper
//!
//! Periodically removes sessions past their deadline (every state except
//! `completed`, which assembly is about to consume) together with their
//! chunk blobs, and reaps scratch blobs whose upload never reached the
//! commit worker.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use clipflow_core::{AppResult, SessionState};
use clipflow_storage::{keys, BlobStore};

use crate::session::SessionManager;

pub struct GcSweeper {
    manager: Arc<SessionManager>,
    storage: Arc<dyn BlobStore>,
}

impl GcSweeper {
    pub fn new(manager: Arc<SessionManager>, storage: Arc<dyn BlobStore>) -> Self {
        Self { manager, storage }
    }

    /// One pass: drop expired sessions (and their chunks), then stale temp
    /// blobs. Returns the number of sessions removed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut removed = 0u64;
        for session in self.manager.find_expired().await? {
            if session.state == SessionState::Completed {
                // Assembly owns the cleanup of completed sessions.
                continue;
            }
            tracing::info!(
                session_id = %session.id,
                state = %session.state,
                expires_at = %session.expires_at,
                "Removing expired upload session"
            );
            self.manager.delete(session.id).await?;
            removed += 1;
        }

        self.sweep_stale_temp_blobs(now).await?;
        Ok(removed)
    }

    /// Scratch blobs carry their creation time in the key; anything older
    /// than the session TTL can never be committed and is deleted.
    async fn sweep_stale_temp_blobs(&self, now: DateTime<Utc>) -> AppResult<()> {
        let cutoff_millis = (now - self.manager.ttl()).timestamp_millis();
        let prefix = keys::temp_chunk_prefix();
        for key in self.storage.list_prefix(&prefix).await? {
            let created_millis = key
                .strip_prefix(&prefix)
                .and_then(|rest| rest.split('_').next())
                .and_then(|ts| ts.parse::<i64>().ok());
            match created_millis {
                Some(created) if created < cutoff_millis => {
                    tracing::debug!(key = %key, "Removing stale temp blob");
                    self.storage.delete(&key).await?;
                }
                Some(_) => {}
                None => {
                    tracing::warn!(key = %key, "Unparseable temp blob key, skipping");
                }
            }
        }
        Ok(())
    }

    /// Run `sweep` on an interval until `shutdown` flips.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep(Utc::now()).await {
                            tracing::error!(error = %err, "GC sweep failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipflow_core::SessionMetadata;
    use clipflow_db::{MemorySessionStore, SessionStore};
    use clipflow_storage::MemoryStorage;
    use uuid::Uuid;

    struct Fixture {
        gc: GcSweeper,
        manager: Arc<SessionManager>,
        storage: Arc<MemoryStorage>,
        sessions: Arc<MemorySessionStore>,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let manager = Arc::new(SessionManager::new(
            sessions.clone(),
            storage.clone(),
            None,
            24,
        ));
        let gc = GcSweeper::new(manager.clone(), storage.clone());
        Fixture {
            gc,
            manager,
            storage,
            sessions,
        }
    }

    async fn expired_session(f: &Fixture, state: SessionState) -> Uuid {
        let mut session = clipflow_core::UploadSession::new(
            Uuid::new_v4(),
            "v.mp4".into(),
            3000,
            1000,
            SessionMetadata::default(),
            24,
        )
        .unwrap();
        session.expires_at = Utc::now() - chrono::Duration::hours(1);
        session.state = state;
        if state == SessionState::Completed {
            session.received.extend([0, 1, 2]);
        }
        let session = f.sessions.create_session(session).await.unwrap();
        session.id
    }

    #[tokio::test]
    async fn expired_sessions_and_their_chunks_are_removed() {
        let f = fixture();
        let sid = expired_session(&f, SessionState::Uploading).await;
        f.storage
            .put(&keys::chunk(sid, 0), b"data".to_vec())
            .await
            .unwrap();

        let removed = f.gc.sweep(Utc::now()).await.unwrap();

        assert_eq!(removed, 1);
        assert!(f.manager.get(sid).await.unwrap().is_none());
        assert!(f
            .storage
            .list_prefix(&keys::session_chunk_prefix(sid))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn completed_sessions_survive_gc() {
        let f = fixture();
        let sid = expired_session(&f, SessionState::Completed).await;

        let removed = f.gc.sweep(Utc::now()).await.unwrap();

        assert_eq!(removed, 0);
        assert!(f.manager.get(sid).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fresh_sessions_survive_gc() {
        let f = fixture();
        let session = f
            .manager
            .init(
                Uuid::new_v4(),
                "v.mp4".into(),
                3000,
                1000,
                SessionMetadata::default(),
            )
            .await
            .unwrap();

        f.gc.sweep(Utc::now()).await.unwrap();
        assert!(f.manager.get(session.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_temp_blobs_are_reaped_but_fresh_ones_kept() {
        let f = fixture();
        let stale_ts = (Utc::now() - chrono::Duration::hours(48)).timestamp_millis();
        let stale_key = format!("{}{}_deadbeef", keys::temp_chunk_prefix(), stale_ts);
        f.storage.put(&stale_key, b"old".to_vec()).await.unwrap();
        let fresh_key = keys::temp_chunk();
        f.storage.put(&fresh_key, b"new".to_vec()).await.unwrap();

        f.gc.sweep(Utc::now()).await.unwrap();

        assert!(!f.storage.exists(&stale_key).await.unwrap());
        assert!(f.storage.exists(&fresh_key).await.unwrap());
    }
}
