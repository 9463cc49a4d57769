//! In-memory stores.
//!
//! Same contract as the Postgres backend, serialized by a process-local
//! lock instead of a row lock. Backs tests and single-process development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use clipflow_core::{AppError, AppResult, UploadSession, Video, VideoUpdate};

use crate::traits::{check_mutation_allowed, SessionMutator, SessionStore, VideoStore};

#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, UploadSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, session: UploadSession) -> AppResult<UploadSession> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> AppResult<Option<UploadSession>> {
        Ok(self.sessions.lock().unwrap().get(&id).cloned())
    }

    async fn update_session(&self, id: Uuid, mutate: SessionMutator) -> AppResult<UploadSession> {
        let mut sessions = self.sessions.lock().unwrap();
        let pre = sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("session {}", id)))?;

        let mut post = pre.clone();
        mutate(&mut post)?;
        check_mutation_allowed(&pre, &post)?;
        post.updated_at = Utc::now();

        sessions.insert(id, post.clone());
        Ok(post)
    }

    async fn delete_session(&self, id: Uuid) -> AppResult<()> {
        self.sessions.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn list_by_owner(
        &self,
        owner: Uuid,
        page: u32,
        limit: u32,
    ) -> AppResult<Vec<UploadSession>> {
        let mut sessions: Vec<UploadSession> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = page.saturating_sub(1) as usize * limit as usize;
        Ok(sessions
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect())
    }

    async fn find_expired_sessions(&self, now: DateTime<Utc>) -> AppResult<Vec<UploadSession>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.is_expired(now))
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct MemoryVideoStore {
    videos: Arc<Mutex<HashMap<Uuid, Video>>>,
}

impl MemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored videos, for test assertions.
    pub fn len(&self) -> usize {
        self.videos.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn create_video(&self, video: Video) -> AppResult<Video> {
        let mut videos = self.videos.lock().unwrap();
        // Redelivery guard: the deterministic id keeps creation idempotent.
        if let Some(existing) = videos.get(&video.id) {
            return Ok(existing.clone());
        }
        videos.insert(video.id, video.clone());
        Ok(video)
    }

    async fn get_video(&self, id: Uuid) -> AppResult<Option<Video>> {
        Ok(self.videos.lock().unwrap().get(&id).cloned())
    }

    async fn update_video(&self, id: Uuid, update: VideoUpdate) -> AppResult<Video> {
        let mut videos = self.videos.lock().unwrap();
        let video = videos
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("video {}", id)))?;
        update.apply(video);
        Ok(video.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipflow_core::{deterministic_video_id, SessionMetadata, SessionState, VideoState};

    fn new_session() -> UploadSession {
        UploadSession::new(
            Uuid::new_v4(),
            "clip.mp4".into(),
            3_000,
            1_000,
            SessionMetadata::default(),
            24,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn update_session_applies_mutator_under_lock() {
        let store = MemorySessionStore::new();
        let session = store.create_session(new_session()).await.unwrap();

        let updated = store
            .update_session(
                session.id,
                Box::new(|s| {
                    s.received.insert(0);
                    s.state = SessionState::Uploading;
                    Ok(())
                }),
            )
            .await
            .unwrap();

        assert_eq!(updated.received.len(), 1);
        assert_eq!(updated.state, SessionState::Uploading);
    }

    #[tokio::test]
    async fn update_missing_session_is_not_found() {
        let store = MemorySessionStore::new();
        let err = store
            .update_session(Uuid::new_v4(), Box::new(|_| Ok(())))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn completed_session_rejects_chunk_writes() {
        let store = MemorySessionStore::new();
        let mut session = new_session();
        session.received.extend([0, 1, 2]);
        session.state = SessionState::Completed;
        let session = store.create_session(session).await.unwrap();

        let err = store
            .update_session(
                session.id,
                Box::new(|s| {
                    s.received.insert(0);
                    s.received.insert(3);
                    Ok(())
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_by_owner_paginates_newest_first() {
        let store = MemorySessionStore::new();
        let owner = Uuid::new_v4();
        for _ in 0..5 {
            let mut s = new_session();
            s.owner = owner;
            store.create_session(s).await.unwrap();
        }
        // A session from a different owner never shows up.
        store.create_session(new_session()).await.unwrap();

        let page1 = store.list_by_owner(owner, 1, 3).await.unwrap();
        let page2 = store.list_by_owner(owner, 2, 3).await.unwrap();
        assert_eq!(page1.len(), 3);
        assert_eq!(page2.len(), 2);
        assert!(page1.iter().all(|s| s.owner == owner));
    }

    #[tokio::test]
    async fn find_expired_only_returns_past_deadline() {
        let store = MemorySessionStore::new();
        let fresh = store.create_session(new_session()).await.unwrap();
        let mut stale = new_session();
        stale.expires_at = Utc::now() - chrono::Duration::hours(1);
        let stale = store.create_session(stale).await.unwrap();

        let expired = store.find_expired_sessions(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);
        assert_ne!(expired[0].id, fresh.id);
    }

    #[tokio::test]
    async fn create_video_is_idempotent_on_id() {
        let store = MemoryVideoStore::new();
        let session = new_session();
        let video = Video::from_session(&session, "uploads/a.mp4".into());

        let first = store.create_video(video.clone()).await.unwrap();
        // Mark ready, then redeliver the creation.
        store
            .update_video(
                first.id,
                VideoUpdate {
                    state: Some(VideoState::Ready),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let second = store.create_video(video).await.unwrap();

        assert_eq!(second.id, deterministic_video_id(session.id));
        assert_eq!(second.state, VideoState::Ready);
        assert_eq!(store.len(), 1);
    }

}
