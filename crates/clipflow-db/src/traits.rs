//! Store traits for sessions and videos.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clipflow_core::{AppError, AppResult, SessionState, UploadSession, Video, VideoUpdate};
use uuid::Uuid;

/// Mutation applied to a session row under the store's row lock. The
/// mutator sees `received` and `state` and may change both.
pub type SessionMutator = Box<dyn FnOnce(&mut UploadSession) -> Result<(), AppError> + Send>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: UploadSession) -> AppResult<UploadSession>;

    async fn get_session(&self, id: Uuid) -> AppResult<Option<UploadSession>>;

    /// Apply `mutate` under a row lock and return the post-image. Fails with
    /// `Conflict` when the mutation is forbidden by the row's current state
    /// (see [`check_mutation_allowed`]).
    async fn update_session(&self, id: Uuid, mutate: SessionMutator) -> AppResult<UploadSession>;

    async fn delete_session(&self, id: Uuid) -> AppResult<()>;

    /// Sessions owned by `owner`, newest first, paginated.
    async fn list_by_owner(
        &self,
        owner: Uuid,
        page: u32,
        limit: u32,
    ) -> AppResult<Vec<UploadSession>>;

    /// Sessions whose `expires_at` lies before `now`.
    async fn find_expired_sessions(&self, now: DateTime<Utc>) -> AppResult<Vec<UploadSession>>;
}

#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Insert the row. Creation is keyed by the deterministic id: when a row
    /// with the same id already exists the existing row is returned
    /// untouched, so assembly redeliveries cannot duplicate videos.
    async fn create_video(&self, video: Video) -> AppResult<Video>;

    async fn get_video(&self, id: Uuid) -> AppResult<Option<Video>>;

    async fn update_video(&self, id: Uuid, update: VideoUpdate) -> AppResult<Video>;
}

/// Shared terminal-state rule, enforced identically by every backend:
/// once a session is `completed` it is frozen (only deletion may follow),
/// and a `failed` session's `received` set is immutable, though an
/// explicit resume may move it back to `pending`.
pub fn check_mutation_allowed(pre: &UploadSession, post: &UploadSession) -> Result<(), AppError> {
    match pre.state {
        SessionState::Completed => {
            if post.state != SessionState::Completed || post.received != pre.received {
                return Err(AppError::Conflict(format!(
                    "session {} is completed and immutable",
                    pre.id
                )));
            }
        }
        SessionState::Failed => {
            if post.received != pre.received {
                return Err(AppError::Conflict(format!(
                    "session {} is failed; its chunk set is immutable",
                    pre.id
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipflow_core::SessionMetadata;

    fn session(state: SessionState) -> UploadSession {
        let mut s = UploadSession::new(
            Uuid::new_v4(),
            "a.mp4".into(),
            100,
            10,
            SessionMetadata::default(),
            24,
        )
        .unwrap();
        s.state = state;
        s
    }

    #[test]
    fn completed_sessions_are_frozen() {
        let pre = session(SessionState::Completed);
        let mut post = pre.clone();
        post.received.insert(0);
        assert!(check_mutation_allowed(&pre, &post).is_err());

        let mut post = pre.clone();
        post.state = SessionState::Failed;
        assert!(check_mutation_allowed(&pre, &post).is_err());

        // No-op mutation is fine.
        assert!(check_mutation_allowed(&pre, &pre.clone()).is_ok());
    }

    #[test]
    fn failed_sessions_allow_resume_but_not_chunk_writes() {
        let pre = session(SessionState::Failed);

        let mut resumed = pre.clone();
        resumed.state = SessionState::Pending;
        assert!(check_mutation_allowed(&pre, &resumed).is_ok());

        let mut written = pre.clone();
        written.received.insert(1);
        assert!(check_mutation_allowed(&pre, &written).is_err());
    }

    #[test]
    fn live_sessions_accept_any_mutation() {
        let pre = session(SessionState::Uploading);
        let mut post = pre.clone();
        post.received.insert(3);
        post.state = SessionState::Completed;
        assert!(check_mutation_allowed(&pre, &post).is_ok());
    }
}
