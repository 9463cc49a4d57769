//! Shared key generation for storage backends.
//!
//! Layout: `chunks/{session_id}_chunk_{index}` for committed chunk blobs,
//! `chunks/temp_{ts}_{rand}` for pre-rename scratch, `uploads/{filename}`
//! for assembled originals, `thumbnails/{video_id}.jpg` for thumbnails.

use rand::Rng;
use uuid::Uuid;

pub const CHUNKS_PREFIX: &str = "chunks/";
pub const UPLOADS_PREFIX: &str = "uploads/";
pub const THUMBNAILS_PREFIX: &str = "thumbnails/";

/// Canonical key of a committed chunk blob.
pub fn chunk(session_id: Uuid, index: u32) -> String {
    format!("{}{}_chunk_{}", CHUNKS_PREFIX, session_id, index)
}

/// Prefix shared by every chunk blob of one session.
pub fn session_chunk_prefix(session_id: Uuid) -> String {
    format!("{}{}_chunk_", CHUNKS_PREFIX, session_id)
}

/// Fresh scratch key for an incoming chunk body, unique per call.
pub fn temp_chunk() -> String {
    let ts = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}temp_{}_{:08x}", CHUNKS_PREFIX, ts, suffix)
}

/// Prefix shared by all scratch chunk keys.
pub fn temp_chunk_prefix() -> String {
    format!("{}temp_", CHUNKS_PREFIX)
}

/// Key of an assembled original.
pub fn upload(target_filename: &str) -> String {
    format!("{}{}", UPLOADS_PREFIX, target_filename)
}

/// Key of a video thumbnail.
pub fn thumbnail(video_id: Uuid) -> String {
    format!("{}{}.jpg", THUMBNAILS_PREFIX, video_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_keys_share_the_session_prefix() {
        let sid = Uuid::new_v4();
        let key = chunk(sid, 4);
        assert!(key.starts_with(&session_chunk_prefix(sid)));
        assert!(key.ends_with("_chunk_4"));
    }

    #[test]
    fn temp_keys_are_unique_and_scoped() {
        let a = temp_chunk();
        let b = temp_chunk();
        assert_ne!(a, b);
        assert!(a.starts_with(&temp_chunk_prefix()));
    }

    #[test]
    fn upload_and_thumbnail_layout() {
        let vid = Uuid::new_v4();
        assert_eq!(upload("abc.mp4"), "uploads/abc.mp4");
        assert_eq!(thumbnail(vid), format!("thumbnails/{}.jpg", vid));
    }
}
