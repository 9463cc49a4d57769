//! Shared constants for the ingest core.

/// Hard ceiling on the declared size of an upload (5 GiB).
pub const MAX_FILE_SIZE_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Largest multipart chunk body accepted by the intake endpoint (10 MiB).
pub const MAX_CHUNK_PART_BYTES: u64 = 10 * 1024 * 1024;

/// Absolute lifetime of an upload session.
pub const SESSION_TTL_HOURS: i64 = 24;

/// Defaults applied when session metadata omits a field.
pub const DEFAULT_CATEGORY: &str = "general";
pub const DEFAULT_MIME_TYPE: &str = "video/mp4";

/// Thumbnail output dimensions.
pub const THUMBNAIL_WIDTH: u32 = 320;
pub const THUMBNAIL_HEIGHT: u32 = 240;

/// Blobs above this size take the fixed-offset thumbnail path instead of
/// seeking to the midpoint.
pub const THUMBNAIL_LARGE_BLOB_BYTES: u64 = 1024 * 1024 * 1024;

/// Seek offset used by the large-blob thumbnail path.
pub const THUMBNAIL_LARGE_BLOB_SEEK_SECS: f64 = 30.0;

/// Retry budget per queue message; one more failure routes to the DLQ.
pub const MAX_JOB_RETRIES: u32 = 3;
