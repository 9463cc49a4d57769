//! Clipflow Processing Library
//!
//! Metadata extraction and thumbnail generation for finished blobs. The
//! [`MediaProbe`] trait is the seam the post-processing worker depends on;
//! the production implementation shells out to ffprobe/ffmpeg.

pub mod probe;

pub use probe::{FFmpegProbe, MediaInfo, MediaProbe};
