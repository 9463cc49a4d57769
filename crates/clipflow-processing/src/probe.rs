//! Probe and thumbnail operations backed by ffprobe/ffmpeg.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

/// Metadata extracted from a finished blob.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub duration_s: f64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub bitrate: Option<u64>,
}

impl MediaInfo {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// The two operations the post-processing worker needs from the decoding
/// tool. Everything else about the tool is opaque.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Extract duration, resolution, codec and bitrate.
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;

    /// Write one frame at `seek_secs` as a `width`x`height` JPEG to `out`.
    async fn thumbnail(
        &self,
        path: &Path,
        seek_secs: f64,
        out: &Path,
        width: u32,
        height: u32,
    ) -> Result<()>;
}

/// Validate that a path doesn't contain shell metacharacters or dangerous sequences
fn validate_path(path: &str) -> Result<()> {
    let dangerous_chars = [';', '|', '&', '$', '`', '(', ')', '<', '>', '\n', '\r'];
    if path.chars().any(|c| dangerous_chars.contains(&c)) {
        return Err(anyhow!("Path contains dangerous characters: {}", path));
    }
    if path.contains("..") {
        return Err(anyhow!("Path contains directory traversal: {}", path));
    }
    Ok(())
}

pub struct FFmpegProbe {
    ffprobe_path: String,
    ffmpeg_path: String,
}

impl FFmpegProbe {
    pub fn new(ffprobe_path: String, ffmpeg_path: String) -> Result<Self> {
        for path in [&ffprobe_path, &ffmpeg_path] {
            validate_path(path).context("Invalid tool path")?;
            if !path.chars().all(|c| {
                c.is_alphanumeric() || c == '/' || c == '-' || c == '_' || c == '.' || c == '\\'
            }) {
                return Err(anyhow!("Invalid tool path: contains unsafe characters"));
            }
        }
        Ok(Self {
            ffprobe_path,
            ffmpeg_path,
        })
    }
}

/// Parse ffprobe `-print_format json` output into [`MediaInfo`].
fn parse_probe_output(stdout: &[u8]) -> Result<MediaInfo> {
    let probe_data: serde_json::Value =
        serde_json::from_slice(stdout).context("Failed to parse ffprobe output")?;

    let stream = probe_data["streams"]
        .get(0)
        .ok_or_else(|| anyhow!("No video stream found"))?;
    let format = &probe_data["format"];

    let duration_s = format["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| anyhow!("Could not parse duration"))?;

    let width = stream["width"]
        .as_u64()
        .ok_or_else(|| anyhow!("Could not parse width"))? as u32;

    let height = stream["height"]
        .as_u64()
        .ok_or_else(|| anyhow!("Could not parse height"))? as u32;

    let codec = stream["codec_name"]
        .as_str()
        .unwrap_or("unknown")
        .to_string();

    let bitrate = format["bit_rate"]
        .as_str()
        .and_then(|b| b.parse::<u64>().ok());

    Ok(MediaInfo {
        duration_s,
        width,
        height,
        codec,
        bitrate,
    })
}

#[async_trait]
impl MediaProbe for FFmpegProbe {
    #[tracing::instrument(skip(self), fields(
        process.executable.path = %self.ffprobe_path,
        process.command = "ffprobe"
    ))]
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        validate_path(&path.to_string_lossy()).context("Invalid media path")?;
        let start = std::time::Instant::now();

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-select_streams",
                "v:0",
            ])
            .arg(path)
            .output()
            .await
            .context("Failed to execute ffprobe")?;

        if !output.status.success() {
            return Err(anyhow!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let info = parse_probe_output(&output.stdout)?;
        tracing::info!(
            duration_ms = start.elapsed().as_millis(),
            video_duration = info.duration_s,
            width = info.width,
            height = info.height,
            codec = %info.codec,
            "Video probe completed"
        );
        Ok(info)
    }

    #[tracing::instrument(skip(self), fields(
        process.executable.path = %self.ffmpeg_path,
        process.command = "ffmpeg"
    ))]
    async fn thumbnail(
        &self,
        path: &Path,
        seek_secs: f64,
        out: &Path,
        width: u32,
        height: u32,
    ) -> Result<()> {
        validate_path(&path.to_string_lossy()).context("Invalid media path")?;
        validate_path(&out.to_string_lossy()).context("Invalid output path")?;

        let output = Command::new(&self.ffmpeg_path)
            .args(["-v", "error", "-ss", &format!("{:.3}", seek_secs), "-i"])
            .arg(path)
            .args([
                "-frames:v",
                "1",
                "-vf",
                &format!("scale={}:{}", width, height),
                "-y",
            ])
            .arg(out)
            .output()
            .await
            .context("Failed to execute ffmpeg")?;

        if !output.status.success() {
            return Err(anyhow!(
                "ffmpeg thumbnail failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        tracing::info!(seek_secs = seek_secs, out = %out.display(), "Thumbnail generated");
        Ok(())
    }
}
