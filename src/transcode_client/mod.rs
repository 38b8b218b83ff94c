//! TranscodeClient - ffmpeg Remux and Frame Extraction
//!
//! ## Responsibilities
//!
//! - Convert the raw capture into a playable container
//! - Extract the configured sample of still frames, in order
//! - Fail the run on non-zero exit or zero frames (no internal retry)

use crate::capture_service::validate_capture;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;

/// Ceiling for a single ffmpeg invocation
/// Ceiling for one ffmpeg invocation
pub const FFMPEG_TIMEOUT_SECS: u64 = 60;

/// Transcode seam used by the coordinator
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Remux the raw capture into a playable container
    async fn convert(&self, raw_path: &Path) -> Result<PathBuf>;

    /// Extract `count` frames sampled at `fps`, returned in sequence order
    async fn extract_frames(
        &self,
        container_path: &Path,
        count: u32,
        fps: f32,
    ) -> Result<Vec<PathBuf>>;
}

/// ffmpeg-backed transcoder
pub struct FfmpegTranscoder {
    /// Directory for extracted frames (overwritten each run)
    frames_dir: PathBuf,
}

impl FfmpegTranscoder {
    pub async fn new(frames_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&frames_dir).await?;
        Ok(Self { frames_dir })
    }

    /// Run ffmpeg with a hard timeout; kill_on_drop reaps it on cancellation
    async fn run_ffmpeg(&self, args: &[&str]) -> Result<()> {
        let child = Command::new("ffmpeg")
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transcode(format!("ffmpeg spawn failed: {}", e)))?;

        let timeout = Duration::from_secs(FFMPEG_TIMEOUT_SECS);

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(Error::Transcode(format!(
                        "ffmpeg failed: {}",
                        stderr.trim()
                    )));
                }
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Transcode(format!("ffmpeg execution failed: {}", e))),
            Err(_) => {
                tracing::warn!(
                    timeout_sec = FFMPEG_TIMEOUT_SECS,
                    "ffmpeg timeout, process killed via kill_on_drop"
                );
                Err(Error::Transcode(format!(
                    "ffmpeg timeout ({}s)",
                    FFMPEG_TIMEOUT_SECS
                )))
            }
        }
    }

    /// Check if ffmpeg is available
    pub async fn check_ffmpeg() -> Result<String> {
        let output = Command::new("ffmpeg")
            .arg("-version")
            .output()
            .await
            .map_err(|e| Error::Transcode(format!("ffmpeg not found: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Transcode("ffmpeg version check failed".to_string()));
        }

        let version = String::from_utf8_lossy(&output.stdout);
        let first_line = version.lines().next().unwrap_or("unknown");
        Ok(first_line.to_string())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn convert(&self, raw_path: &Path) -> Result<PathBuf> {
        validate_capture(raw_path)
            .await
            .map_err(|e| Error::Transcode(format!("raw capture invalid: {}", e)))?;

        let container_path = raw_path.with_extension("mp4");

        // Stream copy only; codec work belongs to ffmpeg, not this service
        self.run_ffmpeg(&[
            "-i",
            raw_path.to_str().unwrap_or_default(),
            "-c",
            "copy",
            "-loglevel",
            "error",
            "-y",
            container_path.to_str().unwrap_or_default(),
        ])
        .await?;

        tracing::info!(
            container = %container_path.display(),
            "Raw capture converted"
        );

        Ok(container_path)
    }

    async fn extract_frames(
        &self,
        container_path: &Path,
        count: u32,
        fps: f32,
    ) -> Result<Vec<PathBuf>> {
        if count == 0 {
            return Err(Error::Transcode("frame sample count is zero".to_string()));
        }

        // Clear frames from the previous run before writing new ones
        if self.frames_dir.exists() {
            fs::remove_dir_all(&self.frames_dir).await?;
        }
        fs::create_dir_all(&self.frames_dir).await?;

        let pattern = self.frames_dir.join("frame_%02d.jpg");
        let fps_filter = format!("fps={}", fps);
        let frames_arg = count.to_string();

        self.run_ffmpeg(&[
            "-i",
            container_path.to_str().unwrap_or_default(),
            "-vf",
            &fps_filter,
            "-frames:v",
            &frames_arg,
            "-loglevel",
            "error",
            "-y",
            pattern.to_str().unwrap_or_default(),
        ])
        .await?;

        // ffmpeg numbers frames from 1; collect in sequence order
        let mut frames = Vec::new();
        for index in 1..=count {
            let path = self.frames_dir.join(format!("frame_{:02}.jpg", index));
            if path.exists() {
                frames.push(path);
            }
        }

        if frames.is_empty() {
            return Err(Error::Transcode(format!(
                "no frames produced from {}",
                container_path.display()
            )));
        }

        tracing::info!(
            frames = frames.len(),
            requested = count,
            fps = fps,
            "Frames extracted"
        );

        Ok(frames)
    }
}
