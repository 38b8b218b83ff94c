//! CaptureService - Raw Video Capture
//!
//! ## Responsibilities
//!
//! - Run the configured capture command for the lane camera
//! - Bound the capture with a timeout (duration + safety margin)
//! - Validate that the raw capture exists and is non-empty

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;

/// Safety margin added on top of the configured capture duration
/// Slack added to the configured capture duration before the command is killed
pub const CAPTURE_MARGIN_SECS: u64 = 15;

/// Raw capture filename within the capture directory
const RAW_CAPTURE_NAME: &str = "capture.h264";

/// Capture seam used by the coordinator
#[async_trait]
pub trait Capturer: Send + Sync {
    /// Capture one raw clip and return its path.
    ///
    /// Failures are `Error::Capture` and retryable; the coordinator owns
    /// the retry policy.
    async fn capture(&self) -> Result<PathBuf>;
}

/// Capturer that shells out to the configured camera command
pub struct CommandCapturer {
    /// Capture command; the output path is appended as the last argument
    command: String,
    /// Directory holding the per-run raw capture (overwritten each run)
    capture_dir: PathBuf,
    /// Configured capture duration in seconds
    capture_secs: u64,
}

impl CommandCapturer {
    pub async fn new(command: String, capture_dir: PathBuf, capture_secs: u64) -> Result<Self> {
        fs::create_dir_all(&capture_dir).await?;
        Ok(Self {
            command,
            capture_dir,
            capture_secs,
        })
    }

    /// Path the raw capture is written to (shared resource, one run at a time)
    pub fn raw_path(&self) -> PathBuf {
        self.capture_dir.join(RAW_CAPTURE_NAME)
    }
}

#[async_trait]
impl Capturer for CommandCapturer {
    async fn capture(&self) -> Result<PathBuf> {
        let output_path = self.raw_path();

        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::Capture("empty capture command".to_string()))?;

        // kill_on_drop so a timeout cancellation reaps the camera process
        let child = Command::new(program)
            .args(parts)
            .arg(&output_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Capture(format!("capture spawn failed: {}", e)))?;

        let timeout = Duration::from_secs(self.capture_secs + CAPTURE_MARGIN_SECS);

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(Error::Capture(format!(
                        "capture command failed: {}",
                        stderr.trim()
                    )));
                }
            }
            Ok(Err(e)) => {
                return Err(Error::Capture(format!("capture execution failed: {}", e)));
            }
            Err(_) => {
                tracing::warn!(
                    timeout_sec = timeout.as_secs(),
                    "Capture timeout, process killed via kill_on_drop"
                );
                return Err(Error::Capture(format!(
                    "capture timeout ({}s)",
                    timeout.as_secs()
                )));
            }
        }

        validate_capture(&output_path).await?;

        tracing::info!(
            path = %output_path.display(),
            "Raw capture complete"
        );

        Ok(output_path)
    }
}

/// Reject missing or empty captures before transcoding is attempted
pub async fn validate_capture(path: &Path) -> Result<()> {
    let meta = fs::metadata(path)
        .await
        .map_err(|e| Error::Capture(format!("capture output missing: {}", e)))?;

    if meta.len() == 0 {
        return Err(Error::Capture(format!(
            "capture output empty: {}",
            path.display()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validate_missing_capture() {
        let path = std::env::temp_dir().join("tollgate-test-no-such-capture.h264");
        let result = validate_capture(&path).await;
        assert!(matches!(result, Err(Error::Capture(_))));
    }

    #[tokio::test]
    async fn test_validate_empty_capture() {
        let path = std::env::temp_dir().join("tollgate-test-empty-capture.h264");
        fs::write(&path, b"").await.unwrap();
        let result = validate_capture(&path).await;
        assert!(matches!(result, Err(Error::Capture(_))));
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_validate_non_empty_capture() {
        let path = std::env::temp_dir().join("tollgate-test-ok-capture.h264");
        fs::write(&path, b"\x00\x00\x01").await.unwrap();
        assert!(validate_capture(&path).await.is_ok());
        let _ = fs::remove_file(&path).await;
    }
}
