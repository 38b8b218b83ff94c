//! BarrierActuator - Gate Open/Close Commands
//!
//! ## Responsibilities
//!
//! - Issue the physical open command on SUCCESS settlement
//! - Schedule the automatic close after the dwell interval
//! - Fail safe closed: close failures are logged, never retried

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Command timeout; barrier commands are expected to return immediately
const COMMAND_TIMEOUT_SECS: u64 = 5;

/// Actuation seam used by the coordinator
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Open the barrier and schedule the automatic close.
    ///
    /// The close happens after the dwell interval regardless of further
    /// events; the caller does not wait for it.
    async fn open(&self) -> Result<()>;
}

/// Actuator that shells out to the configured gate commands
pub struct ShellBarrier {
    open_cmd: String,
    close_cmd: String,
    dwell: Duration,
}

impl ShellBarrier {
    pub fn new(open_cmd: String, close_cmd: String, dwell: Duration) -> Self {
        Self {
            open_cmd,
            close_cmd,
            dwell,
        }
    }

    async fn run_command(cmd: &str) -> Result<()> {
        let mut parts = cmd.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::Actuation("empty barrier command".to_string()))?;

        let child = Command::new(program)
            .args(parts)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Actuation(format!("barrier command spawn failed: {}", e)))?;

        let timeout = Duration::from_secs(COMMAND_TIMEOUT_SECS);

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(Error::Actuation(format!(
                        "barrier command failed: {}",
                        stderr.trim()
                    )));
                }
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Actuation(format!(
                "barrier command execution failed: {}",
                e
            ))),
            Err(_) => Err(Error::Actuation(format!(
                "barrier command timeout ({}s)",
                COMMAND_TIMEOUT_SECS
            ))),
        }
    }
}

#[async_trait]
impl Actuator for ShellBarrier {
    async fn open(&self) -> Result<()> {
        Self::run_command(&self.open_cmd).await?;

        tracing::info!(dwell_sec = self.dwell.as_secs(), "Barrier opened");

        // Detached close; the run does not wait out the dwell interval
        let close_cmd = self.close_cmd.clone();
        let dwell = self.dwell;
        tokio::spawn(async move {
            tokio::time::sleep(dwell).await;
            match Self::run_command(&close_cmd).await {
                Ok(()) => tracing::info!("Barrier closed"),
                Err(e) => tracing::error!(error = %e, "Barrier close failed"),
            }
        });

        Ok(())
    }
}
