//! TriggerWatcher - Sensor Signal Observation
//!
//! ## Responsibilities
//!
//! - Poll the trigger directory for sensor-dropped signal files
//! - Consume each file and hand the coordinator a start request
//! - Drop (never queue) triggers that arrive mid-run
//! - Keep watching through read failures

use crate::run_coordinator::{RunCoordinator, TriggerEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;

/// TriggerWatcher instance
pub struct TriggerWatcher {
    trigger_dir: PathBuf,
    poll_interval: Duration,
    coordinator: Arc<RunCoordinator>,
    running: Arc<RwLock<bool>>,
}

impl TriggerWatcher {
    pub fn new(
        trigger_dir: PathBuf,
        poll_interval: Duration,
        coordinator: Arc<RunCoordinator>,
    ) -> Self {
        Self {
            trigger_dir,
            poll_interval,
            coordinator,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the watch loop
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Trigger watcher already running");
                return;
            }
            *running = true;
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.trigger_dir).await {
            tracing::error!(
                dir = %self.trigger_dir.display(),
                error = %e,
                "Could not create trigger directory"
            );
        }

        tracing::info!(
            dir = %self.trigger_dir.display(),
            poll_ms = self.poll_interval.as_millis(),
            "Starting trigger watcher"
        );

        let trigger_dir = self.trigger_dir.clone();
        let coordinator = self.coordinator.clone();
        let running = self.running.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut interval = interval(poll_interval);

            loop {
                interval.tick().await;

                {
                    let is_running = running.read().await;
                    if !*is_running {
                        break;
                    }
                }

                match Self::drain_signals(&trigger_dir).await {
                    Ok(events) => {
                        for event in events {
                            match coordinator.try_start(event) {
                                Some(run_id) => {
                                    tracing::info!(run_id = %run_id, "Run started from trigger");
                                }
                                None => {
                                    // Logged by the coordinator; nothing queued
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            dir = %trigger_dir.display(),
                            error = %e,
                            "Trigger directory read failed"
                        );
                    }
                }
            }

            tracing::info!("Trigger watcher stopped");
        });
    }

    /// Stop the watch loop
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        tracing::info!("Stopping trigger watcher");
    }

    /// Consume every signal file currently present, oldest first.
    ///
    /// Each file yields one start request; malformed payloads still count
    /// (existence of the notification is the trigger, content is advisory).
    async fn drain_signals(trigger_dir: &Path) -> std::io::Result<Vec<TriggerEvent>> {
        let mut entries = tokio::fs::read_dir(trigger_dir).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let mut events = Vec::new();
        for path in files {
            let event = match tokio::fs::read_to_string(&path).await {
                Ok(payload) => parse_signal(&payload, &path),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Signal file unreadable, treating as bare trigger"
                    );
                    TriggerEvent::manual(path.display().to_string())
                }
            };

            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not remove consumed signal file"
                );
            }

            events.push(event);
        }

        Ok(events)
    }
}

/// Lenient signal payload parse; any notification is a start request
fn parse_signal(payload: &str, path: &Path) -> TriggerEvent {
    match serde_json::from_str::<TriggerEvent>(payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(
                path = %path.display(),
                error = %e,
                "Signal payload not parseable, using file identity"
            );
            TriggerEvent::manual(path.display().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed_signal() {
        let payload = r#"{"detected_at":"2026-03-14T08:00:00Z","source":"loop-sensor-1"}"#;
        let event = parse_signal(payload, Path::new("/tmp/sig.json"));
        assert_eq!(event.source, "loop-sensor-1");
    }

    #[test]
    fn test_parse_malformed_signal_still_triggers() {
        let event = parse_signal("not json at all", Path::new("/tmp/sig-7"));
        assert_eq!(event.source, "/tmp/sig-7");
    }

    #[test]
    fn test_parse_empty_object_uses_defaults() {
        let event = parse_signal("{}", Path::new("/tmp/sig.json"));
        assert!(event.source.is_empty());
    }
}
