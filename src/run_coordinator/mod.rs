//! RunCoordinator - Per-Vehicle Pipeline State Machine
//!
//! ## Responsibilities
//!
//! - Own the single active run and its stage transitions
//! - Drive capture, transcode, recognition, aggregation, settlement,
//!   actuation in strict order
//! - Apply the bounded retry policy to capture and recognition
//! - Guarantee at-most-once settlement and actuation per run
//! - Converge every run to a terminal state, watchdog-bounded
//!
//! ## States
//!
//! IDLE -> CAPTURING -> TRANSCODING -> RECOGNIZING(i) -> AGGREGATED
//!      -> SETTLING -> ACTUATING -> DONE, with FAILED reachable from
//! any stage on unretryable error or watchdog timeout.

pub mod retry;

pub use retry::{with_retry, RetryPolicy};

use crate::barrier_actuator::Actuator;
use crate::capture_service::Capturer;
use crate::error::{Error, Result};
use crate::ledger_gateway::{
    LedgerGateway, SettlementMeta, Transaction, TransactionStatus, ViolationDetail,
};
use crate::plate_aggregator::{self, PlateReading};
use crate::recognition_client::{RecognitionAttempt, Recognizer};
use crate::run_log::{RunLogService, RunOutcome, RunSummary};
use crate::state::AppConfig;
use crate::toll_engine::{self, VehicleClass};
use crate::transcode_client::Transcoder;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Sensor notification that starts a run.
///
/// Payload content beyond existence is informational only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    #[serde(default = "Utc::now")]
    pub detected_at: DateTime<Utc>,
    /// Opaque identifier of the originating sensor process
    #[serde(default)]
    pub source: String,
}

impl TriggerEvent {
    pub fn manual(source: impl Into<String>) -> Self {
        Self {
            detected_at: Utc::now(),
            source: source.into(),
        }
    }
}

/// Pipeline stage of the active run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    Capturing,
    Transcoding,
    Recognizing(u32),
    Aggregated,
    Settling,
    Actuating,
    Done,
    Failed,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStage::Idle => write!(f, "idle"),
            RunStage::Capturing => write!(f, "capturing"),
            RunStage::Transcoding => write!(f, "transcoding"),
            RunStage::Recognizing(i) => write!(f, "recognizing({})", i),
            RunStage::Aggregated => write!(f, "aggregated"),
            RunStage::Settling => write!(f, "settling"),
            RunStage::Actuating => write!(f, "actuating"),
            RunStage::Done => write!(f, "done"),
            RunStage::Failed => write!(f, "failed"),
        }
    }
}

/// One vehicle-detection episode, owned exclusively by the coordinator
#[derive(Debug)]
pub struct Run {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub stage: RunStage,
    pub capture_attempts: u32,
    /// Append-only per-frame recognition attempts
    pub attempts: Vec<RecognitionAttempt>,
    pub reading: Option<PlateReading>,
    pub toll_amount: Option<f64>,
    pub settlement: Option<Transaction>,
    pub frames_processed: u32,
    pub raw_path: Option<PathBuf>,
    pub container_path: Option<PathBuf>,
    pub frames: Vec<PathBuf>,
    settled: bool,
}

impl Run {
    pub fn new(trigger: &TriggerEvent) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: trigger.detected_at,
            stage: RunStage::Idle,
            capture_attempts: 0,
            attempts: Vec::new(),
            reading: None,
            toll_amount: None,
            settlement: None,
            frames_processed: 0,
            raw_path: None,
            container_path: None,
            frames: Vec::new(),
            settled: false,
        }
    }
}

/// Snapshot of the active run for the status surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub stage: String,
    pub frames_processed: u32,
    pub attempts: u32,
}

impl RunSnapshot {
    fn of(run: &Run) -> Self {
        Self {
            run_id: run.run_id.clone(),
            started_at: run.started_at,
            stage: run.stage.to_string(),
            frames_processed: run.frames_processed,
            attempts: run.attempts.len() as u32,
        }
    }
}

/// Coordinator knobs derived from the application config
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub region_code: String,
    pub frame_count: u32,
    pub frame_fps: f32,
    pub capture_retry: RetryPolicy,
    pub recognition_retry: RetryPolicy,
    /// Hard ceiling for a whole run
    pub watchdog: Duration,
    pub location: String,
}

impl PipelineConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        let delay = Duration::from_secs(config.retry_delay_secs);
        Self {
            region_code: config.region_code.clone(),
            frame_count: config.frame_count,
            frame_fps: config.frame_fps,
            capture_retry: RetryPolicy::new(config.capture_max_attempts, delay),
            recognition_retry: RetryPolicy::new(config.recognition_max_attempts, delay),
            watchdog: Self::watchdog_budget(config),
            location: config.location.clone(),
        }
    }

    /// Watchdog budget: the summed worst-case stage ceilings plus the
    /// configured margin, so a healthy run that exhausts every retry still
    /// finishes inside it.
    fn watchdog_budget(config: &AppConfig) -> Duration {
        let capture = config.capture_max_attempts as u64
            * (config.capture_secs
                + crate::capture_service::CAPTURE_MARGIN_SECS
                + config.retry_delay_secs);
        // Remux and frame extraction are separate ffmpeg invocations
        let transcode = 2 * crate::transcode_client::FFMPEG_TIMEOUT_SECS;
        let recognition = config.frame_count as u64
            * config.recognition_max_attempts as u64
            * (crate::recognition_client::REQUEST_TIMEOUT_SECS + config.retry_delay_secs);
        Duration::from_secs(capture + transcode + recognition + config.watchdog_margin_secs)
    }
}

/// RunCoordinator instance
pub struct RunCoordinator {
    capturer: Arc<dyn Capturer>,
    transcoder: Arc<dyn Transcoder>,
    recognizer: Arc<dyn Recognizer>,
    ledger: Arc<dyn LedgerGateway>,
    actuator: Arc<dyn Actuator>,
    run_log: Arc<RunLogService>,
    config: PipelineConfig,
    /// Active-run guard; set on admission, cleared on terminal state
    active: AtomicBool,
    /// Snapshot of the active run for the status surface
    current: RwLock<Option<RunSnapshot>>,
}

impl RunCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        capturer: Arc<dyn Capturer>,
        transcoder: Arc<dyn Transcoder>,
        recognizer: Arc<dyn Recognizer>,
        ledger: Arc<dyn LedgerGateway>,
        actuator: Arc<dyn Actuator>,
        run_log: Arc<RunLogService>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            capturer,
            transcoder,
            recognizer,
            ledger,
            actuator,
            run_log,
            config,
            active: AtomicBool::new(false),
            current: RwLock::new(None),
        }
    }

    /// Whether a run is currently active
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Snapshot of the active run, if any
    pub async fn current_run(&self) -> Option<RunSnapshot> {
        self.current.read().await.clone()
    }

    /// Admit a trigger: start a run if none is active, otherwise drop it.
    ///
    /// Returns the new run id on admission, None on drop. Triggers are
    /// never queued.
    pub fn try_start(self: &Arc<Self>, trigger: TriggerEvent) -> Option<String> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!(
                source = %trigger.source,
                "Trigger dropped - run already active"
            );
            return None;
        }

        let run = Run::new(&trigger);
        let run_id = run.run_id.clone();
        let coordinator = self.clone();

        tokio::spawn(async move {
            coordinator.run_to_completion(run).await;
        });

        Some(run_id)
    }

    /// Drive one run to a terminal state, watchdog-bounded.
    ///
    /// Always clears the active-run guard and records a summary, whatever
    /// the outcome.
    pub async fn run_to_completion(&self, mut run: Run) -> RunSummary {
        tracing::info!(run_id = %run.run_id, "Run started");
        self.publish(&run).await;

        let result = tokio::time::timeout(self.config.watchdog, self.drive(&mut run)).await;

        let (outcome, reason) = match result {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                run.stage = RunStage::Failed;
                tracing::error!(run_id = %run.run_id, error = %e, "Run failed");
                (RunOutcome::Failed, Some(e.to_string()))
            }
            Err(_) => {
                run.stage = RunStage::Failed;
                let e = Error::Watchdog(format!(
                    "run exceeded {}s",
                    self.config.watchdog.as_secs()
                ));
                tracing::error!(run_id = %run.run_id, error = %e, "Run killed by watchdog");
                (RunOutcome::Failed, Some(e.to_string()))
            }
        };

        // Release the shared capture/frame paths before the next run
        self.cleanup(&run).await;

        let summary = RunSummary {
            run_id: run.run_id.clone(),
            started_at: run.started_at,
            finished_at: Utc::now(),
            outcome,
            frames_processed: run.frames_processed,
            attempts: run.attempts.len() as u32,
            reading: run.reading.clone(),
            toll_amount: run.toll_amount,
            settlement_status: run.settlement.as_ref().map(|t| t.status),
            reason: reason.clone(),
        };

        tracing::info!(
            run_id = %run.run_id,
            outcome = ?outcome,
            reason = reason.as_deref().unwrap_or("-"),
            "Run terminal"
        );

        self.run_log.record(summary.clone()).await;
        *self.current.write().await = None;
        self.active.store(false, Ordering::SeqCst);

        summary
    }

    /// The stage walk. Fatal errors bubble up to the FAILED terminal.
    async fn drive(&self, run: &mut Run) -> Result<(RunOutcome, Option<String>)> {
        // CAPTURING, bounded retry
        self.enter_stage(run, RunStage::Capturing).await;
        let tries = AtomicU32::new(0);
        let raw_path = with_retry(self.config.capture_retry, "capture", |attempt| {
            tries.store(attempt, Ordering::SeqCst);
            let capturer = self.capturer.clone();
            async move { capturer.capture().await }
        })
        .await?;
        run.capture_attempts = tries.load(Ordering::SeqCst);
        run.raw_path = Some(raw_path.clone());

        // TRANSCODING, fatal on failure
        self.enter_stage(run, RunStage::Transcoding).await;
        let container = self.transcoder.convert(&raw_path).await?;
        run.container_path = Some(container.clone());
        let frames = self
            .transcoder
            .extract_frames(&container, self.config.frame_count, self.config.frame_fps)
            .await?;
        run.frames = frames.clone();

        // RECOGNIZING(i); a frame's exhaustion never aborts the run
        for (idx, frame) in frames.iter().enumerate() {
            let frame_index = (idx + 1) as u32;
            self.enter_stage(run, RunStage::Recognizing(frame_index)).await;

            let result = with_retry(self.config.recognition_retry, "recognition", |attempt| {
                let recognizer = self.recognizer.clone();
                let region = self.config.region_code.clone();
                let frame = frame.to_path_buf();
                async move {
                    recognizer
                        .recognize(&frame, &region, frame_index, attempt)
                        .await
                }
            })
            .await;

            let attempt = match result {
                Ok(attempt) => attempt,
                Err(e) => {
                    tracing::warn!(
                        run_id = %run.run_id,
                        frame_index = frame_index,
                        error = %e,
                        "Frame recognition exhausted, degrading to no-detection"
                    );
                    RecognitionAttempt::no_detection(
                        frame_index,
                        self.config.recognition_retry.max_attempts,
                    )
                }
            };
            run.attempts.push(attempt);
            run.frames_processed = frame_index;
        }

        // AGGREGATED
        self.enter_stage(run, RunStage::Aggregated).await;
        let Some(reading) = plate_aggregator::aggregate(&run.attempts) else {
            // Soft terminal: nothing to settle, absence of a plate is not
            // a violation and the barrier stays closed
            self.enter_stage(run, RunStage::Done).await;
            tracing::info!(run_id = %run.run_id, "No plate detected");
            return Ok((
                RunOutcome::NoDetection,
                Some("no plate detected in any frame".to_string()),
            ));
        };
        tracing::info!(
            run_id = %run.run_id,
            plate = %reading.text,
            occurrences = reading.occurrences,
            mean_confidence = reading.mean_confidence,
            "Plate reading selected"
        );
        run.reading = Some(reading.clone());

        // SETTLING -> ACTUATING always; non-success settlement is an
        // outcome, not an error
        self.enter_stage(run, RunStage::Settling).await;
        let settlement = self.settle_run(run, &reading).await;

        self.enter_stage(run, RunStage::Actuating).await;
        let (outcome, reason) = match settlement {
            Ok(transaction) if transaction.status == TransactionStatus::Success => {
                match self.actuator.open().await {
                    Ok(()) => (RunOutcome::Passed, None),
                    Err(e) => {
                        tracing::error!(
                            run_id = %run.run_id,
                            error = %e,
                            "Barrier actuation failed, failing safe closed"
                        );
                        let reason = format!("actuation failed: {}", e);
                        self.report_violation(run, &reason).await;
                        (RunOutcome::Violation, Some(reason))
                    }
                }
            }
            Ok(transaction) => {
                let reason = match transaction.status {
                    TransactionStatus::InsufficientFunds => "insufficient funds",
                    TransactionStatus::Unregistered => "unregistered plate",
                    _ => "settlement error",
                }
                .to_string();
                self.report_violation(run, &reason).await;
                (RunOutcome::Violation, Some(reason))
            }
            Err(e) => {
                let reason = format!("settlement failed: {}", e);
                self.report_violation(run, &reason).await;
                (RunOutcome::Violation, Some(reason))
            }
        };

        self.enter_stage(run, RunStage::Done).await;
        Ok((outcome, reason))
    }

    /// Look up the account, price the passage and settle once.
    async fn settle_run(&self, run: &mut Run, reading: &PlateReading) -> Result<Transaction> {
        let account = self
            .ledger
            .lookup(&reading.text)
            .await
            .map_err(|e| Error::Settlement(format!("account lookup failed: {}", e)))?;

        let class = VehicleClass::parse(&account.vehicle_class);
        let toll = toll_engine::compute_toll(class, Local::now());
        run.toll_amount = Some(toll);

        let meta = SettlementMeta {
            transaction_id: format!("TX-{}", run.run_id),
            location: self.config.location.clone(),
            vehicle_class: class.to_string(),
        };

        match self.settle_once(run, &reading.text, toll, meta).await {
            Some(result) => {
                let transaction =
                    result.map_err(|e| Error::Settlement(e.to_string()))?;
                run.settlement = Some(transaction.clone());
                Ok(transaction)
            }
            None => Err(Error::Settlement(
                "duplicate settlement call rejected".to_string(),
            )),
        }
    }

    /// At-most-once settlement guard. A second call for the same run is
    /// rejected here, not by the gateway.
    pub async fn settle_once(
        &self,
        run: &mut Run,
        plate: &str,
        amount: f64,
        meta: SettlementMeta,
    ) -> Option<Result<Transaction>> {
        if run.settled {
            tracing::warn!(
                run_id = %run.run_id,
                "Settlement already performed for this run - call rejected"
            );
            return None;
        }
        run.settled = true;
        Some(self.ledger.settle(plate, amount, meta).await)
    }

    async fn report_violation(&self, run: &Run, reason: &str) {
        let detail = ViolationDetail {
            run_id: run.run_id.clone(),
            plate: run.reading.as_ref().map(|r| r.text.clone()),
            reason: reason.to_string(),
            attempts: run.attempts.clone(),
            location: self.config.location.clone(),
        };

        if let Err(e) = self.ledger.record_violation(detail).await {
            tracing::error!(
                run_id = %run.run_id,
                error = %e,
                "Failed to record violation"
            );
        }
    }

    async fn enter_stage(&self, run: &mut Run, stage: RunStage) {
        run.stage = stage;
        tracing::debug!(run_id = %run.run_id, stage = %stage, "Run stage");
        self.publish(run).await;
    }

    async fn publish(&self, run: &Run) {
        *self.current.write().await = Some(RunSnapshot::of(run));
    }

    /// Best-effort removal of the per-run capture artifacts
    async fn cleanup(&self, run: &Run) {
        for path in run
            .raw_path
            .iter()
            .chain(run.container_path.iter())
            .chain(run.frames.iter())
        {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::debug!(path = %path.display(), error = %e, "Cleanup skipped");
            }
        }
    }
}
