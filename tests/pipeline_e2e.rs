//! End-to-end pipeline test against in-memory collaborators.
//!
//! Walks one full vehicle passage: trigger, simulated 5MB capture,
//! transcode to 3 frames, two agreeing recognitions plus one empty frame,
//! settlement against a funded account, barrier open with automatic close.

use async_trait::async_trait;
use chrono::{Local, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tollgate::barrier_actuator::Actuator;
use tollgate::capture_service::Capturer;
use tollgate::error::{Error, Result};
use tollgate::ledger_gateway::{
    AccountInfo, LedgerGateway, SettlementMeta, Transaction, TransactionStatus, Violation,
    ViolationDetail,
};
use tollgate::recognition_client::{RecognitionAttempt, Recognizer};
use tollgate::run_coordinator::{
    PipelineConfig, Run, RunCoordinator, RetryPolicy, TriggerEvent,
};
use tollgate::run_log::{RunLogService, RunOutcome};
use tollgate::toll_engine::{self, VehicleClass};
use tollgate::transcode_client::Transcoder;

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tollgate-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes a 5MB raw capture, as the lane camera would
struct SimCapturer {
    dir: PathBuf,
}

#[async_trait]
impl Capturer for SimCapturer {
    async fn capture(&self) -> Result<PathBuf> {
        let path = self.dir.join("capture.h264");
        tokio::fs::write(&path, vec![0u8; 5 * 1024 * 1024]).await?;
        Ok(path)
    }
}

/// Produces real (tiny) frame files so cleanup has something to remove
struct SimTranscoder {
    dir: PathBuf,
}

#[async_trait]
impl Transcoder for SimTranscoder {
    async fn convert(&self, raw_path: &Path) -> Result<PathBuf> {
        let container = raw_path.with_extension("mp4");
        tokio::fs::copy(raw_path, &container).await?;
        Ok(container)
    }

    async fn extract_frames(
        &self,
        _container_path: &Path,
        count: u32,
        _fps: f32,
    ) -> Result<Vec<PathBuf>> {
        let mut frames = Vec::new();
        for i in 1..=count {
            let path = self.dir.join(format!("frame_{:02}.jpg", i));
            tokio::fs::write(&path, b"\xff\xd8\xff\xe0").await?;
            frames.push(path);
        }
        Ok(frames)
    }
}

/// Scripted recognizer: frame 1 and 2 read CA1234X, frame 3 sees nothing
struct SimRecognizer;

#[async_trait]
impl Recognizer for SimRecognizer {
    async fn recognize(
        &self,
        _frame_path: &Path,
        _region: &str,
        frame_index: u32,
        attempt: u32,
    ) -> Result<RecognitionAttempt> {
        let result = match frame_index {
            1 => RecognitionAttempt {
                plate: Some("CA1234X".to_string()),
                confidence: 0.9,
                frame_index,
                attempt,
            },
            2 => RecognitionAttempt {
                plate: Some("CA1234X".to_string()),
                confidence: 0.85,
                frame_index,
                attempt,
            },
            _ => RecognitionAttempt::no_detection(frame_index, attempt),
        };
        Ok(result)
    }
}

#[derive(Default)]
struct MemoryLedger {
    accounts: Mutex<HashMap<String, (f64, String)>>,
    transactions: Mutex<Vec<Transaction>>,
    violations: Mutex<Vec<Violation>>,
}

#[async_trait]
impl LedgerGateway for MemoryLedger {
    async fn lookup(&self, plate_number: &str) -> Result<AccountInfo> {
        let plate = plate_number.trim().to_uppercase();
        let accounts = self.accounts.lock().unwrap();
        Ok(match accounts.get(&plate) {
            Some((balance, class)) => AccountInfo {
                plate_number: plate,
                is_registered: true,
                balance: *balance,
                vehicle_class: class.clone(),
                owner: None,
            },
            None => AccountInfo::unregistered(plate),
        })
    }

    async fn settle(
        &self,
        plate_number: &str,
        amount: f64,
        meta: SettlementMeta,
    ) -> Result<Transaction> {
        let plate = plate_number.trim().to_uppercase();
        let mut accounts = self.accounts.lock().unwrap();
        let status = match accounts.get_mut(&plate) {
            None => TransactionStatus::Unregistered,
            Some((balance, _)) if *balance >= amount => {
                *balance -= amount;
                TransactionStatus::Success
            }
            Some(_) => TransactionStatus::InsufficientFunds,
        };
        let transaction = Transaction {
            transaction_id: meta.transaction_id,
            plate_number: plate,
            amount,
            status,
            vehicle_class: meta.vehicle_class,
            location: meta.location,
            created_at: Utc::now(),
        };
        self.transactions.lock().unwrap().push(transaction.clone());
        Ok(transaction)
    }

    async fn record_violation(&self, detail: ViolationDetail) -> Result<u64> {
        let mut violations = self.violations.lock().unwrap();
        let id = violations.len() as u64 + 1;
        violations.push(Violation {
            violation_id: id,
            run_id: detail.run_id,
            plate: detail.plate,
            reason: detail.reason,
            attempts: serde_json::to_value(&detail.attempts).map_err(Error::from)?,
            location: detail.location,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn recent_transactions(&self, limit: u32) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.lock().unwrap();
        Ok(transactions
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn recent_violations(&self, limit: u32) -> Result<Vec<Violation>> {
        let violations = self.violations.lock().unwrap();
        Ok(violations
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// Barrier that honors the dwell interval like the shell actuator
struct SimBarrier {
    dwell: Duration,
    opens: AtomicU32,
    closes: Arc<AtomicU32>,
}

#[async_trait]
impl Actuator for SimBarrier {
    async fn open(&self) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let closes = self.closes.clone();
        let dwell = self.dwell;
        tokio::spawn(async move {
            tokio::time::sleep(dwell).await;
            closes.fetch_add(1, Ordering::SeqCst);
        });
        Ok(())
    }
}

fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        region_code: "us".to_string(),
        frame_count: 3,
        frame_fps: 1.0,
        capture_retry: RetryPolicy::new(3, Duration::from_millis(1)),
        recognition_retry: RetryPolicy::new(3, Duration::from_millis(1)),
        watchdog: Duration::from_secs(30),
        location: "Plaza-01".to_string(),
    }
}

#[tokio::test]
async fn test_full_passage_trigger_to_done() {
    let dir = scratch_dir();

    let ledger = Arc::new(MemoryLedger::default());
    ledger
        .accounts
        .lock()
        .unwrap()
        .insert("CA1234X".to_string(), (20.00, "car".to_string()));

    let barrier = Arc::new(SimBarrier {
        dwell: Duration::from_millis(50),
        opens: AtomicU32::new(0),
        closes: Arc::new(AtomicU32::new(0)),
    });
    let run_log = Arc::new(RunLogService::new(10));

    let coordinator = Arc::new(RunCoordinator::new(
        Arc::new(SimCapturer { dir: dir.clone() }),
        Arc::new(SimTranscoder { dir: dir.clone() }),
        Arc::new(SimRecognizer),
        ledger.clone(),
        barrier.clone(),
        run_log.clone(),
        pipeline_config(),
    ));

    let trigger = TriggerEvent::manual("loop-sensor-1");
    let summary = coordinator.run_to_completion(Run::new(&trigger)).await;

    // Terminal state and aggregation
    assert_eq!(summary.outcome, RunOutcome::Passed);
    assert_eq!(summary.frames_processed, 3);
    let reading = summary.reading.clone().unwrap();
    assert_eq!(reading.text, "CA1234X");
    assert_eq!(reading.occurrences, 2);
    assert!((reading.mean_confidence - 0.875).abs() < 1e-6);

    // Settlement: exactly one transaction, toll deducted exactly once.
    // The toll follows the wall clock (5.00 off-peak, 7.50 peak).
    let expected_toll = toll_engine::compute_toll(VehicleClass::Car, Local::now());
    assert_eq!(summary.toll_amount, Some(expected_toll));
    assert_eq!(summary.settlement_status, Some(TransactionStatus::Success));

    let transactions = ledger.recent_transactions(10).await.unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].transaction_id, format!("TX-{}", summary.run_id));
    assert_eq!(
        ledger.accounts.lock().unwrap().get("CA1234X").unwrap().0,
        20.00 - expected_toll
    );
    assert!(ledger.recent_violations(10).await.unwrap().is_empty());

    // Barrier opened once and auto-closed after the dwell interval
    assert_eq!(barrier.opens.load(Ordering::SeqCst), 1);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(barrier.closes.load(Ordering::SeqCst), 1);

    // Terminal cleanup released the shared capture paths
    assert!(!dir.join("capture.h264").exists());
    assert!(!dir.join("frame_01.jpg").exists());

    // Run summary is visible to the status surface
    assert_eq!(run_log.last().await.unwrap().run_id, summary.run_id);
    assert!(!coordinator.is_active());

    let _ = std::fs::remove_dir_all(&dir);
}
