//! RunLogService - Completed Run Recording (Ring Buffer)
//!
//! ## Responsibilities
//!
//! - Store completed run summaries in a ring buffer
//! - Provide queries for the status API

use crate::ledger_gateway::TransactionStatus;
use crate::plate_aggregator::PlateReading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Settlement succeeded, barrier opened
    Passed,
    /// No plate text in any frame; soft terminal, barrier stayed closed
    NoDetection,
    /// Settlement did not succeed; violation recorded
    Violation,
    /// Unrecoverable error or watchdog timeout
    Failed,
}

/// Summary of one completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub frames_processed: u32,
    pub attempts: u32,
    pub reading: Option<PlateReading>,
    pub toll_amount: Option<f64>,
    pub settlement_status: Option<TransactionStatus>,
    /// Human-readable reason for non-passed outcomes
    pub reason: Option<String>,
}

/// Ring buffer for run summaries
struct RunRingBuffer {
    runs: VecDeque<RunSummary>,
    capacity: usize,
}

impl RunRingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            runs: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, summary: RunSummary) {
        if self.runs.len() >= self.capacity {
            self.runs.pop_front();
        }
        self.runs.push_back(summary);
    }

    fn latest(&self, count: usize) -> Vec<RunSummary> {
        self.runs.iter().rev().take(count).cloned().collect()
    }

    fn get(&self, run_id: &str) -> Option<RunSummary> {
        self.runs.iter().rev().find(|r| r.run_id == run_id).cloned()
    }
}

/// RunLogService instance
pub struct RunLogService {
    buffer: RwLock<RunRingBuffer>,
}

impl RunLogService {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(RunRingBuffer::new(capacity)),
        }
    }

    /// Record a completed run
    pub async fn record(&self, summary: RunSummary) {
        let mut buffer = self.buffer.write().await;
        tracing::debug!(run_id = %summary.run_id, "Run summary recorded");
        buffer.push(summary);
    }

    /// Last completed run, if any
    pub async fn last(&self) -> Option<RunSummary> {
        let buffer = self.buffer.read().await;
        buffer.runs.back().cloned()
    }

    /// Latest run summaries, newest first
    pub async fn latest(&self, count: usize) -> Vec<RunSummary> {
        let buffer = self.buffer.read().await;
        buffer.latest(count)
    }

    /// Look up one run by id
    pub async fn get(&self, run_id: &str) -> Option<RunSummary> {
        let buffer = self.buffer.read().await;
        buffer.get(run_id)
    }

    /// Number of retained summaries
    pub async fn count(&self) -> usize {
        let buffer = self.buffer.read().await;
        buffer.runs.len()
    }
}

impl Default for RunLogService {
    fn default() -> Self {
        Self::new(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(run_id: &str, outcome: RunOutcome) -> RunSummary {
        RunSummary {
            run_id: run_id.to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcome,
            frames_processed: 3,
            attempts: 3,
            reading: None,
            toll_amount: None,
            settlement_status: None,
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_ring_buffer_caps_capacity() {
        let log = RunLogService::new(2);
        log.record(summary("r1", RunOutcome::Passed)).await;
        log.record(summary("r2", RunOutcome::NoDetection)).await;
        log.record(summary("r3", RunOutcome::Failed)).await;

        assert_eq!(log.count().await, 2);
        assert!(log.get("r1").await.is_none());
        assert_eq!(log.last().await.unwrap().run_id, "r3");
    }

    #[tokio::test]
    async fn test_latest_newest_first() {
        let log = RunLogService::new(10);
        log.record(summary("r1", RunOutcome::Passed)).await;
        log.record(summary("r2", RunOutcome::Passed)).await;

        let latest = log.latest(5).await;
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].run_id, "r2");
    }
}
