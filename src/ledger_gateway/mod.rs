//! LedgerGateway - Account Lookup, Settlement, Violations
//!
//! ## Responsibilities
//!
//! - Account lookup by plate (case-normalized)
//! - Atomic settlement: one Transaction row per call, balance deducted
//!   only on SUCCESS
//! - Violation persistence for failed passages
//! - Read-only listings for the status API
//!
//! The settlement decision lives here; the coordinator only guarantees
//! the call happens at most once per run.

use crate::error::Result;
use crate::recognition_client::RecognitionAttempt;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlPool;
use sqlx::Row;

/// Account state as seen at lookup time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub plate_number: String,
    pub is_registered: bool,
    pub balance: f64,
    pub vehicle_class: String,
    pub owner: Option<String>,
}

impl AccountInfo {
    /// Lookup result for a plate with no account row
    pub fn unregistered(plate_number: String) -> Self {
        Self {
            plate_number,
            is_registered: false,
            balance: 0.0,
            vehicle_class: String::new(),
            owner: None,
        }
    }
}

/// Settlement outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Success,
    InsufficientFunds,
    Unregistered,
    Error,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::InsufficientFunds => "INSUFFICIENT_FUNDS",
            TransactionStatus::Unregistered => "UNREGISTERED",
            TransactionStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "SUCCESS" => TransactionStatus::Success,
            "INSUFFICIENT_FUNDS" => TransactionStatus::InsufficientFunds,
            "UNREGISTERED" => TransactionStatus::Unregistered,
            _ => TransactionStatus::Error,
        }
    }
}

/// Immutable settlement record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub plate_number: String,
    pub amount: f64,
    pub status: TransactionStatus,
    pub vehicle_class: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

/// Settlement metadata supplied by the coordinator
#[derive(Debug, Clone)]
pub struct SettlementMeta {
    /// Transaction ID, derived once per run
    pub transaction_id: String,
    pub location: String,
    pub vehicle_class: String,
}

/// Violation detail handed to the gateway on a failed passage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationDetail {
    pub run_id: String,
    /// Best reading if one existed; None for actuation-stage violations only
    pub plate: Option<String>,
    pub reason: String,
    /// The run's recognition attempts (possibly empty)
    pub attempts: Vec<RecognitionAttempt>,
    pub location: String,
}

/// Persisted violation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub violation_id: u64,
    pub run_id: String,
    pub plate: Option<String>,
    pub reason: String,
    pub attempts: serde_json::Value,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

/// Ledger seam used by the coordinator and the status API
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Look up the account for a plate (case-normalized upper-case)
    async fn lookup(&self, plate_number: &str) -> Result<AccountInfo>;

    /// Settle a toll atomically.
    ///
    /// Either deducts the balance and records a SUCCESS transaction, or
    /// records a non-success transaction and leaves the balance untouched.
    /// One transaction row per call, internal store failures included
    /// (those settle with status ERROR).
    async fn settle(&self, plate_number: &str, amount: f64, meta: SettlementMeta)
        -> Result<Transaction>;

    /// Record a violation for a failed passage
    async fn record_violation(&self, detail: ViolationDetail) -> Result<u64>;

    /// Most recent transactions, newest first
    async fn recent_transactions(&self, limit: u32) -> Result<Vec<Transaction>>;

    /// Most recent violations, newest first
    async fn recent_violations(&self, limit: u32) -> Result<Vec<Violation>>;
}

/// MySQL-backed ledger gateway
pub struct SqlLedgerGateway {
    pool: MySqlPool,
}

impl SqlLedgerGateway {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Balance check, transaction row and deduction in one DB transaction.
    ///
    /// Unwinds (rolling everything back) on any store failure; the caller
    /// records the attempt as ERROR.
    async fn settle_atomic(
        &self,
        plate: &str,
        amount: f64,
        meta: &SettlementMeta,
        now: DateTime<Utc>,
    ) -> Result<TransactionStatus> {
        let mut tx = self.pool.begin().await?;

        // Lock the account row so concurrent settlements on the same plate
        // serialize at the store
        let row = sqlx::query(
            "SELECT balance FROM vehicle_accounts WHERE plate_number = ? FOR UPDATE",
        )
        .bind(plate)
        .fetch_optional(&mut *tx)
        .await?;

        let status = match row {
            None => TransactionStatus::Unregistered,
            Some(ref row) => {
                let balance: f64 = row.get("balance");
                if balance >= amount {
                    TransactionStatus::Success
                } else {
                    TransactionStatus::InsufficientFunds
                }
            }
        };

        sqlx::query(
            "INSERT INTO transactions \
             (transaction_id, plate_number, amount, status, vehicle_class, location, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&meta.transaction_id)
        .bind(plate)
        .bind(amount)
        .bind(status.as_str())
        .bind(&meta.vehicle_class)
        .bind(&meta.location)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if status == TransactionStatus::Success {
            sqlx::query(
                "UPDATE vehicle_accounts \
                 SET balance = balance - ?, total_paid = total_paid + ?, trip_count = trip_count + 1 \
                 WHERE plate_number = ?",
            )
            .bind(amount)
            .bind(amount)
            .bind(plate)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(status)
    }

    /// Single transaction row outside the atomic path, for the ERROR status
    async fn insert_transaction_row(
        &self,
        meta: &SettlementMeta,
        plate: &str,
        amount: f64,
        status: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO transactions \
             (transaction_id, plate_number, amount, status, vehicle_class, location, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&meta.transaction_id)
        .bind(plate)
        .bind(amount)
        .bind(status.as_str())
        .bind(&meta.vehicle_class)
        .bind(&meta.location)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn normalize_plate(plate: &str) -> String {
    plate.trim().to_uppercase()
}

#[async_trait]
impl LedgerGateway for SqlLedgerGateway {
    async fn lookup(&self, plate_number: &str) -> Result<AccountInfo> {
        let plate = normalize_plate(plate_number);

        let row = sqlx::query(
            "SELECT plate_number, balance, vehicle_class, owner_contact \
             FROM vehicle_accounts WHERE plate_number = ?",
        )
        .bind(&plate)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(AccountInfo {
                plate_number: row.get("plate_number"),
                is_registered: true,
                balance: row.get("balance"),
                vehicle_class: row.get("vehicle_class"),
                owner: row.get("owner_contact"),
            }),
            None => {
                tracing::debug!(plate = %plate, "Plate not registered");
                Ok(AccountInfo::unregistered(plate))
            }
        }
    }

    async fn settle(
        &self,
        plate_number: &str,
        amount: f64,
        meta: SettlementMeta,
    ) -> Result<Transaction> {
        let plate = normalize_plate(plate_number);
        let now = Utc::now();

        // Internal store failures still produce exactly one transaction row
        // for this settlement attempt, with status ERROR and the balance
        // untouched (the atomic transaction rolled back).
        let status = match self.settle_atomic(&plate, amount, &meta, now).await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(
                    transaction_id = %meta.transaction_id,
                    plate = %plate,
                    error = %e,
                    "Settlement failed internally, recording ERROR transaction"
                );
                if let Err(insert_err) = self
                    .insert_transaction_row(&meta, &plate, amount, TransactionStatus::Error, now)
                    .await
                {
                    tracing::error!(
                        transaction_id = %meta.transaction_id,
                        error = %insert_err,
                        "ERROR transaction row could not be written"
                    );
                }
                TransactionStatus::Error
            }
        };

        tracing::info!(
            transaction_id = %meta.transaction_id,
            plate = %plate,
            amount = amount,
            status = status.as_str(),
            "Settlement recorded"
        );

        Ok(Transaction {
            transaction_id: meta.transaction_id,
            plate_number: plate,
            amount,
            status,
            vehicle_class: meta.vehicle_class,
            location: meta.location,
            created_at: now,
        })
    }

    async fn record_violation(&self, detail: ViolationDetail) -> Result<u64> {
        let attempts = serde_json::to_value(&detail.attempts)?;

        let result = sqlx::query(
            "INSERT INTO violations (run_id, plate, reason, attempts, location, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&detail.run_id)
        .bind(detail.plate.as_ref().map(|p| normalize_plate(p)))
        .bind(&detail.reason)
        .bind(attempts.to_string())
        .bind(&detail.location)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let violation_id = result.last_insert_id();

        tracing::warn!(
            violation_id = violation_id,
            run_id = %detail.run_id,
            plate = detail.plate.as_deref().unwrap_or("-"),
            reason = %detail.reason,
            "Violation recorded"
        );

        Ok(violation_id)
    }

    async fn recent_transactions(&self, limit: u32) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT transaction_id, plate_number, amount, status, vehicle_class, location, created_at \
             FROM transactions ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Transaction {
                transaction_id: row.get("transaction_id"),
                plate_number: row.get("plate_number"),
                amount: row.get("amount"),
                status: TransactionStatus::parse(row.get("status")),
                vehicle_class: row.get("vehicle_class"),
                location: row.get("location"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn recent_violations(&self, limit: u32) -> Result<Vec<Violation>> {
        let rows = sqlx::query(
            "SELECT violation_id, run_id, plate, reason, attempts, location, created_at \
             FROM violations ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let attempts: String = row.get("attempts");
                Violation {
                    violation_id: row.get("violation_id"),
                    run_id: row.get("run_id"),
                    plate: row.get("plate"),
                    reason: row.get("reason"),
                    attempts: serde_json::from_str(&attempts)
                        .unwrap_or(serde_json::Value::Null),
                    location: row.get("location"),
                    created_at: row.get("created_at"),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TransactionStatus::Success,
            TransactionStatus::InsufficientFunds,
            TransactionStatus::Unregistered,
            TransactionStatus::Error,
        ] {
            assert_eq!(TransactionStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_plate_normalization() {
        assert_eq!(normalize_plate(" ca1234x "), "CA1234X");
    }

    #[test]
    fn test_unregistered_account() {
        let info = AccountInfo::unregistered("AB123".to_string());
        assert!(!info.is_registered);
        assert_eq!(info.balance, 0.0);
    }
}
