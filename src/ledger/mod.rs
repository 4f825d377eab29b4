//! Metered billing ledger
//!
//! Append-only transaction log plus a derived voice-seconds balance.
//! Naming follows the upstream billing schema, which is the inverse of
//! accounting convention: DEBIT tops the balance up, CREDIT consumes
//! from it. Callers depend on this mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::info;

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    /// Adds consumable seconds (a top-up).
    Debit,
    /// Consumes seconds; requires sufficient balance.
    Credit,
}

/// One audit row. Never mutated after insert.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: String,
    pub amount: i64,
    pub description: String,
    pub transaction_type: TransactionKind,
    pub created_at: DateTime<Utc>,
}

pub struct BillingLedger {
    pool: SqlitePool,
}

impl BillingLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Remaining voice seconds; absent balance row reads as zero.
    pub async fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT voice_seconds FROM user_balance WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0).unwrap_or(0))
    }

    /// Apply one transaction: balance mutation and audit insert commit
    /// together or not at all.
    ///
    /// CREDIT uses a conditional update so two concurrent consumers can
    /// never both pass the funds check; zero rows affected means
    /// insufficient funds and nothing is written.
    pub async fn post(
        &self,
        user_id: &str,
        amount: i64,
        description: &str,
        kind: TransactionKind,
    ) -> Result<i64, LedgerError> {
        let mut tx = self.pool.begin().await?;

        match kind {
            TransactionKind::Debit => {
                sqlx::query(
                    "INSERT INTO user_balance (user_id, voice_seconds) VALUES (?, ?) \
                     ON CONFLICT(user_id) DO UPDATE SET \
                     voice_seconds = voice_seconds + excluded.voice_seconds",
                )
                .bind(user_id)
                .bind(amount)
                .execute(&mut *tx)
                .await?;
            }
            TransactionKind::Credit => {
                let updated = sqlx::query(
                    "UPDATE user_balance SET voice_seconds = voice_seconds - ? \
                     WHERE user_id = ? AND voice_seconds >= ?",
                )
                .bind(amount)
                .bind(user_id)
                .bind(amount)
                .execute(&mut *tx)
                .await?;

                if updated.rows_affected() == 0 {
                    // Dropping the transaction rolls it back.
                    return Err(LedgerError::InsufficientFunds);
                }
            }
        }

        let inserted = sqlx::query(
            "INSERT INTO transactions (user_id, amount, description, transaction_type, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(amount)
        .bind(description)
        .bind(kind)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let id = inserted.last_insert_rowid();
        tx.commit().await?;

        info!(
            "posted {:?} of {}s for user {} (transaction {})",
            kind, amount, user_id, id
        );

        Ok(id)
    }

    /// Transaction history, newest first.
    pub async fn get(&self, user_id: &str) -> Result<Vec<Transaction>, LedgerError> {
        Ok(sqlx::query_as::<_, Transaction>(
            "SELECT id, user_id, amount, description, transaction_type, created_at \
             FROM transactions WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }
}
