//! Confirmation persistence. The store only ever talks to the
//! [`ConfirmationRepo`] trait; production rides PostgreSQL, tests ride the
//! in-memory fake next to them.

use std::time::Duration;

use async_trait::async_trait;
use centavo_core::model::{ConfirmationStatus, ConfirmationView, TransactionKind};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("a pending confirmation already exists for this conversation")]
    PendingExists,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<RepoError> for crate::error::AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Database(db) => crate::error::AppError::Database(db),
            RepoError::PendingExists => {
                crate::error::AppError::Internal("unexpected pending conflict".to_string())
            }
        }
    }
}

/// Fields needed to create a confirmation row. Timestamps are supplied by
/// the caller so tests control the clock.
#[derive(Debug, Clone)]
pub struct NewConfirmation {
    pub conversation_id: String,
    pub user_id: Uuid,
    pub account_id: Option<String>,
    pub kind: TransactionKind,
    pub amount_minor_units: i64,
    pub category_name: String,
    pub sub_category_name: Option<String>,
    pub category_id: Option<String>,
    pub sub_category_id: Option<String>,
    pub description: Option<String>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConfirmationRow {
    pub id: Uuid,
    pub conversation_id: String,
    pub user_id: Uuid,
    pub account_id: Option<String>,
    pub kind: String,
    pub amount_minor_units: i64,
    pub category_name: String,
    pub sub_category_name: Option<String>,
    pub category_id: Option<String>,
    pub sub_category_id: Option<String>,
    pub description: Option<String>,
    pub tx_date: NaiveDate,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub notified_expiring: bool,
    pub delivery_sent: bool,
    pub delivery_attempts: i32,
    pub last_delivery_error: Option<String>,
    pub remote_transaction_id: Option<String>,
}

impl ConfirmationRow {
    /// Status values are constrained by a database CHECK; an unknown value
    /// can only mean a migration bug, so fall back to the non-terminal state.
    pub fn state(&self) -> ConfirmationStatus {
        ConfirmationStatus::parse(&self.status).unwrap_or(ConfirmationStatus::Pending)
    }

    pub fn transaction_kind(&self) -> TransactionKind {
        TransactionKind::parse(&self.kind).unwrap_or(TransactionKind::Expense)
    }

    /// "Alimentação > Supermercado" for prompts and listings.
    pub fn display_category(&self) -> String {
        match &self.sub_category_name {
            Some(sub) => format!("{} > {}", self.category_name, sub),
            None => self.category_name.clone(),
        }
    }

    pub fn into_view(self) -> ConfirmationView {
        let status = self.state();
        let kind = self.transaction_kind();
        ConfirmationView {
            id: self.id,
            conversation_id: self.conversation_id,
            user_id: self.user_id,
            status,
            kind,
            amount_minor_units: self.amount_minor_units,
            category_name: self.category_name,
            sub_category_name: self.sub_category_name,
            description: self.description,
            date: self.tx_date,
            created_at: self.created_at,
            expires_at: self.expires_at,
            delivery_sent: self.delivery_sent,
            delivery_attempts: self.delivery_attempts,
            last_delivery_error: self.last_delivery_error,
            remote_transaction_id: self.remote_transaction_id,
        }
    }
}

#[async_trait]
pub trait ConfirmationRepo: Send + Sync {
    /// Insert a PENDING row. Trips [`RepoError::PendingExists`] if the
    /// conversation already has one — the partial unique index is the
    /// last line of defense behind the caller's check.
    async fn insert_pending(
        &self,
        new: &NewConfirmation,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<ConfirmationRow, RepoError>;

    /// Insert an already-delivered CONFIRMED row: the audit trail of an
    /// auto-registered transaction that never went through PENDING.
    async fn insert_delivered(
        &self,
        new: &NewConfirmation,
        now: DateTime<Utc>,
        remote_transaction_id: &str,
    ) -> Result<ConfirmationRow, RepoError>;

    async fn pending_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConfirmationRow>, RepoError>;

    async fn by_id(&self, id: Uuid) -> Result<Option<ConfirmationRow>, RepoError>;

    /// Optimistic transition out of PENDING. Returns false when the row
    /// was not PENDING anymore — the caller must treat that as invalid,
    /// never overwrite.
    async fn transition_from_pending(
        &self,
        id: Uuid,
        to: ConfirmationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepoError>;

    /// PENDING rows expiring within `window`, not yet warned.
    async fn due_for_warning(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError>;

    async fn mark_warned(&self, id: Uuid) -> Result<(), RepoError>;

    /// Flip every overdue PENDING row to EXPIRED, returning the rows that
    /// were flipped so the caller can notify.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<ConfirmationRow>, RepoError>;

    /// CONFIRMED, undelivered, attempts below the cap — oldest first.
    async fn deliverable(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError>;

    /// Guarded success write: only flips an undelivered row. Returns false
    /// when the row was already delivered, making delivery idempotent.
    async fn record_delivery_success(
        &self,
        id: Uuid,
        remote_transaction_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepoError>;

    /// Record a failed attempt, returning the new attempt count.
    async fn record_delivery_failure(&self, id: Uuid, error: &str) -> Result<i32, RepoError>;

    /// Delete delivered rows older than the cutoff. REJECTED and EXPIRED
    /// rows are retained for audit and never swept.
    async fn sweep_delivered(&self, cutoff: DateTime<Utc>) -> Result<u64, RepoError>;

    /// A user's open items: PENDING plus confirmed-but-undelivered.
    async fn open_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError>;

    async fn list_pending(&self, limit: i64) -> Result<Vec<ConfirmationRow>, RepoError>;

    /// Rows that exhausted their delivery attempts without success.
    async fn list_failed(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError>;
}

pub struct PgConfirmationRepo {
    pool: PgPool,
}

impl PgConfirmationRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ALL_COLUMNS: &str = "id, conversation_id, user_id, account_id, kind, amount_minor_units, \
     category_name, sub_category_name, category_id, sub_category_id, description, tx_date, \
     status, created_at, confirmed_at, expires_at, notified_expiring, delivery_sent, \
     delivery_attempts, last_delivery_error, remote_transaction_id";

#[async_trait]
impl ConfirmationRepo for PgConfirmationRepo {
    async fn insert_pending(
        &self,
        new: &NewConfirmation,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<ConfirmationRow, RepoError> {
        let row = sqlx::query_as::<_, ConfirmationRow>(&format!(
            r#"
            INSERT INTO confirmations (
                id, conversation_id, user_id, account_id, kind, amount_minor_units,
                category_name, sub_category_name, category_id, sub_category_id,
                description, tx_date, status, created_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'pending', $13, $14)
            RETURNING {ALL_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(&new.conversation_id)
        .bind(new.user_id)
        .bind(&new.account_id)
        .bind(new.kind.as_str())
        .bind(new.amount_minor_units)
        .bind(&new.category_name)
        .bind(&new.sub_category_name)
        .bind(&new.category_id)
        .bind(&new.sub_category_id)
        .bind(&new.description)
        .bind(new.date)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if let sqlx::Error::Database(ref db_err) = err {
                if db_err.code().as_deref() == Some("23505") {
                    return RepoError::PendingExists;
                }
            }
            RepoError::Database(err)
        })?;

        Ok(row)
    }

    async fn insert_delivered(
        &self,
        new: &NewConfirmation,
        now: DateTime<Utc>,
        remote_transaction_id: &str,
    ) -> Result<ConfirmationRow, RepoError> {
        let row = sqlx::query_as::<_, ConfirmationRow>(&format!(
            r#"
            INSERT INTO confirmations (
                id, conversation_id, user_id, account_id, kind, amount_minor_units,
                category_name, sub_category_name, category_id, sub_category_id,
                description, tx_date, status, created_at, confirmed_at, expires_at,
                delivery_sent, delivery_attempts, remote_transaction_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    'confirmed', $13, $13, $13, TRUE, 1, $14)
            RETURNING {ALL_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(&new.conversation_id)
        .bind(new.user_id)
        .bind(&new.account_id)
        .bind(new.kind.as_str())
        .bind(new.amount_minor_units)
        .bind(&new.category_name)
        .bind(&new.sub_category_name)
        .bind(&new.category_id)
        .bind(&new.sub_category_id)
        .bind(&new.description)
        .bind(new.date)
        .bind(now)
        .bind(remote_transaction_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn pending_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConfirmationRow>, RepoError> {
        let row = sqlx::query_as::<_, ConfirmationRow>(&format!(
            r#"
            SELECT {ALL_COLUMNS}
            FROM confirmations
            WHERE conversation_id = $1
              AND status = 'pending'
            "#
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn by_id(&self, id: Uuid) -> Result<Option<ConfirmationRow>, RepoError> {
        let row = sqlx::query_as::<_, ConfirmationRow>(&format!(
            r#"
            SELECT {ALL_COLUMNS}
            FROM confirmations
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn transition_from_pending(
        &self,
        id: Uuid,
        to: ConfirmationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE confirmations
            SET status = $2,
                confirmed_at = CASE WHEN $2 = 'confirmed' THEN $3 ELSE confirmed_at END
            WHERE id = $1
              AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn due_for_warning(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError> {
        let horizon = now + chrono::Duration::from_std(window).unwrap_or_default();
        let rows = sqlx::query_as::<_, ConfirmationRow>(&format!(
            r#"
            SELECT {ALL_COLUMNS}
            FROM confirmations
            WHERE status = 'pending'
              AND notified_expiring = FALSE
              AND expires_at > $1
              AND expires_at <= $2
            ORDER BY expires_at
            LIMIT $3
            "#
        ))
        .bind(now)
        .bind(horizon)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn mark_warned(&self, id: Uuid) -> Result<(), RepoError> {
        sqlx::query("UPDATE confirmations SET notified_expiring = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<ConfirmationRow>, RepoError> {
        let rows = sqlx::query_as::<_, ConfirmationRow>(&format!(
            r#"
            UPDATE confirmations
            SET status = 'expired'
            WHERE status = 'pending'
              AND expires_at <= $1
            RETURNING {ALL_COLUMNS}
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn deliverable(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError> {
        let rows = sqlx::query_as::<_, ConfirmationRow>(&format!(
            r#"
            SELECT {ALL_COLUMNS}
            FROM confirmations
            WHERE status = 'confirmed'
              AND delivery_sent = FALSE
              AND delivery_attempts < $1
            ORDER BY created_at
            LIMIT $2
            "#
        ))
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn record_delivery_success(
        &self,
        id: Uuid,
        remote_transaction_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE confirmations
            SET delivery_sent = TRUE,
                delivery_attempts = delivery_attempts + 1,
                remote_transaction_id = $2,
                last_delivery_error = NULL,
                confirmed_at = COALESCE(confirmed_at, $3)
            WHERE id = $1
              AND delivery_sent = FALSE
            "#,
        )
        .bind(id)
        .bind(remote_transaction_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_delivery_failure(&self, id: Uuid, error: &str) -> Result<i32, RepoError> {
        let attempts = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE confirmations
            SET delivery_attempts = delivery_attempts + 1,
                last_delivery_error = $2
            WHERE id = $1
            RETURNING delivery_attempts
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_one(&self.pool)
        .await?;

        Ok(attempts)
    }

    async fn sweep_delivered(&self, cutoff: DateTime<Utc>) -> Result<u64, RepoError> {
        let result = sqlx::query(
            r#"
            DELETE FROM confirmations
            WHERE delivery_sent = TRUE
              AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn open_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError> {
        let rows = sqlx::query_as::<_, ConfirmationRow>(&format!(
            r#"
            SELECT {ALL_COLUMNS}
            FROM confirmations
            WHERE user_id = $1
              AND (status = 'pending' OR (status = 'confirmed' AND delivery_sent = FALSE))
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<ConfirmationRow>, RepoError> {
        let rows = sqlx::query_as::<_, ConfirmationRow>(&format!(
            r#"
            SELECT {ALL_COLUMNS}
            FROM confirmations
            WHERE status = 'pending'
            ORDER BY created_at
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_failed(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError> {
        let rows = sqlx::query_as::<_, ConfirmationRow>(&format!(
            r#"
            SELECT {ALL_COLUMNS}
            FROM confirmations
            WHERE status = 'confirmed'
              AND delivery_sent = FALSE
              AND delivery_attempts >= $1
            ORDER BY created_at
            LIMIT $2
            "#
        ))
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
