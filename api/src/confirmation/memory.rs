//! In-memory [`ConfirmationRepo`] used by unit tests across the crate.
//! Mirrors the PostgreSQL implementation's guarantees: the partial unique
//! index on pending conversations and the guarded delivery updates.

use std::time::Duration;

use async_trait::async_trait;
use centavo_core::model::ConfirmationStatus;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::repo::{ConfirmationRepo, ConfirmationRow, NewConfirmation, RepoError};

#[derive(Default)]
pub struct MemoryConfirmationRepo {
    rows: Mutex<Vec<ConfirmationRow>>,
}

impl MemoryConfirmationRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<ConfirmationRow> {
        self.rows.lock().await.clone()
    }

    pub async fn pending_count(&self, conversation_id: &str) -> usize {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|row| {
                row.conversation_id == conversation_id
                    && row.state() == ConfirmationStatus::Pending
            })
            .count()
    }

    fn build_row(
        new: &NewConfirmation,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> ConfirmationRow {
        ConfirmationRow {
            id: Uuid::now_v7(),
            conversation_id: new.conversation_id.clone(),
            user_id: new.user_id,
            account_id: new.account_id.clone(),
            kind: new.kind.as_str().to_string(),
            amount_minor_units: new.amount_minor_units,
            category_name: new.category_name.clone(),
            sub_category_name: new.sub_category_name.clone(),
            category_id: new.category_id.clone(),
            sub_category_id: new.sub_category_id.clone(),
            description: new.description.clone(),
            tx_date: new.date,
            status: ConfirmationStatus::Pending.as_str().to_string(),
            created_at: now,
            confirmed_at: None,
            expires_at,
            notified_expiring: false,
            delivery_sent: false,
            delivery_attempts: 0,
            last_delivery_error: None,
            remote_transaction_id: None,
        }
    }
}

#[async_trait]
impl ConfirmationRepo for MemoryConfirmationRepo {
    async fn insert_pending(
        &self,
        new: &NewConfirmation,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<ConfirmationRow, RepoError> {
        let mut rows = self.rows.lock().await;
        let already_pending = rows.iter().any(|row| {
            row.conversation_id == new.conversation_id
                && row.state() == ConfirmationStatus::Pending
        });
        if already_pending {
            return Err(RepoError::PendingExists);
        }

        let row = Self::build_row(new, now, expires_at);
        rows.push(row.clone());
        Ok(row)
    }

    async fn insert_delivered(
        &self,
        new: &NewConfirmation,
        now: DateTime<Utc>,
        remote_transaction_id: &str,
    ) -> Result<ConfirmationRow, RepoError> {
        let mut row = Self::build_row(new, now, now);
        row.status = ConfirmationStatus::Confirmed.as_str().to_string();
        row.confirmed_at = Some(now);
        row.delivery_sent = true;
        row.delivery_attempts = 1;
        row.remote_transaction_id = Some(remote_transaction_id.to_string());

        self.rows.lock().await.push(row.clone());
        Ok(row)
    }

    async fn pending_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConfirmationRow>, RepoError> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .find(|row| {
                row.conversation_id == conversation_id
                    && row.state() == ConfirmationStatus::Pending
            })
            .cloned())
    }

    async fn by_id(&self, id: Uuid) -> Result<Option<ConfirmationRow>, RepoError> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .find(|row| row.id == id)
            .cloned())
    }

    async fn transition_from_pending(
        &self,
        id: Uuid,
        to: ConfirmationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows
            .iter_mut()
            .find(|row| row.id == id && row.state() == ConfirmationStatus::Pending)
        else {
            return Ok(false);
        };

        row.status = to.as_str().to_string();
        if to == ConfirmationStatus::Confirmed {
            row.confirmed_at = Some(at);
        }
        Ok(true)
    }

    async fn due_for_warning(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError> {
        let horizon = now + chrono::Duration::from_std(window).unwrap_or_default();
        let mut due: Vec<ConfirmationRow> = self
            .rows
            .lock()
            .await
            .iter()
            .filter(|row| {
                row.state() == ConfirmationStatus::Pending
                    && !row.notified_expiring
                    && row.expires_at > now
                    && row.expires_at <= horizon
            })
            .cloned()
            .collect();
        due.sort_by_key(|row| row.expires_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn mark_warned(&self, id: Uuid) -> Result<(), RepoError> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.iter_mut().find(|row| row.id == id) {
            row.notified_expiring = true;
        }
        Ok(())
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<ConfirmationRow>, RepoError> {
        let mut rows = self.rows.lock().await;
        let mut expired = Vec::new();
        for row in rows.iter_mut() {
            if row.state() == ConfirmationStatus::Pending && row.expires_at <= now {
                row.status = ConfirmationStatus::Expired.as_str().to_string();
                expired.push(row.clone());
            }
        }
        Ok(expired)
    }

    async fn deliverable(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError> {
        let mut due: Vec<ConfirmationRow> = self
            .rows
            .lock()
            .await
            .iter()
            .filter(|row| {
                row.state() == ConfirmationStatus::Confirmed
                    && !row.delivery_sent
                    && row.delivery_attempts < max_attempts
            })
            .cloned()
            .collect();
        due.sort_by_key(|row| row.created_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn record_delivery_success(
        &self,
        id: Uuid,
        remote_transaction_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows
            .iter_mut()
            .find(|row| row.id == id && !row.delivery_sent)
        else {
            return Ok(false);
        };

        row.delivery_sent = true;
        row.delivery_attempts += 1;
        row.remote_transaction_id = Some(remote_transaction_id.to_string());
        row.last_delivery_error = None;
        row.confirmed_at.get_or_insert(at);
        Ok(true)
    }

    async fn record_delivery_failure(&self, id: Uuid, error: &str) -> Result<i32, RepoError> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.iter_mut().find(|row| row.id == id) else {
            return Err(RepoError::Database(sqlx::Error::RowNotFound));
        };

        row.delivery_attempts += 1;
        row.last_delivery_error = Some(error.to_string());
        Ok(row.delivery_attempts)
    }

    async fn sweep_delivered(&self, cutoff: DateTime<Utc>) -> Result<u64, RepoError> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|row| !(row.delivery_sent && row.created_at < cutoff));
        Ok((before - rows.len()) as u64)
    }

    async fn open_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError> {
        let mut open: Vec<ConfirmationRow> = self
            .rows
            .lock()
            .await
            .iter()
            .filter(|row| {
                row.user_id == user_id
                    && (row.state() == ConfirmationStatus::Pending
                        || (row.state() == ConfirmationStatus::Confirmed && !row.delivery_sent))
            })
            .cloned()
            .collect();
        open.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        open.truncate(limit as usize);
        Ok(open)
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<ConfirmationRow>, RepoError> {
        let mut pending: Vec<ConfirmationRow> = self
            .rows
            .lock()
            .await
            .iter()
            .filter(|row| row.state() == ConfirmationStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|row| row.created_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn list_failed(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError> {
        let mut failed: Vec<ConfirmationRow> = self
            .rows
            .lock()
            .await
            .iter()
            .filter(|row| {
                row.state() == ConfirmationStatus::Confirmed
                    && !row.delivery_sent
                    && row.delivery_attempts >= max_attempts
            })
            .cloned()
            .collect();
        failed.sort_by_key(|row| row.created_at);
        failed.truncate(limit as usize);
        Ok(failed)
    }
}
