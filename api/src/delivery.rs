//! Shared delivery routine. The auto-register fast path and the retry
//! sweep both go through here so category/account resolution can never
//! diverge between them.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::confirmation::repo::{ConfirmationRepo, ConfirmationRow, NewConfirmation, RepoError};
use crate::providers::{
    CreateTransactionRequest, LedgerApiClient, NotificationContext, NotificationSink,
};

const SOURCE_TAG: &str = "centavo";

#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Delivered { remote_transaction_id: String },
    /// The row was already delivered; nothing was sent.
    AlreadyDelivered,
    Failed {
        error: String,
        attempts: i32,
        permanent: bool,
    },
}

pub struct DeliveryService {
    repo: Arc<dyn ConfirmationRepo>,
    ledger: Arc<dyn LedgerApiClient>,
    notifier: Arc<dyn NotificationSink>,
    max_attempts: i32,
}

impl DeliveryService {
    pub fn new(
        repo: Arc<dyn ConfirmationRepo>,
        ledger: Arc<dyn LedgerApiClient>,
        notifier: Arc<dyn NotificationSink>,
        max_attempts: i32,
    ) -> Self {
        Self {
            repo,
            ledger,
            notifier,
            max_attempts,
        }
    }

    /// Stable key derived from the confirmation id so the ledger can
    /// deduplicate a retried create.
    pub fn idempotency_key(id: Uuid) -> String {
        let digest = Sha256::digest(id.as_bytes());
        format!("tx-{}", &hex::encode(digest)[..20])
    }

    fn request_for(
        new: &NewConfirmation,
        idempotency_key: String,
    ) -> Result<CreateTransactionRequest, String> {
        let category_id = new
            .category_id
            .clone()
            .ok_or_else(|| "category id is unresolved".to_string())?;
        let account_id = new
            .account_id
            .clone()
            .ok_or_else(|| "account id is missing".to_string())?;

        Ok(CreateTransactionRequest {
            amount_minor_units: new.amount_minor_units,
            kind: new.kind,
            date: new.date,
            category_id,
            sub_category_id: new.sub_category_id.clone(),
            account_id,
            description: new.description.clone(),
            source: SOURCE_TAG.to_string(),
            idempotency_key,
        })
    }

    fn request_for_row(row: &ConfirmationRow) -> Result<CreateTransactionRequest, String> {
        let new = NewConfirmation {
            conversation_id: row.conversation_id.clone(),
            user_id: row.user_id,
            account_id: row.account_id.clone(),
            kind: row.transaction_kind(),
            amount_minor_units: row.amount_minor_units,
            category_name: row.category_name.clone(),
            sub_category_name: row.sub_category_name.clone(),
            category_id: row.category_id.clone(),
            sub_category_id: row.sub_category_id.clone(),
            description: row.description.clone(),
            date: row.tx_date,
        };
        Self::request_for(&new, Self::idempotency_key(row.id))
    }

    /// One ledger call, outcome flattened to remote id or error text.
    async fn send(&self, request: &CreateTransactionRequest) -> Result<String, String> {
        match self.ledger.create_transaction(request).await {
            Ok(receipt) if receipt.success => Ok(receipt
                .transaction_id
                .unwrap_or_else(|| "unknown".to_string())),
            Ok(receipt) => Err(receipt
                .error
                .unwrap_or_else(|| "ledger rejected the transaction".to_string())),
            Err(err) => Err(err.to_string()),
        }
    }

    /// Direct delivery for the auto-register path: no row exists yet, so
    /// the attempt gets its own key. Returns the remote transaction id.
    pub async fn send_direct(&self, new: &NewConfirmation) -> Result<String, String> {
        let request = Self::request_for(new, Self::idempotency_key(Uuid::now_v7()))?;
        self.send(&request).await
    }

    /// Deliver one confirmed row. Idempotent: an already-sent row no-ops,
    /// and the guarded success write closes the race between two sweeps.
    pub async fn deliver_row(&self, row: &ConfirmationRow) -> DeliveryOutcome {
        if row.delivery_sent {
            return DeliveryOutcome::AlreadyDelivered;
        }

        let request = match Self::request_for_row(row) {
            Ok(request) => request,
            Err(reason) => return self.record_failure(row, reason).await,
        };

        match self.send(&request).await {
            Ok(remote_transaction_id) => {
                match self
                    .repo
                    .record_delivery_success(row.id, &remote_transaction_id, Utc::now())
                    .await
                {
                    Ok(true) => {
                        tracing::info!(
                            confirmation_id = %row.id,
                            remote_transaction_id = %remote_transaction_id,
                            "Delivered transaction to ledger"
                        );
                        DeliveryOutcome::Delivered {
                            remote_transaction_id,
                        }
                    }
                    Ok(false) => DeliveryOutcome::AlreadyDelivered,
                    Err(err) => {
                        tracing::error!(
                            confirmation_id = %row.id,
                            error = %err,
                            "Delivered but failed to record; retry sweep will no-op via idempotency key"
                        );
                        DeliveryOutcome::Delivered {
                            remote_transaction_id,
                        }
                    }
                }
            }
            Err(error) => self.record_failure(row, error).await,
        }
    }

    async fn record_failure(&self, row: &ConfirmationRow, error: String) -> DeliveryOutcome {
        let attempts = match self.repo.record_delivery_failure(row.id, &error).await {
            Ok(attempts) => attempts,
            Err(err) => {
                tracing::error!(confirmation_id = %row.id, error = %err, "Failed to record delivery failure");
                row.delivery_attempts + 1
            }
        };

        let permanent = attempts >= self.max_attempts;
        tracing::warn!(
            confirmation_id = %row.id,
            attempts,
            permanent,
            error = %error,
            "Delivery attempt failed"
        );

        if permanent {
            self.notifier
                .notify(
                    &row.conversation_id,
                    &format!(
                        "Falha permanente ao registrar {} em {} após {} tentativas.",
                        centavo_core::money::format_brl(row.amount_minor_units),
                        row.display_category(),
                        attempts
                    ),
                    NotificationContext::OperatorAlert,
                    serde_json::json!({
                        "confirmation_id": row.id,
                        "attempts": attempts,
                        "error": error,
                    }),
                )
                .await;
        }

        DeliveryOutcome::Failed {
            error,
            attempts,
            permanent,
        }
    }

    /// Retry sweep body: confirmed, undelivered, under the attempt cap,
    /// oldest first, bounded batch.
    pub async fn run_sweep(&self, batch_size: i64) -> Result<SweepStats, RepoError> {
        let rows = self.repo.deliverable(self.max_attempts, batch_size).await?;
        let mut stats = SweepStats::default();

        for row in rows {
            match self.deliver_row(&row).await {
                DeliveryOutcome::Delivered { .. } => stats.delivered += 1,
                DeliveryOutcome::AlreadyDelivered => {}
                DeliveryOutcome::Failed { .. } => stats.failed += 1,
            }
        }

        Ok(stats)
    }

    /// Operator-forced resend. Ignores the attempt cap on purpose — a
    /// human decided to try again.
    pub async fn resend(&self, id: Uuid) -> Result<Option<DeliveryOutcome>, RepoError> {
        let Some(row) = self.repo.by_id(id).await? else {
            return Ok(None);
        };
        Ok(Some(self.deliver_row(&row).await))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub delivered: usize,
    pub failed: usize,
}
