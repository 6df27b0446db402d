//! Confirmation workflow: PENDING → CONFIRMED | REJECTED | EXPIRED, with
//! the auto-register short-circuit and the one-pending-per-conversation
//! invariant.

#[cfg(test)]
pub mod memory;
pub mod reply;
pub mod repo;

use std::sync::Arc;
use std::time::Duration;

use centavo_core::model::ConfirmationStatus;
use chrono::{DateTime, Utc};

use crate::delivery::{DeliveryOutcome, DeliveryService};
use repo::{ConfirmationRepo, ConfirmationRow, NewConfirmation, RepoError};
use reply::ReplyIntent;

#[derive(Debug, Clone, Copy)]
pub struct StoreTuning {
    pub confirmation_timeout: Duration,
    pub auto_register_threshold: f64,
}

pub struct ConfirmationStore {
    repo: Arc<dyn ConfirmationRepo>,
    delivery: Arc<DeliveryService>,
    tuning: StoreTuning,
}

#[derive(Debug)]
pub enum CreateOutcome {
    /// Delivered without ever persisting a PENDING row.
    AutoRegistered { row: ConfirmationRow },
    PendingCreated { row: ConfirmationRow },
    /// A pending confirmation raced in for this conversation.
    Deflected,
}

#[derive(Debug)]
pub enum ResponseOutcome {
    Confirmed {
        row: ConfirmationRow,
        delivery: DeliveryOutcome,
    },
    Rejected {
        row: ConfirmationRow,
    },
    /// The pending row had already passed its deadline when the reply
    /// arrived; it was flipped to EXPIRED and the reply is invalid.
    ExpiredNow {
        row: ConfirmationRow,
    },
    NoPending,
    /// Reply could not be classified; state unchanged.
    Guidance {
        row: ConfirmationRow,
    },
}

impl ConfirmationStore {
    pub fn new(
        repo: Arc<dyn ConfirmationRepo>,
        delivery: Arc<DeliveryService>,
        tuning: StoreTuning,
    ) -> Self {
        Self {
            repo,
            delivery,
            tuning,
        }
    }

    pub async fn pending_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConfirmationRow>, RepoError> {
        self.repo.pending_for_conversation(conversation_id).await
    }

    pub async fn open_for_user(
        &self,
        user_id: uuid::Uuid,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError> {
        self.repo.open_for_user(user_id, limit).await
    }

    pub async fn by_id(&self, id: uuid::Uuid) -> Result<Option<ConfirmationRow>, RepoError> {
        self.repo.by_id(id).await
    }

    pub async fn list_pending(&self, limit: i64) -> Result<Vec<ConfirmationRow>, RepoError> {
        self.repo.list_pending(limit).await
    }

    pub async fn list_failed(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<ConfirmationRow>, RepoError> {
        self.repo.list_failed(max_attempts, limit).await
    }

    fn can_auto_register(&self, new: &NewConfirmation, confidence: f64) -> bool {
        new.category_id.is_some()
            && new.sub_category_id.is_some()
            && new.account_id.is_some()
            && confidence >= self.tuning.auto_register_threshold
    }

    /// Create a confirmation for a resolved transaction. Completeness plus
    /// high confidence takes the fast path: immediate delivery, audit row,
    /// no PENDING state. A failed fast delivery falls back to the normal
    /// PENDING flow so the retry path can finish the job.
    pub async fn create(
        &self,
        new: NewConfirmation,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> Result<CreateOutcome, RepoError> {
        if self.can_auto_register(&new, confidence) {
            match self.delivery.send_direct(&new).await {
                Ok(remote_transaction_id) => {
                    let row = self
                        .repo
                        .insert_delivered(&new, now, &remote_transaction_id)
                        .await?;
                    tracing::info!(
                        confirmation_id = %row.id,
                        confidence,
                        "Auto-registered transaction"
                    );
                    return Ok(CreateOutcome::AutoRegistered { row });
                }
                Err(error) => {
                    tracing::warn!(
                        conversation_id = %new.conversation_id,
                        error = %error,
                        "Immediate delivery failed, falling back to manual confirmation"
                    );
                }
            }
        }

        let expires_at = now
            + chrono::Duration::from_std(self.tuning.confirmation_timeout).unwrap_or_default();
        match self.repo.insert_pending(&new, now, expires_at).await {
            Ok(row) => Ok(CreateOutcome::PendingCreated { row }),
            Err(RepoError::PendingExists) => Ok(CreateOutcome::Deflected),
            Err(err) => Err(err),
        }
    }

    /// Apply a classified user reply to the conversation's pending row.
    /// List requests and numbered references are the message layer's job;
    /// they reach here only as guidance.
    pub async fn process_response(
        &self,
        conversation_id: &str,
        intent: ReplyIntent,
        now: DateTime<Utc>,
    ) -> Result<ResponseOutcome, RepoError> {
        let Some(row) = self.repo.pending_for_conversation(conversation_id).await? else {
            return Ok(ResponseOutcome::NoPending);
        };

        if row.expires_at <= now {
            self.repo
                .transition_from_pending(row.id, ConfirmationStatus::Expired, now)
                .await?;
            return Ok(ResponseOutcome::ExpiredNow { row });
        }

        match intent {
            ReplyIntent::Affirmative => {
                let moved = self
                    .repo
                    .transition_from_pending(row.id, ConfirmationStatus::Confirmed, now)
                    .await?;
                if !moved {
                    return Ok(ResponseOutcome::NoPending);
                }

                let Some(confirmed) = self.repo.by_id(row.id).await? else {
                    return Ok(ResponseOutcome::NoPending);
                };
                let delivery = self.delivery.deliver_row(&confirmed).await;
                Ok(ResponseOutcome::Confirmed {
                    row: confirmed,
                    delivery,
                })
            }
            ReplyIntent::Negative => {
                let moved = self
                    .repo
                    .transition_from_pending(row.id, ConfirmationStatus::Rejected, now)
                    .await?;
                if !moved {
                    return Ok(ResponseOutcome::NoPending);
                }
                Ok(ResponseOutcome::Rejected { row })
            }
            ReplyIntent::ListRequest | ReplyIntent::Reference(_) | ReplyIntent::Other => {
                Ok(ResponseOutcome::Guidance { row })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use centavo_core::model::TransactionKind;
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::memory::MemoryConfirmationRepo;
    use super::*;
    use crate::testutil::{FakeLedger, RecordingSink};

    struct Harness {
        repo: Arc<MemoryConfirmationRepo>,
        ledger: Arc<FakeLedger>,
        store: ConfirmationStore,
    }

    fn harness() -> Harness {
        let repo = Arc::new(MemoryConfirmationRepo::new());
        let ledger = Arc::new(FakeLedger::new());
        let sink = Arc::new(RecordingSink::new());
        let delivery = Arc::new(DeliveryService::new(
            repo.clone(),
            ledger.clone(),
            sink,
            5,
        ));
        let store = ConfirmationStore::new(
            repo.clone(),
            delivery,
            StoreTuning {
                confirmation_timeout: Duration::from_secs(300),
                auto_register_threshold: 0.9,
            },
        );
        Harness {
            repo,
            ledger,
            store,
        }
    }

    fn resolved(conversation_id: &str) -> NewConfirmation {
        NewConfirmation {
            conversation_id: conversation_id.to_string(),
            user_id: Uuid::now_v7(),
            account_id: Some("acc-1".to_string()),
            kind: TransactionKind::Expense,
            amount_minor_units: 5_000,
            category_name: "Alimentação".to_string(),
            sub_category_name: Some("Supermercado".to_string()),
            category_id: Some("c1".to_string()),
            sub_category_id: Some("s1".to_string()),
            description: Some("mercado".to_string()),
            date: NaiveDate::from_ymd_opt(2026, 8, 6).expect("valid date"),
        }
    }

    #[tokio::test]
    async fn complete_and_confident_auto_registers_without_pending() {
        let h = harness();
        let outcome = h
            .store
            .create(resolved("conv-1"), 0.95, Utc::now())
            .await
            .expect("create");

        assert!(matches!(outcome, CreateOutcome::AutoRegistered { .. }));
        assert_eq!(h.ledger.call_count(), 1);
        assert_eq!(h.repo.pending_count("conv-1").await, 0);

        let rows = h.repo.all().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state(), ConfirmationStatus::Confirmed);
        assert!(rows[0].delivery_sent);
    }

    #[tokio::test]
    async fn incomplete_resolution_never_auto_registers() {
        let variants: Vec<(NewConfirmation, f64)> = vec![
            (
                NewConfirmation {
                    category_id: None,
                    ..resolved("conv-1")
                },
                0.99,
            ),
            (
                NewConfirmation {
                    sub_category_id: None,
                    ..resolved("conv-2")
                },
                0.99,
            ),
            (
                NewConfirmation {
                    account_id: None,
                    ..resolved("conv-3")
                },
                0.99,
            ),
            (resolved("conv-4"), 0.89),
        ];

        for (new, confidence) in variants {
            let h = harness();
            let outcome = h
                .store
                .create(new, confidence, Utc::now())
                .await
                .expect("create");
            assert!(
                matches!(outcome, CreateOutcome::PendingCreated { .. }),
                "confidence {confidence} should have gone to PENDING"
            );
            assert_eq!(h.ledger.call_count(), 0);
        }
    }

    #[tokio::test]
    async fn failed_fast_delivery_falls_back_to_pending() {
        let h = harness();
        h.ledger.push_failure("503").await;

        let outcome = h
            .store
            .create(resolved("conv-1"), 0.95, Utc::now())
            .await
            .expect("create");

        assert!(matches!(outcome, CreateOutcome::PendingCreated { .. }));
        assert_eq!(h.repo.pending_count("conv-1").await, 1);
    }

    #[tokio::test]
    async fn at_most_one_pending_per_conversation() {
        let h = harness();
        let now = Utc::now();

        let first = h.store.create(resolved("conv-1"), 0.5, now).await.expect("create");
        assert!(matches!(first, CreateOutcome::PendingCreated { .. }));

        let second = h.store.create(resolved("conv-1"), 0.5, now).await.expect("create");
        assert!(matches!(second, CreateOutcome::Deflected));
        assert_eq!(h.repo.pending_count("conv-1").await, 1);

        // Resolving the pending row reopens the conversation.
        h.store
            .process_response("conv-1", ReplyIntent::Negative, now)
            .await
            .expect("reject");
        let third = h.store.create(resolved("conv-1"), 0.5, now).await.expect("create");
        assert!(matches!(third, CreateOutcome::PendingCreated { .. }));
        assert_eq!(h.repo.pending_count("conv-1").await, 1);
    }

    #[tokio::test]
    async fn affirmative_reply_confirms_and_delivers() {
        let h = harness();
        let now = Utc::now();
        h.store.create(resolved("conv-1"), 0.5, now).await.expect("create");

        let outcome = h
            .store
            .process_response("conv-1", ReplyIntent::Affirmative, now)
            .await
            .expect("respond");

        let ResponseOutcome::Confirmed { row, delivery } = outcome else {
            panic!("expected confirmation");
        };
        assert_eq!(row.state(), ConfirmationStatus::Confirmed);
        assert!(matches!(delivery, DeliveryOutcome::Delivered { .. }));
        assert_eq!(h.ledger.call_count(), 1);
    }

    #[tokio::test]
    async fn negative_reply_rejects_terminally() {
        let h = harness();
        let now = Utc::now();
        h.store.create(resolved("conv-1"), 0.5, now).await.expect("create");

        let outcome = h
            .store
            .process_response("conv-1", ReplyIntent::Negative, now)
            .await
            .expect("respond");
        assert!(matches!(outcome, ResponseOutcome::Rejected { .. }));
        assert_eq!(h.ledger.call_count(), 0);

        let again = h
            .store
            .process_response("conv-1", ReplyIntent::Affirmative, now)
            .await
            .expect("respond");
        assert!(matches!(again, ResponseOutcome::NoPending));
    }

    #[tokio::test]
    async fn expired_row_is_never_confirmable() {
        let h = harness();
        let created_at = Utc::now();
        h.store
            .create(resolved("conv-1"), 0.5, created_at)
            .await
            .expect("create");

        let late = created_at + chrono::Duration::seconds(301);
        let outcome = h
            .store
            .process_response("conv-1", ReplyIntent::Affirmative, late)
            .await
            .expect("respond");
        assert!(matches!(outcome, ResponseOutcome::ExpiredNow { .. }));

        let rows = h.repo.all().await;
        assert_eq!(rows[0].state(), ConfirmationStatus::Expired);
        assert_eq!(h.ledger.call_count(), 0);

        let again = h
            .store
            .process_response("conv-1", ReplyIntent::Affirmative, late)
            .await
            .expect("respond");
        assert!(matches!(again, ResponseOutcome::NoPending));
    }

    #[tokio::test]
    async fn unclassified_reply_changes_nothing() {
        let h = harness();
        let now = Utc::now();
        h.store.create(resolved("conv-1"), 0.5, now).await.expect("create");

        let outcome = h
            .store
            .process_response("conv-1", ReplyIntent::Other, now)
            .await
            .expect("respond");
        assert!(matches!(outcome, ResponseOutcome::Guidance { .. }));
        assert_eq!(h.repo.pending_count("conv-1").await, 1);
    }

    #[tokio::test]
    async fn reply_without_pending_reports_no_pending() {
        let h = harness();
        let outcome = h
            .store
            .process_response("conv-1", ReplyIntent::Affirmative, Utc::now())
            .await
            .expect("respond");
        assert!(matches!(outcome, ResponseOutcome::NoPending));
    }
}
