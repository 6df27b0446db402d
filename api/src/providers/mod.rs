//! Collaborator contracts. The engine only ever sees these traits; the
//! HTTP implementations live in [`http`] and fakes live next to the tests
//! that use them.

pub mod http;

use async_trait::async_trait;
use centavo_core::model::TransactionKind;
use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::resolver::CategoryEntry;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Response(String),
}

/// A category as the account-management API reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCategory {
    pub id: String,
    pub name: String,
    pub kind: TransactionKind,
    #[serde(default)]
    pub sub_categories: Vec<RemoteSubCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSubCategory {
    pub id: String,
    pub name: String,
}

/// Authoritative source of a user's category tree.
#[async_trait]
pub trait AccountCategoryProvider: Send + Sync {
    async fn list_categories(
        &self,
        user_id: Uuid,
        account_id: &str,
    ) -> Result<Vec<RemoteCategory>, ProviderError>;
}

/// What the AI provider pulled out of a free-form message. Amounts arrive
/// in currency units; conversion to minor units happens exactly once, at
/// the orchestrator.
#[derive(Debug, Clone)]
pub struct AiExtraction {
    pub kind: TransactionKind,
    pub amount: Option<f64>,
    pub category: String,
    pub sub_category: Option<String>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
    pub merchant: Option<String>,
    pub confidence: f64,
}

/// Generative extraction fallback. May fail or time out; the orchestrator
/// degrades to insufficient confidence instead of propagating.
#[async_trait]
pub trait AiExtractionProvider: Send + Sync {
    async fn extract_transaction(
        &self,
        text: &str,
        context: &[CategoryEntry],
    ) -> Result<AiExtraction, ProviderError>;
}

/// Optional embedding capability for the vector scoring path.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, ProviderError>;
}

/// Payload for the external ledger's create-transaction operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CreateTransactionRequest {
    pub amount_minor_units: i64,
    pub kind: TransactionKind,
    /// ISO-8601 calendar date of the transaction.
    pub date: NaiveDate,
    pub category_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_category_id: Option<String>,
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source: String,
    /// Stable per-confirmation key so the ledger can deduplicate retries.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerReceipt {
    pub success: bool,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The external ledger API. The ledger is the source of truth for the
/// final transaction record; this service only guarantees delivery.
#[async_trait]
pub trait LedgerApiClient: Send + Sync {
    async fn create_transaction(
        &self,
        request: &CreateTransactionRequest,
    ) -> Result<LedgerReceipt, ProviderError>;
}

/// Why a notification is being sent. The sink may route or format
/// differently per context; this service does not care how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationContext {
    ConfirmationPrompt,
    ExpirationWarning,
    Expired,
    OperatorAlert,
}

impl NotificationContext {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationContext::ConfirmationPrompt => "confirmation_prompt",
            NotificationContext::ExpirationWarning => "expiration_warning",
            NotificationContext::Expired => "expired",
            NotificationContext::OperatorAlert => "operator_alert",
        }
    }
}

/// Fire-and-forget outbound notification channel. Implementations must
/// swallow their own failures; a lost notification never fails the caller.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        conversation_id: &str,
        message: &str,
        context: NotificationContext,
        metadata: serde_json::Value,
    );
}
