use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Whether a transaction takes money out of an account or brings money in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Expense,
    Income,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Expense => "expense",
            TransactionKind::Income => "income",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "expense" => Some(TransactionKind::Expense),
            "income" => Some(TransactionKind::Income),
            _ => None,
        }
    }
}

/// How a resolution arrived at its category choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Retrieval match cleared the direct threshold; no AI call was made.
    RagDirect,
    /// The AI extraction stood on its own; retrieval could not revalidate it.
    AiOnly,
    /// The AI extraction was revalidated and overridden by retrieval.
    AiRagValidated,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::RagDirect => "rag_direct",
            Provenance::AiOnly => "ai_only",
            Provenance::AiRagValidated => "ai_rag_validated",
        }
    }
}

/// Lifecycle state of a confirmation record.
/// Pending is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Rejected,
    Expired,
}

impl ConfirmationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmationStatus::Pending => "pending",
            ConfirmationStatus::Confirmed => "confirmed",
            ConfirmationStatus::Rejected => "rejected",
            ConfirmationStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ConfirmationStatus::Pending),
            "confirmed" => Some(ConfirmationStatus::Confirmed),
            "rejected" => Some(ConfirmationStatus::Rejected),
            "expired" => Some(ConfirmationStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ConfirmationStatus::Pending)
    }
}

/// Inbound message from a messaging adapter. The adapter owns platform
/// identity; this service only sees an opaque conversation id.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MessageRequest {
    pub user_id: Uuid,
    pub conversation_id: String,
    /// Account the transaction should land on. Optional because the adapter
    /// may not have one configured yet; resolution requires it.
    #[serde(default)]
    pub account_id: Option<String>,
    pub text: String,
}

/// What the service decided to do with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Resolution cleared the auto-register bar and was delivered.
    AutoRegistered,
    /// A confirmation prompt was created and sent.
    ConfirmationRequested,
    /// The user confirmed a pending record.
    Confirmed,
    /// The user rejected a pending record.
    Rejected,
    /// The referenced confirmation had already expired.
    Expired,
    /// A numbered listing was produced.
    Listing,
    /// A numbered reference was resolved (or failed to resolve).
    Reference,
    /// The message could not be resolved; the user should rephrase.
    NeedMoreDetail,
    /// A pending confirmation blocks new resolutions for this conversation.
    Deflected,
    /// The reply could not be classified; guidance was returned.
    Guidance,
}

/// Reply returned to the messaging adapter. `reply` is ready to render
/// verbatim in the user's chat.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessageReply {
    pub outcome: MessageOutcome,
    pub reply: String,
    /// Confirmation the message acted on or created, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_id: Option<Uuid>,
}

/// Wire view of a confirmation row, served by the operational endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfirmationView {
    pub id: Uuid,
    pub conversation_id: String,
    pub user_id: Uuid,
    pub status: ConfirmationStatus,
    pub kind: TransactionKind,
    pub amount_minor_units: i64,
    pub category_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_category_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub delivery_sent: bool,
    pub delivery_attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_delivery_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_transaction_id: Option<String>,
}

/// Result of forcing a resend through the operational surface.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResendResponse {
    pub id: Uuid,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
