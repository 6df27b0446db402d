//! Conversation flow for inbound messages: pending-confirmation replies
//! first, list requests and numbered references next, fresh resolution
//! last. All user-facing text is produced here, in pt-BR.

use std::collections::HashMap;
use std::sync::Arc;

use centavo_core::model::{
    ConfirmationStatus, MessageOutcome, MessageReply, MessageRequest, TransactionKind,
};
use centavo_core::money::format_brl;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::confirmation::repo::{ConfirmationRow, NewConfirmation};
use crate::confirmation::reply::{ReplyIntent, classify_reply};
use crate::confirmation::{ConfirmationStore, CreateOutcome, ResponseOutcome};
use crate::context::{ListContextCache, ListItem, ListKind, ListLookup};
use crate::delivery::DeliveryOutcome;
use crate::error::AppError;
use crate::providers::{
    AccountCategoryProvider, EmbeddingProvider, NotificationContext, NotificationSink,
    ProviderError,
};
use crate::resolver::index::{CategoryIndex, expand_categories};
use crate::resolver::{KindCorpora, Orchestrator, Resolution, ResolutionResult};

const OPEN_LIST_LIMIT: i64 = 10;
const MAX_MESSAGE_CHARS: usize = 2_000;

pub struct MessageService {
    index: CategoryIndex,
    categories: Arc<dyn AccountCategoryProvider>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    orchestrator: Orchestrator,
    store: Arc<ConfirmationStore>,
    context: ListContextCache,
    notifier: Arc<dyn NotificationSink>,
    timezone: Tz,
    corpus_cache_ttl: std::time::Duration,
    vector_scoring: bool,
}

impl MessageService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        categories: Arc<dyn AccountCategoryProvider>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        orchestrator: Orchestrator,
        store: Arc<ConfirmationStore>,
        context: ListContextCache,
        notifier: Arc<dyn NotificationSink>,
        timezone: Tz,
        corpus_cache_ttl: std::time::Duration,
        vector_scoring: bool,
    ) -> Self {
        Self {
            index: CategoryIndex::new(),
            categories,
            embedder,
            orchestrator,
            store,
            context,
            notifier,
            timezone,
            corpus_cache_ttl,
            vector_scoring,
        }
    }

    pub async fn handle(&self, request: MessageRequest) -> Result<MessageReply, AppError> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(AppError::Validation {
                message: "text must not be empty".to_string(),
                field: Some("text".to_string()),
                received: None,
                docs_hint: None,
            });
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(AppError::Validation {
                message: format!("text must be <= {MAX_MESSAGE_CHARS} characters"),
                field: Some("text".to_string()),
                received: None,
                docs_hint: None,
            });
        }

        let now = Utc::now();
        let intent = classify_reply(text);

        match intent {
            ReplyIntent::ListRequest => return self.listing(&request, now).await,
            ReplyIntent::Reference(n) => return self.reference(&request, n, now).await,
            _ => {}
        }

        let pending = self
            .store
            .pending_for_conversation(&request.conversation_id)
            .await?;

        if let Some(open) = &pending {
            // A message carrying an amount is a fresh transaction, not a
            // reply: deflect it until the open confirmation is resolved.
            // An already-expired row falls through so the reply path can
            // flip it to EXPIRED and say so.
            if open.expires_at > now
                && matches!(intent, ReplyIntent::Other)
                && crate::resolver::extract::extract_amount_minor(text).is_some()
            {
                return Ok(deflected_reply());
            }

            let outcome = self
                .store
                .process_response(&request.conversation_id, intent, now)
                .await?;
            return Ok(self.reply_for_response(&request, outcome, now));
        }

        if matches!(intent, ReplyIntent::Affirmative | ReplyIntent::Negative) {
            return Ok(MessageReply {
                outcome: MessageOutcome::Guidance,
                reply: "Não encontrei nenhuma confirmação pendente. Envie a transação que você \
                        quer registrar."
                    .to_string(),
                confirmation_id: None,
            });
        }

        self.resolve_and_create(&request, text, now).await
    }

    async fn resolve_and_create(
        &self,
        request: &MessageRequest,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<MessageReply, AppError> {
        let Some(account_id) = request.account_id.as_deref() else {
            return Ok(MessageReply {
                outcome: MessageOutcome::Guidance,
                reply: "Nenhuma conta está configurada para registrar transações. Configure uma \
                        conta e tente de novo."
                    .to_string(),
                confirmation_id: None,
            });
        };

        if let Err(err) = self.ensure_corpus(request.user_id, account_id, now).await {
            tracing::warn!(error = %err, "Could not refresh the category corpus");
            return Ok(MessageReply {
                outcome: MessageOutcome::Guidance,
                reply: "Não consegui acessar suas categorias agora. Tente novamente em instantes."
                    .to_string(),
                confirmation_id: None,
            });
        }

        let corpora = KindCorpora {
            expense: self
                .index
                .lookup(request.user_id, account_id, TransactionKind::Expense),
            income: self
                .index
                .lookup(request.user_id, account_id, TransactionKind::Income),
        };
        let recency = self.index.recency(request.user_id);
        let embeddings = self.index.embeddings(request.user_id);
        let today = now.with_timezone(&self.timezone).date_naive();

        let resolution = self
            .orchestrator
            .resolve(text, &corpora, &recency, &embeddings, today)
            .await;

        let result = match resolution {
            Resolution::Resolved(result) => result,
            Resolution::NeedMoreDetail => {
                return Ok(MessageReply {
                    outcome: MessageOutcome::NeedMoreDetail,
                    reply: "Não consegui entender a transação. Tente ser mais específico, por \
                            exemplo: \"gastei 50 no mercado\"."
                        .to_string(),
                    confirmation_id: None,
                });
            }
        };

        let confidence = result.confidence;
        let new = to_new_confirmation(request, account_id, &result);

        match self.store.create(new, confidence, now).await? {
            CreateOutcome::AutoRegistered { row } => {
                if let Some(category_id) = &row.category_id {
                    self.index.mark_used(request.user_id, category_id, now);
                }
                Ok(MessageReply {
                    outcome: MessageOutcome::AutoRegistered,
                    reply: format!(
                        "✅ Registrado: {} em {} ({}).",
                        format_brl(row.amount_minor_units),
                        row.display_category(),
                        short_date(row.tx_date)
                    ),
                    confirmation_id: Some(row.id),
                })
            }
            CreateOutcome::PendingCreated { row } => {
                let prompt = confirmation_prompt(&row);
                self.notifier
                    .notify(
                        &row.conversation_id,
                        &prompt,
                        NotificationContext::ConfirmationPrompt,
                        serde_json::json!({
                            "confirmation_id": row.id,
                            "provenance": result.provenance.as_str(),
                        }),
                    )
                    .await;
                Ok(MessageReply {
                    outcome: MessageOutcome::ConfirmationRequested,
                    reply: prompt,
                    confirmation_id: Some(row.id),
                })
            }
            CreateOutcome::Deflected => Ok(deflected_reply()),
        }
    }

    /// Fetch-and-rebuild guard: skip the provider entirely while the last
    /// check is recent, rebuild only when the fingerprint moved.
    async fn ensure_corpus(
        &self,
        user_id: Uuid,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ProviderError> {
        if self
            .index
            .refreshed_within(user_id, self.corpus_cache_ttl, now)
        {
            return Ok(());
        }

        let categories = self.categories.list_categories(user_id, account_id).await?;
        let fingerprint = CategoryIndex::fingerprint(account_id, &categories);
        if self.index.is_fresh(user_id, &fingerprint) {
            self.index.mark_refreshed(user_id, now);
            return Ok(());
        }

        let entries = expand_categories(account_id, &categories);
        tracing::info!(
            user_id = %user_id,
            entries = entries.len(),
            "Rebuilt category corpus"
        );

        let embeddings = if self.vector_scoring {
            self.entry_embeddings(&entries).await
        } else {
            HashMap::new()
        };

        self.index.index(user_id, entries, fingerprint);
        if !embeddings.is_empty() {
            self.index.set_embeddings(user_id, embeddings);
        }
        Ok(())
    }

    async fn entry_embeddings(
        &self,
        entries: &[crate::resolver::CategoryEntry],
    ) -> HashMap<String, Vec<f64>> {
        let Some(embedder) = &self.embedder else {
            return HashMap::new();
        };

        let mut embeddings = HashMap::new();
        for entry in entries {
            match embedder.embed(&entry.search_text).await {
                Ok(vector) => {
                    embeddings.insert(entry.key(), vector);
                }
                Err(err) => {
                    tracing::warn!(
                        entry = %entry.key(),
                        error = %err,
                        "Entry embedding failed, lexical only for this entry"
                    );
                }
            }
        }
        embeddings
    }

    fn reply_for_response(
        &self,
        request: &MessageRequest,
        outcome: ResponseOutcome,
        now: DateTime<Utc>,
    ) -> MessageReply {
        match outcome {
            ResponseOutcome::Confirmed { row, delivery } => {
                if let Some(category_id) = &row.category_id {
                    self.index.mark_used(request.user_id, category_id, now);
                }
                let reply = match delivery {
                    DeliveryOutcome::Delivered { .. } | DeliveryOutcome::AlreadyDelivered => {
                        format!(
                            "✅ Registrado: {} em {}.",
                            format_brl(row.amount_minor_units),
                            row.display_category()
                        )
                    }
                    // Never surface a delivery failure here: the retry
                    // sweep owns it from now on.
                    DeliveryOutcome::Failed { .. } => format!(
                        "✅ Confirmado: {} em {}. O registro será concluído em instantes.",
                        format_brl(row.amount_minor_units),
                        row.display_category()
                    ),
                };
                MessageReply {
                    outcome: MessageOutcome::Confirmed,
                    reply,
                    confirmation_id: Some(row.id),
                }
            }
            ResponseOutcome::Rejected { row } => MessageReply {
                outcome: MessageOutcome::Rejected,
                reply: "Ok, descartei. Se quiser registrar, envie a transação de novo com mais \
                        detalhes."
                    .to_string(),
                confirmation_id: Some(row.id),
            },
            ResponseOutcome::ExpiredNow { row } => MessageReply {
                outcome: MessageOutcome::Expired,
                reply: format!(
                    "⏰ A confirmação de {} em {} expirou. Envie a transação novamente para \
                     registrá-la.",
                    format_brl(row.amount_minor_units),
                    row.display_category()
                ),
                confirmation_id: Some(row.id),
            },
            ResponseOutcome::NoPending => MessageReply {
                outcome: MessageOutcome::Guidance,
                reply: "Não encontrei nenhuma confirmação pendente. Envie a transação que você \
                        quer registrar."
                    .to_string(),
                confirmation_id: None,
            },
            ResponseOutcome::Guidance { row } => MessageReply {
                outcome: MessageOutcome::Guidance,
                reply: format!(
                    "Você tem uma confirmação pendente: {} em {}. Responda sim para confirmar ou \
                     não para descartar. Envie \"listar\" para ver tudo que está em aberto.",
                    format_brl(row.amount_minor_units),
                    row.display_category()
                ),
                confirmation_id: Some(row.id),
            },
        }
    }

    async fn listing(
        &self,
        request: &MessageRequest,
        now: DateTime<Utc>,
    ) -> Result<MessageReply, AppError> {
        let rows = self
            .store
            .open_for_user(request.user_id, OPEN_LIST_LIMIT)
            .await?;

        if rows.is_empty() {
            return Ok(MessageReply {
                outcome: MessageOutcome::Listing,
                reply: "Você não tem nenhuma confirmação em aberto.".to_string(),
                confirmation_id: None,
            });
        }

        let mut lines = Vec::with_capacity(rows.len());
        let mut items = Vec::with_capacity(rows.len());
        for (position, row) in rows.iter().enumerate() {
            let status_label = match row.state() {
                ConfirmationStatus::Pending => "aguardando confirmação",
                _ => "aguardando envio",
            };
            let description = format!(
                "{} em {} ({})",
                format_brl(row.amount_minor_units),
                row.display_category(),
                short_date(row.tx_date)
            );
            lines.push(format!("{}. {description} — {status_label}", position + 1));
            items.push(ListItem {
                id: row.id.to_string(),
                kind: "confirmation".to_string(),
                description,
                amount_minor_units: Some(row.amount_minor_units),
                metadata: serde_json::json!({ "status": row.state() }),
            });
        }

        self.context
            .set(&request.conversation_id, ListKind::Confirmations, items, now);

        Ok(MessageReply {
            outcome: MessageOutcome::Listing,
            reply: format!(
                "Em aberto:\n{}\nResponda com o número do item para ver os detalhes.",
                lines.join("\n")
            ),
            confirmation_id: None,
        })
    }

    async fn reference(
        &self,
        request: &MessageRequest,
        n: usize,
        now: DateTime<Utc>,
    ) -> Result<MessageReply, AppError> {
        let reply = match self.context.get_by_number(&request.conversation_id, n, now) {
            ListLookup::NoList => {
                "Não há nenhuma lista ativa. Envie \"listar\" para ver o que está em aberto."
                    .to_string()
            }
            ListLookup::Expired => {
                "Essa lista já expirou. Envie \"listar\" de novo para uma lista atualizada."
                    .to_string()
            }
            ListLookup::OutOfRange { len } => {
                format!("Escolha um número entre 1 e {len}.")
            }
            ListLookup::Item { item, .. } => {
                return self.reference_item(request, n, &item.id, now).await;
            }
        };

        Ok(MessageReply {
            outcome: MessageOutcome::Reference,
            reply,
            confirmation_id: None,
        })
    }

    async fn reference_item(
        &self,
        request: &MessageRequest,
        n: usize,
        item_id: &str,
        _now: DateTime<Utc>,
    ) -> Result<MessageReply, AppError> {
        let row = match item_id.parse::<Uuid>() {
            Ok(id) => self.store.by_id(id).await?,
            Err(_) => None,
        };
        let Some(row) = row else {
            return Ok(MessageReply {
                outcome: MessageOutcome::Reference,
                reply: format!("O item {n} não existe mais. Envie \"listar\" de novo."),
                confirmation_id: None,
            });
        };

        let summary = format!(
            "{} em {} ({})",
            format_brl(row.amount_minor_units),
            row.display_category(),
            short_date(row.tx_date)
        );
        let reply = match row.state() {
            ConfirmationStatus::Pending if row.conversation_id == request.conversation_id => {
                format!("Item {n}: {summary}. Responda sim para confirmar ou não para descartar.")
            }
            ConfirmationStatus::Pending => {
                format!("Item {n}: {summary} — aguardando confirmação em outra conversa.")
            }
            ConfirmationStatus::Confirmed if !row.delivery_sent => format!(
                "Item {n}: {summary} — confirmado, aguardando envio ({} tentativa(s) até agora).",
                row.delivery_attempts
            ),
            ConfirmationStatus::Confirmed => format!("Item {n}: {summary} — já registrado."),
            ConfirmationStatus::Rejected => format!("Item {n}: {summary} — descartado."),
            ConfirmationStatus::Expired => format!("Item {n}: {summary} — expirado."),
        };

        Ok(MessageReply {
            outcome: MessageOutcome::Reference,
            reply,
            confirmation_id: Some(row.id),
        })
    }
}

fn to_new_confirmation(
    request: &MessageRequest,
    account_id: &str,
    result: &ResolutionResult,
) -> NewConfirmation {
    NewConfirmation {
        conversation_id: request.conversation_id.clone(),
        user_id: request.user_id,
        account_id: Some(account_id.to_string()),
        kind: result.kind,
        amount_minor_units: result.amount_minor_units,
        category_name: result.category_name.clone(),
        sub_category_name: result.sub_category_name.clone(),
        category_id: result.category_id.clone(),
        sub_category_id: result.sub_category_id.clone(),
        description: result.description.clone(),
        date: result.date,
    }
}

fn confirmation_prompt(row: &ConfirmationRow) -> String {
    let verb = match row.transaction_kind() {
        TransactionKind::Expense => "Gasto",
        TransactionKind::Income => "Recebimento",
    };
    format!(
        "📝 {verb} de {} em {} ({}). Confirmo o registro? Responda sim ou não.",
        format_brl(row.amount_minor_units),
        row.display_category(),
        short_date(row.tx_date)
    )
}

fn deflected_reply() -> MessageReply {
    MessageReply {
        outcome: MessageOutcome::Deflected,
        reply: "Você já tem uma confirmação pendente. Responda sim ou não antes de registrar \
                outra transação."
            .to_string(),
        confirmation_id: None,
    }
}

fn short_date(date: NaiveDate) -> String {
    date.format("%d/%m").to_string()
}
