//! `reqwest`-backed implementations of the collaborator contracts.

use std::time::Duration;

use async_trait::async_trait;
use centavo_core::model::TransactionKind;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{
    AccountCategoryProvider, AiExtraction, AiExtractionProvider, CreateTransactionRequest,
    EmbeddingProvider, LedgerApiClient, LedgerReceipt, NotificationContext, NotificationSink,
    ProviderError, RemoteCategory,
};
use crate::resolver::CategoryEntry;

fn bearer(request: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Account-management API client.
pub struct HttpCategoryProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpCategoryProvider {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token,
        }
    }
}

#[async_trait]
impl AccountCategoryProvider for HttpCategoryProvider {
    async fn list_categories(
        &self,
        user_id: Uuid,
        account_id: &str,
    ) -> Result<Vec<RemoteCategory>, ProviderError> {
        let url = format!(
            "{}/v1/users/{}/accounts/{}/categories",
            self.base_url, user_id, account_id
        );
        let response = bearer(self.client.get(&url), self.token.as_deref())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Response(format!(
                "category API returned {}",
                response.status()
            )));
        }

        Ok(response.json::<Vec<RemoteCategory>>().await?)
    }
}

/// Chat-completions client for transaction extraction. Speaks the
/// OpenAI-compatible wire format so any conforming provider works.
pub struct OpenAiExtractionProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Shape the model is instructed to emit. Kept separate from
/// [`AiExtraction`] so wire quirks stay at this boundary.
#[derive(Debug, Deserialize)]
struct RawExtraction {
    kind: String,
    #[serde(default)]
    amount: Option<f64>,
    category: String,
    #[serde(default)]
    sub_category: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    merchant: Option<String>,
    confidence: f64,
}

const EXTRACTION_SYSTEM_PROMPT: &str = "\
Você extrai transações financeiras de mensagens informais em português. \
Responda SOMENTE com um objeto JSON com os campos: kind (\"expense\" ou \
\"income\"), amount (número em reais, ou null), category, sub_category \
(ou null), description (ou null), date (AAAA-MM-DD ou null), merchant \
(ou null), confidence (0 a 1). Escolha category e sub_category apenas \
entre as opções listadas; se nenhuma servir, use o nome mais próximo que \
o usuário mencionou.";

impl OpenAiExtractionProvider {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }

    fn category_context(context: &[CategoryEntry]) -> String {
        let mut lines = String::from("Categorias disponíveis:\n");
        for entry in context {
            match &entry.sub_category_name {
                Some(sub) => {
                    lines.push_str(&format!(
                        "- {} > {} ({})\n",
                        entry.category_name,
                        sub,
                        entry.kind.as_str()
                    ));
                }
                None => {
                    lines.push_str(&format!(
                        "- {} ({})\n",
                        entry.category_name,
                        entry.kind.as_str()
                    ));
                }
            }
        }
        lines
    }

    fn parse_extraction(content: &str) -> Result<AiExtraction, ProviderError> {
        let raw: RawExtraction = serde_json::from_str(content.trim())
            .map_err(|err| ProviderError::Response(format!("unparseable extraction: {err}")))?;

        let kind = TransactionKind::parse(&raw.kind)
            .ok_or_else(|| ProviderError::Response(format!("unknown kind '{}'", raw.kind)))?;

        let date = raw
            .date
            .as_deref()
            .and_then(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok());

        Ok(AiExtraction {
            kind,
            amount: raw.amount.filter(|value| value.is_finite() && *value >= 0.0),
            category: raw.category.trim().to_string(),
            sub_category: raw
                .sub_category
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            description: raw.description,
            date,
            merchant: raw.merchant,
            confidence: raw.confidence.clamp(0.0, 1.0),
        })
    }
}

#[async_trait]
impl AiExtractionProvider for OpenAiExtractionProvider {
    async fn extract_transaction(
        &self,
        text: &str,
        context: &[CategoryEntry],
    ) -> Result<AiExtraction, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": EXTRACTION_SYSTEM_PROMPT},
                {"role": "system", "content": Self::category_context(context)},
                {"role": "user", "content": text},
            ],
        });

        let response = bearer(self.client.post(&url), self.api_key.as_deref())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Response(format!(
                "AI provider returned {}",
                response.status()
            )));
        }

        let completion = response.json::<ChatCompletionResponse>().await?;
        let content = completion
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| ProviderError::Response("empty completion".to_string()))?;

        Self::parse_extraction(content)
    }
}

/// Embeddings client, OpenAI-compatible wire format.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f64>,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, ProviderError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let response = bearer(self.client.post(&url), self.api_key.as_deref())
            .json(&json!({"model": self.model, "input": text}))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Response(format!(
                "embedding API returned {}",
                response.status()
            )));
        }

        let parsed = response.json::<EmbeddingResponse>().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| ProviderError::Response("empty embedding response".to_string()))
    }
}

/// External ledger API client.
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpLedgerClient {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token,
        }
    }
}

#[async_trait]
impl LedgerApiClient for HttpLedgerClient {
    async fn create_transaction(
        &self,
        request: &CreateTransactionRequest,
    ) -> Result<LedgerReceipt, ProviderError> {
        let url = format!("{}/v1/transactions", self.base_url);
        let response = bearer(self.client.post(&url), self.token.as_deref())
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Response(format!(
                "ledger API returned {}",
                response.status()
            )));
        }

        Ok(response.json::<LedgerReceipt>().await?)
    }
}

/// Webhook sink: posts notifications to the messaging adapter. Failures
/// are logged and dropped, never propagated.
pub struct WebhookNotificationSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotificationSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify(
        &self,
        conversation_id: &str,
        message: &str,
        context: NotificationContext,
        metadata: serde_json::Value,
    ) {
        let body = json!({
            "conversation_id": conversation_id,
            "message": message,
            "context": context.as_str(),
            "metadata": metadata,
        });

        match self.client.post(&self.url).json(&body).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(
                    status = %response.status(),
                    context = context.as_str(),
                    "Notification webhook returned non-success status"
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    context = context.as_str(),
                    "Notification webhook request failed"
                );
            }
        }
    }
}

/// Log-only sink used when no webhook is configured.
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(
        &self,
        conversation_id: &str,
        message: &str,
        context: NotificationContext,
        _metadata: serde_json::Value,
    ) {
        tracing::info!(
            conversation_id,
            context = context.as_str(),
            message,
            "Notification (no webhook configured)"
        );
    }
}
