//! Hand-rolled fakes for the collaborator traits, shared by unit tests
//! across the crate.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::providers::{
    AccountCategoryProvider, AiExtraction, AiExtractionProvider, CreateTransactionRequest,
    LedgerApiClient, LedgerReceipt, NotificationContext, NotificationSink, ProviderError,
    RemoteCategory,
};
use crate::resolver::CategoryEntry;

/// Ledger fake: queued failures first, then successes with generated ids.
pub struct FakeLedger {
    failures: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub async fn push_failure(&self, error: &str) {
        self.failures.lock().await.push_back(error.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerApiClient for FakeLedger {
    async fn create_transaction(
        &self,
        _request: &CreateTransactionRequest,
    ) -> Result<LedgerReceipt, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(ProviderError::Response(error));
        }
        Ok(LedgerReceipt {
            success: true,
            transaction_id: Some(format!("remote-{}", Uuid::now_v7())),
            error: None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RecordedNotification {
    pub conversation_id: String,
    pub message: String,
    pub context: NotificationContext,
}

/// Sink fake that records everything sent through it.
pub struct RecordingSink {
    events: Mutex<Vec<RecordedNotification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub async fn events(&self) -> Vec<RecordedNotification> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(
        &self,
        conversation_id: &str,
        message: &str,
        context: NotificationContext,
        _metadata: serde_json::Value,
    ) {
        self.events.lock().await.push(RecordedNotification {
            conversation_id: conversation_id.to_string(),
            message: message.to_string(),
            context,
        });
    }
}

/// AI fake: queued responses, panic when called unexpectedly dry.
pub struct FakeAi {
    responses: Mutex<VecDeque<Result<AiExtraction, ProviderError>>>,
    calls: AtomicUsize,
}

impl FakeAi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub async fn push(&self, response: Result<AiExtraction, ProviderError>) {
        self.responses.lock().await.push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiExtractionProvider for FakeAi {
    async fn extract_transaction(
        &self,
        _text: &str,
        _context: &[CategoryEntry],
    ) -> Result<AiExtraction, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Response("no queued AI response".to_string())))
    }
}

/// Category provider fake serving a fixed tree, counting fetches.
pub struct FakeCategoryProvider {
    categories: Vec<RemoteCategory>,
    calls: AtomicUsize,
}

impl FakeCategoryProvider {
    pub fn new(categories: Vec<RemoteCategory>) -> Arc<Self> {
        Arc::new(Self {
            categories,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountCategoryProvider for FakeCategoryProvider {
    async fn list_categories(
        &self,
        _user_id: Uuid,
        _account_id: &str,
    ) -> Result<Vec<RemoteCategory>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.categories.clone())
    }
}
