//! Ephemeral numbered-list memory: after the service shows a numbered
//! list, "3" refers back to the third item for a few minutes. Expiry is
//! embedded in each entry and checked lazily; writes sweep opportunistically.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Confirmations,
}

#[derive(Debug, Clone)]
pub struct ListItem {
    pub id: String,
    pub kind: String,
    pub description: String,
    pub amount_minor_units: Option<i64>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
struct StoredList {
    kind: ListKind,
    items: Vec<ListItem>,
    expires_at: DateTime<Utc>,
}

/// Result of a numbered lookup. Always structured, never a panic.
#[derive(Debug, Clone)]
pub enum ListLookup {
    Item { kind: ListKind, item: ListItem },
    NoList,
    Expired,
    OutOfRange { len: usize },
}

pub struct ListContextCache {
    ttl: Duration,
    inner: Mutex<HashMap<String, StoredList>>,
}

impl ListContextCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the conversation's list and reset its TTL. Stale entries
    /// for other conversations are swept while the lock is held anyway.
    pub fn set(
        &self,
        conversation_id: &str,
        kind: ListKind,
        items: Vec<ListItem>,
        now: DateTime<Utc>,
    ) {
        let expires_at = now + chrono::Duration::from_std(self.ttl).unwrap_or_default();
        let mut lists = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        lists.retain(|_, stored| stored.expires_at > now);
        lists.insert(
            conversation_id.to_string(),
            StoredList {
                kind,
                items,
                expires_at,
            },
        );
    }

    /// 1-indexed lookup, checking staleness at read time.
    pub fn get_by_number(&self, conversation_id: &str, n: usize, now: DateTime<Utc>) -> ListLookup {
        let lists = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(stored) = lists.get(conversation_id) else {
            return ListLookup::NoList;
        };

        if stored.expires_at <= now {
            return ListLookup::Expired;
        }

        if n == 0 || n > stored.items.len() {
            return ListLookup::OutOfRange {
                len: stored.items.len(),
            };
        }

        ListLookup::Item {
            kind: stored.kind,
            item: stored.items[n - 1].clone(),
        }
    }
}
