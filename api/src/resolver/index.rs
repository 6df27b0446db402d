//! Per-user in-memory category corpus.
//!
//! Corpora are small (tens to low hundreds of entries), so a rebuild
//! replaces the whole thing — no incremental mutation, no fine-grained
//! locking. Readers see a stale-but-consistent snapshot during a rebuild.

use std::collections::HashMap;
use std::sync::RwLock;

use centavo_core::model::TransactionKind;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::CategoryEntry;
use crate::providers::RemoteCategory;

struct UserCorpus {
    fingerprint: String,
    entries: Vec<CategoryEntry>,
    /// Entry key → embedding, populated only when vector scoring is on.
    embeddings: HashMap<String, Vec<f64>>,
    /// Category id → last time the user actually booked against it.
    recency: HashMap<String, DateTime<Utc>>,
    /// Last time the authoritative list was fetched and compared.
    refreshed_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct CategoryIndex {
    inner: RwLock<HashMap<Uuid, UserCorpus>>,
}

impl CategoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable digest of the provider's category payload. Equal fingerprint
    /// means the authoritative list has not changed and the cached corpus
    /// can be served without a rebuild.
    pub fn fingerprint(account_id: &str, categories: &[RemoteCategory]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(account_id.as_bytes());
        for category in categories {
            hasher.update(category.id.as_bytes());
            hasher.update(category.name.as_bytes());
            hasher.update(category.kind.as_str().as_bytes());
            for sub in &category.sub_categories {
                hasher.update(sub.id.as_bytes());
                hasher.update(sub.name.as_bytes());
            }
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    pub fn is_fresh(&self, user_id: Uuid, fingerprint: &str) -> bool {
        let corpora = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        corpora
            .get(&user_id)
            .map(|corpus| corpus.fingerprint == fingerprint)
            .unwrap_or(false)
    }

    /// Whether the corpus was checked against the provider recently enough
    /// to skip the fetch altogether.
    pub fn refreshed_within(
        &self,
        user_id: Uuid,
        max_age: std::time::Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let corpora = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        corpora
            .get(&user_id)
            .map(|corpus| {
                now - corpus.refreshed_at
                    <= chrono::Duration::from_std(max_age).unwrap_or_default()
            })
            .unwrap_or(false)
    }

    /// Record that the authoritative list was fetched and found unchanged.
    pub fn mark_refreshed(&self, user_id: Uuid, now: DateTime<Utc>) {
        let mut corpora = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(corpus) = corpora.get_mut(&user_id) {
            corpus.refreshed_at = now;
        }
    }

    /// Replace the user's corpus wholesale. Recency hints survive rebuilds —
    /// the categories are the same logical things even when the list changed.
    pub fn index(&self, user_id: Uuid, entries: Vec<CategoryEntry>, fingerprint: String) {
        let now = Utc::now();
        let mut corpora = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let recency = corpora
            .remove(&user_id)
            .map(|corpus| corpus.recency)
            .unwrap_or_default();
        corpora.insert(
            user_id,
            UserCorpus {
                fingerprint,
                entries,
                embeddings: HashMap::new(),
                recency,
                refreshed_at: now,
            },
        );
    }

    pub fn set_embeddings(&self, user_id: Uuid, embeddings: HashMap<String, Vec<f64>>) {
        let mut corpora = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(corpus) = corpora.get_mut(&user_id) {
            corpus.embeddings = embeddings;
        }
    }

    /// Entries scoped to one account and one transaction kind. An empty
    /// result is a normal outcome, not an error.
    pub fn lookup(
        &self,
        user_id: Uuid,
        account_id: &str,
        kind: TransactionKind,
    ) -> Vec<CategoryEntry> {
        let corpora = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        corpora
            .get(&user_id)
            .map(|corpus| {
                corpus
                    .entries
                    .iter()
                    .filter(|entry| entry.account_id == account_id && entry.kind == kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn embeddings(&self, user_id: Uuid) -> HashMap<String, Vec<f64>> {
        let corpora = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        corpora
            .get(&user_id)
            .map(|corpus| corpus.embeddings.clone())
            .unwrap_or_default()
    }

    pub fn recency(&self, user_id: Uuid) -> HashMap<String, DateTime<Utc>> {
        let corpora = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        corpora
            .get(&user_id)
            .map(|corpus| corpus.recency.clone())
            .unwrap_or_default()
    }

    pub fn mark_used(&self, user_id: Uuid, category_id: &str, at: DateTime<Utc>) {
        let mut corpora = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(corpus) = corpora.get_mut(&user_id) {
            corpus.recency.insert(category_id.to_string(), at);
        }
    }
}

/// Expand the provider's category tree into independently scorable
/// entries: one per (category, subcategory) pair, one for a category with
/// no subcategories at all.
pub fn expand_categories(account_id: &str, categories: &[RemoteCategory]) -> Vec<CategoryEntry> {
    let mut entries = Vec::new();
    for category in categories {
        if category.sub_categories.is_empty() {
            entries.push(CategoryEntry {
                category_id: category.id.clone(),
                category_name: category.name.clone(),
                sub_category_id: None,
                sub_category_name: None,
                account_id: account_id.to_string(),
                kind: category.kind,
                search_text: category.name.clone(),
            });
            continue;
        }

        for sub in &category.sub_categories {
            entries.push(CategoryEntry {
                category_id: category.id.clone(),
                category_name: category.name.clone(),
                sub_category_id: Some(sub.id.clone()),
                sub_category_name: Some(sub.name.clone()),
                account_id: account_id.to_string(),
                kind: category.kind,
                search_text: format!("{} {}", category.name, sub.name),
            });
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use crate::providers::RemoteSubCategory;

    use super::*;

    fn remote(id: &str, name: &str, kind: TransactionKind, subs: &[(&str, &str)]) -> RemoteCategory {
        RemoteCategory {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            sub_categories: subs
                .iter()
                .map(|(sub_id, sub_name)| RemoteSubCategory {
                    id: sub_id.to_string(),
                    name: sub_name.to_string(),
                })
                .collect(),
        }
    }

    fn sample_categories() -> Vec<RemoteCategory> {
        vec![
            remote(
                "c1",
                "Alimentação",
                TransactionKind::Expense,
                &[("s1", "Supermercado"), ("s2", "Restaurante")],
            ),
            remote("c2", "Salário", TransactionKind::Income, &[]),
        ]
    }

    #[test]
    fn expansion_creates_one_entry_per_pair() {
        let entries = expand_categories("acc-1", &sample_categories());
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].search_text, "Alimentação Supermercado");
        assert_eq!(entries[2].category_name, "Salário");
        assert_eq!(entries[2].sub_category_id, None);
    }

    #[test]
    fn lookup_filters_by_account_and_kind() {
        let index = CategoryIndex::new();
        let user = Uuid::now_v7();
        let entries = expand_categories("acc-1", &sample_categories());
        index.index(user, entries, "fp".to_string());

        let expenses = index.lookup(user, "acc-1", TransactionKind::Expense);
        assert_eq!(expenses.len(), 2);
        let income = index.lookup(user, "acc-1", TransactionKind::Income);
        assert_eq!(income.len(), 1);
        assert!(index.lookup(user, "acc-2", TransactionKind::Expense).is_empty());
        assert!(
            index
                .lookup(Uuid::now_v7(), "acc-1", TransactionKind::Expense)
                .is_empty()
        );
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let categories = sample_categories();
        let a = CategoryIndex::fingerprint("acc-1", &categories);
        let b = CategoryIndex::fingerprint("acc-1", &categories);
        assert_eq!(a, b);

        let mut renamed = sample_categories();
        renamed[0].name = "Comida".to_string();
        assert_ne!(a, CategoryIndex::fingerprint("acc-1", &renamed));
        assert_ne!(a, CategoryIndex::fingerprint("acc-2", &categories));
    }

    #[test]
    fn rebuild_replaces_entries_and_keeps_recency() {
        let index = CategoryIndex::new();
        let user = Uuid::now_v7();
        index.index(
            user,
            expand_categories("acc-1", &sample_categories()),
            "fp1".to_string(),
        );
        index.mark_used(user, "c1", Utc::now());

        index.index(
            user,
            expand_categories("acc-1", &sample_categories()[..1]),
            "fp2".to_string(),
        );
        assert!(index.is_fresh(user, "fp2"));
        assert!(!index.is_fresh(user, "fp1"));
        assert_eq!(index.lookup(user, "acc-1", TransactionKind::Income).len(), 0);
        assert!(index.recency(user).contains_key("c1"));
    }
}
