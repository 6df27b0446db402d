//! Category resolution: retrieval first, generative extraction as a
//! fallback, retrieval revalidation last. Retrieval is trusted over
//! generation whenever it clears a threshold.

pub mod extract;
pub mod index;
pub mod scorer;

use std::collections::HashMap;
use std::sync::Arc;

use centavo_core::model::{Provenance, TransactionKind};
use centavo_core::money;
use chrono::{DateTime, NaiveDate, Utc};

use crate::providers::{AiExtraction, AiExtractionProvider, EmbeddingProvider};
use scorer::ScoreParams;

/// One independently scorable (category, subcategory) pair, scoped to a
/// single account and transaction kind.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryEntry {
    pub category_id: String,
    pub category_name: String,
    pub sub_category_id: Option<String>,
    pub sub_category_name: Option<String>,
    pub account_id: String,
    pub kind: TransactionKind,
    pub search_text: String,
}

impl CategoryEntry {
    pub fn key(&self) -> String {
        format!(
            "{}:{}",
            self.category_id,
            self.sub_category_id.as_deref().unwrap_or("-")
        )
    }

    /// "Alimentação > Supermercado" for prompts and listings.
    pub fn display_name(&self) -> String {
        match &self.sub_category_name {
            Some(sub) => format!("{} > {}", self.category_name, sub),
            None => self.category_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Lexical,
    Vector,
}

#[derive(Debug, Clone)]
pub struct ScoredMatch {
    pub entry: CategoryEntry,
    pub score: f64,
    pub source: MatchSource,
}

/// A fully resolved transaction guess, ready for the confirmation stage.
#[derive(Debug, Clone)]
pub struct ResolutionResult {
    pub kind: TransactionKind,
    pub amount_minor_units: i64,
    pub category_name: String,
    pub sub_category_name: Option<String>,
    pub category_id: Option<String>,
    pub sub_category_id: Option<String>,
    pub confidence: f64,
    pub provenance: Provenance,
    pub date: NaiveDate,
    pub description: Option<String>,
    pub merchant: Option<String>,
}

impl ResolutionResult {
    /// Both ids resolved. A result that is not complete can never be
    /// auto-registered, regardless of confidence.
    pub fn is_complete(&self) -> bool {
        self.category_id.is_some() && self.sub_category_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved(ResolutionResult),
    /// The message could not be resolved to a registrable transaction;
    /// the user should be asked to rephrase. Not an error.
    NeedMoreDetail,
}

/// Outcome of Phase 1. `NeedsAi` carries everything the cheap extraction
/// already found so later phases never re-parse the text.
#[derive(Debug)]
enum DirectPhase {
    Matched(Box<ResolutionResult>),
    NeedsAi {
        kind: TransactionKind,
        amount_minor_units: Option<i64>,
        date: NaiveDate,
        description: String,
        /// Best sub-threshold match, used when the AI provider fails.
        weak_match: Option<ScoredMatch>,
    },
}

/// Kind-filtered views over one account's corpus.
pub struct KindCorpora {
    pub expense: Vec<CategoryEntry>,
    pub income: Vec<CategoryEntry>,
}

impl KindCorpora {
    pub fn for_kind(&self, kind: TransactionKind) -> &[CategoryEntry] {
        match kind {
            TransactionKind::Expense => &self.expense,
            TransactionKind::Income => &self.income,
        }
    }

    /// Full corpus, used as AI context so the model sees every option.
    pub fn all(&self) -> Vec<CategoryEntry> {
        self.expense.iter().chain(self.income.iter()).cloned().collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolverTuning {
    pub rag_threshold: f64,
    pub revalidation_threshold: f64,
    pub revalidation_confidence_bonus: f64,
    pub min_confidence: f64,
    pub score_params: ScoreParams,
    pub vector_scoring: bool,
}

impl ResolverTuning {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            rag_threshold: config.rag_threshold,
            revalidation_threshold: config.revalidation_threshold,
            revalidation_confidence_bonus: config.revalidation_confidence_bonus,
            min_confidence: config.min_confidence,
            score_params: ScoreParams {
                min_score: config.scorer_min_score,
                max_results: config.scorer_max_results,
            },
            vector_scoring: config.vector_scoring,
        }
    }
}

pub struct Orchestrator {
    ai: Arc<dyn AiExtractionProvider>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    tuning: ResolverTuning,
}

impl Orchestrator {
    pub fn new(
        ai: Arc<dyn AiExtractionProvider>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        tuning: ResolverTuning,
    ) -> Self {
        Self { ai, embedder, tuning }
    }

    /// Run the three-phase pipeline. Never returns an error: provider
    /// failures degrade to the best remaining guess or `NeedMoreDetail`.
    pub async fn resolve(
        &self,
        text: &str,
        corpora: &KindCorpora,
        recency: &HashMap<String, DateTime<Utc>>,
        entry_embeddings: &HashMap<String, Vec<f64>>,
        today: NaiveDate,
    ) -> Resolution {
        let direct = self
            .phase_direct(text, corpora, recency, entry_embeddings, today)
            .await;

        let (kind, amount_minor_units, date, description, weak_match) = match direct {
            DirectPhase::Matched(result) => return Resolution::Resolved(*result),
            DirectPhase::NeedsAi {
                kind,
                amount_minor_units,
                date,
                description,
                weak_match,
            } => (kind, amount_minor_units, date, description, weak_match),
        };

        match self.ai.extract_transaction(text, &corpora.all()).await {
            Ok(extraction) => self.phase_revalidate(
                extraction,
                amount_minor_units,
                date,
                description,
                corpora,
                recency,
            ),
            Err(err) => {
                tracing::warn!(error = %err, "AI extraction failed, degrading to retrieval");
                self.degrade(kind, amount_minor_units, date, description, weak_match)
            }
        }
    }

    async fn phase_direct(
        &self,
        text: &str,
        corpora: &KindCorpora,
        recency: &HashMap<String, DateTime<Utc>>,
        entry_embeddings: &HashMap<String, Vec<f64>>,
        today: NaiveDate,
    ) -> DirectPhase {
        let kind = extract::detect_kind(text);
        let amount_minor_units = extract::extract_amount_minor(text);
        let date = extract::extract_date(text, today);
        let description = extract::describe(text);

        let query_embedding = self.query_embedding(text).await;
        let matches = scorer::score(
            text,
            corpora.for_kind(kind),
            query_embedding.as_deref(),
            entry_embeddings,
            recency,
            &self.tuning.score_params,
        );

        if let (Some(best), Some(amount)) = (matches.first(), amount_minor_units) {
            if best.score >= self.tuning.rag_threshold {
                return DirectPhase::Matched(Box::new(ResolutionResult {
                    kind,
                    amount_minor_units: amount,
                    category_name: best.entry.category_name.clone(),
                    sub_category_name: best.entry.sub_category_name.clone(),
                    category_id: Some(best.entry.category_id.clone()),
                    sub_category_id: best.entry.sub_category_id.clone(),
                    confidence: best.score,
                    provenance: Provenance::RagDirect,
                    date,
                    description: Some(description),
                    merchant: None,
                }));
            }
        }

        DirectPhase::NeedsAi {
            kind,
            amount_minor_units,
            date,
            description,
            weak_match: matches.into_iter().next(),
        }
    }

    async fn query_embedding(&self, text: &str) -> Option<Vec<f64>> {
        if !self.tuning.vector_scoring {
            return None;
        }
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                tracing::warn!(error = %err, "Query embedding failed, lexical only");
                None
            }
        }
    }

    /// Phase 3: re-score the AI's category text against the corpus. A match
    /// above the revalidation threshold always overrides the AI's choice.
    fn phase_revalidate(
        &self,
        extraction: AiExtraction,
        fallback_amount: Option<i64>,
        fallback_date: NaiveDate,
        fallback_description: String,
        corpora: &KindCorpora,
        recency: &HashMap<String, DateTime<Utc>>,
    ) -> Resolution {
        let amount_minor_units = match extraction
            .amount
            .and_then(money::minor_from_float)
            .filter(|minor| *minor > 0)
            .or(fallback_amount)
        {
            Some(amount) => amount,
            None => return Resolution::NeedMoreDetail,
        };

        let corpus = corpora.for_kind(extraction.kind);
        let query = match &extraction.sub_category {
            Some(sub) => format!("{} {}", extraction.category, sub),
            None => extraction.category.clone(),
        };
        let revalidated = scorer::score(
            &query,
            corpus,
            None,
            &HashMap::new(),
            recency,
            &self.tuning.score_params,
        );

        let result = match revalidated.first() {
            Some(best) if best.score >= self.tuning.revalidation_threshold => {
                let confidence = (extraction.confidence
                    + self.tuning.revalidation_confidence_bonus * best.score)
                    .clamp(0.0, 1.0);
                ResolutionResult {
                    kind: extraction.kind,
                    amount_minor_units,
                    category_name: best.entry.category_name.clone(),
                    sub_category_name: best.entry.sub_category_name.clone(),
                    category_id: Some(best.entry.category_id.clone()),
                    sub_category_id: best.entry.sub_category_id.clone(),
                    confidence,
                    provenance: Provenance::AiRagValidated,
                    date: extraction.date.unwrap_or(fallback_date),
                    description: extraction
                        .description
                        .clone()
                        .or(Some(fallback_description)),
                    merchant: extraction.merchant.clone(),
                }
            }
            _ => {
                let (category_id, sub_category_id) = resolve_ids(
                    &extraction.category,
                    extraction.sub_category.as_deref(),
                    corpus,
                );
                ResolutionResult {
                    kind: extraction.kind,
                    amount_minor_units,
                    category_name: extraction.category.clone(),
                    sub_category_name: extraction.sub_category.clone(),
                    category_id,
                    sub_category_id,
                    confidence: extraction.confidence,
                    provenance: Provenance::AiOnly,
                    date: extraction.date.unwrap_or(fallback_date),
                    description: extraction
                        .description
                        .clone()
                        .or(Some(fallback_description)),
                    merchant: extraction.merchant.clone(),
                }
            }
        };

        if result.confidence < self.tuning.min_confidence {
            return Resolution::NeedMoreDetail;
        }
        Resolution::Resolved(result)
    }

    /// AI provider failure: fall back to the best sub-threshold retrieval
    /// match so a manual confirmation can still be offered.
    fn degrade(
        &self,
        kind: TransactionKind,
        amount_minor_units: Option<i64>,
        date: NaiveDate,
        description: String,
        weak_match: Option<ScoredMatch>,
    ) -> Resolution {
        let (Some(weak), Some(amount)) = (weak_match, amount_minor_units) else {
            return Resolution::NeedMoreDetail;
        };
        if weak.score < self.tuning.min_confidence {
            return Resolution::NeedMoreDetail;
        }

        Resolution::Resolved(ResolutionResult {
            kind,
            amount_minor_units: amount,
            category_name: weak.entry.category_name.clone(),
            sub_category_name: weak.entry.sub_category_name.clone(),
            category_id: Some(weak.entry.category_id.clone()),
            sub_category_id: weak.entry.sub_category_id.clone(),
            confidence: weak.score,
            provenance: Provenance::RagDirect,
            date,
            description: Some(description),
            merchant: None,
        })
    }
}

/// Resolve category/subcategory names to ids by case- and
/// diacritic-insensitive exact match. No match leaves the id as `None`,
/// which hard-gates auto-registration.
fn resolve_ids(
    category_name: &str,
    sub_category_name: Option<&str>,
    corpus: &[CategoryEntry],
) -> (Option<String>, Option<String>) {
    let wanted_category = scorer::normalize(category_name);
    let candidates: Vec<&CategoryEntry> = corpus
        .iter()
        .filter(|entry| scorer::normalize(&entry.category_name) == wanted_category)
        .collect();

    if candidates.is_empty() {
        return (None, None);
    }

    if let Some(sub_name) = sub_category_name {
        let wanted_sub = scorer::normalize(sub_name);
        for entry in &candidates {
            if let Some(entry_sub) = &entry.sub_category_name {
                if scorer::normalize(entry_sub) == wanted_sub {
                    return (
                        Some(entry.category_id.clone()),
                        entry.sub_category_id.clone(),
                    );
                }
            }
        }
    }

    (Some(candidates[0].category_id.clone()), None)
}
