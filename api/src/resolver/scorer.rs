//! Retrieval scoring over a user's category corpus.
//!
//! Lexical scoring is IDF-weighted term overlap, an approximation of BM25
//! that needs no global corpus statistics — per-user corpora are tens of
//! entries, so rarity within the corpus is signal enough. The optional
//! vector path compares externally supplied embeddings by cosine.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use super::{CategoryEntry, MatchSource, ScoredMatch};

/// Containment match quality ("mercado" inside "supermercado").
const CONTAINMENT_QUALITY: f64 = 0.8;
/// Fuzzy match quality for near-identical tokens (typos, plural forms).
const FUZZY_QUALITY: f64 = 0.7;
const FUZZY_MIN_SIMILARITY: f64 = 0.92;
const CONTAINMENT_MIN_LEN: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct ScoreParams {
    pub min_score: f64,
    pub max_results: usize,
}

/// Portuguese stop-words: articles, prepositions, pronouns, and the common
/// transaction verbs. Kind verbs carry no category signal — transaction
/// kind is filtered before scoring ever runs.
static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "o", "as", "os", "um", "uma", "uns", "umas", "de", "do", "da", "dos", "das", "no",
        "na", "nos", "nas", "em", "ao", "aos", "para", "pra", "pro", "por", "pelo", "pela", "com",
        "sem", "que", "e", "ou", "eu", "meu", "minha", "mais", "menos", "hoje", "ontem",
        "anteontem", "reais", "real", "gastei", "gasto", "gastando", "paguei", "pagando", "pagar",
        "pago", "comprei", "comprando", "comprar", "compra", "compras", "recebi", "recebendo",
        "receber", "recebido",
        "ganhei", "ganhar", "caiu", "entrou", "foi", "fiz", "deu",
    ]
    .into_iter()
    .collect()
});

/// Lowercase and strip diacritics (NFD decomposition, combining marks
/// removed) so "Alimentação" and "alimentacao" compare equal.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

/// Normalize, split on non-alphanumeric boundaries, and drop stop-words,
/// bare numbers, and one-character fragments.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 1)
        .filter(|token| !token.chars().all(|c| c.is_ascii_digit()))
        .filter(|token| !STOP_WORDS.contains(token))
        .map(str::to_string)
        .collect()
}

pub fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Per-corpus inverse document frequencies, plus the mean used for query
/// terms outside the corpus vocabulary (so unknown terms dilute the score
/// instead of being ignored).
fn idf_table(corpus: &[CategoryEntry]) -> (HashMap<String, f64>, f64) {
    let n = corpus.len() as f64;
    let mut document_frequency: HashMap<String, usize> = HashMap::new();

    for entry in corpus {
        let unique: HashSet<String> = tokenize(&entry.search_text).into_iter().collect();
        for token in unique {
            *document_frequency.entry(token).or_insert(0) += 1;
        }
    }

    let idf: HashMap<String, f64> = document_frequency
        .into_iter()
        .map(|(token, df)| (token, (1.0 + n / df as f64).ln()))
        .collect();

    let mean = if idf.is_empty() {
        1.0
    } else {
        idf.values().sum::<f64>() / idf.len() as f64
    };

    (idf, mean)
}

/// Best quality of a query token against an entry's tokens: exact beats
/// containment beats fuzzy. Containment requires the shorter side to be a
/// real word, not a fragment.
fn match_quality(query_token: &str, entry_tokens: &[String]) -> f64 {
    let mut best = 0.0_f64;
    for entry_token in entry_tokens {
        let quality = if query_token == entry_token {
            1.0
        } else if shorter_len(query_token, entry_token) >= CONTAINMENT_MIN_LEN
            && (entry_token.contains(query_token) || query_token.contains(entry_token))
        {
            CONTAINMENT_QUALITY
        } else if strsim::jaro_winkler(query_token, entry_token) >= FUZZY_MIN_SIMILARITY {
            FUZZY_QUALITY
        } else {
            0.0
        };
        if quality > best {
            best = quality;
        }
        if best >= 1.0 {
            break;
        }
    }
    best
}

fn shorter_len(a: &str, b: &str) -> usize {
    a.len().min(b.len())
}

fn lexical_score(
    query_tokens: &[String],
    entry: &CategoryEntry,
    idf: &HashMap<String, f64>,
    mean_idf: f64,
) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }

    let entry_tokens = tokenize(&entry.search_text);
    let mut matched_weight = 0.0;
    let mut total_weight = 0.0;

    for token in query_tokens {
        let weight = idf.get(token).copied().unwrap_or(mean_idf);
        total_weight += weight;
        matched_weight += weight * match_quality(token, &entry_tokens);
    }

    if total_weight <= 0.0 {
        0.0
    } else {
        (matched_weight / total_weight).clamp(0.0, 1.0)
    }
}

/// Score a free-text query against a kind-filtered corpus. When a query
/// embedding is supplied, entries with precomputed embeddings also get a
/// vector candidate; the best score per entry wins and keeps its source.
///
/// Identical text and corpus always produce identical output: ties break
/// by category recency, then shorter (more specific) search text, then
/// entry key.
pub fn score(
    query: &str,
    corpus: &[CategoryEntry],
    query_embedding: Option<&[f64]>,
    entry_embeddings: &HashMap<String, Vec<f64>>,
    recency: &HashMap<String, DateTime<Utc>>,
    params: &ScoreParams,
) -> Vec<ScoredMatch> {
    let query_tokens = tokenize(query);
    let (idf, mean_idf) = idf_table(corpus);

    let mut best: HashMap<String, ScoredMatch> = HashMap::new();

    for entry in corpus {
        let lexical = round_score(lexical_score(&query_tokens, entry, &idf, mean_idf));
        if lexical > 0.0 {
            upsert(&mut best, entry, lexical, MatchSource::Lexical);
        }

        if let (Some(query_vec), Some(entry_vec)) = (query_embedding, entry_embeddings.get(&entry.key()))
        {
            let vector = round_score(cosine_similarity(query_vec, entry_vec).clamp(0.0, 1.0));
            if vector > 0.0 {
                upsert(&mut best, entry, vector, MatchSource::Vector);
            }
        }
    }

    let mut matches: Vec<ScoredMatch> = best
        .into_values()
        .filter(|m| m.score >= params.min_score)
        .collect();

    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                let recency_a = recency.get(&a.entry.category_id);
                let recency_b = recency.get(&b.entry.category_id);
                recency_b.cmp(&recency_a)
            })
            .then_with(|| a.entry.search_text.len().cmp(&b.entry.search_text.len()))
            .then_with(|| a.entry.key().cmp(&b.entry.key()))
    });
    matches.truncate(params.max_results);
    matches
}

fn upsert(
    best: &mut HashMap<String, ScoredMatch>,
    entry: &CategoryEntry,
    score: f64,
    source: MatchSource,
) {
    match best.get_mut(&entry.key()) {
        Some(existing) if existing.score >= score => {}
        Some(existing) => {
            existing.score = score;
            existing.source = source;
        }
        None => {
            best.insert(
                entry.key(),
                ScoredMatch {
                    entry: entry.clone(),
                    score,
                    source,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use centavo_core::model::TransactionKind;

    use super::*;

    fn entry(
        category_id: &str,
        category: &str,
        sub_category: Option<&str>,
        kind: TransactionKind,
    ) -> CategoryEntry {
        let search_text = match sub_category {
            Some(sub) => format!("{category} {sub}"),
            None => category.to_string(),
        };
        CategoryEntry {
            category_id: category_id.to_string(),
            category_name: category.to_string(),
            sub_category_id: sub_category.map(|_| format!("{category_id}-sub")),
            sub_category_name: sub_category.map(str::to_string),
            account_id: "acc-1".to_string(),
            kind,
            search_text,
        }
    }

    fn params() -> ScoreParams {
        ScoreParams {
            min_score: 0.15,
            max_results: 5,
        }
    }

    fn grocery_corpus() -> Vec<CategoryEntry> {
        vec![
            entry(
                "c1",
                "Alimentação",
                Some("Supermercado"),
                TransactionKind::Expense,
            ),
            entry(
                "c1",
                "Alimentação",
                Some("Restaurante"),
                TransactionKind::Expense,
            ),
            entry("c2", "Transporte", Some("Uber"), TransactionKind::Expense),
            entry("c3", "Saúde", Some("Farmácia"), TransactionKind::Expense),
        ]
    }

    #[test]
    fn normalize_strips_diacritics() {
        assert_eq!(normalize("Alimentação"), "alimentacao");
        assert_eq!(normalize("SAÚDE"), "saude");
    }

    #[test]
    fn tokenize_drops_stopwords_numbers_and_verbs() {
        assert_eq!(tokenize("Gastei 50 no mercado"), vec!["mercado"]);
        assert_eq!(
            tokenize("paguei R$ 30,00 de farmácia pra minha mãe"),
            vec!["farmacia", "mae"]
        );
    }

    #[test]
    fn grocery_message_scores_containment_quality() {
        let corpus = grocery_corpus();
        let matches = score(
            "Gastei 50 no mercado",
            &corpus,
            None,
            &HashMap::new(),
            &HashMap::new(),
            &params(),
        );

        assert!(!matches.is_empty());
        let top = &matches[0];
        assert_eq!(top.entry.category_name, "Alimentação");
        assert_eq!(top.entry.sub_category_name.as_deref(), Some("Supermercado"));
        assert_eq!(top.score, 0.8);
        assert_eq!(top.source, MatchSource::Lexical);
    }

    #[test]
    fn exact_token_match_scores_full_quality() {
        let corpus = grocery_corpus();
        let matches = score(
            "compras no supermercado",
            &corpus,
            None,
            &HashMap::new(),
            &HashMap::new(),
            &params(),
        );
        assert_eq!(matches[0].score, 1.0);
    }

    #[test]
    fn scoring_is_deterministic() {
        let corpus = grocery_corpus();
        let run = || {
            score(
                "farmacia remedio",
                &corpus,
                None,
                &HashMap::new(),
                &HashMap::new(),
                &params(),
            )
            .into_iter()
            .map(|m| (m.entry.key(), m.score))
            .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn results_respect_min_score_and_descend() {
        let corpus = grocery_corpus();
        let matches = score(
            "mercado uber",
            &corpus,
            None,
            &HashMap::new(),
            &HashMap::new(),
            &params(),
        );

        for window in matches.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        for m in &matches {
            assert!(m.score >= params().min_score);
        }
    }

    #[test]
    fn unknown_terms_dilute_the_score() {
        let corpus = grocery_corpus();
        let focused = score(
            "supermercado",
            &corpus,
            None,
            &HashMap::new(),
            &HashMap::new(),
            &params(),
        );
        let diluted = score(
            "supermercado zzyqx",
            &corpus,
            None,
            &HashMap::new(),
            &HashMap::new(),
            &params(),
        );
        assert!(focused[0].score > diluted[0].score);
    }

    #[test]
    fn recency_breaks_score_ties() {
        let corpus = vec![
            entry("c1", "Casa", Some("Luz"), TransactionKind::Expense),
            entry("c2", "Casa", Some("Gás"), TransactionKind::Expense),
        ];
        let mut recency = HashMap::new();
        recency.insert(
            "c2".to_string(),
            Utc::now(),
        );

        let matches = score(
            "casa",
            &corpus,
            None,
            &HashMap::new(),
            &recency,
            &params(),
        );
        assert_eq!(matches[0].entry.category_id, "c2");
        assert_eq!(matches[0].score, matches[1].score);
    }

    #[test]
    fn vector_candidate_wins_when_higher() {
        let corpus = vec![entry(
            "c1",
            "Alimentação",
            Some("Supermercado"),
            TransactionKind::Expense,
        )];
        let mut embeddings = HashMap::new();
        embeddings.insert(corpus[0].key(), vec![1.0, 0.0]);

        let matches = score(
            "mercado",
            &corpus,
            Some(&[1.0, 0.0]),
            &embeddings,
            &HashMap::new(),
            &params(),
        );
        assert_eq!(matches[0].score, 1.0);
        assert_eq!(matches[0].source, MatchSource::Vector);
    }

    #[test]
    fn empty_corpus_yields_no_matches() {
        let matches = score(
            "mercado",
            &[],
            None,
            &HashMap::new(),
            &HashMap::new(),
            &params(),
        );
        assert!(matches.is_empty());
    }
}
