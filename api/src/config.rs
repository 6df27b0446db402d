use std::time::Duration;

use chrono_tz::Tz;

/// Runtime configuration, read once at startup. Every knob has a default
/// matching production behavior; env vars override individually.
#[derive(Debug, Clone)]
pub struct Config {
    /// Phase 1 acceptance bar for a direct retrieval match.
    pub rag_threshold: f64,
    /// Phase 3 bar for retrieval to override the AI's category choice.
    pub revalidation_threshold: f64,
    /// Multiplier on the revalidation score added to the AI confidence.
    pub revalidation_confidence_bonus: f64,
    /// Confidence bar below which resolution rejects with "be more specific".
    pub min_confidence: f64,
    /// Auto-register bar: confirmation-free delivery at or above this.
    pub auto_register_threshold: f64,
    /// Matches below this score are dropped by the scorer.
    pub scorer_min_score: f64,
    /// How many scored matches the scorer returns.
    pub scorer_max_results: usize,
    /// Whether to run the embedding-based scoring path.
    pub vector_scoring: bool,

    /// How long a confirmation stays answerable.
    pub confirmation_timeout: Duration,
    /// Warn this long before a pending confirmation expires.
    pub expiration_warning_window: Duration,
    /// How often the expiration sweep runs.
    pub expiration_interval: Duration,
    /// How often the delivery retry sweep runs.
    pub delivery_interval: Duration,
    /// Give up on a delivery after this many attempts.
    pub delivery_max_attempts: i32,
    /// Rows per delivery sweep.
    pub delivery_batch_size: i64,
    /// Delivered rows are garbage-collected after this window.
    pub delivered_retention: Duration,
    /// How often the retention sweep runs.
    pub sweep_interval: Duration,
    /// TTL for numbered-list context.
    pub list_context_ttl: Duration,
    /// Serve a cached corpus this long before refetching categories.
    pub corpus_cache_ttl: Duration,

    /// Calendar timezone for interpreting "hoje"/"ontem" and bare dates.
    pub timezone: Tz,
    /// Outbound AI-provider request timeout. A timeout is a Phase 2 failure.
    pub ai_timeout: Duration,

    pub category_api_url: String,
    pub category_api_token: Option<String>,
    pub ai_api_url: String,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub embedding_api_url: Option<String>,
    pub embedding_model: String,
    pub ledger_api_url: String,
    pub ledger_api_token: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub ops_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            rag_threshold: env_f64("CENTAVO_RAG_THRESHOLD", 0.6),
            revalidation_threshold: env_f64("CENTAVO_REVALIDATION_THRESHOLD", 0.45),
            revalidation_confidence_bonus: env_f64("CENTAVO_REVALIDATION_BONUS", 0.1),
            min_confidence: env_f64("CENTAVO_MIN_CONFIDENCE", 0.3),
            auto_register_threshold: env_f64("CENTAVO_AUTO_REGISTER_THRESHOLD", 0.9),
            scorer_min_score: env_f64("CENTAVO_SCORER_MIN_SCORE", 0.15),
            scorer_max_results: env_u64("CENTAVO_SCORER_MAX_RESULTS", 5) as usize,
            vector_scoring: env_bool("CENTAVO_VECTOR_SCORING", false),
            confirmation_timeout: env_secs("CENTAVO_CONFIRMATION_TIMEOUT_SECONDS", 300),
            expiration_warning_window: env_secs("CENTAVO_EXPIRATION_WARNING_SECONDS", 30),
            expiration_interval: env_secs("CENTAVO_EXPIRATION_INTERVAL_SECONDS", 30),
            delivery_interval: env_secs("CENTAVO_DELIVERY_INTERVAL_SECONDS", 300),
            delivery_max_attempts: env_u64("CENTAVO_DELIVERY_MAX_ATTEMPTS", 5) as i32,
            delivery_batch_size: env_u64("CENTAVO_DELIVERY_BATCH_SIZE", 10) as i64,
            delivered_retention: env_secs("CENTAVO_DELIVERED_RETENTION_SECONDS", 3_600),
            sweep_interval: env_secs("CENTAVO_SWEEP_INTERVAL_SECONDS", 300),
            list_context_ttl: env_secs("CENTAVO_LIST_CONTEXT_TTL_SECONDS", 600),
            corpus_cache_ttl: env_secs("CENTAVO_CORPUS_CACHE_TTL_SECONDS", 60),
            timezone: env_tz("CENTAVO_TIMEZONE", chrono_tz::America::Sao_Paulo),
            ai_timeout: env_secs("CENTAVO_AI_TIMEOUT_SECONDS", 15),
            category_api_url: env_string("CENTAVO_CATEGORY_API_URL", "http://localhost:8081"),
            category_api_token: env_opt("CENTAVO_CATEGORY_API_TOKEN"),
            ai_api_url: env_string("CENTAVO_AI_API_URL", "https://api.openai.com"),
            ai_api_key: env_opt("CENTAVO_AI_API_KEY"),
            ai_model: env_string("CENTAVO_AI_MODEL", "gpt-4o-mini"),
            embedding_api_url: env_opt("CENTAVO_EMBEDDING_API_URL"),
            embedding_model: env_string("CENTAVO_EMBEDDING_MODEL", "text-embedding-3-small"),
            ledger_api_url: env_string("CENTAVO_LEDGER_API_URL", "http://localhost:8082"),
            ledger_api_token: env_opt("CENTAVO_LEDGER_API_TOKEN"),
            notify_webhook_url: env_opt("CENTAVO_NOTIFY_WEBHOOK_URL"),
            ops_token: env_opt("CENTAVO_OPS_TOKEN"),
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_string(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_f64(name: &str, default: f64) -> f64 {
    parse_f64(env_opt(name), default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    parse_u64(env_opt(name), default)
}

fn env_bool(name: &str, default: bool) -> bool {
    parse_bool(env_opt(name), default)
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(parse_u64(env_opt(name), default))
}

fn env_tz(name: &str, default: Tz) -> Tz {
    match env_opt(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(timezone = %raw, "Unknown timezone, falling back to default");
            default
        }),
        None => default,
    }
}

fn parse_f64(raw: Option<String>, default: f64) -> f64 {
    raw.and_then(|value| value.parse().ok()).unwrap_or(default)
}

fn parse_u64(raw: Option<String>, default: u64) -> u64 {
    raw.and_then(|value| value.parse().ok()).unwrap_or(default)
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_helpers_fall_back_on_garbage() {
        assert_eq!(parse_f64(Some("0.7".to_string()), 0.6), 0.7);
        assert_eq!(parse_f64(Some("abc".to_string()), 0.6), 0.6);
        assert_eq!(parse_f64(None, 0.6), 0.6);
        assert_eq!(parse_u64(Some("42".to_string()), 5), 42);
        assert_eq!(parse_u64(Some("-1".to_string()), 5), 5);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool(Some("true".to_string()), false));
        assert!(parse_bool(Some("1".to_string()), false));
        assert!(!parse_bool(Some("false".to_string()), true));
        assert!(!parse_bool(Some("0".to_string()), true));
        assert!(parse_bool(Some("yes".to_string()), true));
    }
}
