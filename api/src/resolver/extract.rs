//! Lightweight extraction from the raw message: transaction kind, amount,
//! date, and description. Phase 1 runs on these alone — no AI call.

use std::sync::LazyLock;

use centavo_core::model::TransactionKind;
use centavo_core::money;
use chrono::{Datelike, NaiveDate};
use regex::Regex;

use super::scorer::normalize;

const MAX_DESCRIPTION_CHARS: usize = 140;

/// Brazilian amount notation: '.' thousands, ',' decimals, optional "R$".
static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:r\$\s*)?(\d{1,3}(?:\.\d{3})+|\d+)(?:,(\d{1,2}))?")
        .expect("valid amount regex")
});

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{2,4}))?\b").expect("valid date regex")
});

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Words that signal money coming in. Everything else is an expense —
/// people mostly report what they spent.
const INCOME_MARKERS: &[&str] = &[
    "recebi",
    "recebimento",
    "recebeu",
    "ganhei",
    "salario",
    "caiu",
    "entrou",
    "deposito",
    "depositaram",
    "rendeu",
    "rendimento",
    "vendi",
    "renda",
    "reembolso",
];

pub fn detect_kind(text: &str) -> TransactionKind {
    let normalized = normalize(text);
    let has_income_marker = normalized
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| INCOME_MARKERS.contains(&token));

    if has_income_marker {
        TransactionKind::Income
    } else {
        TransactionKind::Expense
    }
}

/// First amount in the text, in minor units. Digit runs that are part of a
/// date ("12/05") are skipped.
pub fn extract_amount_minor(text: &str) -> Option<i64> {
    for capture in AMOUNT_RE.captures_iter(text) {
        let full = capture.get(0)?;
        if adjacent_to_slash(text, full.start(), full.end()) {
            continue;
        }

        let integer = capture.get(1)?.as_str();
        let fraction = capture.get(2).map(|m| m.as_str());
        if let Some(minor) = money::minor_from_parts(integer, fraction) {
            if minor > 0 {
                return Some(minor);
            }
        }
    }
    None
}

fn adjacent_to_slash(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    before == Some('/') || after == Some('/')
}

/// Resolve the transaction date: relative words first, then a dd/mm or
/// dd/mm/yyyy literal, otherwise today.
pub fn extract_date(text: &str, today: NaiveDate) -> NaiveDate {
    let normalized = normalize(text);
    let tokens: Vec<&str> = normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.contains(&"anteontem") {
        return today - chrono::Days::new(2);
    }
    if tokens.contains(&"ontem") {
        return today - chrono::Days::new(1);
    }
    if tokens.contains(&"hoje") {
        return today;
    }

    if let Some(capture) = DATE_RE.captures(text) {
        let day: u32 = capture.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let month: u32 = capture.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let year: i32 = capture
            .get(3)
            .and_then(|m| m.as_str().parse::<i32>().ok())
            .map(|y| if y < 100 { 2000 + y } else { y })
            .unwrap_or_else(|| today.year());

        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return date;
        }
    }

    today
}

/// The description is the user's own words, collapsed and capped.
pub fn describe(text: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(text.trim(), " ").to_string();
    if collapsed.chars().count() <= MAX_DESCRIPTION_CHARS {
        collapsed
    } else {
        collapsed.chars().take(MAX_DESCRIPTION_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    #[test]
    fn plain_integer_amount() {
        assert_eq!(extract_amount_minor("Gastei 50 no mercado"), Some(5_000));
    }

    #[test]
    fn currency_prefix_and_grouping() {
        assert_eq!(extract_amount_minor("paguei R$ 1.234,56 de aluguel"), Some(123_456));
        assert_eq!(extract_amount_minor("R$10"), Some(1_000));
    }

    #[test]
    fn decimal_comma_variants() {
        assert_eq!(extract_amount_minor("uber deu 10,5"), Some(1_050));
        assert_eq!(extract_amount_minor("café 4,75"), Some(475));
    }

    #[test]
    fn date_digits_are_not_amounts() {
        assert_eq!(extract_amount_minor("paguei a conta dia 12/05"), None);
        assert_eq!(
            extract_amount_minor("Gastei 50 no mercado dia 12/05"),
            Some(5_000)
        );
    }

    #[test]
    fn no_amount_in_text() {
        assert_eq!(extract_amount_minor("gastei uma fortuna no mercado"), None);
    }

    #[test]
    fn kind_defaults_to_expense() {
        assert_eq!(detect_kind("Gastei 50 no mercado"), TransactionKind::Expense);
        assert_eq!(detect_kind("almoço 30 reais"), TransactionKind::Expense);
    }

    #[test]
    fn income_markers_flip_kind() {
        assert_eq!(detect_kind("Recebi 2000 de salário"), TransactionKind::Income);
        assert_eq!(detect_kind("caiu o pagamento hoje"), TransactionKind::Income);
    }

    #[test]
    fn relative_dates() {
        let today = day(2026, 8, 6);
        assert_eq!(extract_date("gastei 50 hoje", today), today);
        assert_eq!(extract_date("gastei 50 ontem", today), day(2026, 8, 5));
        assert_eq!(extract_date("gastei 50 anteontem", today), day(2026, 8, 4));
    }

    #[test]
    fn literal_dates_with_and_without_year() {
        let today = day(2026, 8, 6);
        assert_eq!(extract_date("paguei dia 12/05", today), day(2026, 5, 12));
        assert_eq!(extract_date("paguei dia 12/05/25", today), day(2025, 5, 12));
        assert_eq!(extract_date("paguei dia 31/02", today), today);
    }

    #[test]
    fn description_collapses_and_caps() {
        assert_eq!(describe("  gastei   50\nno mercado "), "gastei 50 no mercado");
        let long = "x".repeat(500);
        assert_eq!(describe(&long).chars().count(), 140);
    }
}
