//! Classification of confirmation replies. Deliberately a small fixed
//! vocabulary — anything ambiguous gets guidance instead of a guess.

use crate::resolver::scorer::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyIntent {
    Affirmative,
    Negative,
    /// "listar"/"pendentes": show the open items instead of transitioning.
    ListRequest,
    /// A bare 1-indexed number referencing an earlier listing.
    Reference(usize),
    Other,
}

const AFFIRMATIVE: &[&str] = &[
    "sim", "s", "yes", "confirmo", "confirmar", "confirma", "ok", "pode", "isso", "claro",
    "certo", "beleza", "manda", "positivo",
];

// "no" is deliberately absent: in pt-BR it is a contraction ("no
// mercado"), not a negation.
const NEGATIVE: &[&str] = &[
    "nao", "n", "cancela", "cancelar", "errado", "negativo", "descarta", "descartar",
];

const LIST_KEYWORDS: &[&str] = &["listar", "lista", "pendentes", "pendente"];

pub fn classify_reply(text: &str) -> ReplyIntent {
    if text.trim() == "\u{1F44D}" {
        return ReplyIntent::Affirmative;
    }

    let normalized = normalize(text);
    let tokens: Vec<&str> = normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();

    if tokens.is_empty() {
        return ReplyIntent::Other;
    }

    if tokens.iter().any(|token| LIST_KEYWORDS.contains(token)) {
        return ReplyIntent::ListRequest;
    }

    if let [single] = tokens.as_slice() {
        if let Ok(number) = single.parse::<usize>() {
            return ReplyIntent::Reference(number);
        }
    }

    // Classify by the first token: "sim, no mercado mesmo" confirms.
    let first = tokens[0];
    if AFFIRMATIVE.contains(&first) {
        return ReplyIntent::Affirmative;
    }
    if NEGATIVE.contains(&first) {
        return ReplyIntent::Negative;
    }

    ReplyIntent::Other
}
