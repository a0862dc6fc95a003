//! Confidence and margin for a classification, read from token log-probabilities.
//!
//! The service returns the generated JSON as a token stream where structural
//! characters (`{`, `"`, `:`) are interleaved with content. To score the
//! classification we locate the token that carries the value, trying in order:
//!
//! 1. **key-anchored**: find the schema property name, then the first
//!    non-structural token within the next [`KEY_LOOKAHEAD`] tokens;
//! 2. **direct**: a token whose cleaned text equals the value;
//! 3. **heuristic**: the first token that looks like a number, boolean or
//!    yes/no answer and carries no colon.
//!
//! The first tier that finds a token wins. Everything here is a pure function
//! over the token slice.

use serde::Serialize;

use crate::batch::{ClassificationResult, TokenLogprob, TopLogprob};
use crate::schema::{SchemaSpec, classification_value};

/// Tokens inspected after a property-key match.
pub const KEY_LOOKAHEAD: usize = 10;

/// Probability reported for one enumerated schema value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumProbability {
    pub value: String,
    /// `None` when the value is not among the returned top-k alternatives.
    pub probability: Option<f64>,
}

/// Scores derived from the token carrying the classification value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Confidence {
    /// Raw text of the matched token.
    pub token: String,
    /// Probability of the matched token.
    pub top1: f64,
    /// Gap between the two most likely alternatives at the matched position.
    pub margin: f64,
    /// Alternatives at the matched position as `(token, probability)`, most likely first.
    pub alternatives: Vec<(String, f64)>,
    pub enum_probabilities: Vec<EnumProbability>,
}

/// Locates the classification value in `tokens` and scores it.
///
/// Returns `None` when there is no probability data or no tier finds a token.
pub fn extract_confidence(
    tokens: &[TokenLogprob],
    classification_value: &str,
    schema: &SchemaSpec,
) -> Option<Confidence> {
    if tokens.is_empty() {
        return None;
    }
    let target = classification_value.trim();

    let idx = find_by_key(tokens, target, schema)
        .or_else(|| find_by_value(tokens, target))
        .or_else(|| find_by_heuristic(tokens))?;

    Some(score(&tokens[idx], schema))
}

/// Scores a stored result. `None` for failures and results without logprobs.
pub fn score_result(result: &ClassificationResult, schema: &SchemaSpec) -> Option<Confidence> {
    if !result.success {
        return None;
    }
    let tokens = result.logprobs.as_deref()?;
    let value = classification_value(result.output.as_ref());
    extract_confidence(tokens, &value, schema)
}

fn find_by_key(tokens: &[TokenLogprob], target: &str, schema: &SchemaSpec) -> Option<usize> {
    for key in schema.search_keys() {
        let Some(key_idx) = tokens.iter().position(|t| strip_quotes(&t.token) == key) else {
            continue;
        };

        let window_end = (key_idx + 1 + KEY_LOOKAHEAD).min(tokens.len());
        let candidate = (key_idx + 1..window_end).find(|&j| !is_structural(&tokens[j].token));

        if let Some(j) = candidate {
            let cleaned = strip_structural(&tokens[j].token);
            if cleaned == target || target.contains(cleaned.as_str()) {
                return Some(j);
            }
        }
    }
    None
}

fn find_by_value(tokens: &[TokenLogprob], target: &str) -> Option<usize> {
    if target.is_empty() {
        return None;
    }
    tokens
        .iter()
        .position(|t| strip_structural(&t.token) == target)
}

fn find_by_heuristic(tokens: &[TokenLogprob]) -> Option<usize> {
    tokens
        .iter()
        .position(|t| looks_like_answer(&t.token) && !t.token.contains(':'))
}

fn score(token: &TokenLogprob, schema: &SchemaSpec) -> Confidence {
    let top1 = token.logprob.exp();

    let mut sorted: Vec<&TopLogprob> = token.top_logprobs.iter().collect();
    sorted.sort_by(|a, b| b.logprob.total_cmp(&a.logprob));

    let margin = match sorted.as_slice() {
        [first, second, ..] => first.logprob.exp() - second.logprob.exp(),
        _ => top1,
    };

    let enum_probabilities = schema
        .enum_values
        .iter()
        .map(|value| {
            let key = strip_quotes(value);
            let probability = sorted
                .iter()
                .find(|alt| strip_quotes(&alt.token) == key)
                .map(|alt| alt.logprob.exp());
            EnumProbability {
                value: value.clone(),
                probability,
            }
        })
        .collect();

    Confidence {
        token: token.token.clone(),
        top1,
        margin,
        alternatives: sorted
            .iter()
            .map(|alt| (alt.token.clone(), alt.logprob.exp()))
            .collect(),
        enum_probabilities,
    }
}

/// Token text without quotes or whitespace.
pub fn strip_quotes(token: &str) -> String {
    token
        .chars()
        .filter(|c| *c != '"' && !c.is_whitespace())
        .collect()
}

/// Token text without quotes, whitespace, braces, commas or colons.
pub fn strip_structural(token: &str) -> String {
    token
        .chars()
        .filter(|c| !matches!(c, '"' | '{' | '}' | ',' | ':') && !c.is_whitespace())
        .collect()
}

// A token made only of JSON punctuation and whitespace carries no value.
fn is_structural(token: &str) -> bool {
    token
        .chars()
        .all(|c| matches!(c, ':' | '"' | '{' | '}' | '[' | ',') || c.is_whitespace())
}

fn looks_like_answer(token: &str) -> bool {
    if token.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    let lower = token.to_ascii_lowercase();
    ["true", "false", "yes", "no"].iter().any(|w| lower.contains(w))
}
