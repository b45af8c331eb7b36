//! Tokenizer for the inverted index over prompt/response text.
//!
//! Terms are lowercased runs of alphanumeric characters, two characters or
//! longer. The same tokenizer is applied at write time (building postings)
//! and at query time, so matching is case-insensitive by construction.

use std::collections::HashMap;

const MIN_TERM_LEN: usize = 2;
const MAX_TERM_LEN: usize = 64;

/// Term frequencies for one document (the concatenation of a span's input
/// and output text).
pub fn term_frequencies(texts: &[&str]) -> HashMap<String, u32> {
    let mut freqs = HashMap::new();
    for text in texts {
        for term in tokenize(text) {
            *freqs.entry(term).or_insert(0) += 1;
        }
    }
    freqs
}

/// Distinct query terms, in first-appearance order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for term in tokenize(query) {
        if !seen.contains(&term) {
            seen.push(term);
        }
    }
    seen
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TERM_LEN)
        .map(|t| t.to_lowercase().chars().take(MAX_TERM_LEN).collect())
}
