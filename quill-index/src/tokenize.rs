use std::collections::HashMap;
use std::collections::HashSet;

const MIN_TOKEN_LEN: usize = 2;
const MAX_TOKEN_LEN: usize = 64;

/// Lower-cased alphanumeric/underscore tokenization. Every token set in
/// the index comes from this single function so query-time and
/// build-time tokens always agree.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            for lower in ch.to_lowercase() {
                current.push(lower);
            }
        } else if !current.is_empty() {
            push_token(&mut tokens, &mut current);
        }
    }
    if !current.is_empty() {
        push_token(&mut tokens, &mut current);
    }
    tokens
}

fn push_token(tokens: &mut Vec<String>, current: &mut String) {
    if (MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&current.len()) {
        tokens.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Term frequencies over a token stream, the per-document BM25 cache.
pub fn term_frequencies(tokens: &[String]) -> HashMap<String, u32> {
    let mut freq = HashMap::new();
    for token in tokens {
        *freq.entry(token.clone()).or_insert(0u32) += 1;
    }
    freq
}
