use std::collections::HashMap;

/// Classic BM25 parameters. The defaults are the standard k1=1.2,
/// b=0.75 pairing.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// BM25 over one document, with document frequencies supplied by the
/// caller (computed lazily over the candidate set rather than the full
/// corpus).
pub fn bm25_score(
    query_tokens: &[String],
    term_freq: &HashMap<String, u32>,
    doc_len: u32,
    doc_freqs: &HashMap<String, usize>,
    total_docs: usize,
    avg_doc_len: f32,
    params: Bm25Params,
) -> f32 {
    if query_tokens.is_empty() || term_freq.is_empty() || doc_len == 0 || total_docs == 0 {
        return 0.0;
    }
    let mut score = 0.0;
    let mut seen: Vec<&str> = Vec::with_capacity(query_tokens.len());
    for token in query_tokens {
        if seen.contains(&token.as_str()) {
            continue;
        }
        seen.push(token);
        let Some(tf) = term_freq.get(token) else {
            continue;
        };
        let df = *doc_freqs.get(token).unwrap_or(&0) as f32;
        let n = total_docs as f32;
        let idf = (((n - df + 0.5) / (df + 0.5)) + 1.0).ln().max(0.0);
        let tf = *tf as f32;
        let denom =
            tf + params.k1 * (1.0 - params.b + params.b * (doc_len as f32 / avg_doc_len.max(1.0)));
        if denom > 0.0 {
            score += idf * (tf * (params.k1 + 1.0) / denom);
        }
    }
    score
}

/// Squash a raw BM25 score into [0, 1) for blending with cosine
/// similarity.
pub fn normalize_bm25(raw: f32) -> f32 {
    if raw <= 0.0 { 0.0 } else { raw / (raw + 2.0) }
}
