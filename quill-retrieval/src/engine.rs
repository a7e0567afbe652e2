use crate::bm25::Bm25Params;
use crate::bm25::bm25_score;
use crate::bm25::normalize_bm25;
use crate::cache::QueryCache;
use crate::config::RetrievalConfig;
use crate::result::QueryHit;
use crate::result::QueryMetrics;
use log::debug;
use log::warn;
use quill_embeddings::EmbeddingService;
use quill_index::EntryId;
use quill_index::IndexCoordinator;
use quill_index::IndexEntry;
use quill_index::tokenize;
use quill_vectors::VectorStore;
use quill_vectors::cosine_similarity;
use quill_workspace::PrivacyGate;
use quill_workspace::SecretDetector;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const CHARS_PER_TOKEN: usize = 4;
const RECENT_FALLBACK_CAP: usize = 32;
const MIN_EMBED_BUDGET: Duration = Duration::from_millis(10);

// Composite scoring weights: exact symbol match dominates substring
// symbol match, which dominates uri-token overlap, then snippet-token
// overlap, then phrase occurrence.
const EXACT_SYMBOL_SCORE: f32 = 120.0;
const SUBSTRING_SYMBOL_SCORE: f32 = 50.0;
const URI_TOKEN_SCORE: f32 = 12.0;
const SNIPPET_TOKEN_SCORE: f32 = 4.0;
const PHRASE_SCORE: f32 = 8.0;
const CONTENT_TOKEN_SCORE: f32 = 2.0;
const COMPOSITE_TIEBREAK: f32 = 1e-4;

struct Candidate {
    entry: Arc<IndexEntry>,
    composite: f32,
    /// Index of the best chunk when this candidate represents one.
    chunk: Option<usize>,
}

/// Hybrid query engine. Reads take a consistent snapshot of entry
/// references at query start; entries are immutable once added, so no
/// lock is held while scoring.
pub struct QueryEngine {
    index: IndexCoordinator,
    config: RetrievalConfig,
    embedder: Option<Arc<EmbeddingService>>,
    vectors: Option<Arc<VectorStore>>,
    secrets: SecretDetector,
    privacy: PrivacyGate,
    cache: QueryCache,
    latencies: Mutex<VecDeque<u64>>,
    /// Rebuild epoch at which the engine self-disabled; `None` when
    /// healthy. Cleared when the epoch moves (a full rebuild ran).
    degraded_epoch: Mutex<Option<u64>>,
    recent: Mutex<Vec<QueryHit>>,
}

impl QueryEngine {
    pub fn new(
        index: IndexCoordinator,
        config: RetrievalConfig,
        embedder: Option<Arc<EmbeddingService>>,
        vectors: Option<Arc<VectorStore>>,
        secrets: SecretDetector,
        privacy: PrivacyGate,
    ) -> Self {
        let cache = QueryCache::new(
            config.cache_capacity,
            Duration::from_millis(config.cache_ttl_ms),
        );
        Self {
            index,
            config,
            embedder,
            vectors,
            secrets,
            privacy,
            cache,
            latencies: Mutex::new(VecDeque::new()),
            degraded_epoch: Mutex::new(None),
            recent: Mutex::new(Vec::new()),
        }
    }

    pub async fn query(&self, text: &str, k: usize) -> Vec<QueryHit> {
        self.query_with_metrics(text, k).await.0
    }

    /// Whether the engine has self-disabled after a latency
    /// regression. Distinct from the indexer's configuration
    /// off-switch.
    pub fn is_degraded(&self) -> bool {
        let epoch = self.index.rebuild_epoch();
        let mut guard = lock(&self.degraded_epoch);
        match *guard {
            Some(entered) if entered == epoch => true,
            Some(_) => {
                *guard = None;
                false
            }
            None => false,
        }
    }

    pub async fn query_with_metrics(&self, text: &str, k: usize) -> (Vec<QueryHit>, QueryMetrics) {
        let start = Instant::now();
        let deadline = start + Duration::from_millis(self.config.query_timeout_ms);
        let mut metrics = QueryMetrics::default();

        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() || k == 0 || !self.index.is_enabled() {
            metrics.retrieval_latency_ms = ms_since(start);
            return (Vec::new(), metrics);
        }

        if let Some(hits) = self.cache.get(&normalized, k) {
            metrics.cache_hit = true;
            metrics.results_count = hits.len();
            metrics.top_score = hits.first().map(|hit| hit.score);
            metrics.retrieval_latency_ms = ms_since(start);
            return (hits, metrics);
        }

        if self.is_degraded() {
            let mut hits = lock(&self.recent).clone();
            hits.truncate(k);
            metrics.degraded = true;
            metrics.results_count = hits.len();
            metrics.retrieval_latency_ms = ms_since(start);
            return (hits, metrics);
        }

        let tokens = tokenize(&normalized);
        if tokens.is_empty() {
            metrics.retrieval_latency_ms = ms_since(start);
            return (Vec::new(), metrics);
        }

        // Candidate selection under the read lock; everything after
        // works on cloned Arcs.
        let (mut candidates, total_docs, avg_doc_len) = {
            let store = self.index.store();
            let guard = store.read().await;
            if guard.is_empty() {
                drop(guard);
                // Cold index: schedule a background warmup and return
                // empty rather than blocking the caller.
                let index = self.index.clone();
                tokio::spawn(async move { index.warm_index(None).await });
                metrics.retrieval_latency_ms = ms_since(start);
                return (Vec::new(), metrics);
            }
            let ids = select_candidates(&guard, &tokens, self.config.widen_threshold);
            let resolved = guard.resolve(&ids);
            (
                resolved,
                guard.total_documents(),
                guard.average_document_length(),
            )
        };

        // Optional query embedding, within whatever deadline is left.
        let query_vector = self.query_embedding(&normalized, deadline, &mut metrics).await;

        // Dedicated vector store contributes extra candidates.
        if let (Some(vector), Some(vectors)) = (&query_vector, &self.vectors) {
            let hits = vectors.search(vector, k * 2).await;
            let known: HashSet<&str> = candidates.iter().map(|(_, e)| e.uri.as_str()).collect();
            let missing: Vec<String> = hits
                .iter()
                .filter(|hit| !known.contains(hit.path.as_str()))
                .map(|hit| hit.path.clone())
                .collect();
            if !missing.is_empty() {
                let store = self.index.store();
                let guard = store.read().await;
                for path in missing {
                    if let Some(found) = guard.get_by_uri(&path) {
                        candidates.push(found);
                    }
                }
            }
        }

        // Composite scoring with periodic deadline checks and early
        // termination once enough high scorers are seen.
        let mut scored: Vec<Candidate> = Vec::with_capacity(candidates.len());
        let mut high_scorers = 0usize;
        for (idx, (_id, entry)) in candidates.into_iter().enumerate() {
            if idx % self.config.deadline_check_interval.max(1) == 0
                && Instant::now() >= deadline
            {
                metrics.timed_out = true;
                break;
            }
            let composite = composite_score(&entry, &normalized, &tokens);
            if composite <= 0.0 {
                continue;
            }
            if composite >= self.config.chunk_gate_score {
                for (chunk_idx, chunk) in entry.chunks.iter().enumerate() {
                    let overlap = tokens
                        .iter()
                        .filter(|token| chunk.tokens.contains(*token))
                        .count();
                    if overlap == 0 {
                        continue;
                    }
                    let mut chunk_score = composite + overlap as f32 * SNIPPET_TOKEN_SCORE;
                    if normalized.len() >= 3 && chunk.text.to_lowercase().contains(&normalized) {
                        chunk_score += PHRASE_SCORE;
                    }
                    scored.push(Candidate {
                        entry: entry.clone(),
                        composite: chunk_score,
                        chunk: Some(chunk_idx),
                    });
                }
            }
            if composite >= self.config.high_score_threshold {
                high_scorers += 1;
            }
            scored.push(Candidate {
                entry,
                composite,
                chunk: None,
            });
            if high_scorers >= self.config.early_termination_count {
                metrics.early_terminated = true;
                break;
            }
        }

        // BM25 rerank over the top of the composite ranking, IDF
        // computed lazily over the candidate set.
        scored.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.uri.cmp(&b.entry.uri))
        });
        scored.truncate(self.config.rerank_pool);

        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        for token in &tokens {
            let mut seen_uris: HashSet<&str> = HashSet::new();
            let df = scored
                .iter()
                .filter(|candidate| {
                    candidate.entry.term_freq.contains_key(token)
                        && seen_uris.insert(candidate.entry.uri.as_str())
                })
                .count();
            doc_freqs.insert(token.clone(), df);
        }

        let weights = self.config.hybrid_weights;
        metrics.hybrid_search_used = query_vector.is_some();
        let mut best_per_uri: HashMap<String, (f32, Option<(u32, u32)>, usize)> = HashMap::new();
        for candidate in &scored {
            let raw = bm25_score(
                &tokens,
                &candidate.entry.term_freq,
                candidate.entry.token_total,
                &doc_freqs,
                total_docs,
                avg_doc_len,
                Bm25Params::default(),
            );
            let lexical = normalize_bm25(raw);
            let vector_similarity = query_vector.as_ref().and_then(|query_vec| {
                let embedding = match candidate.chunk {
                    Some(idx) => candidate.entry.chunks.get(idx)?.embedding.as_ref(),
                    None => candidate.entry.snippet_embedding.as_ref(),
                }?;
                Some(cosine_similarity(query_vec, embedding))
            });
            let mut score = match vector_similarity {
                Some(similarity) => weights.bm25 * lexical + weights.vector * similarity,
                None => lexical,
            };
            score += candidate.composite * COMPOSITE_TIEBREAK;

            let (range, injected_len) = match candidate.chunk {
                Some(idx) => {
                    let chunk = &candidate.entry.chunks[idx];
                    (Some((chunk.start_line, chunk.end_line)), chunk.text.len())
                }
                None => (None, candidate.entry.snippet.len()),
            };

            // One result per uri: keep the highest-scoring chunk.
            match best_per_uri.get(&candidate.entry.uri) {
                Some((existing, _, _)) if *existing >= score => {}
                _ => {
                    best_per_uri.insert(
                        candidate.entry.uri.clone(),
                        (score, range, injected_len),
                    );
                }
            }
        }

        // Top-k extraction via a size-k min-heap.
        let mut heap: std::collections::BinaryHeap<std::cmp::Reverse<RankedHit>> =
            std::collections::BinaryHeap::with_capacity(k + 1);
        for (uri, (score, range, injected_len)) in best_per_uri {
            heap.push(std::cmp::Reverse(RankedHit {
                score,
                uri,
                range,
                injected_len,
            }));
            if heap.len() > k {
                heap.pop();
            }
        }
        let mut ranked: Vec<RankedHit> = heap.into_iter().map(|entry| entry.0).collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.uri.cmp(&b.uri))
        });

        let hits: Vec<QueryHit> = ranked
            .iter()
            .map(|ranked| QueryHit {
                uri: ranked.uri.clone(),
                score: ranked.score,
                start_line: ranked.range.map(|(start, _)| start),
                end_line: ranked.range.map(|(_, end)| end),
            })
            .collect();

        metrics.tokens_injected = ranked
            .iter()
            .map(|ranked| ranked.injected_len / CHARS_PER_TOKEN)
            .sum();
        metrics.results_count = hits.len();
        metrics.top_score = hits.first().map(|hit| hit.score);
        metrics.retrieval_latency_ms = ms_since(start);

        self.cache.put(&normalized, k, hits.clone());
        if !hits.is_empty() {
            let mut recent = lock(&self.recent);
            *recent = hits.clone();
            recent.truncate(RECENT_FALLBACK_CAP);
        }
        self.record_latency(metrics.retrieval_latency_ms);

        debug!(
            "query '{normalized}' -> {} results in {} ms",
            hits.len(),
            metrics.retrieval_latency_ms
        );
        (hits, metrics)
    }

    /// Clear cached results; the maintenance loop calls this after
    /// refreshes so stale hits do not outlive the entries behind them.
    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    async fn query_embedding(
        &self,
        normalized: &str,
        deadline: Instant,
        metrics: &mut QueryMetrics,
    ) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        if !embedder.is_enabled() || !self.privacy.allows_network() {
            return None;
        }
        let sanitized = self.secrets.sanitize_for_export(normalized)?;
        let remaining = deadline.checked_duration_since(Instant::now())?;
        if remaining < MIN_EMBED_BUDGET {
            return None;
        }
        let embed_start = Instant::now();
        let result = tokio::time::timeout(
            remaining,
            embedder.embed_single(&sanitized, CancellationToken::new()),
        )
        .await;
        metrics.embedding_latency_ms = Some(ms_since(embed_start));
        match result {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(err)) => {
                warn!("query embedding failed: {err}");
                None
            }
            Err(_) => {
                debug!("query embedding timed out");
                None
            }
        }
    }

    fn record_latency(&self, latency_ms: u64) {
        let window = self.config.latency_window.max(1);
        let mut latencies = lock(&self.latencies);
        latencies.push_back(latency_ms);
        while latencies.len() > window {
            latencies.pop_front();
        }
        if latencies.len() >= window {
            let mean = latencies.iter().sum::<u64>() as f64 / latencies.len() as f64;
            if mean > self.config.degraded_latency_ceiling_ms as f64 {
                let epoch = self.index.rebuild_epoch();
                *lock(&self.degraded_epoch) = Some(epoch);
                warn!(
                    "query latency mean {mean:.1} ms over ceiling; entering degraded mode until next rebuild"
                );
            }
        }
    }
}

#[derive(Debug, PartialEq)]
struct RankedHit {
    score: f32,
    uri: String,
    range: Option<(u32, u32)>,
    injected_len: usize,
}

impl Eq for RankedHit {}

impl PartialOrd for RankedHit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedHit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Min-heap eviction order: lower score is smaller; equal
        // scores evict the lexicographically later uri first so the
        // kept set is deterministic.
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| other.uri.cmp(&self.uri))
    }
}

fn select_candidates(
    store: &quill_index::IndexStore,
    tokens: &[String],
    widen_threshold: usize,
) -> HashSet<EntryId> {
    if tokens.len() == 1 {
        return store.candidates_for_token(&tokens[0]);
    }
    let mut sets: Vec<HashSet<EntryId>> = tokens
        .iter()
        .map(|token| store.candidates_for_token(token))
        .collect();
    sets.sort_by_key(HashSet::len);
    let mut intersection = sets[0].clone();
    for set in &sets[1..] {
        intersection.retain(|id| set.contains(id));
        if intersection.is_empty() {
            break;
        }
    }
    if intersection.len() >= widen_threshold {
        return intersection;
    }
    // Too precise; widen to the union for recall.
    let mut union = HashSet::new();
    for set in sets {
        union.extend(set);
    }
    union
}

fn composite_score(entry: &IndexEntry, normalized: &str, tokens: &[String]) -> f32 {
    let mut score = 0.0;
    let exact = entry
        .symbols
        .iter()
        .any(|symbol| symbol.eq_ignore_ascii_case(normalized));
    if exact {
        score += EXACT_SYMBOL_SCORE;
    } else if normalized.len() >= 3
        && entry
            .symbols
            .iter()
            .any(|symbol| symbol.to_lowercase().contains(normalized))
    {
        score += SUBSTRING_SYMBOL_SCORE;
    }
    let uri_overlap = tokens
        .iter()
        .filter(|token| entry.uri_tokens.contains(*token))
        .count();
    score += uri_overlap as f32 * URI_TOKEN_SCORE;
    let snippet_overlap = tokens
        .iter()
        .filter(|token| entry.snippet_tokens.contains(*token))
        .count();
    score += snippet_overlap as f32 * SNIPPET_TOKEN_SCORE;
    if normalized.len() >= 3 && entry.snippet.to_lowercase().contains(normalized) {
        score += PHRASE_SCORE;
    }
    // Symbol-token overlap catches snake/camel fragments that are not
    // whole-symbol matches.
    let symbol_overlap = tokens
        .iter()
        .filter(|token| entry.symbol_tokens.contains(*token))
        .count();
    score += symbol_overlap as f32 * SNIPPET_TOKEN_SCORE;
    // Body-term overlap keeps candidates alive that matched deep in
    // the file rather than in its head or symbols.
    let content_overlap = tokens
        .iter()
        .filter(|token| entry.term_freq.contains_key(*token))
        .count();
    score += content_overlap as f32 * CONTENT_TOKEN_SCORE;
    score
}

fn ms_since(start: Instant) -> u64 {
    start.elapsed().as_millis().min(u64::MAX as u128) as u64
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
