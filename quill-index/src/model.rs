use crate::tokenize::term_frequencies;
use crate::tokenize::token_set;
use crate::tokenize::tokenize;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::HashSet;

pub type EntryId = u32;

/// A sub-file slice scored independently at query time. Line numbers
/// are 1-indexed inclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexChunk {
    pub text: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default)]
    pub tokens: HashSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// The indexer's unit of record per file. Token sets and the BM25 term
/// cache are computed once at build time; the chunk list is a strict
/// tree below the entry (chunks never reference back).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// Workspace-relative path with forward slashes.
    pub uri: String,
    pub symbols: Vec<String>,
    pub snippet: String,
    pub snippet_start_line: u32,
    pub snippet_end_line: u32,
    pub chunks: Vec<IndexChunk>,
    #[serde(default)]
    pub snippet_tokens: HashSet<String>,
    #[serde(default)]
    pub uri_tokens: HashSet<String>,
    #[serde(default)]
    pub symbol_tokens: HashSet<String>,
    #[serde(default)]
    pub imported_symbols: Vec<String>,
    #[serde(default)]
    pub imported_from: Vec<String>,
    /// Per-document term frequencies for BM25.
    #[serde(default)]
    pub term_freq: HashMap<String, u32>,
    /// Total token count of the document (BM25 length norm).
    #[serde(default)]
    pub token_total: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet_embedding: Option<Vec<f32>>,
}

impl IndexEntry {
    pub fn extension(&self) -> Option<&str> {
        let name = self.uri.rsplit('/').next()?;
        let (_, ext) = name.rsplit_once('.')?;
        if ext.is_empty() { None } else { Some(ext) }
    }

    /// Directory prefixes of the uri, for hierarchical filters:
    /// `src/index/store.rs` yields `src` and `src/index`.
    pub fn path_prefixes(&self) -> Vec<String> {
        let mut prefixes = Vec::new();
        let mut acc = String::new();
        let mut parts = self.uri.split('/').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                break;
            }
            if !acc.is_empty() {
                acc.push('/');
            }
            acc.push_str(part);
            prefixes.push(acc.clone());
        }
        prefixes
    }

    /// Legacy blobs may lack token arrays and term caches; recompute
    /// them from the stored text so old indexes stay loadable.
    pub fn rehydrate(&mut self) {
        if self.uri_tokens.is_empty() {
            self.uri_tokens = token_set(&self.uri);
        }
        if self.snippet_tokens.is_empty() && !self.snippet.is_empty() {
            self.snippet_tokens = token_set(&self.snippet);
        }
        if self.symbol_tokens.is_empty() && !self.symbols.is_empty() {
            self.symbol_tokens = token_set(&self.symbols.join(" "));
        }
        for chunk in &mut self.chunks {
            if chunk.tokens.is_empty() && !chunk.text.is_empty() {
                chunk.tokens = token_set(&chunk.text);
            }
        }
        if self.term_freq.is_empty() {
            let mut tokens = tokenize(&self.snippet);
            for chunk in &self.chunks {
                tokens.extend(tokenize(&chunk.text));
            }
            self.term_freq = term_frequencies(&tokens);
            self.token_total = tokens.len() as u32;
        }
    }
}

/// The four core mappings plus the hierarchical and import-graph
/// variants. Mutated only by the maintenance loop; queries read a
/// consistent snapshot of entry references.
#[derive(Debug, Default, Clone)]
pub struct InvertedIndexes {
    pub term_to_entries: HashMap<String, HashSet<EntryId>>,
    pub symbol_to_entries: HashMap<String, HashSet<EntryId>>,
    pub path_to_entry: HashMap<String, EntryId>,
    pub extension_to_entries: HashMap<String, HashSet<EntryId>>,
    pub path_prefix_to_entries: HashMap<String, HashSet<EntryId>>,
    pub imported_symbol_to_entries: HashMap<String, HashSet<EntryId>>,
}

impl InvertedIndexes {
    pub fn add_entry(&mut self, id: EntryId, entry: &IndexEntry) {
        for term in entry.term_freq.keys() {
            self.term_to_entries.entry(term.clone()).or_default().insert(id);
        }
        for symbol in &entry.symbols {
            self.symbol_to_entries
                .entry(symbol.to_lowercase())
                .or_default()
                .insert(id);
        }
        self.path_to_entry.insert(entry.uri.clone(), id);
        if let Some(ext) = entry.extension() {
            self.extension_to_entries
                .entry(ext.to_string())
                .or_default()
                .insert(id);
        }
        for prefix in entry.path_prefixes() {
            self.path_prefix_to_entries.entry(prefix).or_default().insert(id);
        }
        for symbol in &entry.imported_symbols {
            self.imported_symbol_to_entries
                .entry(symbol.to_lowercase())
                .or_default()
                .insert(id);
        }
    }

    pub fn remove_entry(&mut self, id: EntryId, entry: &IndexEntry) {
        for term in entry.term_freq.keys() {
            remove_from(&mut self.term_to_entries, term, id);
        }
        for symbol in &entry.symbols {
            remove_from(&mut self.symbol_to_entries, &symbol.to_lowercase(), id);
        }
        self.path_to_entry.remove(&entry.uri);
        if let Some(ext) = entry.extension() {
            remove_from(&mut self.extension_to_entries, ext, id);
        }
        for prefix in entry.path_prefixes() {
            remove_from(&mut self.path_prefix_to_entries, &prefix, id);
        }
        for symbol in &entry.imported_symbols {
            remove_from(&mut self.imported_symbol_to_entries, &symbol.to_lowercase(), id);
        }
    }

    /// True when no mapping anywhere references `id`; used by tests to
    /// assert deletions leave nothing behind.
    pub fn references(&self, id: EntryId) -> bool {
        self.term_to_entries.values().any(|set| set.contains(&id))
            || self.symbol_to_entries.values().any(|set| set.contains(&id))
            || self.path_to_entry.values().any(|entry| *entry == id)
            || self.extension_to_entries.values().any(|set| set.contains(&id))
            || self
                .path_prefix_to_entries
                .values()
                .any(|set| set.contains(&id))
            || self
                .imported_symbol_to_entries
                .values()
                .any(|set| set.contains(&id))
    }
}

fn remove_from(map: &mut HashMap<String, HashSet<EntryId>>, key: &str, id: EntryId) {
    if let Some(set) = map.get_mut(key) {
        set.remove(&id);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(uri: &str, snippet: &str, symbols: &[&str]) -> IndexEntry {
        let mut entry = IndexEntry {
            uri: uri.to_string(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            snippet: snippet.to_string(),
            snippet_start_line: 1,
            snippet_end_line: 1,
            chunks: Vec::new(),
            snippet_tokens: HashSet::new(),
            uri_tokens: HashSet::new(),
            symbol_tokens: HashSet::new(),
            imported_symbols: Vec::new(),
            imported_from: Vec::new(),
            term_freq: HashMap::new(),
            token_total: 0,
            snippet_embedding: None,
        };
        entry.rehydrate();
        entry
    }

    #[test]
    fn rehydrate_fills_missing_token_sets() {
        let entry = entry("src/lib.rs", "pub fn parse_config() {}", &["parse_config"]);
        assert!(entry.uri_tokens.contains("lib"));
        assert!(entry.snippet_tokens.contains("parse_config"));
        assert!(entry.symbol_tokens.contains("parse_config"));
        assert!(entry.term_freq.contains_key("parse_config"));
        assert!(entry.token_total > 0);
    }

    #[test]
    fn path_prefixes_cover_each_directory() {
        let entry = entry("src/index/store.rs", "x", &[]);
        assert_eq!(entry.path_prefixes(), vec!["src", "src/index"]);
        assert_eq!(entry.extension(), Some("rs"));
    }

    #[test]
    fn add_then_remove_leaves_no_references() {
        let entry = entry("src/a.rs", "fn alpha() {}", &["alpha"]);
        let mut indexes = InvertedIndexes::default();
        indexes.add_entry(7, &entry);
        assert!(indexes.references(7));
        assert_eq!(indexes.path_to_entry.get("src/a.rs"), Some(&7));

        indexes.remove_entry(7, &entry);
        assert!(!indexes.references(7));
        assert!(indexes.term_to_entries.is_empty());
    }
}
