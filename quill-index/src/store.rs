use crate::error::Result;
use crate::model::EntryId;
use crate::model::IndexEntry;
use crate::model::InvertedIndexes;
use log::info;
use log::warn;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

const BLOB_VERSION: u32 = 2;
const INDEX_FILENAME: &str = "index.json";
const LEGACY_IN_WORKSPACE: &str = ".quill/index.json";

#[derive(Debug, Serialize, Deserialize)]
struct IndexBlob {
    version: u32,
    entries: Vec<IndexEntry>,
}

/// Entries plus every inverted index. Mutation happens only on the
/// maintenance path; queries clone `Arc`s of the entries they touch, so
/// an entry observed by a reader is immutable for the reader's
/// lifetime.
#[derive(Debug, Default)]
pub struct IndexStore {
    entries: HashMap<EntryId, Arc<IndexEntry>>,
    indexes: InvertedIndexes,
    next_id: EntryId,
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the entry for its uri. Replacement retires the
    /// old id so stale inverted-index references cannot survive.
    pub fn upsert(&mut self, entry: IndexEntry) -> EntryId {
        self.remove_uri(&entry.uri);
        let id = self.next_id;
        self.next_id += 1;
        self.indexes.add_entry(id, &entry);
        self.entries.insert(id, Arc::new(entry));
        id
    }

    pub fn remove_uri(&mut self, uri: &str) -> Option<EntryId> {
        let id = self.indexes.path_to_entry.get(uri).copied()?;
        if let Some(entry) = self.entries.remove(&id) {
            self.indexes.remove_entry(id, &entry);
        }
        Some(id)
    }

    pub fn get(&self, id: EntryId) -> Option<Arc<IndexEntry>> {
        self.entries.get(&id).cloned()
    }

    pub fn get_by_uri(&self, uri: &str) -> Option<(EntryId, Arc<IndexEntry>)> {
        let id = self.indexes.path_to_entry.get(uri).copied()?;
        Some((id, self.entries.get(&id)?.clone()))
    }

    pub fn indexes(&self) -> &InvertedIndexes {
        &self.indexes
    }

    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.indexes.path_to_entry.keys().cloned().collect();
        uris.sort();
        uris
    }

    /// Candidate ids for one query token from the term and symbol
    /// indexes combined.
    pub fn candidates_for_token(&self, token: &str) -> HashSet<EntryId> {
        let mut ids = HashSet::new();
        if let Some(set) = self.indexes.term_to_entries.get(token) {
            ids.extend(set.iter().copied());
        }
        if let Some(set) = self.indexes.symbol_to_entries.get(token) {
            ids.extend(set.iter().copied());
        }
        ids
    }

    /// Document frequency of a term, for lazy IDF.
    pub fn document_frequency(&self, token: &str) -> usize {
        self.indexes
            .term_to_entries
            .get(token)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    pub fn total_documents(&self) -> usize {
        self.entries.len()
    }

    pub fn average_document_length(&self) -> f32 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let total: u64 = self
            .entries
            .values()
            .map(|entry| entry.token_total as u64)
            .sum();
        total as f32 / self.entries.len() as f32
    }

    /// Consistent view of entries for one query: the `Arc`s are cloned
    /// under the read lock and stay valid however the store mutates
    /// afterwards.
    pub fn resolve(&self, ids: &HashSet<EntryId>) -> Vec<(EntryId, Arc<IndexEntry>)> {
        let mut resolved: Vec<(EntryId, Arc<IndexEntry>)> = ids
            .iter()
            .filter_map(|id| self.entries.get(id).map(|entry| (*id, entry.clone())))
            .collect();
        resolved.sort_by(|a, b| a.1.uri.cmp(&b.1.uri));
        resolved
    }

    // ---- persistence ----

    pub fn save(&self, storage_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(storage_dir)?;
        let blob = IndexBlob {
            version: BLOB_VERSION,
            entries: {
                let mut entries: Vec<IndexEntry> =
                    self.entries.values().map(|entry| (**entry).clone()).collect();
                entries.sort_by(|a, b| a.uri.cmp(&b.uri));
                entries
            },
        };
        let data = serde_json::to_vec(&blob)?;
        let path = storage_dir.join(INDEX_FILENAME);
        let tmp = storage_dir.join(format!("{INDEX_FILENAME}.tmp"));
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load from per-workspace storage, falling back to the legacy
    /// in-workspace location (which is migrated and rewritten). Corrupt
    /// blobs reset to an empty store with a warning.
    pub fn load(storage_dir: &Path, workspace_root: &Path) -> Result<Self> {
        let path = storage_dir.join(INDEX_FILENAME);
        if let Some(store) = Self::try_read(&path)? {
            return Ok(store);
        }

        let legacy = workspace_root.join(LEGACY_IN_WORKSPACE);
        if let Some(store) = Self::try_read(&legacy)? {
            info!("migrating legacy index from {legacy:?}");
            store.save(storage_dir)?;
            if let Err(err) = std::fs::remove_file(&legacy) {
                warn!("could not remove legacy index {legacy:?}: {err}");
            }
            return Ok(store);
        }

        Ok(Self::new())
    }

    fn try_read(path: &Path) -> Result<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let blob: IndexBlob = match serde_json::from_slice(&bytes) {
            Ok(blob) => blob,
            Err(err) => {
                warn!("index blob at {path:?} is unreadable ({err}); rebuilding from scratch");
                return Ok(None);
            }
        };
        let mut store = Self::new();
        for mut entry in blob.entries {
            if entry.uri.is_empty() {
                warn!("dropping index entry with empty uri");
                continue;
            }
            entry.rehydrate();
            store.upsert(entry);
        }
        Ok(Some(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IndexChunk;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn entry(uri: &str, snippet: &str, symbols: &[&str]) -> IndexEntry {
        let mut entry = IndexEntry {
            uri: uri.to_string(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            snippet: snippet.to_string(),
            snippet_start_line: 1,
            snippet_end_line: 1,
            chunks: vec![IndexChunk {
                text: snippet.to_string(),
                start_line: 1,
                end_line: 1,
                tokens: HashSet::new(),
                embedding: None,
            }],
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
    fn upsert_replaces_and_reindexes() {
        let mut store = IndexStore::new();
        let first = store.upsert(entry("src/a.rs", "fn alpha() {}", &["alpha"]));
        let second = store.upsert(entry("src/a.rs", "fn beta() {}", &["beta"]));
        assert_ne!(first, second);
        assert_eq!(store.len(), 1);
        assert!(!store.indexes().references(first));
        assert!(store.candidates_for_token("beta").contains(&second));
        assert!(store.candidates_for_token("alpha").is_empty());
    }

    #[test]
    fn remove_uri_clears_every_reference() {
        let mut store = IndexStore::new();
        let id = store.upsert(entry("src/a.rs", "fn alpha() {}", &["alpha"]));
        assert_eq!(store.remove_uri("src/a.rs"), Some(id));
        assert!(store.is_empty());
        assert!(!store.indexes().references(id));
        assert_eq!(store.remove_uri("src/a.rs"), None);
    }

    #[test]
    fn save_and_load_round_trip_is_structurally_equal() {
        let temp = TempDir::new().expect("tempdir");
        let storage = temp.path().join("storage");
        let mut store = IndexStore::new();
        store.upsert(entry("src/a.rs", "fn alpha() {}", &["alpha"]));
        store.upsert(entry("src/b.rs", "fn beta() {}", &["beta"]));
        store.save(&storage).expect("save");

        let loaded = IndexStore::load(&storage, temp.path()).expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.uris(), store.uris());
        let (_, original) = store.get_by_uri("src/a.rs").expect("entry");
        let (_, reloaded) = loaded.get_by_uri("src/a.rs").expect("entry");
        assert_eq!(*original, *reloaded);
    }

    #[test]
    fn double_save_load_is_idempotent() {
        let temp = TempDir::new().expect("tempdir");
        let storage = temp.path().join("storage");
        let mut store = IndexStore::new();
        store.upsert(entry("src/a.rs", "fn alpha() {}", &["alpha"]));
        store.save(&storage).expect("save");
        let first = IndexStore::load(&storage, temp.path()).expect("load");
        first.save(&storage).expect("save again");
        let second = IndexStore::load(&storage, temp.path()).expect("load again");
        let (_, a) = first.get_by_uri("src/a.rs").expect("entry");
        let (_, b) = second.get_by_uri("src/a.rs").expect("entry");
        assert_eq!(*a, *b);
    }

    #[test]
    fn legacy_location_is_migrated() {
        let temp = TempDir::new().expect("tempdir");
        let storage = temp.path().join("storage");
        let mut store = IndexStore::new();
        store.upsert(entry("src/a.rs", "fn alpha() {}", &["alpha"]));
        let legacy_dir = temp.path().join(".quill");
        store.save(&legacy_dir).expect("save legacy");

        let loaded = IndexStore::load(&storage, temp.path()).expect("load");
        assert_eq!(loaded.len(), 1);
        assert!(storage.join(INDEX_FILENAME).exists());
        assert!(!legacy_dir.join(INDEX_FILENAME).exists());
    }

    #[test]
    fn corrupt_blob_resets_to_empty() {
        let temp = TempDir::new().expect("tempdir");
        let storage = temp.path().join("storage");
        std::fs::create_dir_all(&storage).expect("mkdir");
        std::fs::write(storage.join(INDEX_FILENAME), b"{broken").expect("write");
        let loaded = IndexStore::load(&storage, temp.path()).expect("load");
        assert!(loaded.is_empty());
    }

    #[test]
    fn loader_recomputes_missing_token_arrays() {
        let temp = TempDir::new().expect("tempdir");
        let storage = temp.path().join("storage");
        std::fs::create_dir_all(&storage).expect("mkdir");
        // A legacy-shaped entry with no token arrays at all.
        let blob = serde_json::json!({
            "version": BLOB_VERSION,
            "entries": [{
                "uri": "src/old.rs",
                "symbols": ["old_symbol"],
                "snippet": "fn old_symbol() {}",
                "snippet_start_line": 1,
                "snippet_end_line": 1,
                "chunks": [{ "text": "fn old_symbol() {}", "start_line": 1, "end_line": 1 }],
            }],
        });
        std::fs::write(
            storage.join(INDEX_FILENAME),
            serde_json::to_vec(&blob).expect("json"),
        )
        .expect("write");

        let loaded = IndexStore::load(&storage, temp.path()).expect("load");
        let (id, entry) = loaded.get_by_uri("src/old.rs").expect("entry");
        assert!(entry.term_freq.contains_key("old_symbol"));
        assert!(entry.snippet_tokens.contains("old_symbol"));
        assert!(loaded.candidates_for_token("old_symbol").contains(&id));
    }

    #[test]
    fn corpus_statistics_feed_bm25() {
        let mut store = IndexStore::new();
        store.upsert(entry("a.rs", "alpha beta gamma", &[]));
        store.upsert(entry("b.rs", "alpha", &[]));
        assert_eq!(store.total_documents(), 2);
        assert_eq!(store.document_frequency("alpha"), 2);
        assert_eq!(store.document_frequency("gamma"), 1);
        assert!(store.average_document_length() > 0.0);
    }
}
