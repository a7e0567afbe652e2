use log::debug;
use log::warn;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("vector dimension mismatch: store holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One embedded chunk. `start_line`/`end_line` are 1-indexed inclusive
/// and travel with the hit so results can cite an exact range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub score: f32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedVectors {
    version: u32,
    dimension: usize,
    records: Vec<VectorRecord>,
}

/// JSON-persisted vector store. All records share one dimension, fixed
/// by the first insert after creation or load.
pub struct VectorStore {
    db_path: PathBuf,
    inner: RwLock<PersistedVectors>,
}

const STORE_VERSION: u32 = 1;

impl VectorStore {
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self, VectorStoreError> {
        let db_path = db_path.into();
        let inner = match tokio::fs::read(&db_path).await {
            Ok(bytes) => match serde_json::from_slice::<PersistedVectors>(&bytes) {
                Ok(loaded) if loaded.version == STORE_VERSION => loaded,
                Ok(loaded) => {
                    warn!(
                        "vector store version {} unsupported; starting fresh",
                        loaded.version
                    );
                    PersistedVectors::default()
                }
                Err(err) => {
                    warn!("vector store at {db_path:?} is unreadable ({err}); starting fresh");
                    PersistedVectors::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => PersistedVectors::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            db_path,
            inner: RwLock::new(inner),
        })
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Replace all records for the paths covered by `records`, then
    /// append the new ones. The per-path granularity matches the
    /// maintenance loop, which refreshes whole files at a time.
    pub async fn upsert_path(
        &self,
        path: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), VectorStoreError> {
        {
            let mut inner = self.inner.write().await;
            if inner.records.is_empty() && inner.dimension == 0 {
                inner.dimension = records.first().map(|r| r.vector.len()).unwrap_or(0);
            }
            for record in &records {
                if inner.dimension != 0 && record.vector.len() != inner.dimension {
                    return Err(VectorStoreError::DimensionMismatch {
                        expected: inner.dimension,
                        actual: record.vector.len(),
                    });
                }
            }
            inner.records.retain(|record| record.path != path);
            inner.records.extend(records);
            inner.version = STORE_VERSION;
        }
        self.persist().await
    }

    pub async fn remove_path(&self, path: &str) -> Result<(), VectorStoreError> {
        {
            let mut inner = self.inner.write().await;
            let before = inner.records.len();
            inner.records.retain(|record| record.path != path);
            if inner.records.len() == before {
                return Ok(());
            }
        }
        self.persist().await
    }

    /// Cosine top-k against a query vector.
    pub async fn search(&self, query: &[f32], k: usize) -> Vec<VectorHit> {
        let inner = self.inner.read().await;
        let mut scored: Vec<VectorHit> = inner
            .records
            .iter()
            .map(|record| VectorHit {
                path: record.path.clone(),
                start_line: record.start_line,
                end_line: record.end_line,
                score: cosine_similarity(query, &record.vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        scored.truncate(k);
        debug!("vector search returned {} hits", scored.len());
        scored
    }

    async fn persist(&self) -> Result<(), VectorStoreError> {
        let bytes = {
            let inner = self.inner.read().await;
            serde_json::to_vec(&*inner)?
        };
        if let Some(parent) = self.db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.db_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.db_path).await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(path: &str, line: u32, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            path: path.to_string(),
            start_line: line,
            end_line: line + 5,
            vector,
        }
    }

    #[tokio::test]
    async fn upsert_and_search_rank_by_cosine() {
        let temp = TempDir::new().expect("tempdir");
        let store = VectorStore::open(temp.path().join("vectors.json"))
            .await
            .expect("open");
        store
            .upsert_path("a.rs", vec![record("a.rs", 1, vec![1.0, 0.0, 0.0])])
            .await
            .expect("upsert");
        store
            .upsert_path("b.rs", vec![record("b.rs", 1, vec![0.0, 1.0, 0.0])])
            .await
            .expect("upsert");

        let hits = store.search(&[1.0, 0.1, 0.0], 2).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "a.rs");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn upsert_replaces_previous_records_for_the_path() {
        let temp = TempDir::new().expect("tempdir");
        let store = VectorStore::open(temp.path().join("vectors.json"))
            .await
            .expect("open");
        store
            .upsert_path("a.rs", vec![record("a.rs", 1, vec![1.0, 0.0])])
            .await
            .expect("upsert");
        store
            .upsert_path("a.rs", vec![record("a.rs", 10, vec![0.0, 1.0])])
            .await
            .expect("upsert");
        assert_eq!(store.len().await, 1);
        let hits = store.search(&[0.0, 1.0], 1).await;
        assert_eq!(hits[0].start_line, 10);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let temp = TempDir::new().expect("tempdir");
        let store = VectorStore::open(temp.path().join("vectors.json"))
            .await
            .expect("open");
        store
            .upsert_path("a.rs", vec![record("a.rs", 1, vec![1.0, 0.0])])
            .await
            .expect("upsert");
        let err = store
            .upsert_path("b.rs", vec![record("b.rs", 1, vec![1.0, 0.0, 0.0])])
            .await
            .expect_err("mismatch");
        assert!(matches!(err, VectorStoreError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn store_round_trips_through_disk() {
        let temp = TempDir::new().expect("tempdir");
        let db = temp.path().join("vectors.json");
        {
            let store = VectorStore::open(&db).await.expect("open");
            store
                .upsert_path("a.rs", vec![record("a.rs", 1, vec![0.5, 0.5])])
                .await
                .expect("upsert");
        }
        let reopened = VectorStore::open(&db).await.expect("reopen");
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn corrupt_store_starts_fresh() {
        let temp = TempDir::new().expect("tempdir");
        let db = temp.path().join("vectors.json");
        tokio::fs::write(&db, b"{not json").await.expect("write");
        let store = VectorStore::open(&db).await.expect("open");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn remove_path_drops_records() {
        let temp = TempDir::new().expect("tempdir");
        let store = VectorStore::open(temp.path().join("vectors.json"))
            .await
            .expect("open");
        store
            .upsert_path("a.rs", vec![record("a.rs", 1, vec![1.0])])
            .await
            .expect("upsert");
        store.remove_path("a.rs").await.expect("remove");
        assert!(store.is_empty().await);
    }
}
