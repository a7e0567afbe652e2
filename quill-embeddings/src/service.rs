use crate::DEFAULT_EMBEDDING_DIM;
use crate::error::EmbeddingError;
use fastembed::EmbeddingModel;
use fastembed::InitOptions;
use fastembed::TextEmbedding;
use log::debug;
use log::info;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingModelKind {
    /// Small and fast; the default for interactive indexing.
    #[default]
    AllMiniLmL6V2,
    /// Higher quality for code, slower to load.
    NomicEmbedTextV15,
}

impl EmbeddingModelKind {
    fn to_fastembed(self) -> EmbeddingModel {
        match self {
            EmbeddingModelKind::AllMiniLmL6V2 => EmbeddingModel::AllMiniLML6V2,
            EmbeddingModelKind::NomicEmbedTextV15 => EmbeddingModel::NomicEmbedTextV15,
        }
    }

    fn native_dimension(self) -> usize {
        match self {
            EmbeddingModelKind::AllMiniLmL6V2 => 384,
            EmbeddingModelKind::NomicEmbedTextV15 => 768,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub enabled: bool,
    pub model: EmbeddingModelKind,

    /// Target dimension; vectors from models with a larger native
    /// dimension are truncated (Matryoshka-style).
    pub dimension: usize,

    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: EmbeddingModelKind::default(),
            dimension: DEFAULT_EMBEDDING_DIM,
            batch_size: 32,
        }
    }
}

/// Embedding generator shared by the index builder and the query
/// engine. The underlying ONNX session is not `Sync`, so generation is
/// serialized through a mutex and dispatched on the blocking pool; the
/// cancellation token is checked between batches.
pub struct EmbeddingService {
    model: Arc<Mutex<TextEmbedding>>,
    config: EmbeddingConfig,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        if !config.enabled {
            return Err(EmbeddingError::Disabled);
        }
        info!(
            "initializing embedding model {:?} (dimension {})",
            config.model, config.dimension
        );
        let options = InitOptions::new(config.model.to_fastembed()).with_show_download_progress(false);
        let model = TextEmbedding::try_new(options)
            .map_err(|err| EmbeddingError::ModelInit(err.to_string()))?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            config,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension.min(self.config.model.native_dimension())
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    /// Embed a batch of already-sanitized texts. Returns one vector per
    /// input, truncated to the configured dimension.
    pub async fn embed(
        &self,
        texts: Vec<String>,
        token: CancellationToken,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("embedding {} texts", texts.len());

        let model = self.model.clone();
        let dimension = self.dimension();
        let batch_size = self.config.batch_size.max(1);
        let handle = tokio::task::spawn_blocking(move || {
            let mut out = Vec::with_capacity(texts.len());
            let mut guard = match model.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for batch in texts.chunks(batch_size) {
                if token.is_cancelled() {
                    return Err(EmbeddingError::Cancelled);
                }
                let vectors = guard.embed(batch.to_vec(), None)?;
                for mut vector in vectors {
                    vector.truncate(dimension);
                    out.push(vector);
                }
            }
            Ok(out)
        });
        handle
            .await
            .map_err(|err| EmbeddingError::Generation(err.to_string()))?
    }

    pub async fn embed_single(
        &self,
        text: &str,
        token: CancellationToken,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(vec![text.to_string()], token).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Generation("no vector produced".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn disabled_config_refuses_construction() {
        let config = EmbeddingConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(matches!(
            EmbeddingService::new(config),
            Err(EmbeddingError::Disabled)
        ));
    }

    #[test]
    fn dimension_is_capped_by_the_model() {
        let config = EmbeddingConfig {
            dimension: 4096,
            ..Default::default()
        };
        assert_eq!(
            config.dimension.min(config.model.native_dimension()),
            384
        );
    }

    // Exercising the model requires a downloaded ONNX artifact.
    #[tokio::test]
    #[ignore]
    async fn embeds_batches_with_constant_dimension() {
        let service = EmbeddingService::new(EmbeddingConfig::default()).expect("service");
        let texts: Vec<String> = (0..40).map(|i| format!("fn sample_{i}() {{}}")).collect();
        let vectors = service
            .embed(texts.clone(), CancellationToken::new())
            .await
            .expect("embed");
        assert_eq!(vectors.len(), texts.len());
        for vector in &vectors {
            assert_eq!(vector.len(), service.dimension());
        }
    }
}
