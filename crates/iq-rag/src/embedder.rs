use iq_error::{IqError, Result};
use iq_llm::{build_embed_model, EmbedModel, EmbedSettings};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, instrument};

enum ModelSource {
    Settings(EmbedSettings),
    Ready(Arc<dyn EmbedModel>),
}

struct LoadedModel {
    model: Arc<dyn EmbedModel>,
    dimension: usize,
}

/// Produces L2-normalized vectors from a lazily loaded embedding model.
///
/// The model is built and probed once, on the first call; concurrent first
/// callers wait on the same initialization. A failed load leaves the cell
/// empty so a later call can retry.
pub struct Embedder {
    source: ModelSource,
    loaded: OnceCell<LoadedModel>,
}

impl Embedder {
    pub fn new(settings: EmbedSettings) -> Self {
        Self {
            source: ModelSource::Settings(settings),
            loaded: OnceCell::new(),
        }
    }

    /// Wraps an already constructed model; the dimension is still probed lazily.
    pub fn from_model(model: Arc<dyn EmbedModel>) -> Self {
        Self {
            source: ModelSource::Ready(model),
            loaded: OnceCell::new(),
        }
    }

    async fn loaded(&self) -> Result<&LoadedModel> {
        self.loaded.get_or_try_init(|| self.load()).await
    }

    async fn load(&self) -> Result<LoadedModel> {
        let model = match &self.source {
            ModelSource::Settings(settings) => {
                info!(kind = ?settings.kind, model = %settings.model, "loading embedding model");
                build_embed_model(settings).await?
            }
            ModelSource::Ready(model) => model.clone(),
        };
        let probe = model
            .embed(&["dimension probe".to_string()])
            .await
            .map_err(|e| IqError::Configuration {
                key: "embedding".to_string(),
                reason: format!("embedding model could not be loaded: {e}"),
            })?;
        let dimension = probe.first().map(Vec::len).unwrap_or(0);
        if dimension == 0 {
            return Err(IqError::Configuration {
                key: "embedding".to_string(),
                reason: "embedding model returned an empty vector".to_string(),
            });
        }
        info!(dimension, "embedding model loaded");
        Ok(LoadedModel { model, dimension })
    }

    /// Dimension reported by the loaded model; loads it if needed but never re-embeds.
    pub async fn embedding_dimension(&self) -> Result<usize> {
        Ok(self.loaded().await?.dimension)
    }

    #[instrument(skip(self, texts), fields(count = texts.len()))]
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(IqError::InvalidRequest {
                reason: "embed received an empty list".to_string(),
            });
        }
        let loaded = self.loaded().await?;
        let mut vectors = loaded.model.embed(texts).await?;
        if vectors.len() != texts.len() {
            return Err(IqError::EmbeddingService {
                provider: "embedder".to_string(),
                message: format!("expected {} vectors, got {}", texts.len(), vectors.len()),
            });
        }
        for v in vectors.iter_mut() {
            if v.len() != loaded.dimension {
                return Err(IqError::EmbeddingService {
                    provider: "embedder".to_string(),
                    message: format!("expected dimension {}, got {}", loaded.dimension, v.len()),
                });
            }
            l2_normalize(v);
        }
        Ok(vectors)
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| IqError::EmbeddingService {
            provider: "embedder".to_string(),
            message: "no vector returned".to_string(),
        })
    }
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbedModel for CountingModel {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![3.0, 4.0]).collect())
        }
    }

    struct BrokenModel;

    #[async_trait]
    impl EmbedModel for BrokenModel {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(IqError::Network {
                operation: "connect".into(),
                message: "refused".into(),
            })
        }
    }

    #[tokio::test]
    async fn vectors_are_normalized() {
        let embedder = Embedder::from_model(Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        }));
        let v = embedder.embed_one("anything").await.unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn dimension_is_cached_after_first_load() {
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let embedder = Embedder::from_model(model.clone());
        assert_eq!(embedder.embedding_dimension().await.unwrap(), 2);
        assert_eq!(embedder.embedding_dimension().await.unwrap(), 2);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_load_once() {
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let embedder = Arc::new(Embedder::from_model(model.clone()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let e = embedder.clone();
            handles.push(tokio::spawn(async move { e.embedding_dimension().await }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 2);
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unloadable_model_is_a_configuration_error() {
        let embedder = Embedder::from_model(Arc::new(BrokenModel));
        let err = embedder.embed_one("x").await.unwrap_err();
        assert!(matches!(err, IqError::Configuration { .. }));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let embedder = Embedder::new(EmbedSettings::default());
        assert!(embedder.embed(&[]).await.is_err());
    }
}
