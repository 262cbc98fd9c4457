use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument};

use crate::{EmbedModel, IqError, Result};

const PROVIDER: &str = "fastembed";

/// Resolves a configured model name, with or without its hub prefix
/// (`sentence-transformers/all-MiniLM-L6-v2`), to a bundled ONNX model.
pub fn local_model(name: &str) -> Result<EmbeddingModel> {
    let short = name.trim().rsplit('/').next().unwrap_or_default().to_ascii_lowercase();
    match short.as_str() {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l12-v2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "paraphrase-multilingual-minilm-l12-v2" => Ok(EmbeddingModel::ParaphraseMLMiniLML12V2),
        _ => Err(IqError::Configuration {
            key: "embedding.model".to_string(),
            reason: format!("no local weights are available for '{name}'"),
        }),
    }
}

/// In-process sentence embedder backed by fastembed's ONNX runtime.
///
/// Weights are fetched into `cache_dir` on first load. Inference is CPU bound,
/// so every call runs on the blocking pool.
pub struct FastEmbedModel {
    model: Arc<Mutex<TextEmbedding>>,
}

impl FastEmbedModel {
    /// Loads the weights, downloading them when the cache is cold.
    pub async fn load(name: &str, cache_dir: Option<PathBuf>) -> Result<Self> {
        let kind = local_model(name)?;
        let label = name.to_string();
        let model = tokio::task::spawn_blocking(move || {
            let mut options = InitOptions::new(kind).with_show_download_progress(false);
            if let Some(dir) = cache_dir {
                options = options.with_cache_dir(dir);
            }
            TextEmbedding::try_new(options)
        })
        .await
        .map_err(|e| load_error(&label, e.to_string()))?
        .map_err(|e| load_error(&label, e.to_string()))?;

        info!(model = %label, "local embedding model loaded");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

fn load_error(name: &str, cause: String) -> IqError {
    IqError::Configuration {
        key: "embedding.model".to_string(),
        reason: format!("could not load embedding weights for '{name}': {cause}"),
    }
}

fn embed_error(message: String) -> IqError {
    IqError::EmbeddingService {
        provider: PROVIDER.to_string(),
        message,
    }
}

#[async_trait]
impl EmbedModel for FastEmbedModel {
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| embed_error("embedding model lock poisoned".to_string()))?;
            model
                .embed(texts, None)
                .map_err(|e| embed_error(format!("failed to generate embeddings: {e}")))
        })
        .await
        .map_err(|e| embed_error(format!("embedding task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_prefixed_and_bare_names_resolve() {
        assert_eq!(
            local_model("sentence-transformers/all-MiniLM-L6-v2").unwrap(),
            EmbeddingModel::AllMiniLML6V2
        );
        assert_eq!(local_model("BAAI/bge-small-en-v1.5").unwrap(), EmbeddingModel::BGESmallENV15);
        assert_eq!(local_model(" all-minilm-l6-v2 ").unwrap(), EmbeddingModel::AllMiniLML6V2);
    }

    #[tokio::test]
    async fn unknown_model_is_a_configuration_error() {
        let err = FastEmbedModel::load("text-embedding-3-large", None).await.err().unwrap();
        match err {
            IqError::Configuration { key, .. } => assert_eq!(key, "embedding.model"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (na * nb)
    }

    #[tokio::test]
    #[ignore = "downloads model weights"]
    async fn paraphrases_score_above_unrelated_text() {
        let model = FastEmbedModel::load("all-MiniLM-L6-v2", None).await.unwrap();
        let texts = vec![
            "How much revenue did we make last quarter?".to_string(),
            "What were the sales figures for the previous three months?".to_string(),
            "The cat slept on the warm windowsill.".to_string(),
        ];
        let vectors = model.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0].len(), 384);
        assert!(cosine(&vectors[0], &vectors[1]) > cosine(&vectors[0], &vectors[2]));
    }
}
