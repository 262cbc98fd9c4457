use async_trait::async_trait;
use std::hash::Hasher;
use twox_hash::XxHash64;

use crate::{EmbedModel, IqError, Result};

/// Offline embedder: hashes lower-cased word tokens into a fixed number of buckets.
///
/// Deterministic and dependency-free at runtime, so the service works without
/// any model download; retrieval quality is lexical, not semantic.
pub struct HashEmbedModel {
    dim: usize,
}

impl HashEmbedModel {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(IqError::Configuration {
                key: "embedding.dimension".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(Self { dim })
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let lower = text.to_lowercase();
        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(token.as_bytes());
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            // sign bit spreads collisions instead of always stacking them
            let sign = if (h >> 63) == 1 { -1.0 } else { 1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbedModel for HashEmbedModel {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn identical_text_is_maximally_similar() {
        let m = HashEmbedModel::new(64).unwrap();
        let a = m.embed_text("Revenue grew 20% in Q1.");
        let b = m.embed_text("revenue grew 20% in q1");
        assert_eq!(a.len(), 64);
        assert!((dot(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_words_score_higher_than_unrelated_text() {
        let m = HashEmbedModel::new(384).unwrap();
        let doc = m.embed_text("Revenue grew 20% in Q1.");
        let related = m.embed_text("What happened to revenue in Q1?");
        let unrelated = m.embed_text("penguins enjoy cold weather");
        assert!(dot(&doc, &related) > dot(&doc, &unrelated));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(HashEmbedModel::new(0).is_err());
    }
}
