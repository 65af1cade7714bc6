//! Text embedding backends for the vector index.
//!
//! The same [`Embedder`] must be used to build an index and to query it;
//! [`Embedder::id`] is persisted alongside the vectors so a mismatch forces
//! a rebuild instead of silently degrading retrieval.

use std::sync::{Arc, Mutex};

use crate::{
    config::{EmbedderKind, RagConfig},
    doc_id::stable_hash,
    error::{Error, Result},
    model_manager::{ModelManager, map_candle_err},
    text_util::analyze,
};

/// Produces fixed-length vectors for text.
pub trait Embedder: Send + Sync {
    /// Identity of the embedding function, including anything that changes
    /// the vector space (model, dimension).
    fn id(&self) -> String;

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// Build the embedder selected by the configuration.
pub fn from_config(config: &RagConfig) -> Arc<dyn Embedder> {
    match config.embedder {
        EmbedderKind::Colbert => {
            let manager = match &config.model_id {
                Some(id) => ModelManager::with_model_id(id.clone()),
                None => ModelManager::new(),
            };
            Arc::new(ColbertEmbedder::new(manager))
        }
        EmbedderKind::Hashing => {
            Arc::new(HashingEmbedder::new(config.hashing_dimension))
        }
    }
}

/// Single-vector embeddings from a ColBERT model.
///
/// Token embeddings are mean-pooled and L2-normalized, so dot product equals
/// cosine similarity.
pub struct ColbertEmbedder {
    model: Mutex<ModelManager>,
}

impl ColbertEmbedder {
    pub fn new(model: ModelManager) -> Self {
        Self {
            model: Mutex::new(model),
        }
    }
}

impl Embedder for ColbertEmbedder {
    fn id(&self) -> String {
        let model = self.model.lock().unwrap_or_else(|e| e.into_inner());
        format!("colbert:{}", model.model_id())
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = self.model.lock().map_err(|_| {
            Error::Embedding("model lock poisoned".to_string())
        })?;

        // [B, T, D] -> [B, D]
        let pooled = model
            .encode_documents(texts)?
            .mean(1)
            .map_err(map_candle_err)?;
        let rows = pooled.to_vec2::<f32>().map_err(map_candle_err)?;
        Ok(rows.into_iter().map(normalize).collect())
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut model = self.model.lock().map_err(|_| {
            Error::Embedding("model lock poisoned".to_string())
        })?;

        // [Q, D] -> [D]
        let pooled = model
            .encode_query(text)?
            .mean(0)
            .map_err(map_candle_err)?;
        Ok(normalize(pooled.to_vec1::<f32>().map_err(map_candle_err)?))
    }
}

/// Feature-hashing embedder: each analyzed term lands in one signed bucket.
///
/// Needs no model download, is deterministic, and captures term overlap
/// rather than meaning. Used offline and in tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for term in analyze(text) {
            let hash = stable_hash(term.as_str());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(vector)
    }
}

impl Embedder for HashingEmbedder {
    fn id(&self) -> String {
        format!("hashing:{}", self.dimension)
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::cosine_similarity;

    #[test]
    fn hashing_is_deterministic_and_normalized() {
        let e = HashingEmbedder::new(64);
        let a = e.embed_query("battery technology").unwrap();
        let b = e.embed_query("battery technology").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashing_prefers_shared_terms() {
        let e = HashingEmbedder::new(256);
        let docs = e
            .embed_documents(&[
                "The product uses novel battery technology.".to_string(),
                "Boil water and cook the pasta.".to_string(),
            ])
            .unwrap();
        let q = e.embed_query("what battery technology").unwrap();
        assert!(cosine_similarity(&q, &docs[0]) > cosine_similarity(&q, &docs[1]));
    }

    #[test]
    fn stopword_only_text_is_zero_vector() {
        let e = HashingEmbedder::new(16);
        let v = e.embed_query("the and of").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn embedder_ids_describe_vector_space() {
        assert_eq!(HashingEmbedder::new(128).id(), "hashing:128");
        let colbert =
            ColbertEmbedder::new(ModelManager::with_model_id("custom/m".into()));
        assert_eq!(colbert.id(), "colbert:custom/m");
    }

    #[test]
    fn from_config_selects_hashing() {
        let config = RagConfig {
            embedder: EmbedderKind::Hashing,
            hashing_dimension: 32,
            ..RagConfig::default()
        };
        assert_eq!(from_config(&config).id(), "hashing:32");
    }
}
