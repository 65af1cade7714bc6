use rayon::prelude::*;

use crate::{
    chunking::Node,
    doc_id::NodeId,
    embedding::Embedder,
    error::{Error, Result},
};

/// Number of node texts sent to the embedder per call.
const EMBED_BATCH_SIZE: usize = 32;

/// Dense vectors for every node, searched exhaustively by cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    entries: Vec<(NodeId, Vec<f32>)>,
}

impl VectorIndex {
    /// Embed every node in batches.
    pub fn build(nodes: &[Node], embedder: &dyn Embedder) -> Result<Self> {
        let mut entries = Vec::with_capacity(nodes.len());

        for batch in nodes.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|n| n.text.clone()).collect();
            let vectors = embedder.embed_documents(&texts)?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            entries.extend(batch.iter().map(|n| n.id).zip(vectors));
        }

        tracing::debug!(nodes = entries.len(), "built vector index");
        Self::from_entries(entries)
    }

    /// Assemble an index from stored vectors, checking they share one
    /// dimension.
    pub fn from_entries(entries: Vec<(NodeId, Vec<f32>)>) -> Result<Self> {
        let dimension = entries.first().map_or(0, |(_, v)| v.len());
        if let Some((id, v)) = entries.iter().find(|(_, v)| v.len() != dimension) {
            return Err(Error::Embedding(format!(
                "vector for node {id} has dimension {}, expected {dimension}",
                v.len()
            )));
        }
        Ok(Self { dimension, entries })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(NodeId, Vec<f32>)] {
        &self.entries
    }

    /// The `k` nodes most similar to `query`, best first.
    ///
    /// Ties keep index order, so results are deterministic.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(NodeId, f32)> {
        if k == 0 {
            return Vec::new();
        }

        // Score in parallel; collect preserves index order.
        let mut scored: Vec<(NodeId, f32)> = self
            .entries
            .par_iter()
            .map(|(id, vector)| (*id, cosine_similarity(query, vector)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunking::{ChunkingConfig, chunk_corpus},
        doc_id::DocumentId,
        embedding::HashingEmbedder,
        loader::Document,
    };

    fn nodes(texts: &[&str]) -> Vec<Node> {
        let docs: Vec<Document> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let name = format!("{i}.txt");
                Document {
                    id: DocumentId::new(&name),
                    path: name.clone().into(),
                    name,
                    text: t.to_string(),
                }
            })
            .collect();
        chunk_corpus(&docs, ChunkingConfig::default())
    }

    #[test]
    fn cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn search_tolerates_nan_scores() {
        let index = VectorIndex::from_entries(vec![
            (NodeId(1), vec![f32::NAN, 0.0]),
            (NodeId(2), vec![1.0, 0.0]),
            (NodeId(3), vec![0.5, 0.5]),
        ])
        .unwrap();

        let results = index.search(&[1.0, 0.0], 3);
        assert_eq!(results.len(), 3);
        let position =
            |id: u64| results.iter().position(|(n, _)| *n == NodeId(id)).unwrap();
        assert!(position(2) < position(3));
    }

    #[test]
    fn search_ranks_by_similarity() {
        let index = VectorIndex::from_entries(vec![
            (NodeId(1), vec![0.0, 1.0, 0.0]),
            (NodeId(2), vec![1.0, 0.0, 0.0]),
            (NodeId(3), vec![0.7, 0.7, 0.0]),
        ])
        .unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, NodeId(2));
        assert_eq!(results[1].0, NodeId(3));
        assert!(results[0].1 > results[1].1);
    }

    #[test]
    fn search_with_zero_k_is_empty() {
        let index =
            VectorIndex::from_entries(vec![(NodeId(1), vec![1.0])]).unwrap();
        assert!(index.search(&[1.0], 0).is_empty());
    }

    #[test]
    fn from_entries_rejects_mixed_dimensions() {
        let err = VectorIndex::from_entries(vec![
            (NodeId(1), vec![1.0, 0.0]),
            (NodeId(2), vec![1.0]),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[test]
    fn build_embeds_every_node() {
        let nodes = nodes(&[
            "Company X announced a new product today.",
            "Boil water in a large pot.",
        ]);
        let index = VectorIndex::build(&nodes, &HashingEmbedder::new(64)).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.dimension(), 64);

        let q = HashingEmbedder::new(64).embed_query("new product").unwrap();
        assert_eq!(index.search(&q, 1)[0].0, nodes[0].id);
    }
}
