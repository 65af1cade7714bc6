use std::{collections::HashMap, fmt, sync::Arc};

use serde::Serialize;

use crate::{
    chunking::Node,
    doc_id::NodeId,
    embedding::Embedder,
    error::{Error, Result},
    keyword_index::KeywordIndex,
    lexical_index::LexicalIndex,
    vector_index::VectorIndex,
};

/// A retrieval strategy. Declaration order is fusion priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Vector,
    Lexical,
    Keyword,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Lexical => "lexical",
            Self::Keyword => "keyword",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node surfaced by one strategy.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub node: Arc<Node>,
    /// Strategy-specific relevance; scales are not comparable across
    /// strategies. `None` when the strategy does not score.
    pub score: Option<f32>,
    pub strategy: Strategy,
    /// Distinct query keywords the node matched (keyword strategy only).
    pub matched_terms: Option<usize>,
}

impl RetrievalResult {
    pub fn node_id(&self) -> NodeId {
        self.node.id
    }
}

/// Any index that can answer `retrieve(query, k)`.
pub trait Retriever: Send + Sync {
    fn strategy(&self) -> Strategy;

    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>>;
}

/// Read-only lookup from node id to the shared node.
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: HashMap<NodeId, Arc<Node>>,
}

impl NodeStore {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id, Arc::new(n))).collect(),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Arc<Node>> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Attach nodes to ranked ids, dropping ids this store does not know.
    fn resolve(
        &self,
        strategy: Strategy,
        ranked: impl IntoIterator<Item = (NodeId, Option<f32>, Option<usize>)>,
    ) -> Vec<RetrievalResult> {
        ranked
            .into_iter()
            .filter_map(|(id, score, matched_terms)| {
                let node = self.get(id)?.clone();
                Some(RetrievalResult {
                    node,
                    score,
                    strategy,
                    matched_terms,
                })
            })
            .collect()
    }
}

pub struct VectorRetriever {
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    nodes: Arc<NodeStore>,
}

impl VectorRetriever {
    pub fn new(
        index: VectorIndex,
        embedder: Arc<dyn Embedder>,
        nodes: Arc<NodeStore>,
    ) -> Self {
        Self {
            index,
            embedder,
            nodes,
        }
    }
}

impl Retriever for VectorRetriever {
    fn strategy(&self) -> Strategy {
        Strategy::Vector
    }

    /// Fails with [`Error::Embedding`] when the query cannot be embedded;
    /// the hybrid retriever reports that as a degraded strategy.
    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        let query_vector = self.embedder.embed_query(query).map_err(|e| {
            Error::Embedding(format!("query embedding failed: {e}"))
        })?;

        let ranked = self.index.search(&query_vector, k);
        Ok(self.nodes.resolve(
            Strategy::Vector,
            ranked.into_iter().map(|(id, score)| (id, Some(score), None)),
        ))
    }
}

pub struct KeywordRetriever {
    index: KeywordIndex,
    keywords_per_query: usize,
    nodes: Arc<NodeStore>,
}

impl KeywordRetriever {
    pub fn new(
        index: KeywordIndex,
        keywords_per_query: usize,
        nodes: Arc<NodeStore>,
    ) -> Self {
        Self {
            index,
            keywords_per_query,
            nodes,
        }
    }
}

impl Retriever for KeywordRetriever {
    fn strategy(&self) -> Strategy {
        Strategy::Keyword
    }

    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        let ranked = self.index.search(query, self.keywords_per_query, k);
        Ok(self.nodes.resolve(
            Strategy::Keyword,
            ranked
                .into_iter()
                .map(|(id, matched)| (id, None, Some(matched))),
        ))
    }
}

pub struct LexicalRetriever {
    index: LexicalIndex,
    nodes: Arc<NodeStore>,
}

impl LexicalRetriever {
    pub fn new(index: LexicalIndex, nodes: Arc<NodeStore>) -> Self {
        Self { index, nodes }
    }
}

impl Retriever for LexicalRetriever {
    fn strategy(&self) -> Strategy {
        Strategy::Lexical
    }

    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        let ranked = self.index.search(query, k)?;
        Ok(self.nodes.resolve(
            Strategy::Lexical,
            ranked.into_iter().map(|(id, score)| (id, Some(score), None)),
        ))
    }
}
