//! Multi-strategy retrieval with max-score fusion.
//!
//! Every strategy is queried with the same text and the same per-strategy
//! `k`. Strategies run in parallel; fusion starts only once all of them have
//! returned or failed. A failing strategy contributes nothing and is
//! reported in [`Retrieval::degraded`].

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use rayon::prelude::*;

use crate::{
    doc_id::NodeId,
    retriever::{RetrievalResult, Retriever, Strategy},
};

/// Fused output of one hybrid query.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    /// One result per node, in first-seen order.
    pub results: Vec<RetrievalResult>,
    /// Strategies that failed for this query.
    pub degraded: Vec<Strategy>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Node texts in result order, as context for answer synthesis.
    pub fn context(&self) -> Vec<String> {
        self.results.iter().map(|r| r.node.text.clone()).collect()
    }
}

pub struct HybridRetriever {
    retrievers: Vec<Arc<dyn Retriever>>,
    top_k: usize,
}

impl HybridRetriever {
    /// Retrievers are kept in strategy priority order regardless of the
    /// order given.
    pub fn new(mut retrievers: Vec<Arc<dyn Retriever>>, top_k: usize) -> Self {
        retrievers.sort_by_key(|r| r.strategy());
        Self { retrievers, top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn strategies(&self) -> Vec<Strategy> {
        self.retrievers.iter().map(|r| r.strategy()).collect()
    }

    pub fn retrieve(&self, query: &str) -> Retrieval {
        // `collect` is the barrier: it returns once every strategy is done.
        let outcomes: Vec<(Strategy, Option<Vec<RetrievalResult>>)> = self
            .retrievers
            .par_iter()
            .map(|retriever| {
                let strategy = retriever.strategy();
                (strategy, run_guarded(retriever.as_ref(), query, self.top_k))
            })
            .collect();

        let mut degraded = Vec::new();
        let mut all = Vec::new();
        for (strategy, results) in outcomes {
            match results {
                Some(results) => {
                    tracing::debug!(
                        strategy = %strategy,
                        results = results.len(),
                        "strategy returned"
                    );
                    all.extend(results);
                }
                None => degraded.push(strategy),
            }
        }

        let results = fuse(all);
        tracing::debug!(
            results = results.len(),
            degraded = degraded.len(),
            "fused retrieval"
        );
        Retrieval { results, degraded }
    }
}

/// Run one strategy, turning errors and panics into `None`.
fn run_guarded(
    retriever: &dyn Retriever,
    query: &str,
    k: usize,
) -> Option<Vec<RetrievalResult>> {
    let strategy = retriever.strategy();
    match catch_unwind(AssertUnwindSafe(|| retriever.retrieve(query, k))) {
        Ok(Ok(results)) => Some(results),
        Ok(Err(e)) => {
            tracing::warn!(
                strategy = %strategy,
                error = %e,
                "retriever failed, continuing without it"
            );
            None
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::warn!(
                strategy = %strategy,
                error = %message,
                "retriever panicked, continuing without it"
            );
            None
        }
    }
}

/// Deduplicate results by node, keeping the highest score.
///
/// A later result replaces a stored one only when it has a score and the
/// stored one has none or a strictly lower one. Equal scores keep the
/// earlier result, so input order is the tie-break.
pub fn fuse(
    results: impl IntoIterator<Item = RetrievalResult>,
) -> Vec<RetrievalResult> {
    let mut position: HashMap<NodeId, usize> = HashMap::new();
    let mut fused: Vec<RetrievalResult> = Vec::new();

    for result in results {
        match position.get(&result.node_id()) {
            None => {
                position.insert(result.node_id(), fused.len());
                fused.push(result);
            }
            Some(&i) => {
                if replaces(&fused[i], &result) {
                    fused[i] = result;
                }
            }
        }
    }

    fused
}

fn replaces(stored: &RetrievalResult, candidate: &RetrievalResult) -> bool {
    match (stored.score, candidate.score) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(old), Some(new)) => new > old,
    }
}
