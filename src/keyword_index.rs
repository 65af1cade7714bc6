use std::collections::{BTreeMap, HashMap};

use crate::{chunking::Node, doc_id::NodeId, text_util::analyze};

/// Inverted table from keyword to the nodes it was extracted from.
///
/// Each node contributes its most frequent analyzed terms. Lookup ranks
/// nodes by how many distinct query keywords they share.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordIndex {
    table: BTreeMap<String, Vec<NodeId>>,
}

impl KeywordIndex {
    pub fn build(nodes: &[Node], keywords_per_node: usize) -> Self {
        let mut table: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for node in nodes {
            for keyword in extract_keywords(&node.text, keywords_per_node) {
                table.entry(keyword).or_default().push(node.id);
            }
        }

        tracing::debug!(
            nodes = nodes.len(),
            keywords = table.len(),
            "built keyword index"
        );
        Self { table }
    }

    /// Rebuild from persisted `(keyword, node ids)` rows.
    pub fn from_table(rows: impl IntoIterator<Item = (String, Vec<NodeId>)>) -> Self {
        Self {
            table: rows.into_iter().collect(),
        }
    }

    pub fn table(&self) -> &BTreeMap<String, Vec<NodeId>> {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Nodes sharing at least one keyword with `query`, with the number of
    /// distinct keywords matched.
    ///
    /// Ordered by match count descending, then node id, truncated to `k`.
    pub fn search(
        &self,
        query: &str,
        keywords_per_query: usize,
        k: usize,
    ) -> Vec<(NodeId, usize)> {
        let mut counts: HashMap<NodeId, usize> = HashMap::new();
        for keyword in extract_keywords(query, keywords_per_query) {
            if let Some(ids) = self.table.get(&keyword) {
                for id in ids {
                    *counts.entry(*id).or_default() += 1;
                }
            }
        }

        let mut ranked: Vec<(NodeId, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }
}

/// Up to `max` distinct analyzed terms from `text`, most frequent first,
/// ties broken alphabetically.
///
/// # Examples
///
/// ```
/// use curatex::keyword_index::extract_keywords;
///
/// let keywords = extract_keywords("Battery makers. Batteries charge fast.", 2);
/// assert_eq!(keywords, vec!["batteri", "charg"]);
/// ```
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    let mut freq: HashMap<String, usize> = HashMap::new();
    for term in analyze(text) {
        *freq.entry(term).or_default() += 1;
    }

    let mut terms: Vec<(String, usize)> = freq.into_iter().collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    terms.into_iter().take(max).map(|(term, _)| term).collect()
}
