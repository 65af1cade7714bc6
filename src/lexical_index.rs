use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    TantivyDocument,
    collector::TopDocs,
    doc,
    query::QueryParser,
    schema::*,
};

use crate::{
    chunking::Node,
    doc_id::NodeId,
    error::Result,
    text_util::{EN_STEM, en_stem_analyzer},
};

/// Field names used in the schema.
pub mod fields {
    pub const NODE_ID: &str = "node_id";
    pub const BODY: &str = "body";
}

const WRITER_MEMORY_BUDGET: usize = 50_000_000;

/// BM25 ranking over node texts, held in RAM.
///
/// Never persisted: it is rebuilt from the current node set on every setup,
/// so its term statistics always describe the loaded corpus.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    node_id: Field,
    body: Field,
}

fn build_schema() -> (Schema, Field, Field) {
    let mut builder = Schema::builder();

    let node_id = builder.add_u64_field(fields::NODE_ID, STORED);
    let body_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(EN_STEM)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let body = builder.add_text_field(fields::BODY, body_opts);

    (builder.build(), node_id, body)
}

impl LexicalIndex {
    pub fn build(nodes: &[Node]) -> Result<Self> {
        let (schema, node_id, body) = build_schema();
        let index = Index::create_in_ram(schema);
        index.tokenizers().register(EN_STEM, en_stem_analyzer());

        let mut writer: IndexWriter = index.writer(WRITER_MEMORY_BUDGET)?;
        for node in nodes {
            writer.add_document(doc!(
                node_id => node.id.0,
                body => node.text.as_str(),
            ))?;
        }
        writer.commit()?;

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        reader.reload()?;

        tracing::debug!(nodes = nodes.len(), "built lexical index");
        Ok(Self {
            index,
            reader,
            node_id,
            body,
        })
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Top `k` nodes by BM25 score. Query syntax errors are tolerated.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<(NodeId, f32)>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.body]);
        let (query, _errors) = parser.parse_query_lenient(query);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(k))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = doc.get_first(self.node_id).and_then(|v| v.as_u64()) {
                results.push((NodeId(id), score));
            }
        }
        Ok(results)
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunking::{ChunkingConfig, chunk_corpus},
        doc_id::DocumentId,
        loader::Document,
    };

    fn nodes() -> Vec<Node> {
        let docs: Vec<Document> = [
            ("launch.txt", "NASA launched three rockets from Florida."),
            ("market.txt", "Stock markets rallied after the rate cut."),
            ("battery.txt", "The product uses novel battery technology."),
        ]
        .iter()
        .map(|(name, text)| Document {
            id: DocumentId::new(name),
            name: name.to_string(),
            path: name.into(),
            text: text.to_string(),
        })
        .collect();
        chunk_corpus(&docs, ChunkingConfig::default())
    }

    #[test]
    fn build_indexes_every_node() {
        let index = LexicalIndex::build(&nodes()).unwrap();
        assert_eq!(index.num_docs(), 3);
    }

    #[test]
    fn search_matches_stemmed_terms() {
        let nodes = nodes();
        let index = LexicalIndex::build(&nodes).unwrap();

        let results = index.search("rocket launch", 3).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, nodes[0].id);
        assert!(results[0].1 > 0.0);
    }

    #[test]
    fn search_tolerates_question_syntax() {
        let nodes = nodes();
        let index = LexicalIndex::build(&nodes).unwrap();

        let results = index
            .search("What technology does the new product use?", 3)
            .unwrap();
        assert_eq!(results[0].0, nodes[2].id);
    }

    #[test]
    fn search_limits_and_misses() {
        let index = LexicalIndex::build(&nodes()).unwrap();
        assert!(index.search("volcano", 3).unwrap().is_empty());
        assert!(index.search("rocket", 0).unwrap().is_empty());
    }

    #[test]
    fn empty_node_set_builds() {
        let index = LexicalIndex::build(&[]).unwrap();
        assert_eq!(index.num_docs(), 0);
        assert!(index.search("anything", 3).unwrap().is_empty());
    }
}
