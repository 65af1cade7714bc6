//! Splitting documents into overlapping fixed-size nodes.
//!
//! Windows are measured in characters, not bytes, so multi-byte text never
//! splits inside a code point. Adjacent nodes share exactly `overlap`
//! characters and the last node always ends at the end of the document.

use serde::{Deserialize, Serialize};

use crate::{
    doc_id::{DocumentId, NodeId},
    error::{Error, Result},
    loader::Document,
};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Validated chunking parameters.
///
/// # Examples
///
/// ```
/// use curatex::chunking::ChunkingConfig;
///
/// assert!(ChunkingConfig::new(1000, 200).is_ok());
/// assert!(ChunkingConfig::new(200, 200).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingConfig {
    /// Overlap must be strictly smaller than the chunk size, otherwise the
    /// window would never advance.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk size must be positive".into()));
        }
        if overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A chunk of a source document: the atomic retrieval unit.
///
/// Holds only a back-reference to its document. Offsets are character
/// positions in the original text, `start_char..end_char`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub document: DocumentId,
    /// File name of the source document.
    pub source: String,
    /// Zero-based chunk index within the document.
    pub index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub text: String,
}

/// Lazy, single-pass node producer for one document.
///
/// Produced by [`chunk_document`]. Each setup pass re-chunks from scratch.
pub struct Chunker<'a> {
    document: &'a Document,
    config: ChunkingConfig,
    char_to_byte: Vec<usize>,
    next_start: Option<usize>,
    index: usize,
}

/// Split a document into overlapping nodes.
///
/// A document shorter than the chunk size yields exactly one node equal to
/// the whole text; an empty document yields none.
///
/// # Examples
///
/// ```
/// use curatex::chunking::{chunk_document, ChunkingConfig};
/// use curatex::doc_id::DocumentId;
/// use curatex::loader::Document;
///
/// let doc = Document {
///     id: DocumentId::new("short.txt"),
///     name: "short.txt".into(),
///     path: "short.txt".into(),
///     text: "Hello, world!".into(),
/// };
/// let config = ChunkingConfig::new(1000, 200).unwrap();
/// let nodes: Vec<_> = chunk_document(&doc, config).collect();
/// assert_eq!(nodes.len(), 1);
/// assert_eq!(nodes[0].text, "Hello, world!");
/// ```
pub fn chunk_document(document: &Document, config: ChunkingConfig) -> Chunker<'_> {
    // Map char index -> byte index, with a trailing entry for the end.
    let char_to_byte: Vec<usize> = document
        .text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(document.text.len()))
        .collect();
    let next_start = (!document.text.is_empty()).then_some(0);

    Chunker {
        document,
        config,
        char_to_byte,
        next_start,
        index: 0,
    }
}

impl Iterator for Chunker<'_> {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        let start = self.next_start?;
        let char_count = self.char_to_byte.len() - 1;
        let end = (start + self.config.chunk_size).min(char_count);

        self.next_start = if end < char_count {
            Some(start + self.config.step())
        } else {
            None
        };

        let text = &self.document.text
            [self.char_to_byte[start]..self.char_to_byte[end]];
        let node = Node {
            id: NodeId::for_chunk(&self.document.id, self.index),
            document: self.document.id.clone(),
            source: self.document.name.clone(),
            index: self.index,
            start_char: start,
            end_char: end,
            text: text.to_string(),
        };
        self.index += 1;
        Some(node)
    }
}

/// Chunk every document, in corpus order.
pub fn chunk_corpus(documents: &[Document], config: ChunkingConfig) -> Vec<Node> {
    documents
        .iter()
        .flat_map(|doc| chunk_document(doc, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn doc(text: &str) -> Document {
        Document {
            id: DocumentId::new("doc.txt"),
            name: "doc.txt".to_string(),
            path: "doc.txt".into(),
            text: text.to_string(),
        }
    }

    fn cfg(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig::new(size, overlap).unwrap()
    }

    #[test]
    fn short_text_single_chunk() {
        let d = doc("Hello, world!");
        let nodes: Vec<_> = chunk_document(&d, ChunkingConfig::default()).collect();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].text, "Hello, world!");
        assert_eq!(nodes[0].index, 0);
        assert_eq!(nodes[0].start_char, 0);
        assert_eq!(nodes[0].end_char, 13);
    }

    #[test]
    fn text_exactly_chunk_size_is_one_chunk() {
        let d = doc(&"a".repeat(1000));
        let nodes: Vec<_> = chunk_document(&d, cfg(1000, 200)).collect();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn empty_text_yields_nothing() {
        let d = doc("");
        assert_eq!(chunk_document(&d, ChunkingConfig::default()).count(), 0);
    }

    #[test]
    fn long_text_multiple_chunks() {
        let d = doc(&"word ".repeat(500)); // 2500 chars
        let nodes: Vec<_> = chunk_document(&d, cfg(1000, 200)).collect();

        let spans: Vec<_> =
            nodes.iter().map(|n| (n.start_char, n.end_char)).collect();
        assert_eq!(spans, vec![(0, 1000), (800, 1800), (1600, 2500)]);
        assert_eq!(nodes[2].index, 2);
    }

    #[test]
    fn node_ids_are_unique_and_reference_document() {
        let d = doc(&"x".repeat(5000));
        let nodes: Vec<_> = chunk_document(&d, cfg(1000, 200)).collect();
        let ids: std::collections::HashSet<_> =
            nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids.len(), nodes.len());
        assert!(nodes.iter().all(|n| n.document == d.id));
        assert!(nodes.iter().all(|n| n.source == "doc.txt"));
    }

    #[test]
    fn handles_multibyte_chars() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(50);
        let d = doc(&text);
        let nodes: Vec<_> = chunk_document(&d, cfg(100, 20)).collect();

        assert!(nodes.len() > 1);
        for node in &nodes {
            assert_eq!(node.text.chars().count(), node.end_char - node.start_char);
        }
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(ChunkingConfig::new(100, 100).is_err());
        assert!(ChunkingConfig::new(100, 150).is_err());
        assert!(ChunkingConfig::new(0, 0).is_err());
    }

    #[test]
    fn chunk_corpus_keeps_document_order() {
        let a = Document {
            id: DocumentId::new("a.txt"),
            name: "a.txt".into(),
            path: "a.txt".into(),
            text: "alpha".into(),
        };
        let b = Document {
            id: DocumentId::new("b.txt"),
            name: "b.txt".into(),
            path: "b.txt".into(),
            text: "beta".into(),
        };
        let nodes = chunk_corpus(&[a, b], ChunkingConfig::default());
        let sources: Vec<_> = nodes.iter().map(|n| n.source.as_str()).collect();
        assert_eq!(sources, vec!["a.txt", "b.txt"]);
    }

    proptest! {
        #[test]
        fn nodes_cover_text_with_exact_overlap(
            text in "[a-zé日 ]{0,3000}",
            size in 1usize..400,
            overlap_frac in 0.0f64..1.0,
        ) {
            let overlap = ((size as f64) * overlap_frac) as usize;
            prop_assume!(overlap < size);
            let d = doc(&text);
            let nodes: Vec<_> = chunk_document(&d, cfg(size, overlap)).collect();
            let char_count = text.chars().count();

            if char_count == 0 {
                prop_assert!(nodes.is_empty());
                return Ok(());
            }

            prop_assert_eq!(nodes[0].start_char, 0);
            prop_assert_eq!(nodes.last().unwrap().end_char, char_count);
            if char_count <= size {
                prop_assert_eq!(nodes.len(), 1);
                prop_assert_eq!(&nodes[0].text, &text);
            }

            for pair in nodes.windows(2) {
                prop_assert_eq!(pair[0].end_char - pair[1].start_char, overlap);
            }

            // Concatenating spans minus overlaps reconstructs the document.
            let mut rebuilt = nodes[0].text.clone();
            for node in &nodes[1..] {
                rebuilt.extend(node.text.chars().skip(overlap));
            }
            prop_assert_eq!(rebuilt, text);
        }
    }
}
