//! Durable storage for the vector and keyword indexes.
//!
//! Everything lives in one redb file. A manifest records what the indexes
//! were built from; loading refuses any store whose manifest does not match
//! the current embedder, chunking settings and corpus, so the caller falls
//! back to a rebuild.
//!
//! Binary formats:
//! - `vectors`: node id -> `D * 4` bytes of f32 LE
//! - `keywords`: term -> `N * 8` bytes of u64 LE node ids

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{
    chunking::{ChunkingConfig, Node},
    doc_id::NodeId,
    error::{Error, Result},
    keyword_index::KeywordIndex,
    vector_index::VectorIndex,
};

/// Bumped whenever the on-disk layout changes.
pub const SCHEMA_VERSION: u32 = 1;

const MANIFEST_KEY: &str = "manifest";

const MANIFEST: TableDefinition<&str, &str> = TableDefinition::new("manifest");
const NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");
const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const KEYWORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("keywords");

/// Describes what a persisted index set was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub embedder: String,
    pub dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub corpus_fingerprint: u64,
    pub node_count: usize,
}

impl Manifest {
    /// Manifest for indexes built now. `dimension` and `node_count` are
    /// filled in once the indexes exist.
    pub fn new(
        embedder: impl Into<String>,
        chunking: ChunkingConfig,
        corpus_fingerprint: u64,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            embedder: embedder.into(),
            dimension: 0,
            chunk_size: chunking.chunk_size(),
            chunk_overlap: chunking.overlap(),
            corpus_fingerprint,
            node_count: 0,
        }
    }

    /// Check a stored manifest against the one the current process expects.
    ///
    /// Dimension and node count are outputs of the build, not inputs, so
    /// they are not compared.
    pub fn ensure_compatible(&self, expected: &Manifest) -> Result<()> {
        if self.schema_version != expected.schema_version {
            return Err(mismatch(
                "schema version",
                &self.schema_version,
                &expected.schema_version,
            ));
        }
        if self.embedder != expected.embedder {
            return Err(mismatch("embedder", &self.embedder, &expected.embedder));
        }
        if self.chunk_size != expected.chunk_size
            || self.chunk_overlap != expected.chunk_overlap
        {
            return Err(mismatch(
                "chunking",
                &format!("{}/{}", self.chunk_size, self.chunk_overlap),
                &format!("{}/{}", expected.chunk_size, expected.chunk_overlap),
            ));
        }
        if self.corpus_fingerprint != expected.corpus_fingerprint {
            return Err(mismatch(
                "corpus",
                &format!("{:016x}", self.corpus_fingerprint),
                &format!("{:016x}", expected.corpus_fingerprint),
            ));
        }
        Ok(())
    }
}

fn mismatch(
    what: &str,
    stored: &dyn std::fmt::Display,
    current: &dyn std::fmt::Display,
) -> Error {
    Error::StorageMismatch(format!(
        "{what} changed (stored {stored}, current {current})"
    ))
}

/// Indexes read back from storage.
#[derive(Debug)]
pub struct PersistedIndexes {
    pub manifest: Manifest,
    pub nodes: Vec<Node>,
    pub vector: VectorIndex,
    pub keyword: KeywordIndex,
}

pub struct IndexStore {
    db: Database,
}

impl IndexStore {
    /// Open or create the index database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        Ok(Self { db })
    }

    /// Replace an unreadable database file with an empty one.
    pub fn recreate(path: &Path) -> Result<Self> {
        if path.exists() {
            tracing::warn!(path = %path.display(), "discarding unreadable index store");
            std::fs::remove_file(path)?;
        }
        Self::open(path)
    }

    /// Persist the index pair, replacing whatever was stored before, in a
    /// single write transaction.
    pub fn save(
        &self,
        manifest: &Manifest,
        nodes: &[Node],
        vector: &VectorIndex,
        keyword: &KeywordIndex,
    ) -> Result<()> {
        let manifest_json = serde_json::to_string(manifest)?;

        let txn = self.db.begin_write()?;
        txn.delete_table(MANIFEST)?;
        txn.delete_table(NODES)?;
        txn.delete_table(VECTORS)?;
        txn.delete_table(KEYWORDS)?;
        {
            let mut table = txn.open_table(NODES)?;
            for node in nodes {
                let json = serde_json::to_vec(node)?;
                table.insert(node.id.0, json.as_slice())?;
            }
        }
        {
            let mut table = txn.open_table(VECTORS)?;
            for (id, data) in vector.entries() {
                let byte_len = std::mem::size_of_val(data.as_slice());
                let mut guard = table.insert_reserve(id.0, byte_len)?;
                guard.as_mut().copy_from_slice(bytemuck::cast_slice(data));
            }
        }
        {
            let mut table = txn.open_table(KEYWORDS)?;
            for (term, ids) in keyword.table() {
                let raw: Vec<u64> = ids.iter().map(|id| id.0).collect();
                table.insert(term.as_str(), bytemuck::cast_slice::<u64, u8>(&raw))?;
            }
        }
        {
            let mut table = txn.open_table(MANIFEST)?;
            table.insert(MANIFEST_KEY, manifest_json.as_str())?;
        }
        txn.commit()?;

        tracing::info!(
            nodes = nodes.len(),
            keywords = keyword.len(),
            "persisted vector and keyword indexes"
        );
        Ok(())
    }

    /// Read the stored manifest, if any.
    pub fn manifest(&self) -> Result<Option<Manifest>> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(MANIFEST) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match table.get(MANIFEST_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(json.value())?)),
            None => Ok(None),
        }
    }

    /// Load the index pair, failing unless the stored manifest is compatible
    /// with `expected` and every table is intact.
    pub fn load(&self, expected: &Manifest) -> Result<PersistedIndexes> {
        let manifest = self.manifest()?.ok_or_else(|| {
            Error::StorageMismatch("no persisted indexes".to_string())
        })?;
        manifest.ensure_compatible(expected)?;

        let txn = self.db.begin_read()?;

        let mut nodes = Vec::with_capacity(manifest.node_count);
        for entry in txn.open_table(NODES)?.iter()? {
            let (_, json) = entry?;
            nodes.push(serde_json::from_slice::<Node>(json.value())?);
        }

        let mut entries = Vec::with_capacity(manifest.node_count);
        for entry in txn.open_table(VECTORS)?.iter()? {
            let (id, bytes) = entry?;
            entries.push((NodeId(id.value()), decode_f32s(bytes.value())?));
        }

        let mut rows = Vec::new();
        for entry in txn.open_table(KEYWORDS)?.iter()? {
            let (term, bytes) = entry?;
            rows.push((term.value().to_string(), decode_ids(bytes.value())?));
        }

        if nodes.len() != manifest.node_count || entries.len() != manifest.node_count {
            return Err(Error::StorageMismatch(format!(
                "manifest lists {} nodes, found {} nodes and {} vectors",
                manifest.node_count,
                nodes.len(),
                entries.len()
            )));
        }

        let vector = VectorIndex::from_entries(entries)?;
        if !vector.is_empty() && vector.dimension() != manifest.dimension {
            return Err(Error::StorageMismatch(format!(
                "vectors have dimension {}, manifest says {}",
                vector.dimension(),
                manifest.dimension
            )));
        }

        Ok(PersistedIndexes {
            manifest,
            nodes,
            vector,
            keyword: KeywordIndex::from_table(rows),
        })
    }
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore").finish_non_exhaustive()
    }
}

fn decode_f32s(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::StorageMismatch(format!(
            "vector blob of {} bytes is not a whole number of f32s",
            bytes.len()
        )));
    }
    // Copy out rather than cast: redb gives no alignment guarantee.
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn decode_ids(bytes: &[u8]) -> Result<Vec<NodeId>> {
    if bytes.len() % 8 != 0 {
        return Err(Error::StorageMismatch(format!(
            "keyword blob of {} bytes is not a whole number of ids",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| {
            NodeId(u64::from_le_bytes([
                c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7],
            ]))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunking::chunk_corpus,
        doc_id::DocumentId,
        embedding::HashingEmbedder,
        loader::{Document, corpus_fingerprint},
    };

    fn fixture() -> (Vec<Document>, Vec<Node>, VectorIndex, KeywordIndex) {
        let docs: Vec<Document> = [
            ("a.txt", "Company X announced a new product today."),
            ("b.txt", "Analysts praised the battery technology."),
        ]
        .iter()
        .map(|(name, text)| Document {
            id: DocumentId::new(name),
            name: name.to_string(),
            path: name.into(),
            text: text.to_string(),
        })
        .collect();
        let nodes = chunk_corpus(&docs, ChunkingConfig::default());
        let vector = VectorIndex::build(&nodes, &HashingEmbedder::new(32)).unwrap();
        let keyword = KeywordIndex::build(&nodes, 10);
        (docs, nodes, vector, keyword)
    }

    fn manifest_for(docs: &[Document], nodes: &[Node], vector: &VectorIndex) -> Manifest {
        Manifest {
            dimension: vector.dimension(),
            node_count: nodes.len(),
            ..Manifest::new("hashing:32", ChunkingConfig::default(), corpus_fingerprint(docs))
        }
    }

    #[test]
    fn save_then_load_restores_indexes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = IndexStore::open(&tmp.path().join("indexes.redb")).unwrap();
        let (docs, nodes, vector, keyword) = fixture();
        let manifest = manifest_for(&docs, &nodes, &vector);

        store.save(&manifest, &nodes, &vector, &keyword).unwrap();
        let loaded = store.load(&manifest).unwrap();

        assert_eq!(loaded.manifest, manifest);
        assert_eq!(loaded.keyword, keyword);
        assert_eq!(loaded.vector.len(), vector.len());
        assert_eq!(loaded.vector.dimension(), 32);
        for (id, data) in vector.entries() {
            let (_, stored) = loaded
                .vector
                .entries()
                .iter()
                .find(|(i, _)| i == id)
                .unwrap();
            assert_eq!(stored, data);
        }
        let mut ids: Vec<_> = loaded.nodes.iter().map(|n| n.id).collect();
        let mut expected: Vec<_> = nodes.iter().map(|n| n.id).collect();
        ids.sort();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn load_from_empty_store_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = IndexStore::open(&tmp.path().join("indexes.redb")).unwrap();
        let expected = Manifest::new("hashing:32", ChunkingConfig::default(), 1);
        assert!(store.manifest().unwrap().is_none());
        assert!(matches!(
            store.load(&expected),
            Err(Error::StorageMismatch(_))
        ));
    }

    #[test]
    fn load_rejects_changed_inputs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = IndexStore::open(&tmp.path().join("indexes.redb")).unwrap();
        let (docs, nodes, vector, keyword) = fixture();
        let manifest = manifest_for(&docs, &nodes, &vector);
        store.save(&manifest, &nodes, &vector, &keyword).unwrap();

        let other_embedder = Manifest {
            embedder: "colbert:x".into(),
            ..manifest.clone()
        };
        let other_corpus = Manifest {
            corpus_fingerprint: manifest.corpus_fingerprint ^ 1,
            ..manifest.clone()
        };
        let other_chunking = Manifest {
            chunk_size: 500,
            ..manifest.clone()
        };

        for expected in [other_embedder, other_corpus, other_chunking] {
            assert!(matches!(
                store.load(&expected),
                Err(Error::StorageMismatch(_))
            ));
        }
        // Written by a different store layout.
        let future = Manifest {
            schema_version: SCHEMA_VERSION + 1,
            ..manifest.clone()
        };
        store.save(&future, &nodes, &vector, &keyword).unwrap();
        assert!(matches!(
            store.load(&manifest),
            Err(Error::StorageMismatch(_))
        ));
    }

    #[test]
    fn save_replaces_previous_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let store = IndexStore::open(&tmp.path().join("indexes.redb")).unwrap();
        let (docs, nodes, vector, keyword) = fixture();
        let manifest = manifest_for(&docs, &nodes, &vector);
        store.save(&manifest, &nodes, &vector, &keyword).unwrap();

        let fewer = &nodes[..1];
        let small_vector = VectorIndex::build(fewer, &HashingEmbedder::new(32)).unwrap();
        let small_keyword = KeywordIndex::build(fewer, 10);
        let small_manifest = Manifest {
            node_count: 1,
            ..manifest
        };
        store
            .save(&small_manifest, fewer, &small_vector, &small_keyword)
            .unwrap();

        let loaded = store.load(&small_manifest).unwrap();
        assert_eq!(loaded.nodes.len(), 1);
        assert_eq!(loaded.vector.len(), 1);
        assert_eq!(loaded.keyword, small_keyword);
    }

    #[test]
    fn recreate_replaces_corrupt_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("indexes.redb");
        std::fs::write(&path, b"definitely not a redb file").unwrap();

        assert!(IndexStore::open(&path).is_err());
        let store = IndexStore::recreate(&path).unwrap();
        assert!(store.manifest().unwrap().is_none());
    }

    #[test]
    fn decode_rejects_truncated_blobs() {
        assert!(decode_f32s(&[0, 0, 0]).is_err());
        assert!(decode_ids(&[0; 9]).is_err());
        assert_eq!(decode_f32s(&1.5f32.to_le_bytes()).unwrap(), vec![1.5]);
    }
}
