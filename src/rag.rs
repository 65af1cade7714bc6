//! Setup orchestration and the question-answering surface.
//!
//! Setup runs loader, chunker and index builders, preferring persisted
//! vector and keyword indexes when they match the corpus, and publishes a
//! ready [`QueryEngine`] only when all three indexes exist. A failed setup
//! leaves the engine uninitialized.

use std::{
    fmt,
    future::Future,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};

use serde::Serialize;

use crate::{
    chunking::{Node, chunk_corpus},
    completion::{ChatClient, Completer},
    config::RagConfig,
    data_dir::DataDir,
    embedding::{self, Embedder},
    engine::{Answer, QueryEngine},
    error::{Error, Result},
    history::Session,
    hybrid::{HybridRetriever, Retrieval},
    keyword_index::KeywordIndex,
    lexical_index::LexicalIndex,
    loader::{corpus_fingerprint, load_documents},
    retriever::{
        KeywordRetriever,
        LexicalRetriever,
        NodeStore,
        Retriever,
        VectorRetriever,
    },
    storage::{IndexStore, Manifest},
    vector_index::VectorIndex,
};

/// Whether setup reused persisted indexes or built them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexSource {
    Loaded,
    Built,
}

impl fmt::Display for IndexSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Loaded => "loaded",
            Self::Built => "built",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    pub documents: usize,
    pub nodes: usize,
    pub source: IndexSource,
}

/// The capability the chat front end depends on.
pub trait QuestionAnswering: Send + Sync {
    /// True once a setup has succeeded.
    fn is_ready(&self) -> bool;

    /// Load or rebuild indexes for `dir`. Blocks.
    fn setup_corpus(&self, dir: &Path) -> bool;

    /// Answer within `session`. Fails with [`Error::IndexUnavailable`]
    /// before a successful setup.
    fn answer(
        &self,
        question: &str,
        session: &Session,
    ) -> impl Future<Output = Result<Answer>> + Send;
}

/// Hybrid RAG over a directory of news documents.
pub struct NewsRag<C> {
    config: RagConfig,
    index_path: PathBuf,
    embedder: Arc<dyn Embedder>,
    completer: Arc<C>,
    engine: RwLock<Option<Arc<QueryEngine<C>>>>,
    setup_lock: Mutex<()>,
}

impl NewsRag<ChatClient> {
    /// Engine for the configured embedder and completion endpoint, storing
    /// indexes in the data directory.
    pub fn from_config(config: RagConfig, data_dir: &DataDir) -> Result<Self> {
        let embedder = embedding::from_config(&config);
        let completer = ChatClient::from_config(&config)?;
        Ok(Self::new(config, data_dir.index_db(), embedder, completer))
    }
}

impl<C: Completer> NewsRag<C> {
    pub fn new(
        config: RagConfig,
        index_path: PathBuf,
        embedder: Arc<dyn Embedder>,
        completer: C,
    ) -> Self {
        Self {
            config,
            index_path,
            embedder,
            completer: Arc::new(completer),
            engine: RwLock::new(None),
            setup_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// A fresh conversation sized by the configuration.
    pub fn new_session(&self) -> Session {
        Session::new(self.config.history_capacity, self.config.history_window)
    }

    /// Load or build every index for the corpus in `dir`.
    ///
    /// Concurrent calls are serialized. On error the engine is left
    /// uninitialized, even if an earlier setup had succeeded.
    pub fn setup(&self, dir: &Path) -> Result<SetupReport> {
        let _guard = self.setup_lock.lock().unwrap_or_else(|e| e.into_inner());

        match self.build_engine(dir) {
            Ok((engine, report)) => {
                *self.engine.write().unwrap_or_else(|e| e.into_inner()) =
                    Some(Arc::new(engine));
                tracing::info!(
                    dir = %dir.display(),
                    documents = report.documents,
                    nodes = report.nodes,
                    source = %report.source,
                    "engine ready"
                );
                Ok(report)
            }
            Err(e) => {
                *self.engine.write().unwrap_or_else(|e| e.into_inner()) = None;
                Err(e)
            }
        }
    }

    /// Fused retrieval without answer synthesis.
    pub async fn retrieve(&self, query: &str) -> Result<Retrieval> {
        let engine = self.engine()?;
        Ok(engine.retrieve(query).await)
    }

    fn engine(&self) -> Result<Arc<QueryEngine<C>>> {
        self.engine
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(Error::IndexUnavailable)
    }

    fn build_engine(&self, dir: &Path) -> Result<(QueryEngine<C>, SetupReport)> {
        let chunking = self.config.chunking()?;
        let documents = load_documents(dir)?;
        let nodes = chunk_corpus(&documents, chunking);

        let mut manifest = Manifest::new(
            self.embedder.id(),
            chunking,
            corpus_fingerprint(&documents),
        );

        let (vector, keyword, source) = match self.load_persisted(&manifest, &nodes) {
            Ok((vector, keyword)) => {
                tracing::info!("loaded persisted indexes");
                (vector, keyword, IndexSource::Loaded)
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not load persisted indexes, rebuilding");
                let vector = VectorIndex::build(&nodes, self.embedder.as_ref())?;
                let keyword =
                    KeywordIndex::build(&nodes, self.config.keywords_per_chunk);
                manifest.dimension = vector.dimension();
                manifest.node_count = nodes.len();
                self.persist(&manifest, &nodes, &vector, &keyword)?;
                (vector, keyword, IndexSource::Built)
            }
        };

        // The lexical index is never persisted.
        let lexical = LexicalIndex::build(&nodes)?;

        let report = SetupReport {
            documents: documents.len(),
            nodes: nodes.len(),
            source,
        };

        let store = Arc::new(NodeStore::new(nodes));
        let retrievers: Vec<Arc<dyn Retriever>> = vec![
            Arc::new(VectorRetriever::new(
                vector,
                self.embedder.clone(),
                store.clone(),
            )),
            Arc::new(LexicalRetriever::new(lexical, store.clone())),
            Arc::new(KeywordRetriever::new(
                keyword,
                self.config.keywords_per_query,
                store,
            )),
        ];
        let hybrid = HybridRetriever::new(retrievers, self.config.top_k);

        let engine = QueryEngine::new(
            Arc::new(hybrid),
            self.completer.clone(),
            self.config.completion_timeout,
        );
        Ok((engine, report))
    }

    /// Persisted indexes, provided they were built from exactly `nodes`.
    fn load_persisted(
        &self,
        expected: &Manifest,
        nodes: &[Node],
    ) -> Result<(VectorIndex, KeywordIndex)> {
        let store = IndexStore::open(&self.index_path)?;
        let mut persisted = store.load(expected)?;

        persisted.nodes.sort_by_key(|n| n.id);
        let mut fresh: Vec<&Node> = nodes.iter().collect();
        fresh.sort_by_key(|n| n.id);
        if persisted.nodes.len() != fresh.len()
            || persisted.nodes.iter().zip(&fresh).any(|(a, b)| a != *b)
        {
            return Err(Error::StorageMismatch(
                "persisted nodes differ from the current chunking".to_string(),
            ));
        }

        Ok((persisted.vector, persisted.keyword))
    }

    fn persist(
        &self,
        manifest: &Manifest,
        nodes: &[Node],
        vector: &VectorIndex,
        keyword: &KeywordIndex,
    ) -> Result<()> {
        let store = match IndexStore::open(&self.index_path) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(error = %e, "index store unreadable");
                IndexStore::recreate(&self.index_path)?
            }
        };
        store.save(manifest, nodes, vector, keyword)
    }
}

impl<C: Completer> QuestionAnswering for NewsRag<C> {
    fn is_ready(&self) -> bool {
        self.engine
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn setup_corpus(&self, dir: &Path) -> bool {
        match self.setup(dir) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(dir = %dir.display(), error = %e, "setup failed");
                false
            }
        }
    }

    async fn answer(&self, question: &str, session: &Session) -> Result<Answer> {
        let engine = self.engine()?;
        Ok(engine.answer(question, session).await)
    }
}
