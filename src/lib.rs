//! curatex - retrieval-augmented question answering over curated news.
//!
//! curatex chunks a directory of plain-text news articles and indexes the
//! chunks three ways: dense embeddings, BM25 via
//! [Tantivy](https://github.com/quickwit-oss/tantivy), and an extracted
//! keyword table. Questions run against all three, the results are fused,
//! and an OpenAI-compatible chat endpoint writes the answer from the fused
//! passages. Conversations are remembered per [`Session`].
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::Path;
//!
//! use curatex::{ConfigDb, DataDir, NewsRag, QuestionAnswering, RagConfig};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
//! let config = RagConfig::from_settings(&config_db).unwrap();
//!
//! let rag = NewsRag::from_config(config, &data_dir).unwrap();
//! rag.setup(Path::new("data")).unwrap();
//!
//! let session = rag.new_session();
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let answer = runtime
//!     .block_on(rag.answer("What happened in battery technology?", &session))
//!     .unwrap();
//! println!("{}", answer.text());
//! for source in &answer.sources {
//!     println!("{} [{}]", source.node.source, source.strategy);
//! }
//! ```

pub mod chunking;
pub mod cli;
pub mod completion;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod history;
pub mod hybrid;
pub mod keyword_index;
pub mod lexical_index;
pub mod loader;
pub mod mcp;
pub mod model_manager;
pub mod rag;
pub mod retriever;
pub mod storage;
pub mod text_util;
pub mod vector_index;

pub use config::RagConfig;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::{DocumentId, NodeId};
pub use engine::{Answer, Outcome};
pub use error::{Error, Result};
pub use history::Session;
pub use hybrid::{HybridRetriever, Retrieval};
pub use model_manager::ModelManager;
pub use rag::{NewsRag, QuestionAnswering};
