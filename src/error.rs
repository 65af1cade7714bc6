use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("search index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// Setup found no eligible documents. Terminal for that setup attempt.
    #[error("no .txt documents found in corpus directory {}", dir.display())]
    CorpusEmpty { dir: PathBuf },

    /// A question arrived before any setup succeeded.
    #[error("engine not initialized: run setup against a corpus first")]
    IndexUnavailable,

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("completion error: {0}")]
    Completion(String),

    /// Persisted indexes exist but do not match the current corpus or settings.
    #[error("persisted indexes are stale or incompatible: {0}")]
    StorageMismatch(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}
