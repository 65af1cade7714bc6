//! Corpus discovery and loading.
//!
//! The corpus is the set of `.txt` files directly under one directory.
//! Discovery is non-recursive: subdirectories and hidden files are skipped,
//! which matches how curated news batches are dropped into a flat folder.

use std::{
    hash::Hasher,
    path::{Path, PathBuf},
};

use rayon::prelude::*;
use twox_hash::XxHash64;

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
};

/// Supported file extensions for document discovery.
const SUPPORTED_EXTENSIONS: &[&str] = &["txt"];

/// A loaded plain-text document. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    /// File name relative to the corpus directory.
    pub name: String,
    pub path: PathBuf,
    pub text: String,
}

/// List eligible document files directly under `dir`, sorted by name.
pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut results = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files.
        if name.starts_with('.') {
            continue;
        }

        // `metadata` follows symlinks, so linked files are picked up too.
        let path = entry.path();
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue; // broken symlink
        };
        if metadata.is_file() && is_supported(&path) {
            results.push(path);
        }
    }

    results.sort();
    Ok(results)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

/// Load every eligible document in the corpus directory.
///
/// Fails with [`Error::CorpusEmpty`] when the directory is missing or holds
/// no readable, non-blank `.txt` file.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>> {
    if !dir.is_dir() {
        return Err(Error::CorpusEmpty {
            dir: dir.to_path_buf(),
        });
    }

    let files = discover_files(dir)?;

    // Read files in parallel; collect preserves the sorted order.
    let documents: Vec<Document> = files
        .par_iter()
        .filter_map(|path| {
            // Scraped articles may carry stray invalid bytes; keep the rest.
            let text = match std::fs::read(path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable document"
                    );
                    return None;
                }
            };
            if text.trim().is_empty() {
                tracing::debug!(path = %path.display(), "skipping blank document");
                return None;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            Some(Document {
                id: DocumentId::new(&name),
                name,
                path: path.clone(),
                text,
            })
        })
        .collect();

    if documents.is_empty() {
        return Err(Error::CorpusEmpty {
            dir: dir.to_path_buf(),
        });
    }

    tracing::info!(
        dir = %dir.display(),
        documents = documents.len(),
        "loaded corpus"
    );
    Ok(documents)
}

/// Content fingerprint of a loaded corpus.
///
/// Covers every document's name and text, so any added, removed, renamed or
/// edited file changes it.
pub fn corpus_fingerprint(documents: &[Document]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    for doc in documents {
        hasher.write(doc.name.as_bytes());
        hasher.write_u8(0);
        hasher.write(doc.text.as_bytes());
        hasher.write_u8(0);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_documents_with_invalid_utf8() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("scraped.txt"), b"battery \xff technology")
            .unwrap();

        let documents = load_documents(tmp.path()).unwrap();
        assert_eq!(documents.len(), 1);
        assert!(documents[0].text.starts_with("battery "));
        assert!(documents[0].text.ends_with(" technology"));
    }

    #[test]
    fn discovers_only_txt() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("news.txt"), "Hello").unwrap();
        std::fs::write(tmp.path().join("note.md"), "# Hello").unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("news.txt"));
    }

    #[test]
    fn skips_hidden_files_and_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(".hidden.txt"), "secret").unwrap();
        let sub = tmp.path().join("archive");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("old.txt"), "old news").unwrap();
        std::fs::write(tmp.path().join("visible.txt"), "hello").unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("visible.txt"));
    }

    #[test]
    fn results_are_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["z.txt", "a.txt", "m.txt"] {
            std::fs::write(tmp.path().join(name), name).unwrap();
        }

        let docs = load_documents(tmp.path()).unwrap();
        let names: Vec<_> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "m.txt", "z.txt"]);
    }

    #[test]
    fn missing_directory_is_corpus_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_documents(&tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::CorpusEmpty { .. }));
    }

    #[test]
    fn empty_directory_is_corpus_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_documents(tmp.path()).unwrap_err();
        assert!(matches!(err, Error::CorpusEmpty { .. }));
    }

    #[test]
    fn blank_documents_are_not_eligible() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("blank.txt"), "  \n\t").unwrap();
        let err = load_documents(tmp.path()).unwrap_err();
        assert!(matches!(err, Error::CorpusEmpty { .. }));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("news.txt");
        std::fs::write(&path, "first edition").unwrap();
        let before = corpus_fingerprint(&load_documents(tmp.path()).unwrap());
        let again = corpus_fingerprint(&load_documents(tmp.path()).unwrap());
        assert_eq!(before, again);

        std::fs::write(&path, "second edition").unwrap();
        let after = corpus_fingerprint(&load_documents(tmp.path()).unwrap());
        assert_ne!(before, after);
    }
}
