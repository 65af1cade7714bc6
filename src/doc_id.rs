use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

/// A stable document identifier derived from the document's file name.
///
/// Hashing uses a fixed-seed xxHash64 so identifiers survive process restarts
/// and toolchain upgrades; persisted indexes key their nodes by them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId {
    /// The numeric ID used as the key in redb tables.
    pub numeric: u64,
    /// The short hex string for human display (e.g. "a1b2c3").
    pub short: String,
}

impl DocumentId {
    /// Generate a stable document ID from a corpus-relative file name.
    pub fn new(name: &str) -> Self {
        let numeric = stable_hash(name);
        let short = short_hex(numeric, 6);
        Self { numeric, short }
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short)
    }
}

/// Identity of a single chunk.
///
/// Format: `document XOR (chunk_index << 48)`, so chunk 0 shares the
/// document's numeric ID.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn for_chunk(document: &DocumentId, chunk_index: usize) -> Self {
        if chunk_index == 0 {
            Self(document.numeric)
        } else {
            Self(document.numeric ^ ((chunk_index as u64) << 48))
        }
    }

    pub fn short(&self) -> String {
        short_hex(self.0, 8)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short())
    }
}

pub(crate) fn stable_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    value.hash(&mut hasher);
    hasher.finish()
}

fn short_hex(value: u64, len: usize) -> String {
    let full = format!("{value:016x}");
    full[..len].to_string()
}
