//! Core data models used throughout the retrieval pipeline.
//!
//! These types represent the embedded chunks loaded from the index file and
//! the scored hits that flow from search through selection into the prompt.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An embedded chunk of a source document.
///
/// Created once by the offline index builder and immutable afterwards.
/// `embedding_unit` always has unit L2 norm, so a dot product against a
/// unit query vector is the cosine similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkItem {
    /// `"<source>#<index>"`.
    pub id: String,
    /// Path of the document the chunk was cut from.
    pub source: PathBuf,
    /// Zero-based position of the chunk within its document.
    pub chunk_index: u32,
    /// Chunk text as fed to the generation service.
    pub content: String,
    /// Unit-normalized embedding vector.
    pub embedding_unit: Vec<f32>,
}

impl ChunkItem {
    /// Build the canonical `"<source>#<index>"` identifier.
    pub fn make_id(source: &std::path::Path, chunk_index: u32) -> String {
        format!("{}#{}", source.display(), chunk_index)
    }
}

/// A search result: a chunk plus its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub item: ChunkItem,
    pub score: f32,
}

/// On-disk shape of the index file, read and written wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexFile {
    pub items: Vec<ChunkItem>,
}
