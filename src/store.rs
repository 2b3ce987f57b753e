//! In-memory vector store over the pre-built index file.
//!
//! Search is brute force: every query is scored against every chunk with a
//! dot product (both sides are unit vectors, so this is cosine similarity)
//! and the list is sorted. Cost is linear in corpus size; there is no ANN
//! index.
//!
//! # Multi-query search
//!
//! [`VectorStore::search_multi`] runs [`VectorStore::search`] once per query
//! variant, keeps each chunk's **maximum** score across variants, re-sorts,
//! and truncates. A chunk appears in the result iff it was in at least one
//! variant's top `per_query_top_k` and its best score ranks within the
//! global top `final_top_k`.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;

use crate::embedding::{dot, l2_norm, unit_vector};
use crate::models::{ChunkItem, Hit, IndexFile};

/// Norm deviation tolerated before an index vector is re-normalized.
const UNIT_NORM_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, Default)]
pub struct VectorStore {
    items: Vec<ChunkItem>,
    dims: usize,
}

impl VectorStore {
    /// Build a store, checking that all vectors share one dimensionality.
    ///
    /// Vectors that are not unit length (within a small tolerance) are
    /// re-normalized; zero vectors are rejected.
    pub fn from_items(items: Vec<ChunkItem>) -> Result<Self> {
        let mut dims = 0;
        let mut checked = Vec::with_capacity(items.len());
        for mut item in items {
            if item.embedding_unit.is_empty() {
                bail!("chunk {} has an empty embedding", item.id);
            }
            if dims == 0 {
                dims = item.embedding_unit.len();
            } else if item.embedding_unit.len() != dims {
                bail!(
                    "chunk {} has {} dimensions, expected {}",
                    item.id,
                    item.embedding_unit.len(),
                    dims
                );
            }
            if item.embedding_unit.iter().any(|x| !x.is_finite()) {
                bail!("chunk {} has a non-finite embedding component", item.id);
            }
            if (l2_norm(&item.embedding_unit) - 1.0).abs() > UNIT_NORM_TOLERANCE {
                item.embedding_unit = unit_vector(item.embedding_unit)
                    .with_context(|| format!("chunk {} has a zero embedding", item.id))?;
            }
            checked.push(item);
        }
        Ok(Self {
            items: checked,
            dims,
        })
    }

    /// Load the index file written by the offline builder.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read index file: {}", path.display()))?;
        let index: IndexFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse index file: {}", path.display()))?;
        Self::from_items(index.items)
            .with_context(|| format!("Invalid index file: {}", path.display()))
    }

    /// Write the whole store back as an index file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let index = IndexFile {
            items: self.items.clone(),
        };
        let json = serde_json::to_string(&index)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write index file: {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Embedding dimensionality, or `0` for an empty store.
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn items(&self) -> &[ChunkItem] {
        &self.items
    }

    /// Top `top_k` chunks by similarity to `query_vec`, best first.
    ///
    /// Equal scores keep insertion order.
    pub fn search(&self, query_vec: &[f32], top_k: usize) -> Vec<Hit> {
        let mut scored: Vec<(usize, f32)> = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (i, dot(query_vec, &item.embedding_unit)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(i, score)| Hit {
                item: self.items[i].clone(),
                score,
            })
            .collect()
    }

    /// Search once per query vector and merge by maximum score.
    ///
    /// Ties in the merged ranking keep first-seen order.
    pub fn search_multi(
        &self,
        query_vecs: &[Vec<f32>],
        per_query_top_k: usize,
        final_top_k: usize,
    ) -> Vec<Hit> {
        let mut merged: Vec<Hit> = Vec::new();
        let mut position: HashMap<String, usize> = HashMap::new();

        for query_vec in query_vecs {
            for hit in self.search(query_vec, per_query_top_k) {
                match position.get(&hit.item.id) {
                    Some(&i) => {
                        if hit.score > merged[i].score {
                            merged[i].score = hit.score;
                        }
                    }
                    None => {
                        position.insert(hit.item.id.clone(), merged.len());
                        merged.push(hit);
                    }
                }
            }
        }

        merged.sort_by(|a, b| b.score.total_cmp(&a.score));
        merged.truncate(final_top_k);
        merged
    }
}
