//! Serialization of selected chunks into the prompt's context block.
//!
//! Each chunk becomes a numbered, labeled section so the model can cite it:
//!
//! ```text
//! [1] docs/deploy.md#2 (docs/deploy.md, chunk 2)
//! Deployments run through the staging cluster first...
//!
//! [2] docs/faq.md#0 (docs/faq.md, chunk 0)
//! ...
//! ```
//!
//! The output is deterministic for a given list of hits, which matters
//! because it is part of the answer-cache key.

use crate::models::Hit;

/// Separator placed between consecutive chunk sections.
const SECTION_SEPARATOR: &str = "\n\n";

/// Label line for the `n`-th (1-based) chunk.
pub fn label(n: usize, hit: &Hit) -> String {
    format!(
        "[{}] {} ({}, chunk {})",
        n,
        hit.item.id,
        hit.item.source.display(),
        hit.item.chunk_index
    )
}

/// Render the selected hits, in order, as one context block.
///
/// Returns an empty string when there are no hits.
pub fn build_context(hits: &[Hit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("{}\n{}", label(i + 1, hit), hit.item.content.trim()))
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}
