//! Diversity-aware selection with maximal marginal relevance (MMR).
//!
//! Given hits sorted by relevance, [`pick_diverse`] walks them once, in
//! order, scoring each candidate as
//!
//! ```text
//! mmr = λ × relevance − (1 − λ) × max_sim(candidate, picked)
//! ```
//!
//! The first candidate is always taken. Later candidates are taken when
//! `mmr > min_keep`. A rejected candidate is never revisited, so the cost is
//! O(picked × candidates).

use std::collections::HashSet;

use crate::embedding::dot;
use crate::models::Hit;

/// MMR parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiversityParams {
    /// Maximum number of picks.
    pub k: usize,
    /// Relevance weight in `[0, 1]`.
    pub lambda: f32,
    /// Acceptance threshold for every pick after the first.
    pub min_keep: f32,
}

impl DiversityParams {
    pub fn from_config(config: &crate::config::DiversityConfig) -> Self {
        Self {
            k: config.k,
            lambda: config.lambda,
            min_keep: config.min_keep,
        }
    }
}

/// Largest similarity between `candidate` and any picked embedding, `0.0` if none.
fn max_similarity(candidate: &[f32], picked: &[&[f32]]) -> f32 {
    picked
        .iter()
        .map(|p| dot(candidate, p))
        .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s))))
        .unwrap_or(0.0)
}

/// Pick at most `params.k` relevant, mutually non-redundant hits.
///
/// `hits` must already be sorted by descending score. Output order is pick
/// order, and no item id appears twice.
pub fn pick_diverse(hits: &[Hit], params: DiversityParams) -> Vec<Hit> {
    let mut picked: Vec<Hit> = Vec::new();
    let mut picked_ids: HashSet<&str> = HashSet::new();

    for hit in hits {
        if picked.len() >= params.k {
            break;
        }
        if picked_ids.contains(hit.item.id.as_str()) {
            continue;
        }

        let accept = if picked.is_empty() {
            true
        } else {
            let embeddings: Vec<&[f32]> = picked
                .iter()
                .map(|p| p.item.embedding_unit.as_slice())
                .collect();
            let max_sim = max_similarity(&hit.item.embedding_unit, &embeddings);
            let mmr = params.lambda * hit.score - (1.0 - params.lambda) * max_sim;
            mmr > params.min_keep
        };

        if accept {
            picked_ids.insert(hit.item.id.as_str());
            picked.push(hit.clone());
        }
    }

    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::unit_vector;
    use crate::models::ChunkItem;
    use std::path::PathBuf;

    fn hit(id: &str, v: Vec<f32>, score: f32) -> Hit {
        Hit {
            item: ChunkItem {
                id: id.to_string(),
                source: PathBuf::from(id),
                chunk_index: 0,
                content: String::new(),
                embedding_unit: unit_vector(v).unwrap(),
            },
            score,
        }
    }

    fn params(k: usize, lambda: f32, min_keep: f32) -> DiversityParams {
        DiversityParams {
            k,
            lambda,
            min_keep,
        }
    }

    fn ids(hits: &[Hit]) -> Vec<&str> {
        hits.iter().map(|h| h.item.id.as_str()).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(pick_diverse(&[], params(3, 0.7, 0.0)).is_empty());
    }

    #[test]
    fn test_first_hit_always_selected() {
        // A hopeless threshold still admits the bootstrap pick.
        let hits = vec![hit("a", vec![1.0, 0.0], 0.1), hit("b", vec![0.0, 1.0], 0.1)];
        let picked = pick_diverse(&hits, params(3, 0.5, 10.0));
        assert_eq!(ids(&picked), vec!["a"]);
    }

    #[test]
    fn test_output_bounded_by_k() {
        let hits: Vec<Hit> = (0..10)
            .map(|i| {
                let angle = i as f32 * 0.3;
                hit(&format!("h{}", i), vec![angle.cos(), angle.sin()], 0.9)
            })
            .collect();
        let picked = pick_diverse(&hits, params(4, 1.0, -1.0));
        assert_eq!(picked.len(), 4);
    }

    #[test]
    fn test_no_repeated_ids() {
        let hits = vec![
            hit("a", vec![1.0, 0.0], 0.9),
            hit("a", vec![1.0, 0.0], 0.9),
            hit("b", vec![0.0, 1.0], 0.8),
        ];
        let picked = pick_diverse(&hits, params(3, 1.0, -1.0));
        assert_eq!(ids(&picked), vec!["a", "b"]);
    }

    #[test]
    fn test_redundant_candidate_suppressed() {
        // A (0.91) and B (0.89) are dissimilar; C (0.86) is nearly a copy of A.
        let a = hit("A", vec![1.0, 0.0, 0.0], 0.91);
        let b = hit("B", vec![0.0, 1.0, 0.0], 0.89);
        let c = hit("C", vec![0.97, 0.243, 0.0], 0.86);
        let picked = pick_diverse(&[a, b, c], params(2, 0.8, 0.0));
        assert_eq!(ids(&picked), vec!["A", "B"]);
    }

    #[test]
    fn test_near_duplicate_rejected_in_favor_of_novel() {
        // k is large enough that only the threshold decides.
        let a = hit("A", vec![1.0, 0.0], 0.9);
        let dup = hit("dup", vec![0.999, 0.04], 0.88);
        let novel = hit("novel", vec![0.0, 1.0], 0.5);
        let picked = pick_diverse(&[a, dup, novel], params(3, 0.5, 0.1));
        // dup: 0.5*0.88 - 0.5*~1.0 < 0.1 ; novel: 0.5*0.5 - 0 = 0.25 > 0.1
        assert_eq!(ids(&picked), vec!["A", "novel"]);
    }

    #[test]
    fn test_lambda_one_is_pure_relevance() {
        let hits = vec![
            hit("a", vec![1.0, 0.0], 0.9),
            hit("a2", vec![1.0, 0.0], 0.8),
            hit("b", vec![0.0, 1.0], 0.7),
        ];
        let picked = pick_diverse(&hits, params(2, 1.0, 0.0));
        assert_eq!(ids(&picked), vec!["a", "a2"]);
    }

    #[test]
    fn test_max_similarity_none_picked() {
        assert_eq!(max_similarity(&[1.0, 0.0], &[]), 0.0);
    }

    #[test]
    fn test_max_similarity_negative() {
        let v = [1.0f32, 0.0];
        let opposite: &[f32] = &[-1.0, 0.0];
        assert!((max_similarity(&v, &[opposite]) + 1.0).abs() < 1e-6);
    }
}
