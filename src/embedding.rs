//! Embedding service abstraction, vector utilities, and cached batch embedding.
//!
//! The pipeline never talks to an embedding backend directly. It calls
//! [`embed_cached`], which:
//!
//! 1. normalizes each input text ([`normalize_text`]),
//! 2. splits the batch into cache hits and misses,
//! 3. issues **one** [`EmbeddingService::embed`] call covering only the
//!    misses, through the [`ResilientInvoker`],
//! 4. unit-normalizes the returned vectors and stores them in the cache,
//! 5. returns vectors in the original request order.
//!
//! Because stored vectors are unit length, [`dot`] of two of them is their
//! cosine similarity.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use crate::cache::{embedding_key, Cache};
use crate::error::ServiceError;
use crate::observer::{PipelineEvent, PipelineObserver};
use crate::retry::ResilientInvoker;

/// A backend that turns texts into raw (not necessarily normalized) vectors.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed `texts` with `model`, returning one vector per text in input order.
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

/// Collapse whitespace runs to single spaces and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Dot product. Equals cosine similarity when both inputs are unit vectors.
///
/// Returns `0.0` for vectors of different lengths.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length.
///
/// # Errors
///
/// Fails for empty or all-zero vectors, which have no direction, and for
/// vectors with a NaN or infinite component.
pub fn unit_vector(mut v: Vec<f32>) -> Result<Vec<f32>> {
    if v.iter().any(|x| !x.is_finite()) {
        bail!("embedding contains a non-finite component");
    }
    let norm = l2_norm(&v);
    if v.is_empty() || norm < f32::EPSILON {
        bail!("cannot normalize a zero-length embedding");
    }
    if !norm.is_finite() {
        bail!("embedding norm overflows f32");
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Ok(v)
}

/// Embed a batch of texts, serving repeats from `cache`.
///
/// # Errors
///
/// Propagates the (classified) service error once the invoker gives up,
/// and fails if the service returns the wrong number of vectors or a
/// zero vector.
pub async fn embed_cached(
    service: &dyn EmbeddingService,
    invoker: &ResilientInvoker,
    cache: &mut Cache<Vec<f32>>,
    model: &str,
    texts: &[String],
    observer: &dyn PipelineObserver,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let normalized: Vec<String> = texts.iter().map(|t| normalize_text(t)).collect();
    let keys: Vec<String> = normalized
        .iter()
        .map(|t| embedding_key(model, t))
        .collect();

    let mut results: Vec<Option<Vec<f32>>> = keys.iter().map(|k| cache.lookup(k)).collect();

    let mut miss_keys = Vec::new();
    let mut miss_texts = Vec::new();
    let mut seen = HashSet::new();
    for ((slot, key), text) in results.iter().zip(keys.iter()).zip(normalized.iter()) {
        if slot.is_none() && seen.insert(key.as_str()) {
            miss_keys.push(key.clone());
            miss_texts.push(text.clone());
        }
    }

    let hits = results.iter().filter(|r| r.is_some()).count();
    observer.report(PipelineEvent::CacheLookup {
        cache: cache.name(),
        hits,
        misses: results.len() - hits,
    });

    if !miss_texts.is_empty() {
        let raw = invoker
            .invoke("embed", observer, || service.embed(model, &miss_texts))
            .await?;

        if raw.len() != miss_texts.len() {
            return Err(ServiceError::other(
                "embed",
                format!(
                    "expected {} embeddings, received {}",
                    miss_texts.len(),
                    raw.len()
                ),
            )
            .into());
        }

        let mut fresh: HashMap<String, Vec<f32>> = HashMap::with_capacity(raw.len());
        for (key, vector) in miss_keys.into_iter().zip(raw) {
            let unit = unit_vector(vector)?;
            cache.insert(key.clone(), unit.clone());
            fresh.insert(key, unit);
        }

        for (slot, key) in results.iter_mut().zip(keys.iter()) {
            if slot.is_none() {
                *slot = fresh.get(key).cloned();
            }
        }
    }

    results
        .into_iter()
        .map(|r| r.ok_or_else(|| anyhow!("embedding missing after batch call")))
        .collect()
}

/// Embed a single text through the cache.
pub async fn embed_one_cached(
    service: &dyn EmbeddingService,
    invoker: &ResilientInvoker,
    cache: &mut Cache<Vec<f32>>,
    model: &str,
    text: &str,
    observer: &dyn PipelineObserver,
) -> Result<Vec<f32>> {
    let results = embed_cached(
        service,
        invoker,
        cache,
        model,
        &[text.to_string()],
        observer,
    )
    .await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}
