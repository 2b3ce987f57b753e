//! Question → answer orchestration.
//!
//! ```text
//! question
//!   │  QueryAugmenter (rewrite + HyDE, cached, quota-tolerant)
//!   ▼
//! variants ──▶ embed_cached (one batch) ──▶ VectorStore::search_multi
//!                                                  │
//!                     pick_diverse (MMR) ◀─────────┘
//!                          │
//!                    build_context ──▶ answer cache / generation ──▶ Answer
//! ```
//!
//! Stages run strictly one after another. Every external call goes through
//! the [`ResilientInvoker`] and a content-addressed cache. Caches are only
//! written to disk by [`Pipeline::flush`].

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use crate::augment::{query_variants, QueryAugmenter};
use crate::cache::{answer_key, Caches};
use crate::config::Config;
use crate::context::build_context;
use crate::embedding::{embed_cached, EmbeddingService};
use crate::generation::{GenerationRequest, GenerationService};
use crate::models::Hit;
use crate::observer::{PipelineEvent, PipelineObserver};
use crate::retry::{ResilientInvoker, RetryPolicy};
use crate::select::{pick_diverse, DiversityParams};
use crate::store::VectorStore;

pub const ANSWER_INSTRUCTION: &str = "Answer the user's question using only the provided \
context. Cite the passages you rely on by their bracketed number, e.g. [2]. If the context does \
not contain the answer, say that you don't know instead of guessing.";

/// Result of one [`Pipeline::answer`] call.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Query variants used for retrieval, original question first.
    pub variants: Vec<String>,
    /// Chunks placed in the context, in context order.
    pub sources: Vec<Hit>,
    /// The answer came from the answer cache.
    pub cached: bool,
}

pub struct Pipeline {
    config: Config,
    store: VectorStore,
    embedder: Arc<dyn EmbeddingService>,
    generator: Arc<dyn GenerationService>,
    invoker: ResilientInvoker,
    caches: Caches,
}

impl Pipeline {
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(
        config: Config,
        store: VectorStore,
        embedder: Arc<dyn EmbeddingService>,
        generator: Arc<dyn GenerationService>,
        caches: Caches,
    ) -> Result<Self> {
        config.validate()?;
        let invoker = ResilientInvoker::new(RetryPolicy::from_config(&config.retry));
        Ok(Self {
            config,
            store,
            embedder,
            generator,
            invoker,
            caches,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    /// Persist all caches.
    pub fn flush(&mut self, observer: &dyn PipelineObserver) -> Result<()> {
        self.caches.flush_all(observer)
    }

    /// Answer `question` from the indexed corpus.
    ///
    /// # Errors
    ///
    /// Fails on an empty question, and on any service failure outside the
    /// augmentation stage once retries are exhausted (quota failures are
    /// never retried). The [`ServiceError`](crate::error::ServiceError) is
    /// kept in the error chain.
    pub async fn answer(
        &mut self,
        question: &str,
        observer: &dyn PipelineObserver,
    ) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            bail!("question must not be empty");
        }

        // ============ Augment ============

        observer.report(PipelineEvent::StageStarted { stage: "augment" });
        let augmenter = QueryAugmenter::new(
            self.generator.as_ref(),
            &self.invoker,
            &self.config.models.generation,
            self.config.service.augment_temperature,
            self.config.augment.max_rewrites,
        );
        let rewrites = if self.config.augment.rewrite {
            augmenter
                .rewrites(&mut self.caches.augmentations, question, observer)
                .await?
        } else {
            Vec::new()
        };
        let hypothetical = if self.config.augment.hyde {
            augmenter
                .hypothetical(&mut self.caches.augmentations, question, observer)
                .await?
        } else {
            None
        };
        let variants = query_variants(question, rewrites, hypothetical);

        // ============ Retrieve ============

        observer.report(PipelineEvent::StageStarted { stage: "embed" });
        let vectors = embed_cached(
            self.embedder.as_ref(),
            &self.invoker,
            &mut self.caches.embeddings,
            &self.config.models.embedding,
            &variants,
            observer,
        )
        .await
        .context("Failed to embed query variants")?;
        check_dims(&vectors, self.store.dims())?;

        observer.report(PipelineEvent::StageStarted { stage: "search" });
        let merged = self.store.search_multi(
            &vectors,
            self.config.retrieval.per_query_top_k,
            self.config.retrieval.final_top_k,
        );
        observer.report(PipelineEvent::SearchCompleted {
            variants: vectors.len(),
            hits: merged.len(),
        });

        let sources = pick_diverse(&merged, DiversityParams::from_config(&self.config.diversity));
        observer.report(PipelineEvent::SelectionCompleted {
            candidates: merged.len(),
            picked: sources.len(),
        });

        // ============ Generate ============

        observer.report(PipelineEvent::StageStarted { stage: "answer" });
        let context = build_context(&sources);
        let model = &self.config.models.generation;
        let key = answer_key(model, question, &context);

        let cached = self.caches.answers.lookup(&key);
        observer.report(PipelineEvent::CacheLookup {
            cache: self.caches.answers.name(),
            hits: usize::from(cached.is_some()),
            misses: usize::from(cached.is_none()),
        });
        if let Some(text) = cached {
            return Ok(Answer {
                text,
                variants,
                sources,
                cached: true,
            });
        }

        let request = GenerationRequest::text(
            model.as_str(),
            ANSWER_INSTRUCTION,
            answer_input(question, &context),
            self.config.service.answer_temperature,
        );
        let generator = self.generator.as_ref();
        let text = self
            .invoker
            .invoke("answer", observer, || generator.complete(&request))
            .await
            .context("Failed to generate answer")?;
        let text = text.trim().to_string();

        if !text.is_empty() {
            self.caches.answers.insert(key, text.clone());
        }

        Ok(Answer {
            text,
            variants,
            sources,
            cached: false,
        })
    }
}

/// Every query vector must match the index dimensionality.
fn check_dims(vectors: &[Vec<f32>], index_dims: usize) -> Result<()> {
    if index_dims == 0 {
        return Ok(());
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != index_dims) {
        bail!(
            "query embedding has {} dimensions but the index has {}; \
             was the index built with a different embedding model?",
            v.len(),
            index_dims
        );
    }
    Ok(())
}

/// User turn for the answer request.
fn answer_input(question: &str, context: &str) -> String {
    let context = if context.is_empty() {
        "(no relevant passages were found)"
    } else {
        context
    };
    format!("Context:\n{}\n\nQuestion: {}", context, question)
}
