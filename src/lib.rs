//! # Local RAG
//!
//! Answer natural-language questions from a pre-embedded local corpus.
//!
//! The question is expanded into several query variants, each variant is
//! embedded and searched against the in-memory index, the merged hits are
//! thinned out with MMR, and only the surviving passages are handed to the
//! generation service as context.
//!
//! ## Architecture
//!
//! ```text
//! question ──▶ augment ──▶ embed ──▶ search_multi ──▶ MMR ──▶ context ──▶ answer
//!             (rewrite,   (cached,   (max score       (k,     (labeled   (cached)
//!              HyDE)       1 batch)   per chunk)       λ)      chunks)
//! ```
//!
//! Every external call passes through [`retry::ResilientInvoker`], which
//! classifies failures ([`error::ErrorKind`]) and retries rate limits and
//! transient errors with capped exponential backoff.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Brute-force vector search over the index file |
//! | [`embedding`] | Embedding service trait, vector math, cached batch embedding |
//! | [`generation`] | Generation service trait |
//! | [`openai`] | OpenAI-compatible HTTP backend |
//! | [`error`] | Service failure classification |
//! | [`retry`] | Backoff and retry |
//! | [`cache`] | Content-addressed caches |
//! | [`augment`] | Query rewriting and HyDE |
//! | [`select`] | MMR diversity selection |
//! | [`context`] | Prompt context assembly |
//! | [`observer`] | Event reporting |
//! | [`pipeline`] | Orchestration |

pub mod augment;
pub mod cache;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod models;
pub mod observer;
pub mod openai;
pub mod pipeline;
pub mod retry;
pub mod select;
pub mod store;
