//! # Local RAG CLI (`rag`)
//!
//! Answers one question from the local index and prints the answer on
//! stdout, followed by the chunks it was grounded on. Diagnostics go to
//! stderr through `tracing` (`RUST_LOG` controls verbosity).
//!
//! ## Usage
//!
//! ```bash
//! rag "How do deployments reach production?"
//! rag --config ./config/rag.toml "What is the retry policy?"
//! ```
//!
//! Exit status is `0` on success and `1` when no question is given or the
//! question cannot be answered (quota exhausted, retries exhausted, missing
//! index, ...).

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use local_rag::cache::Caches;
use local_rag::config::{load_config, Config};
use local_rag::error::service_error;
use local_rag::observer::TracingObserver;
use local_rag::openai::{self, OpenAIClient};
use local_rag::pipeline::{Answer, Pipeline};
use local_rag::store::VectorStore;

const DEFAULT_CONFIG_PATH: &str = "./config/rag.toml";

/// Answer a question from a pre-embedded local corpus.
#[derive(Parser)]
#[command(name = "rag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rag.toml`; built-in defaults apply when that
    /// file does not exist.
    #[arg(long)]
    config: Option<PathBuf>,

    /// The question to answer.
    question: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let question = match cli.question.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => q.to_string(),
        _ => {
            eprintln!("Usage: rag [--config <path>] \"<question>\"");
            return ExitCode::from(1);
        }
    };

    match run(cli.config.as_deref(), &question).await {
        Ok(answer) => {
            print_answer(&answer);
            ExitCode::SUCCESS
        }
        Err(e) => {
            match service_error(&e) {
                Some(se) if se.is_quota() => {
                    tracing::error!("quota exhausted, cannot continue: {}", se)
                }
                _ => tracing::error!("{:#}", e),
            }
            ExitCode::from(1)
        }
    }
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                load_config(default)
            } else {
                Ok(Config::default())
            }
        }
    }
}

async fn run(config_path: Option<&Path>, question: &str) -> Result<Answer> {
    let config = resolve_config(config_path)?;

    let store = VectorStore::load(&config.paths.index)?;
    tracing::info!(
        "loaded {} chunk(s) ({} dims) from {}",
        store.len(),
        store.dims(),
        config.paths.index.display()
    );

    let caches = Caches::open(&config.paths.cache_dir)?;
    let client = Arc::new(OpenAIClient::new(&config.service)?);
    tracing::debug!("service: {}", openai::describe(&config.models, &config.service));

    let mut pipeline = Pipeline::new(config, store, client.clone(), client, caches)?;
    let observer = TracingObserver;

    let result = pipeline.answer(question, &observer).await;

    // Keep whatever was paid for, even when the answer stage failed.
    if let Err(e) = pipeline.flush(&observer) {
        tracing::warn!("{:#}", e);
    }

    result.context("Failed to answer question")
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, hit) in answer.sources.iter().enumerate() {
            println!("  [{}] {} ({:.3})", i + 1, hit.item.id, hit.score);
        }
    }
}
