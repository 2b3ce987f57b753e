//! Pipeline progress and diagnostics reporting.
//!
//! The orchestrator and the layers under it never log directly. They emit
//! [`PipelineEvent`]s to a [`PipelineObserver`] handed in by the caller, so
//! each `answer` invocation gets its own reporting lifecycle and tests can
//! assert on what happened (e.g. how many retries were scheduled).
//!
//! - [`TracingObserver`] forwards events to `tracing` at the event's severity.
//! - [`RecordingObserver`] keeps every event in memory.

use std::sync::Mutex;
use std::time::Duration;

use crate::error::ErrorKind;

/// Severity of a [`PipelineEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Something worth reporting while answering a question.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A pipeline stage is starting.
    StageStarted { stage: &'static str },
    /// Outcome of a cache lookup for one batch.
    CacheLookup {
        cache: &'static str,
        hits: usize,
        misses: usize,
    },
    /// A retryable failure occurred; the call will be retried after `delay`.
    RetryScheduled {
        service: String,
        attempt: u32,
        delay: Duration,
        kind: ErrorKind,
    },
    /// An augmentation strategy was skipped because the service refused it.
    AugmentationDegraded { mode: &'static str, reason: String },
    /// The rewrite response could not be parsed; no rewrites are used.
    RewriteParseFailed { raw: String },
    /// Multi-query search finished.
    SearchCompleted { variants: usize, hits: usize },
    /// Diversity selection finished.
    SelectionCompleted { candidates: usize, picked: usize },
    /// Hit/miss totals of one cache for the run, reported when caches are flushed.
    CacheTotals {
        cache: &'static str,
        hits: usize,
        misses: usize,
        entries: usize,
    },
    /// Persisting a cache failed.
    CacheFlushFailed { cache: &'static str, error: String },
}

impl PipelineEvent {
    pub fn severity(&self) -> Severity {
        match self {
            PipelineEvent::StageStarted { .. } | PipelineEvent::CacheLookup { .. } => {
                Severity::Debug
            }
            PipelineEvent::SearchCompleted { .. }
            | PipelineEvent::SelectionCompleted { .. }
            | PipelineEvent::CacheTotals { .. } => Severity::Info,
            PipelineEvent::RetryScheduled { .. }
            | PipelineEvent::AugmentationDegraded { .. }
            | PipelineEvent::RewriteParseFailed { .. } => Severity::Warn,
            PipelineEvent::CacheFlushFailed { .. } => Severity::Error,
        }
    }

    /// One-line human description.
    pub fn message(&self) -> String {
        match self {
            PipelineEvent::StageStarted { stage } => format!("stage {}", stage),
            PipelineEvent::CacheLookup {
                cache,
                hits,
                misses,
            } => format!("{} cache: {} hit(s), {} miss(es)", cache, hits, misses),
            PipelineEvent::RetryScheduled {
                service,
                attempt,
                delay,
                kind,
            } => format!(
                "{} failed ({}), retry {} in {}ms",
                service,
                kind,
                attempt,
                delay.as_millis()
            ),
            PipelineEvent::AugmentationDegraded { mode, reason } => {
                format!("{} augmentation skipped: {}", mode, reason)
            }
            PipelineEvent::RewriteParseFailed { raw } => {
                format!("could not parse rewrite output: {}", truncate(raw, 200))
            }
            PipelineEvent::SearchCompleted { variants, hits } => {
                format!("searched {} variant(s), {} merged hit(s)", variants, hits)
            }
            PipelineEvent::SelectionCompleted { candidates, picked } => {
                format!("selected {} of {} candidate(s)", picked, candidates)
            }
            PipelineEvent::CacheTotals {
                cache,
                hits,
                misses,
                entries,
            } => format!(
                "{} cache: {} hit(s), {} miss(es) this run, {} entries",
                cache, hits, misses, entries
            ),
            PipelineEvent::CacheFlushFailed { cache, error } => {
                format!("failed to persist {} cache: {}", cache, error)
            }
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

/// Receives pipeline events. Implementations must be cheap; they are called inline.
pub trait PipelineObserver: Send + Sync {
    fn report(&self, event: PipelineEvent);
}

/// Forwards events to the `tracing` subscriber installed by the binary.
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn report(&self, event: PipelineEvent) {
        let message = event.message();
        match event.severity() {
            Severity::Debug => tracing::debug!("{}", message),
            Severity::Info => tracing::info!("{}", message),
            Severity::Warn => tracing::warn!("{}", message),
            Severity::Error => tracing::error!("{}", message),
        }
    }
}

/// Collects events in memory.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of [`PipelineEvent::RetryScheduled`] events seen.
    pub fn retry_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, PipelineEvent::RetryScheduled { .. }))
            .count()
    }
}

impl PipelineObserver for RecordingObserver {
    fn report(&self, event: PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
