//! Query augmentation: multi-query rewrites and HyDE.
//!
//! Two independent strategies widen recall before vector search:
//!
//! - **Rewrite** asks the generation service for alternative search
//!   phrasings as a JSON object with a `queries` list. Output that cannot be
//!   parsed yields no rewrites; it is reported, never raised.
//! - **HyDE** asks for a short hypothetical answer whose embedding tends to
//!   land near real answer passages. Any non-empty text is used as-is
//!   (trimmed).
//!
//! Both are cached by `(mode, model, question)`; rewrites are also keyed by
//! the requested rewrite count. Both degrade gracefully: a quota failure is
//! reported to the observer and the strategy contributes nothing, leaving
//! the original question as the only query. Other service failures
//! propagate.

use anyhow::Result;
use serde_json::Value;

use crate::cache::{augment_key, AugmentEntry, Cache};
use crate::error::ServiceError;
use crate::generation::{GenerationRequest, GenerationService};
use crate::observer::{PipelineEvent, PipelineObserver};
use crate::retry::ResilientInvoker;

pub const REWRITE_MODE: &str = "rewrite";
pub const HYDE_MODE: &str = "hyde";

pub const REWRITE_INSTRUCTION: &str = "You rewrite questions into search queries for a document \
retrieval system. Produce alternative phrasings that use different vocabulary, synonyms, or a \
more specific focus than the original question. Respond with ONLY a JSON object of the form \
{\"queries\": [\"...\", \"...\"]}.";

pub const HYDE_INSTRUCTION: &str = "Write a short passage (3 to 5 sentences) that plausibly answers \
the question, in the style of technical documentation. It will be used only to search for real \
documents, so prefer concrete terminology over hedging.";

/// Generates query variants through the generation service.
pub struct QueryAugmenter<'a> {
    service: &'a dyn GenerationService,
    invoker: &'a ResilientInvoker,
    model: &'a str,
    temperature: f32,
    max_rewrites: usize,
}

impl<'a> QueryAugmenter<'a> {
    pub fn new(
        service: &'a dyn GenerationService,
        invoker: &'a ResilientInvoker,
        model: &'a str,
        temperature: f32,
        max_rewrites: usize,
    ) -> Self {
        Self {
            service,
            invoker,
            model,
            temperature,
            max_rewrites,
        }
    }

    /// Alternative search phrasings for `question`, at most `max_rewrites`.
    pub async fn rewrites(
        &self,
        cache: &mut Cache<AugmentEntry>,
        question: &str,
        observer: &dyn PipelineObserver,
    ) -> Result<Vec<String>> {
        if self.max_rewrites == 0 {
            return Ok(Vec::new());
        }

        // The requested count shapes the prompt, so it is part of the key.
        let mode = format!("{}:{}", REWRITE_MODE, self.max_rewrites);
        let key = augment_key(&mode, self.model, question);
        if let Some(AugmentEntry::Rewrites(queries)) = lookup(cache, &key, observer) {
            return Ok(self.limit(queries));
        }

        let request = GenerationRequest::json(
            self.model,
            REWRITE_INSTRUCTION,
            format!(
                "Question: {}\n\nReturn up to {} alternative search queries.",
                question, self.max_rewrites
            ),
            self.temperature,
        );
        let raw = match self.call(REWRITE_MODE, &request, observer).await? {
            Some(raw) => raw,
            None => return Ok(Vec::new()),
        };

        match parse_rewrites(&raw) {
            Some(queries) => {
                let queries = self.limit(queries);
                cache.insert(key, AugmentEntry::Rewrites(queries.clone()));
                Ok(queries)
            }
            None => {
                observer.report(PipelineEvent::RewriteParseFailed { raw });
                Ok(Vec::new())
            }
        }
    }

    /// A hypothetical answer to embed, or `None` if the service returned nothing.
    pub async fn hypothetical(
        &self,
        cache: &mut Cache<AugmentEntry>,
        question: &str,
        observer: &dyn PipelineObserver,
    ) -> Result<Option<String>> {
        let key = augment_key(HYDE_MODE, self.model, question);
        if let Some(AugmentEntry::Hypothetical(text)) = lookup(cache, &key, observer) {
            return Ok(Some(text));
        }

        let request =
            GenerationRequest::text(self.model, HYDE_INSTRUCTION, question, self.temperature);
        let raw = match self.call(HYDE_MODE, &request, observer).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let text = raw.trim();
        if text.is_empty() {
            return Ok(None);
        }
        cache.insert(key, AugmentEntry::Hypothetical(text.to_string()));
        Ok(Some(text.to_string()))
    }

    /// Run one generation call. `Ok(None)` means quota degradation.
    async fn call(
        &self,
        mode: &'static str,
        request: &GenerationRequest,
        observer: &dyn PipelineObserver,
    ) -> Result<Option<String>, ServiceError> {
        match self
            .invoker
            .invoke(mode, observer, || self.service.complete(request))
            .await
        {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.is_quota() => {
                observer.report(PipelineEvent::AugmentationDegraded {
                    mode,
                    reason: e.to_string(),
                });
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn limit(&self, mut queries: Vec<String>) -> Vec<String> {
        queries.truncate(self.max_rewrites);
        queries
    }
}

fn lookup(
    cache: &mut Cache<AugmentEntry>,
    key: &str,
    observer: &dyn PipelineObserver,
) -> Option<AugmentEntry> {
    let found = cache.lookup(key);
    observer.report(PipelineEvent::CacheLookup {
        cache: cache.name(),
        hits: usize::from(found.is_some()),
        misses: usize::from(found.is_none()),
    });
    found
}

/// Extract the rewrite list from model output.
///
/// Accepts `{"queries": [...]}` (or any object whose first array field
/// holds the strings) and a bare JSON array, optionally wrapped in prose
/// or a code fence. Returns `None` when nothing parseable is found.
pub fn parse_rewrites(raw: &str) -> Option<Vec<String>> {
    let value = extract_json(raw)?;
    let list = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("queries") {
            Some(Value::Array(items)) => items,
            _ => map.values().find_map(Value::as_array)?,
        },
        _ => return None,
    };

    Some(
        list.iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

fn extract_json(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(raw.trim()) {
        return Some(value);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (raw.find(open), raw.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&raw[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Assemble the query variant set: the question, then rewrites, then the
/// hypothetical answer. Blank entries are dropped; duplicates are kept.
pub fn query_variants(
    question: &str,
    rewrites: Vec<String>,
    hypothetical: Option<String>,
) -> Vec<String> {
    std::iter::once(question.to_string())
        .chain(rewrites)
        .chain(hypothetical)
        .filter(|v| !v.trim().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::error::ErrorKind;
    use crate::observer::RecordingObserver;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns scripted results in order and counts calls.
    struct ScriptedService {
        replies: Mutex<Vec<Result<String, ServiceError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedService {
        fn new(replies: Vec<Result<String, ServiceError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl GenerationService for ScriptedService {
        async fn complete(&self, _request: &GenerationRequest) -> Result<String, ServiceError> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok(String::new())
            } else {
                replies.remove(0)
            }
        }
    }

    fn cache() -> Cache<AugmentEntry> {
        Cache::new("augment", Box::new(MemoryStore::<AugmentEntry>::new()))
    }

    #[test]
    fn test_parse_object() {
        let parsed = parse_rewrites(r#"{"queries": ["a b", " c ", ""]}"#).unwrap();
        assert_eq!(parsed, vec!["a b", "c"]);
    }

    #[test]
    fn test_parse_other_field_name() {
        let parsed = parse_rewrites(r#"{"rewrites": ["x"]}"#).unwrap();
        assert_eq!(parsed, vec!["x"]);
    }

    #[test]
    fn test_parse_bare_array_in_prose() {
        let parsed = parse_rewrites("Sure! [\"one\", \"two\"] Hope that helps.").unwrap();
        assert_eq!(parsed, vec!["one", "two"]);
    }

    #[test]
    fn test_parse_code_fence() {
        let parsed = parse_rewrites("```json\n{\"queries\": [\"q\"]}\n```").unwrap();
        assert_eq!(parsed, vec!["q"]);
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_rewrites("I cannot help with that."), None);
        assert_eq!(parse_rewrites("{\"queries\": "), None);
        assert_eq!(parse_rewrites("42"), None);
    }

    #[test]
    fn test_query_variants() {
        let variants = query_variants(
            "q",
            vec!["r1".to_string(), "  ".to_string(), "q".to_string()],
            Some("hypo".to_string()),
        );
        assert_eq!(variants, vec!["q", "r1", "q", "hypo"]);
        assert_eq!(query_variants("q", Vec::new(), None), vec!["q"]);
    }

    #[tokio::test]
    async fn test_rewrites_limited_and_cached() {
        let service = ScriptedService::new(vec![Ok(
            r#"{"queries": ["a", "b", "c", "d"]}"#.to_string()
        )]);
        let invoker = ResilientInvoker::new(RetryPolicy::immediate(0));
        let obs = RecordingObserver::new();
        let augmenter = QueryAugmenter::new(&service, &invoker, "gen", 0.3, 3);
        let mut cache = cache();

        let first = augmenter.rewrites(&mut cache, "q", &obs).await.unwrap();
        let second = augmenter.rewrites(&mut cache, "q", &obs).await.unwrap();

        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(first, second);
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_raising_max_rewrites_bypasses_cached_list() {
        let service = ScriptedService::new(vec![
            Ok(r#"{"queries": ["a"]}"#.to_string()),
            Ok(r#"{"queries": ["a", "b", "c"]}"#.to_string()),
        ]);
        let invoker = ResilientInvoker::new(RetryPolicy::immediate(0));
        let obs = RecordingObserver::new();
        let mut cache = cache();

        let narrow = QueryAugmenter::new(&service, &invoker, "gen", 0.3, 1);
        assert_eq!(narrow.rewrites(&mut cache, "q", &obs).await.unwrap(), vec!["a"]);

        let wide = QueryAugmenter::new(&service, &invoker, "gen", 0.3, 3);
        let rewrites = wide.rewrites(&mut cache, "q", &obs).await.unwrap();
        assert_eq!(rewrites, vec!["a", "b", "c"]);
        assert_eq!(service.calls(), 2);

        // Each count keeps its own entry.
        assert_eq!(narrow.rewrites(&mut cache, "q", &obs).await.unwrap(), vec!["a"]);
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn test_rewrite_parse_failure_is_recovered() {
        let service = ScriptedService::new(vec![Ok("not json at all".to_string())]);
        let invoker = ResilientInvoker::new(RetryPolicy::immediate(0));
        let obs = RecordingObserver::new();
        let augmenter = QueryAugmenter::new(&service, &invoker, "gen", 0.3, 3);
        let mut cache = cache();

        let rewrites = augmenter.rewrites(&mut cache, "q", &obs).await.unwrap();
        assert!(rewrites.is_empty());
        assert!(cache.is_empty());
        assert!(obs
            .events()
            .iter()
            .any(|e| matches!(e, PipelineEvent::RewriteParseFailed { .. })));
    }

    #[tokio::test]
    async fn test_quota_degrades_both_strategies() {
        let service = ScriptedService::new(vec![
            Err(ServiceError::quota("rewrite", "insufficient_quota")),
            Err(ServiceError::quota("hyde", "insufficient_quota")),
        ]);
        let invoker = ResilientInvoker::new(RetryPolicy::immediate(4));
        let obs = RecordingObserver::new();
        let augmenter = QueryAugmenter::new(&service, &invoker, "gen", 0.3, 3);
        let mut cache = cache();

        assert!(augmenter
            .rewrites(&mut cache, "q", &obs)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            augmenter.hypothetical(&mut cache, "q", &obs).await.unwrap(),
            None
        );
        assert_eq!(service.calls(), 2);
        assert_eq!(obs.retry_count(), 0);
        let degraded = obs
            .events()
            .iter()
            .filter(|e| matches!(e, PipelineEvent::AugmentationDegraded { .. }))
            .count();
        assert_eq!(degraded, 2);
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let service = ScriptedService::new(vec![Err(ServiceError::other("hyde", "400"))]);
        let invoker = ResilientInvoker::new(RetryPolicy::immediate(4));
        let obs = RecordingObserver::new();
        let augmenter = QueryAugmenter::new(&service, &invoker, "gen", 0.3, 3);
        let mut cache = cache();

        let err = augmenter
            .hypothetical(&mut cache, "q", &obs)
            .await
            .unwrap_err();
        assert_eq!(
            crate::error::service_error(&err).map(|e| e.kind),
            Some(ErrorKind::Other)
        );
    }

    #[tokio::test]
    async fn test_hypothetical_trimmed_and_cached() {
        let service = ScriptedService::new(vec![Ok("  A passage.\n".to_string())]);
        let invoker = ResilientInvoker::new(RetryPolicy::immediate(0));
        let obs = RecordingObserver::new();
        let augmenter = QueryAugmenter::new(&service, &invoker, "gen", 0.3, 3);
        let mut cache = cache();

        let first = augmenter.hypothetical(&mut cache, "q", &obs).await.unwrap();
        let second = augmenter.hypothetical(&mut cache, "q", &obs).await.unwrap();
        assert_eq!(first.as_deref(), Some("A passage."));
        assert_eq!(first, second);
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_hypothetical_is_none() {
        let service = ScriptedService::new(vec![Ok("   ".to_string())]);
        let invoker = ResilientInvoker::new(RetryPolicy::immediate(0));
        let obs = RecordingObserver::new();
        let augmenter = QueryAugmenter::new(&service, &invoker, "gen", 0.3, 3);
        let mut cache = cache();

        assert_eq!(
            augmenter.hypothetical(&mut cache, "q", &obs).await.unwrap(),
            None
        );
    }
}
