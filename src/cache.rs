//! Content-addressed caching of external-service results.
//!
//! Each cached value is keyed by a [`fingerprint`]: a SHA-256 over a
//! namespace tag plus the semantically relevant inputs of the call. Three
//! namespaces exist and can never collide because the tag is hashed in:
//!
//! | Namespace | Key inputs | Value |
//! |-----------|------------|-------|
//! | `embedding` | model, text | unit vector |
//! | `augment` | mode, model, question | rewrite list or hypothetical text |
//! | `answer` | model, question, context | answer text |
//!
//! Because the context text is part of the answer key, changing the
//! retrieved chunks invalidates cached answers without any explicit
//! invalidation step.
//!
//! Storage sits behind the [`KeyValueStore`] trait. [`JsonFileStore`] loads
//! one JSON object wholesale on open and writes it back wholesale on
//! [`flush`](KeyValueStore::flush); [`MemoryStore`] never persists.
//! Concurrent processes sharing a cache directory are not coordinated.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::observer::{PipelineEvent, PipelineObserver};

pub const EMBEDDING_NAMESPACE: &str = "embedding";
pub const AUGMENT_NAMESPACE: &str = "augment";
pub const ANSWER_NAMESPACE: &str = "answer";

/// Deterministic hex SHA-256 of a namespace and its inputs.
///
/// Every part is length-prefixed so `["ab", "c"]` and `["a", "bc"]` hash
/// differently.
pub fn fingerprint(namespace: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((namespace.len() as u64).to_le_bytes());
    hasher.update(namespace.as_bytes());
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub fn embedding_key(model: &str, text: &str) -> String {
    fingerprint(EMBEDDING_NAMESPACE, &[model, text])
}

pub fn augment_key(mode: &str, model: &str, question: &str) -> String {
    fingerprint(AUGMENT_NAMESPACE, &[mode, model, question])
}

pub fn answer_key(model: &str, question: &str, context: &str) -> String {
    fingerprint(ANSWER_NAMESPACE, &[model, question, context])
}

/// A flat fingerprint → value mapping with a load/flush lifecycle.
pub trait KeyValueStore<V>: Send {
    fn get(&self, key: &str) -> Option<&V>;
    fn put(&mut self, key: String, value: V);
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Persist every entry. A no-op for stores with nothing to write.
    fn flush(&mut self) -> Result<()>;
}

// ============ JSON file store ============

/// A whole-file JSON object store.
pub struct JsonFileStore<V> {
    path: PathBuf,
    entries: BTreeMap<String, V>,
    dirty: bool,
}

impl<V> JsonFileStore<V>
where
    V: Serialize + DeserializeOwned + Send,
{
    /// Load the store from `path`. A missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read cache file: {}", path.display()))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse cache file: {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<V> KeyValueStore<V> for JsonFileStore<V>
where
    V: Serialize + DeserializeOwned + Send,
{
    fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    fn put(&mut self, key: String, value: V) {
        self.entries.insert(key, value);
        self.dirty = true;
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create cache directory: {}", parent.display())
                })?;
            }
        }
        let json = serde_json::to_string(&self.entries)?;
        // Write beside the target and rename so a crash mid-write keeps the old file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write cache file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace cache file: {}", self.path.display()))?;
        self.dirty = false;
        Ok(())
    }
}

// ============ In-memory store ============

/// A store that lives only for the current process.
pub struct MemoryStore<V> {
    entries: HashMap<String, V>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send> KeyValueStore<V> for MemoryStore<V> {
    fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    fn put(&mut self, key: String, value: V) {
        self.entries.insert(key, value);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============ Named caches ============

/// A named store with per-run hit/miss counters.
pub struct Cache<V> {
    name: &'static str,
    store: Box<dyn KeyValueStore<V>>,
    hits: usize,
    misses: usize,
}

impl<V: Clone> Cache<V> {
    pub fn new(name: &'static str, store: Box<dyn KeyValueStore<V>>) -> Self {
        Self {
            name,
            store,
            hits: 0,
            misses: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up `key`, counting the hit or miss.
    pub fn lookup(&mut self, key: &str) -> Option<V> {
        match self.store.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: String, value: V) {
        self.store.put(key, value);
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    fn totals(&self) -> PipelineEvent {
        PipelineEvent::CacheTotals {
            cache: self.name,
            hits: self.hits,
            misses: self.misses,
            entries: self.len(),
        }
    }
}

/// Cached output of one augmentation strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AugmentEntry {
    Rewrites(Vec<String>),
    Hypothetical(String),
}

/// The three independent caches used by the pipeline.
pub struct Caches {
    pub embeddings: Cache<Vec<f32>>,
    pub augmentations: Cache<AugmentEntry>,
    pub answers: Cache<String>,
}

impl Caches {
    /// Open the JSON-file caches under `dir`. Missing files start empty.
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            embeddings: Cache::new(
                EMBEDDING_NAMESPACE,
                Box::new(JsonFileStore::<Vec<f32>>::open(dir.join("embeddings.json"))?),
            ),
            augmentations: Cache::new(
                AUGMENT_NAMESPACE,
                Box::new(JsonFileStore::<AugmentEntry>::open(
                    dir.join("augmentations.json"),
                )?),
            ),
            answers: Cache::new(
                ANSWER_NAMESPACE,
                Box::new(JsonFileStore::<String>::open(dir.join("answers.json"))?),
            ),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            embeddings: Cache::new(EMBEDDING_NAMESPACE, Box::new(MemoryStore::<Vec<f32>>::new())),
            augmentations: Cache::new(
                AUGMENT_NAMESPACE,
                Box::new(MemoryStore::<AugmentEntry>::new()),
            ),
            answers: Cache::new(ANSWER_NAMESPACE, Box::new(MemoryStore::<String>::new())),
        }
    }

    /// Report per-cache totals, then flush all three caches. Every cache is
    /// attempted; the first failure is returned.
    pub fn flush_all(&mut self, observer: &dyn PipelineObserver) -> Result<()> {
        observer.report(self.embeddings.totals());
        observer.report(self.augmentations.totals());
        observer.report(self.answers.totals());

        let results = [
            (self.embeddings.name(), self.embeddings.flush()),
            (self.augmentations.name(), self.augmentations.flush()),
            (self.answers.name(), self.answers.flush()),
        ];
        let mut first_err = None;
        for (cache, result) in results {
            if let Err(e) = result {
                observer.report(PipelineEvent::CacheFlushFailed {
                    cache,
                    error: format!("{:#}", e),
                });
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_deterministic() {
        let a = fingerprint("embedding", &["m", "hello"]);
        let b = fingerprint("embedding", &["m", "hello"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_namespaces_do_not_collide() {
        let e = embedding_key("m", "q");
        let a = answer_key("m", "q", "");
        let g = augment_key("m", "q", "");
        assert_ne!(e, a);
        assert_ne!(e, g);
        assert_ne!(a, g);
    }

    #[test]
    fn test_fingerprint_part_boundaries() {
        assert_ne!(
            fingerprint("ns", &["ab", "c"]),
            fingerprint("ns", &["a", "bc"])
        );
    }

    #[test]
    fn test_answer_key_depends_on_context() {
        assert_ne!(
            answer_key("m", "what?", "[1] old chunk"),
            answer_key("m", "what?", "[1] new chunk")
        );
    }

    #[test]
    fn test_json_store_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store: JsonFileStore<String> = JsonFileStore::open(tmp.path().join("none.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_json_store_flush_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("answers.json");

        let mut store: JsonFileStore<String> = JsonFileStore::open(&path).unwrap();
        store.put("k1".to_string(), "v1".to_string());
        store.flush().unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded: JsonFileStore<String> = JsonFileStore::open(&path).unwrap();
        assert_eq!(reloaded.get("k1").map(String::as_str), Some("v1"));
    }

    #[test]
    fn test_json_store_corrupt_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("embeddings.json");
        std::fs::write(&path, "{not json").unwrap();
        let result: Result<JsonFileStore<Vec<f32>>> = JsonFileStore::open(&path);
        assert!(result.is_err());
    }

    #[test]
    fn test_clean_store_does_not_write() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("answers.json");
        let mut store: JsonFileStore<String> = JsonFileStore::open(&path).unwrap();
        store.flush().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_cache_counts_hits_and_misses() {
        let mut cache: Cache<String> =
            Cache::new("answer", Box::new(MemoryStore::<String>::new()));
        assert_eq!(cache.lookup("k"), None);
        cache.insert("k".to_string(), "v".to_string());
        assert_eq!(cache.lookup("k").as_deref(), Some("v"));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_augment_entry_untagged_roundtrip() {
        let rewrites = AugmentEntry::Rewrites(vec!["a".to_string()]);
        let text = AugmentEntry::Hypothetical("b".to_string());
        assert_eq!(serde_json::to_string(&rewrites).unwrap(), r#"["a"]"#);
        assert_eq!(serde_json::to_string(&text).unwrap(), r#""b""#);
        let back: AugmentEntry = serde_json::from_str(r#""b""#).unwrap();
        assert_eq!(back, text);
    }

    #[test]
    fn test_caches_persist_across_open() {
        let tmp = TempDir::new().unwrap();
        let obs = RecordingObserver::new();
        {
            let mut caches = Caches::open(tmp.path()).unwrap();
            caches
                .embeddings
                .insert(embedding_key("m", "t"), vec![1.0, 0.0]);
            caches.answers.insert(answer_key("m", "q", "c"), "a".to_string());
            caches.flush_all(&obs).unwrap();
        }
        let mut caches = Caches::open(tmp.path()).unwrap();
        assert_eq!(
            caches.embeddings.lookup(&embedding_key("m", "t")),
            Some(vec![1.0, 0.0])
        );
        assert_eq!(caches.answers.len(), 1);
        assert!(caches.augmentations.is_empty());
        assert!(!obs
            .events()
            .iter()
            .any(|e| matches!(e, PipelineEvent::CacheFlushFailed { .. })));
    }

    #[test]
    fn test_flush_all_reports_run_totals() {
        let mut caches = Caches::in_memory();
        caches.answers.lookup("missing");
        caches.answers.insert("k".to_string(), "v".to_string());
        caches.answers.lookup("k");
        caches.answers.lookup("k");

        let obs = RecordingObserver::new();
        caches.flush_all(&obs).unwrap();

        let totals: Vec<_> = obs
            .events()
            .into_iter()
            .filter(|e| matches!(e, PipelineEvent::CacheTotals { .. }))
            .collect();
        assert_eq!(totals.len(), 3);
        assert!(totals.contains(&PipelineEvent::CacheTotals {
            cache: ANSWER_NAMESPACE,
            hits: 2,
            misses: 1,
            entries: 1,
        }));
        assert!(totals.contains(&PipelineEvent::CacheTotals {
            cache: EMBEDDING_NAMESPACE,
            hits: 0,
            misses: 0,
            entries: 0,
        }));
    }
}
