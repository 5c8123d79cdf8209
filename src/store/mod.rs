//! In-memory document store backed by one JSON file per collection.
//!
//! Every mutation happens synchronously against the in-memory copy and marks
//! the collection dirty. Dirty collections are written by a trailing-edge
//! debounced flush task, and once more unconditionally on shutdown.

pub mod persistence;
pub mod query;

pub use query::{Filter, Update, ID_FIELD};

use keepalive_core::types::Record;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// A single stored record.
pub type Document = serde_json::Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create storage directory {}: {source}", path.display())]
    StorageDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no matching record in `{0}`")]
    NotFound(String),
    #[error("duplicate key in `{0}`")]
    DuplicateKey(String),
    #[error("field `{0}` is not an array")]
    NotAnArray(String),
    #[error("record does not serialize to a JSON object")]
    NotAnObject,
    #[error("malformed record in `{collection}`: {source}")]
    Decode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Quiet period after the last write before dirty collections are flushed.
    pub flush_debounce: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { flush_debounce: Duration::from_millis(500) }
    }
}

/// Outcome of one flush cycle.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: Vec<String>,
    /// Collections that failed to persist and stay dirty.
    pub failed: Vec<String>,
}

struct StoreInner {
    collections: HashMap<String, Vec<Document>>,
    dirty: BTreeSet<String>,
}

pub struct DocumentStore {
    dir: PathBuf,
    options: StoreOptions,
    inner: Mutex<StoreInner>,
    flush_signal: Notify,
    /// Serializes flush cycles between the debounce task and shutdown.
    flush_cycle: Mutex<()>,
    flush_count: AtomicU64,
    flusher: Mutex<Option<tokio::task::AbortHandle>>,
}

impl DocumentStore {
    /// Create the storage directory and load each named collection.
    ///
    /// Only a failure to create the directory is fatal; unreadable or
    /// corrupt collection files load as empty.
    pub fn open(
        dir: impl Into<PathBuf>,
        collections: &[&str],
        options: StoreOptions,
    ) -> Result<Arc<Self>, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::StorageDir {
            path: dir.clone(),
            source,
        })?;

        let mut loaded = HashMap::new();
        for name in collections {
            let docs = persistence::load_collection(&persistence::collection_path(&dir, name));
            log::debug!("Loaded {} records from collection `{}`", docs.len(), name);
            loaded.insert(name.to_string(), docs);
        }

        Ok(Arc::new(Self {
            dir,
            options,
            inner: Mutex::new(StoreInner {
                collections: loaded,
                dirty: BTreeSet::new(),
            }),
            flush_signal: Notify::new(),
            flush_cycle: Mutex::new(()),
            flush_count: AtomicU64::new(0),
            flusher: Mutex::new(None),
        }))
    }

    // ── Raw document API ────────────────────────────────────────────────

    /// Snapshot of a whole collection.
    pub fn read(&self, collection: &str) -> Vec<Document> {
        self.inner
            .lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace a whole collection.
    pub fn write(&self, collection: &str, docs: Vec<Document>) {
        let mut inner = self.inner.lock();
        inner.collections.insert(collection.to_string(), docs);
        self.mark_dirty(&mut inner, collection);
    }

    pub fn find(&self, collection: &str, filter: &Filter) -> Vec<Document> {
        let inner = self.inner.lock();
        inner
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn find_one(&self, collection: &str, filter: &Filter) -> Option<Document> {
        let inner = self.inner.lock();
        inner
            .collections
            .get(collection)?
            .iter()
            .find(|d| filter.matches(d))
            .cloned()
    }

    pub fn count(&self, collection: &str, filter: &Filter) -> usize {
        let inner = self.inner.lock();
        inner
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count())
            .unwrap_or(0)
    }

    pub fn insert(&self, collection: &str, doc: Document) {
        let mut inner = self.inner.lock();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        self.mark_dirty(&mut inner, collection);
    }

    /// Insert `doc` unless a record already matches `unique`.
    pub fn create_unique(
        &self,
        collection: &str,
        unique: &Filter,
        doc: Document,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let docs = inner.collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| unique.matches(d)) {
            return Err(StoreError::DuplicateKey(collection.to_string()));
        }
        docs.push(doc);
        self.mark_dirty(&mut inner, collection);
        Ok(())
    }

    /// Apply `update` to the record whose `id` equals `id`, returning the
    /// updated copy.
    pub fn update_one(
        &self,
        collection: &str,
        id: impl Into<Value>,
        update: Update,
    ) -> Result<Document, StoreError> {
        let by_id = Filter::by_id(id);
        let mut inner = self.inner.lock();
        let doc = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| by_id.matches(d)))
            .ok_or_else(|| StoreError::NotFound(collection.to_string()))?;

        let mut updated = doc.clone();
        update.apply(&mut updated)?;
        *doc = updated.clone();
        self.mark_dirty(&mut inner, collection);
        Ok(updated)
    }

    /// Remove the first record matching `filter`. Returns whether one was removed.
    pub fn delete_one(&self, collection: &str, filter: &Filter) -> bool {
        let mut inner = self.inner.lock();
        let Some(docs) = inner.collections.get_mut(collection) else {
            return false;
        };
        let Some(index) = docs.iter().position(|d| filter.matches(d)) else {
            return false;
        };
        docs.remove(index);
        self.mark_dirty(&mut inner, collection);
        true
    }

    // ── Typed API ───────────────────────────────────────────────────────

    /// All records of `T`'s collection. Malformed records are skipped.
    pub fn read_as<T: Record>(&self) -> Vec<T> {
        self.find_as(&Filter::new())
    }

    pub fn find_as<T: Record>(&self, filter: &Filter) -> Vec<T> {
        self.find(T::COLLECTION, filter)
            .into_iter()
            .filter_map(|doc| match from_document(T::COLLECTION, doc) {
                Ok(record) => Some(record),
                Err(e) => {
                    log::warn!("Skipping record: {}", e);
                    None
                }
            })
            .collect()
    }

    pub fn find_one_as<T: Record>(&self, filter: &Filter) -> Option<T> {
        let doc = self.find_one(T::COLLECTION, filter)?;
        match from_document(T::COLLECTION, doc) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping record: {}", e);
                None
            }
        }
    }

    pub fn create_unique_record<T: Record>(
        &self,
        unique: &Filter,
        record: &T,
    ) -> Result<(), StoreError> {
        self.create_unique(T::COLLECTION, unique, to_document(record)?)
    }

    pub fn update_record<T: Record>(
        &self,
        id: impl Into<Value>,
        update: Update,
    ) -> Result<T, StoreError> {
        let doc = self.update_one(T::COLLECTION, id, update)?;
        from_document(T::COLLECTION, doc)
    }

    // ── Persistence ─────────────────────────────────────────────────────

    fn mark_dirty(&self, inner: &mut StoreInner, collection: &str) {
        inner.dirty.insert(collection.to_string());
        self.flush_signal.notify_one();
    }

    /// Whether any collection has unflushed changes.
    pub fn has_pending_writes(&self) -> bool {
        !self.inner.lock().dirty.is_empty()
    }

    /// Number of flush cycles that wrote at least one collection.
    pub fn flush_count(&self) -> u64 {
        self.flush_count.load(Ordering::Relaxed)
    }

    /// Write every dirty collection to its backing file.
    ///
    /// A collection that fails to persist stays dirty for the next cycle and
    /// never prevents the others from being written.
    pub fn flush(&self) -> FlushReport {
        let _cycle = self.flush_cycle.lock();

        let pending: Vec<(String, serde_json::Result<String>)> = {
            let mut inner = self.inner.lock();
            let dirty = std::mem::take(&mut inner.dirty);
            dirty
                .into_iter()
                .map(|name| {
                    let rendered = persistence::render_collection(
                        inner.collections.get(&name).map(Vec::as_slice).unwrap_or(&[]),
                    );
                    (name, rendered)
                })
                .collect()
        };

        let mut report = FlushReport::default();
        for (name, rendered) in pending {
            let path = persistence::collection_path(&self.dir, &name);
            let result = rendered
                .map_err(std::io::Error::other)
                .and_then(|content| persistence::write_atomic(&path, &content));
            match result {
                Ok(()) => report.written.push(name),
                Err(e) => {
                    log::error!("Failed to save collection `{}` to {}: {}", name, path.display(), e);
                    report.failed.push(name);
                }
            }
        }

        if !report.failed.is_empty() {
            let mut inner = self.inner.lock();
            for name in &report.failed {
                inner.dirty.insert(name.clone());
            }
        }
        if !report.written.is_empty() {
            self.flush_count.fetch_add(1, Ordering::Relaxed);
        }
        report
    }

    /// Start the debounced flush task on the current tokio runtime.
    pub fn spawn_flusher(self: &Arc<Self>) {
        let store = self.clone();
        let debounce = self.options.flush_debounce;

        let task = tokio::spawn(async move {
            loop {
                store.flush_signal.notified().await;

                // Trailing edge: every further write restarts the quiet period
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(debounce) => break,
                        _ = store.flush_signal.notified() => continue,
                    }
                }

                let cycle_store = store.clone();
                match tokio::task::spawn_blocking(move || cycle_store.flush()).await {
                    Ok(report) if !report.failed.is_empty() => {
                        log::warn!("Flush left {} collection(s) dirty: {:?}", report.failed.len(), report.failed);
                    }
                    Ok(report) => {
                        log::debug!("Flushed collections {:?}", report.written);
                    }
                    Err(e) => log::error!("Flush task failed: {}", e),
                }
            }
        });

        if let Some(previous) = self.flusher.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    /// Stop the flush task and persist everything still dirty.
    pub fn shutdown(&self) -> FlushReport {
        if let Some(flusher) = self.flusher.lock().take() {
            flusher.abort();
        }
        let report = self.flush();
        log::info!("Store shut down ({} collection(s) written)", report.written.len());
        report
    }
}

/// Serialize a record into a document.
pub fn to_document<T: Serialize>(record: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(record) {
        Ok(Value::Object(doc)) => Ok(doc),
        _ => Err(StoreError::NotAnObject),
    }
}

fn from_document<T: Record>(collection: &str, doc: Document) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(doc)).map_err(|source| StoreError::Decode {
        collection: collection.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepalive_core::types::{VersionDescriptor, VERSIONS};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn open(dir: &Path) -> Arc<DocumentStore> {
        DocumentStore::open(dir, &["targets", VERSIONS], StoreOptions::default()).unwrap()
    }

    #[test]
    fn read_returns_defensive_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.insert("targets", doc(json!({"id": "a", "name": "S-1"})));

        let mut snapshot = store.read("targets");
        snapshot[0].insert("name".into(), json!("mutated"));
        snapshot.clear();

        assert_eq!(store.read("targets")[0]["name"], json!("S-1"));
    }

    #[test]
    fn queries_use_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.insert("targets", doc(json!({"id": "a", "owner_id": 1})));
        store.insert("targets", doc(json!({"id": "b", "owner_id": 2})));
        store.insert("targets", doc(json!({"id": "c", "owner_id": 1})));

        let owner = Filter::new().eq("owner_id", 1);
        assert_eq!(store.count("targets", &owner), 2);
        assert_eq!(store.find("targets", &owner).len(), 2);
        assert_eq!(store.find_one("targets", &owner).unwrap()["id"], json!("a"));
        assert!(store.find_one("targets", &Filter::by_id("zzz")).is_none());
        assert_eq!(store.count("unknown", &Filter::new()), 0);
    }

    #[test]
    fn update_one_reports_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let err = store.update_one("targets", "nope", Update::set("name", "x")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn failed_update_leaves_record_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.insert("targets", doc(json!({"id": "a", "tags": "scalar"})));
        store.flush();

        assert!(store.update_one("targets", "a", Update::add_to_set("tags", "x")).is_err());
        assert_eq!(store.read("targets")[0]["tags"], json!("scalar"));
        assert!(!store.has_pending_writes());
    }

    #[test]
    fn delete_one_reports_removal() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.insert("targets", doc(json!({"id": "a"})));
        assert!(store.delete_one("targets", &Filter::by_id("a")));
        assert!(!store.delete_one("targets", &Filter::by_id("a")));
        assert!(store.read("targets").is_empty());
    }

    #[test]
    fn duplicate_create_leaves_collection_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let unique = Filter::new().eq("family", "java").eq("protocol", 765);
        let v1 = VersionDescriptor { id: "v1".into(), family: "java".into(), protocol: 765, name: "1.20.4".into() };
        let v2 = VersionDescriptor { id: "v2".into(), family: "java".into(), protocol: 765, name: "other".into() };

        store.create_unique_record(&unique, &v1).unwrap();
        let before = store.read(VERSIONS);
        let err = store.create_unique_record(&unique, &v2).unwrap_err();

        assert!(matches!(err, StoreError::DuplicateKey(c) if c == VERSIONS));
        assert_eq!(store.read(VERSIONS), before);
    }

    #[test]
    fn typed_reads_skip_malformed_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.insert(VERSIONS, doc(json!({"id": "v1", "family": "java", "protocol": 765, "name": "1.20.4"})));
        store.insert(VERSIONS, doc(json!({"id": "bad", "protocol": "not a number"})));
        let versions: Vec<VersionDescriptor> = store.read_as();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].name, "1.20.4");
    }

    #[test]
    fn flush_persists_and_reload_restores() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(dir.path());
            store.insert("targets", doc(json!({"id": "a", "name": "S-1"})));
            let report = store.flush();
            assert_eq!(report.written, vec!["targets".to_string()]);
            assert!(report.failed.is_empty());
        }
        let store = open(dir.path());
        assert_eq!(store.read("targets").len(), 1);
        // Nothing dirty: a second flush writes nothing
        assert_eq!(store.flush(), FlushReport::default());
    }

    #[test]
    fn failed_collection_stays_dirty_and_others_still_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        // A directory squatting on the target path makes the rename fail
        std::fs::create_dir(persistence::collection_path(dir.path(), "targets")).unwrap();

        store.insert("targets", doc(json!({"id": "a"})));
        store.insert(VERSIONS, doc(json!({"id": "v"})));
        let report = store.flush();

        assert_eq!(report.written, vec![VERSIONS.to_string()]);
        assert_eq!(report.failed, vec!["targets".to_string()]);
        assert!(store.has_pending_writes());

        std::fs::remove_dir(persistence::collection_path(dir.path(), "targets")).unwrap();
        let report = store.flush();
        assert_eq!(report.written, vec!["targets".to_string()]);
        assert!(!store.has_pending_writes());
    }

    #[test]
    fn storage_dir_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let err = DocumentStore::open(blocker.join("data"), &["targets"], StoreOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::StorageDir { .. }));
    }

    #[tokio::test]
    async fn burst_of_writes_is_one_flush_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(
            dir.path(),
            &["targets", VERSIONS],
            StoreOptions { flush_debounce: Duration::from_millis(100) },
        )
        .unwrap();
        store.spawn_flusher();

        for i in 0..10 {
            store.write("targets", vec![doc(json!({"id": "a", "n": i}))]);
            store.insert(VERSIONS, doc(json!({"id": format!("v{}", i)})));
        }
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(store.flush_count(), 1);
        let on_disk = persistence::load_collection(&persistence::collection_path(dir.path(), "targets"));
        assert_eq!(on_disk[0]["n"], json!(9));
        let versions = persistence::load_collection(&persistence::collection_path(dir.path(), VERSIONS));
        assert_eq!(versions.len(), 10);
        store.shutdown();
    }

    #[tokio::test]
    async fn shutdown_flushes_before_debounce_elapses() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(
            dir.path(),
            &["targets"],
            StoreOptions { flush_debounce: Duration::from_secs(60) },
        )
        .unwrap();
        store.spawn_flusher();
        store.insert("targets", doc(json!({"id": "a"})));

        let report = store.shutdown();
        assert_eq!(report.written, vec!["targets".to_string()]);
        assert!(persistence::collection_path(dir.path(), "targets").exists());
    }
}
