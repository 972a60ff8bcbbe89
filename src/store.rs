//! The per-collection store engine: CRUD with schema validation, a query
//! cache, mutation listeners, and the content-hash bucket index.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex as AsyncMutex;

use crate::blob::BlobAdapter;
use crate::bucket::{BucketIndex, Hashes};
use crate::crdt::{self, CrdtDocument};
use crate::error::StoreError;
use crate::hlc::{Clock, SystemTimeSource, TimeSource};
use crate::listener::{Listener, ListenerRegistry, MutationKind};
use crate::validator::{ValidationError, Validator};

/// Bound on concurrent blob reads during `all()`, so a large collection
/// can't exhaust the adapter's resources with an unbounded fan-out.
const ALL_CONCURRENCY: usize = 16;

const INDEX_CACHE_NAME: &str = "_index.json";

/// Generates a fresh document id. Ids are caller-supplied and opaque to the
/// store engine; this exists for callers with no id scheme of their own.
#[must_use]
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A query predicate. `key()` returning `Some` makes the result of
/// `all(Some(predicate))` cacheable under that key; `None` disables
/// caching for that call — callers without a stable key lose caching,
/// not correctness.
pub trait Predicate: Send + Sync {
    fn key(&self) -> Option<String>;
    fn matches(&self, doc: &Map<String, Value>) -> bool;
}

const ALL_CACHE_KEY: &str = "__all__";

#[derive(Default)]
struct QueryCache {
    entries: HashMap<String, Vec<Map<String, Value>>>,
}

impl QueryCache {
    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Report from [`Store::update_many`]: per-item results, preserving input
/// order, so callers can tell which updates landed.
pub type UpdateManyReport = Vec<Result<(), StoreError>>;

/// Report from [`Store::merge_data`]: which ids merged successfully and
/// which failed, since "adapter errors abort that id only."
#[derive(Default)]
pub struct MergeReport {
    pub merged_ids: Vec<String>,
    pub errors: Vec<(String, StoreError)>,
}

#[derive(Serialize, Deserialize, Default)]
struct IndexCache {
    root: String,
    buckets: std::collections::BTreeMap<u32, String>,
    doc_hashes: std::collections::BTreeMap<String, String>,
}

/// The per-collection store engine.
pub struct Store<B: BlobAdapter, V: Validator, T: TimeSource = SystemTimeSource> {
    collection: String,
    blob: Arc<B>,
    validator: V,
    clock: Arc<Clock<T>>,
    index: AsyncMutex<BucketIndex>,
    cache: AsyncMutex<QueryCache>,
    listeners: AsyncMutex<ListenerRegistry>,
    /// Held for the full read-validate-tick-write critical section of
    /// `insert`/`update`/`merge_one`, so two mutations racing on the same
    /// (or different) ids within this collection can't interleave their
    /// read and write halves and clobber each other.
    mutation_lock: AsyncMutex<()>,
}

fn doc_path(collection: &str, id: &str) -> String {
    format!("{collection}/{id}.json")
}

fn index_path(collection: &str) -> String {
    format!("{collection}/{INDEX_CACHE_NAME}")
}

impl<B: BlobAdapter, V: Validator, T: TimeSource> Store<B, V, T> {
    /// Opens a collection, rebuilding the bucket index from the
    /// `_index.json` cache if present and parseable, or by scanning every
    /// stored document otherwise.
    pub async fn open(
        collection: impl Into<String>,
        blob: Arc<B>,
        validator: V,
        clock: Arc<Clock<T>>,
    ) -> Result<Self, StoreError> {
        let collection = collection.into();
        let index = Self::rebuild_index(&collection, &blob).await?;

        Ok(Self {
            collection,
            blob,
            validator,
            clock,
            index: AsyncMutex::new(index),
            cache: AsyncMutex::new(QueryCache::default()),
            listeners: AsyncMutex::new(ListenerRegistry::new()),
            mutation_lock: AsyncMutex::new(()),
        })
    }

    async fn rebuild_index(collection: &str, blob: &B) -> Result<BucketIndex, StoreError> {
        if let Some(cached) = blob.read(&index_path(collection)).await? {
            if let Ok(parsed) = serde_json::from_str::<IndexCache>(&cached) {
                let mut index = BucketIndex::new();
                for (id, hash) in parsed.doc_hashes {
                    index.upsert(&id, &hash);
                }
                return Ok(index);
            }
            tracing::warn!(%collection, "ignoring unparsable _index.json cache, rescanning");
        }

        let mut index = BucketIndex::new();
        for entry in blob.list(collection).await? {
            let Some(id) = entry.strip_suffix(".json") else {
                continue;
            };
            if id.is_empty() || entry == INDEX_CACHE_NAME {
                continue;
            }
            match blob.read(&doc_path(collection, id)).await? {
                Some(raw) => match serde_json::from_str::<CrdtDocument>(&raw) {
                    Ok(doc) => index.upsert(id, &doc.hash),
                    Err(err) => {
                        tracing::warn!(%collection, %id, error = %err, "skipping corrupt document during cold start");
                    }
                },
                None => continue,
            }
        }
        Ok(index)
    }

    async fn persist_index_cache(&self) {
        let snapshot = {
            let index = self.index.lock().await;
            let hashes = index.hashes();
            IndexCache {
                root: hashes.root,
                buckets: hashes.buckets,
                doc_hashes: index.all_content_hashes(),
            }
        };
        if let Ok(serialized) = serde_json::to_string(&snapshot) {
            if let Err(err) = self.blob.write(&index_path(&self.collection), &serialized).await {
                tracing::warn!(collection = %self.collection, error = ?err, "failed to persist index cache");
            }
        }
    }

    async fn load_crdt(&self, id: &str) -> Result<Option<CrdtDocument>, StoreError> {
        let Some(raw) = self.blob.read(&doc_path(&self.collection, id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<CrdtDocument>(&raw) {
            Ok(doc) => Ok(Some(doc)),
            Err(err) => Err(StoreError::Corrupt {
                id: id.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    async fn write_crdt(&self, id: &str, doc: &CrdtDocument) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(doc).map_err(|err| StoreError::OperationFailed {
            message: err.to_string(),
        })?;
        self.blob
            .write(&doc_path(&self.collection, id), &serialized)
            .await?;
        Ok(())
    }

    /// Fetches and unwraps a single document.
    pub async fn get(&self, id: &str) -> Result<Option<Map<String, Value>>, StoreError> {
        Ok(self.load_crdt(id).await?.map(|doc| crdt::unwrap(&doc)))
    }

    /// Lists unwrapped documents, optionally filtered. Corrupt documents
    /// are skipped with a logged warning rather than failing the whole
    /// query.
    pub async fn all(&self, predicate: Option<&dyn Predicate>) -> Result<Vec<Map<String, Value>>, StoreError> {
        let cache_key = match predicate {
            None => Some(ALL_CACHE_KEY.to_string()),
            Some(p) => p.key(),
        };

        if let Some(key) = &cache_key {
            let cache = self.cache.lock().await;
            if let Some(hit) = cache.entries.get(key) {
                return Ok(hit.clone());
            }
        }

        let ids: Vec<String> = self.blob.list(&self.collection).await?.into_iter().filter_map(|entry| {
            let id = entry.strip_suffix(".json")?;
            (!id.is_empty() && entry != INDEX_CACHE_NAME).then(|| id.to_string())
        }).collect();

        let collection = self.collection.clone();
        let blob = Arc::clone(&self.blob);
        let results: Vec<Option<Map<String, Value>>> = stream::iter(ids)
            .map(|id| {
                let blob = Arc::clone(&blob);
                let collection = collection.clone();
                async move {
                    match blob.read(&doc_path(&collection, &id)).await {
                        Ok(Some(raw)) => match serde_json::from_str::<CrdtDocument>(&raw) {
                            Ok(doc) => Some(crdt::unwrap(&doc)),
                            Err(err) => {
                                tracing::warn!(%collection, %id, error = %err, "skipping corrupt document in all()");
                                None
                            }
                        },
                        Ok(None) => None,
                        Err(err) => {
                            tracing::warn!(%collection, %id, error = ?err, "skipping unreadable document in all()");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(ALL_CONCURRENCY)
            .collect()
            .await;

        let mut docs: Vec<Map<String, Value>> = results.into_iter().flatten().collect();
        if let Some(predicate) = predicate {
            docs.retain(|doc| predicate.matches(doc));
        }

        if let Some(key) = cache_key {
            self.cache.lock().await.entries.insert(key, docs.clone());
        }

        Ok(docs)
    }

    /// Inserts a new document: every field gets a fresh HLC.
    pub async fn insert(&self, id: &str, data: Map<String, Value>) -> Result<(), StoreError> {
        let _guard = self.mutation_lock.lock().await;

        let validated = self
            .validator
            .validate(data)
            .map_err(|errors| StoreError::SchemaInvalid {
                id: id.to_string(),
                errors,
            })?;

        let doc = crdt::wrap(&validated, &self.clock);
        self.write_crdt(id, &doc).await?;

        {
            let mut index = self.index.lock().await;
            index.upsert(id, &doc.hash);
        }
        self.cache.lock().await.clear();
        self.persist_index_cache().await;
        self.listeners.lock().await.notify_all(MutationKind::Insert, id);
        Ok(())
    }

    /// Applies a partial update: fields named in `partial` get fresh HLCs,
    /// others are retained. Errors with `NotFound` if `id` doesn't exist,
    /// so callers can distinguish that from "nothing changed."
    pub async fn update(&self, id: &str, partial: Map<String, Value>) -> Result<(), StoreError> {
        let _guard = self.mutation_lock.lock().await;

        let Some(prior) = self.load_crdt(id).await? else {
            return Err(StoreError::NotFound { id: id.to_string() });
        };

        // Validate the merged result before consuming any clock ticks. The
        // validator may transform values (defaults, normalization); only the
        // keys named in `partial` are re-threaded into the CRDT so fields
        // the caller didn't touch stay untouched.
        let mut candidate_plain = crdt::unwrap(&prior);
        for (k, v) in &partial {
            candidate_plain.insert(k.clone(), v.clone());
        }
        let validated_candidate =
            self.validator
                .validate(candidate_plain)
                .map_err(|errors| StoreError::SchemaInvalid {
                    id: id.to_string(),
                    errors,
                })?;

        // This CRDT model has no field-removal operation (soft delete is a
        // convention, `isDeleted: true`, not dropping a key). A validator
        // that strips a key the caller explicitly set in `partial` has no
        // way to express that through `partial_update`, so it's treated as
        // rejection rather than a silent no-op.
        let missing: Vec<ValidationError> = partial
            .keys()
            .filter(|k| !validated_candidate.contains_key(k.as_str()))
            .map(|k| ValidationError::new(k.clone(), "validator dropped this field; field removal is not supported"))
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::SchemaInvalid {
                id: id.to_string(),
                errors: missing,
            });
        }

        let validated_partial: Map<String, Value> = partial
            .keys()
            .filter_map(|k| validated_candidate.get(k).map(|v| (k.clone(), v.clone())))
            .collect();

        let updated = crdt::partial_update(&prior, &validated_partial, &self.clock);
        self.write_crdt(id, &updated).await?;

        {
            let mut index = self.index.lock().await;
            index.upsert(id, &updated.hash);
        }
        self.cache.lock().await.clear();
        self.persist_index_cache().await;
        self.listeners.lock().await.notify_all(MutationKind::Update, id);
        Ok(())
    }

    /// Best-effort batch update: every item is attempted independently and
    /// partial progress is allowed.
    pub async fn update_many(&self, updates: Vec<(String, Map<String, Value>)>) -> UpdateManyReport {
        let mut report = Vec::with_capacity(updates.len());
        for (id, partial) in updates {
            report.push(self.update(&id, partial).await);
        }
        report
    }

    /// Merges remote CRDT documents into the local collection, inserting
    /// ids that don't yet exist locally. Index and listeners are updated
    /// once per affected id; an adapter error for one id doesn't abort the
    /// rest.
    pub async fn merge_data(&self, remote: HashMap<String, CrdtDocument>) -> MergeReport {
        let mut report = MergeReport::default();

        for (id, remote_doc) in remote {
            let outcome = self.merge_one(&id, &remote_doc).await;
            match outcome {
                Ok(()) => report.merged_ids.push(id.clone()),
                Err(err) => {
                    report.errors.push((id.clone(), err));
                    continue;
                }
            }
            self.listeners.lock().await.notify_all(MutationKind::Merge, &id);
        }

        if !report.merged_ids.is_empty() {
            self.cache.lock().await.clear();
            self.persist_index_cache().await;
        }

        report
    }

    async fn merge_one(&self, id: &str, remote_doc: &CrdtDocument) -> Result<(), StoreError> {
        let _guard = self.mutation_lock.lock().await;

        let merged = match self.load_crdt(id).await? {
            Some(local) => crdt::merge(&local, remote_doc, &self.clock),
            None => {
                for field in remote_doc.fields.values() {
                    self.clock.observe(&field.hlc);
                }
                // Recompute rather than trust the remote's stated hash: a
                // peer with a stale or buggy hasher must not get its value
                // baked into this store's index unverified.
                let mut doc = remote_doc.clone();
                doc.recompute_hash();
                doc
            }
        };

        self.write_crdt(id, &merged).await?;
        let mut index = self.index.lock().await;
        index.upsert(id, &merged.hash);
        Ok(())
    }

    /// Current `{root, buckets}` summary, used by the sync client.
    pub async fn get_hashes(&self) -> Hashes {
        self.index.lock().await.hashes()
    }

    /// All CRDT documents whose bucket index is in `indexes`.
    pub async fn get_buckets(&self, indexes: &[u32]) -> Result<HashMap<String, CrdtDocument>, StoreError> {
        let ids = {
            let index = self.index.lock().await;
            index.ids_in_buckets(indexes)
        };

        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.load_crdt(&id).await? {
                out.insert(id, doc);
            }
        }
        Ok(out)
    }

    pub async fn add_listener(&self, key: impl Into<String>, listener: Box<dyn Listener>) {
        self.listeners.lock().await.add(key, listener);
    }

    pub async fn remove_listener(&self, key: &str) {
        self.listeners.lock().await.remove(key);
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobAdapter;
    use crate::hlc::SystemTimeSource;
    use crate::validator::{NoopValidator, ValidationError};
    use serde_json::json;
    use std::sync::{Arc as StdArc, Mutex as StdMutex};

    fn map(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    /// Installs a test-scoped `tracing` subscriber so the `tracing::warn!`
    /// calls this module exercises (corrupt documents, unparsable index
    /// cache) show up in `cargo test -- --nocapture` instead of vanishing.
    fn init_test_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    #[test]
    fn generate_id_produces_distinct_parseable_uuids() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        claims::assert_ok!(uuid::Uuid::parse_str(&a));
    }

    async fn new_store() -> Store<MemoryBlobAdapter, NoopValidator, SystemTimeSource> {
        Store::open(
            "docs",
            StdArc::new(MemoryBlobAdapter::new()),
            NoopValidator,
            StdArc::new(Clock::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = new_store().await;
        store.insert("id-1", map(&[("title", json!("hello"))])).await.unwrap();
        let got = store.get("id-1").await.unwrap().unwrap();
        assert_eq!(got["title"], json!("hello"));
    }

    #[tokio::test]
    async fn get_of_missing_id_is_none() {
        let store = new_store().await;
        claims::assert_none!(store.get("nope").await.unwrap());
    }

    #[tokio::test]
    async fn update_on_missing_id_errors_not_found() {
        let store = new_store().await;
        let err = claims::assert_err!(store.update("nope", map(&[("x", json!(1))])).await);
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn update_only_touches_named_fields() {
        let store = new_store().await;
        store
            .insert("id-1", map(&[("title", json!("v1")), ("body", json!("keep"))]))
            .await
            .unwrap();
        store.update("id-1", map(&[("title", json!("v2"))])).await.unwrap();

        let got = store.get("id-1").await.unwrap().unwrap();
        assert_eq!(got["title"], json!("v2"));
        assert_eq!(got["body"], json!("keep"));
    }

    #[tokio::test]
    async fn all_lists_every_document() {
        let store = new_store().await;
        store.insert("id-1", map(&[("x", json!(1))])).await.unwrap();
        store.insert("id-2", map(&[("x", json!(2))])).await.unwrap();

        let mut docs = store.all(None).await.unwrap();
        docs.sort_by_key(|d| d["x"].as_i64());
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["x"], json!(1));
        assert_eq!(docs[1]["x"], json!(2));
    }

    #[tokio::test]
    async fn all_on_empty_collection_is_empty() {
        let store = new_store().await;
        assert!(store.all(None).await.unwrap().is_empty());
    }

    struct EvenX;
    impl Predicate for EvenX {
        fn key(&self) -> Option<String> {
            Some("even-x".to_string())
        }
        fn matches(&self, doc: &Map<String, Value>) -> bool {
            doc.get("x").and_then(Value::as_i64).is_some_and(|x| x % 2 == 0)
        }
    }

    #[tokio::test]
    async fn predicate_filters_and_is_cached_then_invalidated() {
        let store = new_store().await;
        store.insert("id-1", map(&[("x", json!(1))])).await.unwrap();
        store.insert("id-2", map(&[("x", json!(2))])).await.unwrap();

        let filtered = store.all(Some(&EvenX)).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0]["x"], json!(2));

        // Mutation must invalidate the cache: a third even doc should show up.
        store.insert("id-3", map(&[("x", json!(4))])).await.unwrap();
        let filtered_again = store.all(Some(&EvenX)).await.unwrap();
        assert_eq!(filtered_again.len(), 2);
    }

    struct RejectStrings;
    impl Validator for RejectStrings {
        fn validate(&self, value: Map<String, Value>) -> Result<Map<String, Value>, Vec<ValidationError>> {
            if value.values().any(Value::is_string) {
                return Err(vec![ValidationError::new("?", "no strings allowed")]);
            }
            Ok(value)
        }
    }

    #[tokio::test]
    async fn insert_with_invalid_schema_leaves_collection_unchanged() {
        // Adapted to this store's validator seam.
        let store: Store<MemoryBlobAdapter, RejectStrings, SystemTimeSource> = Store::open(
            "docs",
            StdArc::new(MemoryBlobAdapter::new()),
            RejectStrings,
            StdArc::new(Clock::new()),
        )
        .await
        .unwrap();

        let err = store.insert("id-1", map(&[("name", json!("bad"))])).await.unwrap_err();
        assert!(matches!(err, StoreError::SchemaInvalid { .. }));
        assert_eq!(store.all(None).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn update_with_invalid_merged_result_aborts_write() {
        let store: Store<MemoryBlobAdapter, RejectStrings, SystemTimeSource> = Store::open(
            "docs",
            StdArc::new(MemoryBlobAdapter::new()),
            RejectStrings,
            StdArc::new(Clock::new()),
        )
        .await
        .unwrap();
        store.insert("id-1", map(&[("count", json!(1))])).await.unwrap();

        let err = store
            .update("id-1", map(&[("name", json!("bad"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaInvalid { .. }));

        let got = store.get("id-1").await.unwrap().unwrap();
        assert!(!got.contains_key("name"));
    }

    struct DropsUnknownKeys;
    impl Validator for DropsUnknownKeys {
        fn validate(&self, mut value: Map<String, Value>) -> Result<Map<String, Value>, Vec<ValidationError>> {
            value.retain(|k, _| k == "title");
            Ok(value)
        }
    }

    #[tokio::test]
    async fn update_errors_rather_than_silently_dropping_a_field_the_validator_strips() {
        let store: Store<MemoryBlobAdapter, DropsUnknownKeys, SystemTimeSource> = Store::open(
            "docs",
            StdArc::new(MemoryBlobAdapter::new()),
            DropsUnknownKeys,
            StdArc::new(Clock::new()),
        )
        .await
        .unwrap();
        store.insert("id-1", map(&[("title", json!("v1"))])).await.unwrap();

        let err = claims::assert_err!(store.update("id-1", map(&[("unknown", json!("x"))])).await);
        assert!(matches!(err, StoreError::SchemaInvalid { .. }));
    }

    #[tokio::test]
    async fn merge_of_new_id_recomputes_hash_rather_than_trusting_remote() {
        let store = new_store().await;

        let mut tampered = crdt::wrap(&map(&[("title", json!("remote"))]), &Clock::<SystemTimeSource>::new());
        tampered.hash = "not-the-real-hash".to_string();

        let mut remote = HashMap::new();
        remote.insert("id-1".to_string(), tampered);
        let report = store.merge_data(remote).await;
        assert!(report.errors.is_empty());

        let hashes = store.get_hashes().await;
        let expected_bucket = crate::bucket::bucket_of("id-1");
        assert_ne!(hashes.buckets[&expected_bucket], "not-the-real-hash");
    }

    #[tokio::test]
    async fn merge_data_inserts_absent_and_merges_existing() {
        let store = new_store().await;
        store.insert("id-1", map(&[("title", json!("local"))])).await.unwrap();

        let remote_doc = crdt::wrap(&map(&[("title", json!("remote"))]), &Clock::<SystemTimeSource>::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let newer_remote = crdt::wrap(&map(&[("title", json!("newer"))]), &Clock::<SystemTimeSource>::new());

        let mut remote = HashMap::new();
        remote.insert("id-1".to_string(), newer_remote);
        remote.insert("id-2".to_string(), remote_doc);

        let report = store.merge_data(remote).await;
        assert!(report.errors.is_empty());
        assert_eq!(report.merged_ids.len(), 2);

        assert_eq!(store.get("id-1").await.unwrap().unwrap()["title"], json!("newer"));
        assert_eq!(store.get("id-2").await.unwrap().unwrap()["title"], json!("remote"));
    }

    #[tokio::test]
    async fn listener_completeness_for_insert_update_and_merge() {
        let store = new_store().await;
        let events: StdArc<StdMutex<Vec<(MutationKind, String)>>> = StdArc::new(StdMutex::new(Vec::new()));
        let events2 = StdArc::clone(&events);
        store
            .add_listener(
                "watch",
                Box::new(move |kind: MutationKind, id: &str| {
                    events2.lock().unwrap().push((kind, id.to_string()));
                }),
            )
            .await;

        store.insert("id-1", map(&[("a", json!(1))])).await.unwrap();
        store.update("id-1", map(&[("a", json!(2))])).await.unwrap();

        let mut remote = HashMap::new();
        remote.insert(
            "id-2".to_string(),
            crdt::wrap(&map(&[("b", json!(1))]), &Clock::<SystemTimeSource>::new()),
        );
        store.merge_data(remote).await;

        let seen = events.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], (MutationKind::Insert, "id-1".to_string()));
        assert_eq!(seen[1], (MutationKind::Update, "id-1".to_string()));
        assert_eq!(seen[2], (MutationKind::Merge, "id-2".to_string()));
    }

    #[tokio::test]
    async fn get_hashes_reflects_inserted_documents() {
        let store = new_store().await;
        let before = store.get_hashes().await;
        store.insert("id-1", map(&[("x", json!(1))])).await.unwrap();
        let after = store.get_hashes().await;
        assert_ne!(before.root, after.root);
        assert_eq!(after.buckets.len(), 1);
    }

    #[tokio::test]
    async fn get_buckets_returns_only_matching_documents() {
        let store = new_store().await;
        store.insert("id-1", map(&[("x", json!(1))])).await.unwrap();
        let hashes = store.get_hashes().await;
        let bucket = *hashes.buckets.keys().next().unwrap();

        let docs = store.get_buckets(&[bucket]).await.unwrap();
        assert!(docs.contains_key("id-1"));

        let other_bucket = (bucket + 1) % crate::bucket::BUCKET_COUNT;
        if other_bucket != bucket {
            let empty = store.get_buckets(&[other_bucket]).await.unwrap();
            assert!(!empty.contains_key("id-1"));
        }
    }

    #[tokio::test]
    async fn cold_start_rebuilds_index_from_stored_documents() {
        let blob = StdArc::new(MemoryBlobAdapter::new());
        let clock = StdArc::new(Clock::new());
        {
            let store = Store::open("docs", StdArc::clone(&blob), NoopValidator, StdArc::clone(&clock))
                .await
                .unwrap();
            store.insert("id-1", map(&[("x", json!(1))])).await.unwrap();
        }

        // Reopen against the same blob adapter: index must rebuild.
        let reopened = Store::open("docs", StdArc::clone(&blob), NoopValidator, StdArc::clone(&clock))
            .await
            .unwrap();
        let hashes = reopened.get_hashes().await;
        assert_eq!(hashes.buckets.len(), 1);
        assert_eq!(reopened.get("id-1").await.unwrap().unwrap()["x"], json!(1));
    }

    #[tokio::test]
    async fn corrupt_document_is_skipped_in_all_but_surfaced_in_get() {
        init_test_tracing();
        let blob = StdArc::new(MemoryBlobAdapter::new());
        blob.write("docs/id-1.json", "not valid json").await.unwrap();
        let store = Store::open("docs", StdArc::clone(&blob), NoopValidator, StdArc::new(Clock::new()))
            .await
            .unwrap();

        assert!(store.all(None).await.unwrap().is_empty());
        let err = claims::assert_err!(store.get("id-1").await);
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn unparsable_index_cache_triggers_a_rescan() {
        init_test_tracing();
        let blob = StdArc::new(MemoryBlobAdapter::new());
        blob.write("docs/id-1.json", r#"{"hash":"h","fields":{}}"#)
            .await
            .unwrap();
        blob.write(&index_path("docs"), "not json").await.unwrap();

        let store = Store::open("docs", StdArc::clone(&blob), NoopValidator, StdArc::new(Clock::new()))
            .await
            .unwrap();
        let hashes = store.get_hashes().await;
        assert_eq!(hashes.buckets.len(), 1);
    }
}
