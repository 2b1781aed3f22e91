//! Collection handle: document CRUD plus index administration.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::common::doc_id::{DocId, IdGenerator, IdKind};
use crate::common::document::Document;
use crate::common::task_util::async_task;
use crate::common::time::get_current_time_millis;
use crate::common::value::Value;
use crate::errors::{ErrorKind, MinileafError, MinileafResult};
use crate::filter::Filter;
use crate::index::{
    derive_index_name, CollectionIndex, HashIndex, IndexDescriptor, IndexDirection, IndexManager,
    OrderedIndex, PartialIndex, PrimaryIndex, TtlIndex,
};
use crate::repository::{DocRepository, Entity, Repository};
use crate::store::{StorageEngine, StorageStats};
use crate::update::UpdateOps;

/// Options accepted by [Collection::create_index].
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Explicit index name; generated from the fields when absent.
    pub name: Option<String>,
    /// Reject duplicate keys.
    pub unique: bool,
    /// Use the hash ("enum-optimized") index instead of the ordered one.
    /// Single-field, equality-only.
    pub hash: bool,
    /// Restrict membership to documents matching this filter.
    pub partial_filter: Option<Document>,
    /// Turn the index into a TTL index expiring documents this many
    /// milliseconds after their recorded timestamp.
    pub ttl_expire_after_ms: Option<i64>,
}

impl IndexOptions {
    pub fn unique() -> Self {
        IndexOptions {
            unique: true,
            ..IndexOptions::default()
        }
    }

    pub fn hash() -> Self {
        IndexOptions {
            hash: true,
            ..IndexOptions::default()
        }
    }

    pub fn ttl(expire_after_ms: i64) -> Self {
        IndexOptions {
            ttl_expire_after_ms: Some(expire_after_ms),
            ..IndexOptions::default()
        }
    }
}

/// Counters returned by [Collection::stats].
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub name: String,
    pub document_count: u64,
    pub data_bytes: u64,
    pub wal_bytes: u64,
    pub last_snapshot_ms: Option<i64>,
    pub indexes: Vec<IndexDescriptor>,
}

/// A named bag of documents sharing one id kind, one storage engine, and
/// one index manager.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

struct CollectionInner {
    name: String,
    id_kind: IdKind,
    docs: DocRepository,
    background_index_build: bool,
    ttl_indexes: Mutex<Vec<Arc<TtlIndex>>>,
    build_cancel_flags: Mutex<Vec<Arc<AtomicBool>>>,
}

impl Collection {
    /// Wires a collection over an opened engine: creates the primary index,
    /// seeds it from storage, and (for integer ids) advances the
    /// auto-increment floor past every recovered id.
    pub(crate) fn new(
        name: &str,
        engine: Arc<dyn StorageEngine>,
        id_kind: IdKind,
        id_generator: IdGenerator,
        max_document_size: usize,
        background_index_build: bool,
    ) -> MinileafResult<Collection> {
        let indexes = IndexManager::new();
        let primary = Arc::new(PrimaryIndex::new());
        let seed_doc = Document::new();
        for id in engine.ids()? {
            primary.on_insert(&id, &seed_doc)?;
            if let DocId::Int(value) = &id {
                id_generator.observe_int(*value);
            }
        }
        indexes.add_index(primary)?;

        let docs = DocRepository::new(
            engine,
            indexes,
            id_kind,
            id_generator,
            max_document_size,
        );

        Ok(Collection {
            inner: Arc::new(CollectionInner {
                name: name.to_string(),
                id_kind,
                docs,
                background_index_build,
                ttl_indexes: Mutex::new(Vec::new()),
                build_cancel_flags: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn id_kind(&self) -> IdKind {
        self.inner.id_kind
    }

    /// The document-level repository backing this collection.
    pub fn docs(&self) -> &DocRepository {
        &self.inner.docs
    }

    /// A typed repository over this collection.
    pub fn repository<T: Entity>(&self) -> MinileafResult<Repository<T>> {
        Repository::new(self.inner.docs.clone())
    }

    // ==================== document operations ====================

    pub fn save(&self, document: Document) -> MinileafResult<Document> {
        self.inner.docs.save(document)
    }

    pub fn save_all(&self, documents: Vec<Document>) -> MinileafResult<Vec<Document>> {
        self.inner.docs.save_all(documents)
    }

    pub fn find_by_id(&self, id: &DocId) -> MinileafResult<Option<Document>> {
        self.inner.docs.find_by_id(id)
    }

    pub fn delete_by_id(&self, id: &DocId) -> MinileafResult<Option<Document>> {
        self.inner.docs.delete_by_id(id)
    }

    pub fn exists(&self, id: &DocId) -> MinileafResult<bool> {
        self.inner.docs.exists(id)
    }

    pub fn count(&self) -> MinileafResult<u64> {
        self.inner.docs.count()
    }

    pub fn count_with_filter(&self, filter: &Document) -> MinileafResult<u64> {
        self.inner.docs.count_with_filter(filter)
    }

    pub fn find_all(&self) -> MinileafResult<Vec<Document>> {
        self.inner.docs.find_all()
    }

    pub fn find_all_paged(&self, skip: usize, limit: usize) -> MinileafResult<Vec<Document>> {
        self.inner.docs.find_all_paged(skip, limit)
    }

    pub fn find_with_filter(
        &self,
        filter: &Document,
        skip: usize,
        limit: usize,
    ) -> MinileafResult<Vec<Document>> {
        self.inner.docs.find_with_filter(filter, skip, limit)
    }

    pub fn find_by_enum_field(&self, field: &str, value: &Value) -> MinileafResult<Vec<Document>> {
        self.inner.docs.find_by_enum_field(field, value)
    }

    pub fn find_by_range(
        &self,
        field: &str,
        min: Option<&Value>,
        max: Option<&Value>,
    ) -> MinileafResult<Vec<Document>> {
        self.inner.docs.find_by_range(field, min, max)
    }

    pub fn update_by_id(&self, id: &DocId, ops: &UpdateOps) -> MinileafResult<bool> {
        self.inner.docs.update_by_id(id, ops)
    }

    // ==================== index administration ====================

    /// Creates an index and builds it over the existing documents.
    ///
    /// The index is registered before the build starts so concurrent writes
    /// maintain it; every index tolerates re-inserting an id it already
    /// holds, which makes the build idempotent against those writes. A
    /// failed or canceled foreground build unregisters the index and
    /// surfaces the error. With `background_index_build`, the name returns
    /// immediately and a failed build is logged and unregistered.
    pub fn create_index(
        &self,
        fields: &[(String, IndexDirection)],
        options: IndexOptions,
    ) -> MinileafResult<String> {
        if fields.is_empty() {
            return Err(MinileafError::new(
                "An index needs at least one field",
                ErrorKind::InvalidOperation,
            ));
        }
        if (options.hash || options.ttl_expire_after_ms.is_some()) && fields.len() != 1 {
            log::error!("Hash and TTL indexes are single-field only");
            return Err(MinileafError::new(
                "Hash and TTL indexes are single-field only",
                ErrorKind::InvalidOperation,
            ));
        }

        let name = options
            .name
            .clone()
            .unwrap_or_else(|| derive_index_name(fields));
        let index = self.instantiate_index(&name, fields, &options)?;
        self.inner.docs.indexes().add_index(index.clone())?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.inner.build_cancel_flags.lock().push(cancel.clone());

        if self.inner.background_index_build {
            let collection = self.clone();
            let index_name = name.clone();
            async_task(move || {
                if let Err(e) = collection.build_index(index.as_ref(), &cancel) {
                    log::error!(
                        "Background build of index '{}' failed, dropping it: {:?}",
                        index_name,
                        e
                    );
                    let _ = collection.inner.docs.indexes().drop_index(&index_name);
                    collection.forget_ttl_index(&index_name);
                }
            });
            return Ok(name);
        }

        if let Err(e) = self.build_index(index.as_ref(), &cancel) {
            let _ = self.inner.docs.indexes().drop_index(&name);
            self.forget_ttl_index(&name);
            return Err(MinileafError::new_with_cause(
                &format!("Build of index '{}' failed", name),
                ErrorKind::IndexBuildFailed,
                e,
            ));
        }
        Ok(name)
    }

    fn instantiate_index(
        &self,
        name: &str,
        fields: &[(String, IndexDirection)],
        options: &IndexOptions,
    ) -> MinileafResult<Arc<dyn CollectionIndex>> {
        let field_names: Vec<String> = fields.iter().map(|(field, _)| field.clone()).collect();

        if let Some(expire_after_ms) = options.ttl_expire_after_ms {
            let ttl = Arc::new(TtlIndex::new(name, &field_names[0], expire_after_ms));
            self.inner.ttl_indexes.lock().push(ttl.clone());
            return Ok(ttl);
        }

        let base: Arc<dyn CollectionIndex> = if options.hash {
            Arc::new(HashIndex::new(name, &field_names[0]))
        } else {
            Arc::new(OrderedIndex::new(name, field_names, options.unique))
        };

        match &options.partial_filter {
            Some(filter) => {
                let parsed = Filter::parse(filter)?;
                Ok(Arc::new(PartialIndex::new(base, parsed)))
            }
            None => Ok(base),
        }
    }

    fn build_index(
        &self,
        index: &dyn CollectionIndex,
        cancel: &AtomicBool,
    ) -> MinileafResult<()> {
        let engine = self.inner.docs.engine();
        for id in engine.ids()? {
            if cancel.load(Ordering::Acquire) {
                log::warn!("Index build on '{}' canceled", self.inner.name);
                return Err(MinileafError::new(
                    "Index build canceled",
                    ErrorKind::InvalidOperation,
                ));
            }
            if let Some(document) = engine.find_by_id(&id)? {
                index.on_insert(&id, &document)?;
            }
        }
        Ok(())
    }

    fn forget_ttl_index(&self, name: &str) {
        self.inner
            .ttl_indexes
            .lock()
            .retain(|ttl| ttl.name() != name);
    }

    pub fn drop_index(&self, name: &str) -> MinileafResult<()> {
        self.inner.docs.indexes().drop_index(name)?;
        self.forget_ttl_index(name);
        Ok(())
    }

    pub fn list_indexes(&self) -> Vec<IndexDescriptor> {
        self.inner.docs.indexes().list_indexes()
    }

    pub fn stats(&self) -> MinileafResult<CollectionStats> {
        let StorageStats {
            document_count,
            data_bytes,
            wal_bytes,
            last_snapshot_ms,
        } = self.inner.docs.engine().stats()?;
        Ok(CollectionStats {
            name: self.inner.name.clone(),
            document_count,
            data_bytes,
            wal_bytes,
            last_snapshot_ms,
            indexes: self.list_indexes(),
        })
    }

    pub fn compact(&self) -> MinileafResult<()> {
        self.inner.docs.engine().compact()
    }

    /// Runs one TTL sweep over every TTL index, expiring documents through
    /// the collection's delete pipeline (so secondary indexes stay
    /// consistent). Callback failures are logged inside the sweep and do
    /// not abort it.
    pub fn sweep_expired(&self) -> usize {
        let ttl_indexes: Vec<Arc<TtlIndex>> = self.inner.ttl_indexes.lock().clone();
        let now = get_current_time_millis();
        let mut swept = 0usize;
        for ttl in ttl_indexes {
            swept += ttl.sweep(now, &|id| self.inner.docs.delete_by_id(id).map(|_| ()));
        }
        swept
    }

    /// Cancels in-flight index builds and closes the engine.
    pub fn close(&self) -> MinileafResult<()> {
        for flag in self.inner.build_cancel_flags.lock().iter() {
            flag.store(true, Ordering::Release);
        }
        self.inner.docs.engine().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::constants::{DEFAULT_MAX_DOCUMENT_SIZE, PRIMARY_INDEX_NAME};
    use crate::doc;
    use crate::store::InMemoryEngine;

    fn collection() -> Collection {
        Collection::new(
            "people",
            Arc::new(InMemoryEngine::new()),
            IdKind::Int,
            IdGenerator::new(),
            DEFAULT_MAX_DOCUMENT_SIZE,
            false,
        )
        .unwrap()
    }

    fn ascending(field: &str) -> Vec<(String, IndexDirection)> {
        vec![(field.to_string(), IndexDirection::Ascending)]
    }

    fn id(n: i64) -> DocId {
        DocId::Int(n)
    }

    #[test]
    fn test_collection_is_born_with_primary_index() {
        let collection = collection();
        let listed = collection.list_indexes();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, PRIMARY_INDEX_NAME);
        assert_eq!(listed[0].index_type, "unique");
    }

    #[test]
    fn test_primary_index_cannot_be_dropped() {
        let collection = collection();
        let err = collection.drop_index(PRIMARY_INDEX_NAME).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_create_index_generates_name() {
        let collection = collection();
        let name = collection
            .create_index(&ascending("age"), IndexOptions::default())
            .unwrap();
        assert_eq!(name, "age_1");
        assert!(collection.list_indexes().iter().any(|d| d.name == "age_1"));
    }

    #[test]
    fn test_create_index_builds_over_existing_documents() {
        let collection = collection();
        for n in 20..25i64 {
            collection.save(doc! { "_id": n, "age": n }).unwrap();
        }
        collection
            .create_index(&ascending("age"), IndexOptions::default())
            .unwrap();

        let descriptor = collection
            .list_indexes()
            .into_iter()
            .find(|d| d.name == "age_1")
            .unwrap();
        assert_eq!(descriptor.entry_count, 5);
    }

    #[test]
    fn test_create_duplicate_index_name_rejected() {
        let collection = collection();
        collection
            .create_index(&ascending("age"), IndexOptions::default())
            .unwrap();
        let err = collection
            .create_index(&ascending("age"), IndexOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IndexAlreadyExists("age_1".to_string()));
    }

    #[test]
    fn test_failed_build_leaves_no_index_behind() {
        let collection = collection();
        collection.save(doc! { "_id": 1i64, "email": "x@y" }).unwrap();
        collection.save(doc! { "_id": 2i64, "email": "x@y" }).unwrap();

        let err = collection
            .create_index(&ascending("email"), IndexOptions::unique())
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IndexBuildFailed);
        assert!(!collection.list_indexes().iter().any(|d| d.name == "email_1"));
    }

    #[test]
    fn test_unique_index_enforced_after_creation() {
        let collection = collection();
        collection
            .create_index(&ascending("email"), IndexOptions::unique())
            .unwrap();
        collection.save(doc! { "_id": 1i64, "email": "x@y" }).unwrap();
        let err = collection.save(doc! { "_id": 2i64, "email": "x@y" }).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DuplicateKey { .. }));
    }

    #[test]
    fn test_hash_index_must_be_single_field() {
        let collection = collection();
        let err = collection
            .create_index(
                &[
                    ("a".to_string(), IndexDirection::Ascending),
                    ("b".to_string(), IndexDirection::Ascending),
                ],
                IndexOptions::hash(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_partial_index_only_holds_matching_documents() {
        let collection = collection();
        collection
            .create_index(
                &ascending("age"),
                IndexOptions {
                    partial_filter: Some(doc! { "active": true }),
                    ..IndexOptions::default()
                },
            )
            .unwrap();
        collection
            .save(doc! { "_id": 1i64, "age": 30i64, "active": true })
            .unwrap();
        collection
            .save(doc! { "_id": 2i64, "age": 30i64, "active": false })
            .unwrap();

        let descriptor = collection
            .list_indexes()
            .into_iter()
            .find(|d| d.name == "age_1")
            .unwrap();
        assert_eq!(descriptor.entry_count, 1);
        assert!(descriptor.index_type.starts_with("partial"));
    }

    #[test]
    fn test_ttl_sweep_expires_via_delete_pipeline() {
        let collection = collection();
        collection
            .create_index(&ascending("timestamp"), IndexOptions::ttl(1_000))
            .unwrap();

        let past = get_current_time_millis() - 2_000;
        let fresh = get_current_time_millis();
        collection
            .save(doc! { "_id": 1i64, "timestamp": Value::Timestamp(past) })
            .unwrap();
        collection
            .save(doc! { "_id": 2i64, "timestamp": Value::Timestamp(fresh) })
            .unwrap();

        let swept = collection.sweep_expired();
        assert_eq!(swept, 1);
        assert!(collection.find_by_id(&id(1)).unwrap().is_none());
        assert!(collection.find_by_id(&id(2)).unwrap().is_some());
        assert_eq!(collection.count().unwrap(), 1);
    }

    #[test]
    fn test_drop_index() {
        let collection = collection();
        let name = collection
            .create_index(&ascending("age"), IndexOptions::default())
            .unwrap();
        collection.drop_index(&name).unwrap();
        assert!(!collection.list_indexes().iter().any(|d| d.name == name));
        let err = collection.drop_index(&name).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IndexNotFound(name));
    }

    #[test]
    fn test_stats_reports_counts_and_indexes() {
        let collection = collection();
        collection.save(doc! { "_id": 1i64 }).unwrap();
        collection
            .create_index(&ascending("age"), IndexOptions::default())
            .unwrap();
        let stats = collection.stats().unwrap();
        assert_eq!(stats.name, "people");
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.indexes.len(), 2);
    }

    #[test]
    fn test_auto_increment_survives_recovery() {
        let engine = Arc::new(InMemoryEngine::new());
        engine.upsert(id(41), doc! { "_id": 41i64 }).unwrap();

        let collection = Collection::new(
            "c",
            engine,
            IdKind::Int,
            IdGenerator::new(),
            DEFAULT_MAX_DOCUMENT_SIZE,
            false,
        )
        .unwrap();
        let saved = collection.save(doc! { "v": 1i64 }).unwrap();
        // the assigned id never collides with a recovered one
        assert_eq!(saved.get_field("_id"), Some(&Value::Int(42)));
    }

    #[test]
    fn test_background_index_build_completes() {
        let collection = Collection::new(
            "bg",
            Arc::new(InMemoryEngine::new()),
            IdKind::Int,
            IdGenerator::new(),
            DEFAULT_MAX_DOCUMENT_SIZE,
            true,
        )
        .unwrap();
        for n in 1..=20i64 {
            collection.save(doc! { "_id": n, "age": n }).unwrap();
        }
        collection
            .create_index(&ascending("age"), IndexOptions::default())
            .unwrap();

        // wait for the worker to finish the build
        for _ in 0..100 {
            let built = collection
                .list_indexes()
                .into_iter()
                .find(|d| d.name == "age_1")
                .map(|d| d.entry_count)
                .unwrap_or(0);
            if built == 20 {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("background index build did not complete");
    }
}
