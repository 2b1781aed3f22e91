//! Repository façade: id assignment, size cap, index fan-out, filtered
//! queries.
//!
//! [DocRepository] is the document-level entry point composed over one
//! storage engine and its index manager. [Repository] sugars it for typed
//! entities through the [Entity] codec trait; the codec itself (derive
//! machinery, field mapping) is the caller's concern.

use std::sync::Arc;

use crate::common::constants::{HASH_INDEX, NON_UNIQUE_INDEX, UNIQUE_INDEX};
use crate::common::doc_id::{DocId, IdGenerator, IdKind};
use crate::common::document::Document;
use crate::common::value::Value;
use crate::errors::{ErrorKind, MinileafError, MinileafResult};
use crate::filter::{FieldOp, Filter};
use crate::index::IndexManager;
use crate::store::StorageEngine;
use crate::update::UpdateOps;

/// Entity to document codec. Implementations convert a typed value to and
/// from its document form; conversion failures surface as codec errors.
pub trait Entity: Sized {
    /// The id variant this entity's collection is keyed by.
    fn id_kind() -> IdKind;

    fn to_document(&self) -> MinileafResult<Document>;

    fn from_document(document: &Document) -> MinileafResult<Self>;
}

/// Document-level repository over one storage engine and its indexes.
#[derive(Clone)]
pub struct DocRepository {
    inner: Arc<DocRepositoryInner>,
}

struct DocRepositoryInner {
    engine: Arc<dyn StorageEngine>,
    indexes: IndexManager,
    id_kind: IdKind,
    id_generator: IdGenerator,
    max_document_size: usize,
}

impl DocRepository {
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        indexes: IndexManager,
        id_kind: IdKind,
        id_generator: IdGenerator,
        max_document_size: usize,
    ) -> Self {
        DocRepository {
            inner: Arc::new(DocRepositoryInner {
                engine,
                indexes,
                id_kind,
                id_generator,
                max_document_size,
            }),
        }
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.inner.engine
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.inner.indexes
    }

    pub fn id_kind(&self) -> IdKind {
        self.inner.id_kind
    }

    /// Saves a document: assigns an id when absent, enforces the size cap,
    /// notifies indexes, and upserts into storage. Returns the stored
    /// document (so the caller sees the assigned id).
    ///
    /// Index notification runs before the storage append; a unique-index
    /// violation therefore never lands in storage, and a storage failure
    /// rolls the index change back before surfacing.
    pub fn save(&self, document: Document) -> MinileafResult<Document> {
        let mut document = document;
        let id = match DocId::extract(self.inner.id_kind, &document)? {
            Some(id) => id,
            None => {
                let id = self.inner.id_generator.generate(self.inner.id_kind);
                id.write_into(&mut document);
                id
            }
        };

        let size = document.byte_size()?;
        if size > self.inner.max_document_size {
            log::error!(
                "Rejecting document {} of {} bytes (cap {})",
                id,
                size,
                self.inner.max_document_size
            );
            return Err(MinileafError::new(
                &format!(
                    "Document of {} bytes exceeds the cap of {} bytes",
                    size, self.inner.max_document_size
                ),
                ErrorKind::DocumentTooLarge {
                    size,
                    max: self.inner.max_document_size,
                },
            ));
        }

        let prior = self.inner.engine.find_by_id(&id)?;
        match &prior {
            Some(old) => self.inner.indexes.on_update(&id, Some(old), &document)?,
            None => self.inner.indexes.on_insert(&id, &document)?,
        }

        if let Err(e) = self.inner.engine.upsert(id.clone(), document.clone()) {
            // storage refused the write: unwind the index change
            let rollback = match &prior {
                Some(old) => self.inner.indexes.on_update(&id, Some(&document), old),
                None => self.inner.indexes.on_remove(&id, &document),
            };
            if let Err(rollback) = rollback {
                log::error!("Index rollback after storage failure failed: {:?}", rollback);
            }
            return Err(e);
        }
        Ok(document)
    }

    /// A simple fold over [DocRepository::save]; not transactional across
    /// entries.
    pub fn save_all(&self, documents: Vec<Document>) -> MinileafResult<Vec<Document>> {
        let mut saved = Vec::with_capacity(documents.len());
        for document in documents {
            saved.push(self.save(document)?);
        }
        Ok(saved)
    }

    pub fn find_by_id(&self, id: &DocId) -> MinileafResult<Option<Document>> {
        self.inner.engine.find_by_id(id)
    }

    pub fn delete_by_id(&self, id: &DocId) -> MinileafResult<Option<Document>> {
        let removed = self.inner.engine.delete(id)?;
        if let Some(document) = &removed {
            self.inner.indexes.on_remove(id, document)?;
        }
        Ok(removed)
    }

    pub fn exists(&self, id: &DocId) -> MinileafResult<bool> {
        self.inner.engine.exists(id)
    }

    pub fn count(&self) -> MinileafResult<u64> {
        self.inner.engine.count()
    }

    pub fn find_all(&self) -> MinileafResult<Vec<Document>> {
        Ok(self
            .inner
            .engine
            .find_all()?
            .into_iter()
            .map(|(_, document)| document)
            .collect())
    }

    pub fn find_all_paged(&self, skip: usize, limit: usize) -> MinileafResult<Vec<Document>> {
        Ok(self
            .inner
            .engine
            .find_all_paged(skip, limit)?
            .into_iter()
            .map(|(_, document)| document)
            .collect())
    }

    /// Streams storage through the filter evaluator, then paginates. When
    /// the filter is a single equality on an indexed field, the index
    /// narrows the candidate set first; the evaluator still confirms every
    /// hit, so index key normalization can never produce a false positive.
    pub fn find_with_filter(
        &self,
        filter: &Document,
        skip: usize,
        limit: usize,
    ) -> MinileafResult<Vec<Document>> {
        let parsed = Filter::parse(filter)?;

        if let Some(candidates) = self.equality_candidates(&parsed)? {
            let mut out = Vec::new();
            let mut skipped = 0usize;
            for id in candidates {
                if out.len() >= limit {
                    break;
                }
                if let Some(document) = self.inner.engine.find_by_id(&id)? {
                    if parsed.matches(&document)? {
                        if skipped < skip {
                            skipped += 1;
                            continue;
                        }
                        out.push(document);
                    }
                }
            }
            return Ok(out);
        }

        let mut out = Vec::new();
        let mut skipped = 0usize;
        for id in self.inner.engine.ids()? {
            if out.len() >= limit {
                break;
            }
            if let Some(document) = self.inner.engine.find_by_id(&id)? {
                if parsed.matches(&document)? {
                    if skipped < skip {
                        skipped += 1;
                        continue;
                    }
                    out.push(document);
                }
            }
        }
        Ok(out)
    }

    /// A single-field ordered index over `field`, the only kind whose key
    /// equality agrees with the evaluator's (a partial index misses
    /// members, a hash index splits 3 and 3.0 into different buckets).
    fn usable_ordered_index(&self, field: &str) -> Option<Arc<dyn crate::index::CollectionIndex>> {
        let index = self.inner.indexes.find_index_on_field(field, None)?;
        let index_type = index.index_type();
        if index_type == UNIQUE_INDEX || index_type == NON_UNIQUE_INDEX {
            Some(index)
        } else {
            None
        }
    }

    /// Ids a usable index yields for a single-equality filter, in primary
    /// order. `None` means no index applies and the caller must stream.
    fn equality_candidates(&self, parsed: &Filter) -> MinileafResult<Option<Vec<DocId>>> {
        let (path, operand) = match parsed.as_single_equality() {
            Some(pair) => pair,
            None => return Ok(None),
        };
        // temporal operands need per-document coercion; indexes store raw
        // values, so only the evaluator can answer those
        if matches!(operand, Value::Timestamp(_)) {
            return Ok(None);
        }
        let index = match self.usable_ordered_index(path) {
            Some(index) => index,
            None => return Ok(None),
        };
        match index.find_equals(std::slice::from_ref(operand))? {
            Some(mut ids) => {
                ids.sort();
                Ok(Some(ids))
            }
            None => Ok(None),
        }
    }

    /// Applies a partial update directly through the engine. Indexes are
    /// not maintained by this call; they catch up on the next full save of
    /// the document. Returns whether the id existed.
    pub fn update_by_id(&self, id: &DocId, ops: &UpdateOps) -> MinileafResult<bool> {
        self.inner.engine.update_fields(id, ops)
    }

    /// Counts matches. A single-equality filter over a non-partial index
    /// returns the index hit count without touching storage; everything
    /// else streams with a predicate.
    pub fn count_with_filter(&self, filter: &Document) -> MinileafResult<u64> {
        let parsed = Filter::parse(filter)?;
        if let Some((path, operand)) = parsed.as_single_equality() {
            if !matches!(operand, Value::Timestamp(_)) {
                if let Some(index) = self.usable_ordered_index(path) {
                    if let Some(ids) = index.find_equals(std::slice::from_ref(operand))? {
                        return Ok(ids.len() as u64);
                    }
                }
            }
        }

        let mut matched = 0u64;
        for id in self.inner.engine.ids()? {
            if let Some(document) = self.inner.engine.find_by_id(&id)? {
                if parsed.matches(&document)? {
                    matched += 1;
                }
            }
        }
        Ok(matched)
    }

    /// Equality lookup on an enum-like field: prefers a hash index, falls
    /// back to streaming on the stringified value.
    pub fn find_by_enum_field(&self, field: &str, value: &Value) -> MinileafResult<Vec<Document>> {
        if let Some(index) = self.inner.indexes.find_index_on_field(field, Some(HASH_INDEX)) {
            // only a hash index shares the stringified-key semantics of
            // this lookup; any other index kind falls back to streaming
            if index.index_type() == HASH_INDEX {
                if let Some(mut ids) = index.find_equals(std::slice::from_ref(value))? {
                    ids.sort();
                    return self.fetch_ids(&ids);
                }
            }
        }
        let wanted = value.to_key_string();
        let mut out = Vec::new();
        for id in self.inner.engine.ids()? {
            if let Some(document) = self.inner.engine.find_by_id(&id)? {
                let hit = document
                    .get_path(field)
                    .map(|stored| stored.to_key_string() == wanted)
                    .unwrap_or(false);
                if hit {
                    out.push(document);
                }
            }
        }
        Ok(out)
    }

    /// Inclusive range lookup: prefers an ordered index, falls back to
    /// streaming through the filter evaluator.
    pub fn find_by_range(
        &self,
        field: &str,
        min: Option<&Value>,
        max: Option<&Value>,
    ) -> MinileafResult<Vec<Document>> {
        if let Some(index) = self.usable_ordered_index(field) {
            if let Some(mut ids) = index.find_range(min, max)? {
                ids.sort();
                return self.fetch_ids(&ids);
            }
        }

        let mut ops = Vec::new();
        if let Some(min) = min {
            ops.push(FieldOp::Gte(min.clone()));
        }
        if let Some(max) = max {
            ops.push(FieldOp::Lte(max.clone()));
        }
        let filter = Filter::Field {
            path: field.to_string(),
            ops,
        };
        let mut out = Vec::new();
        for id in self.inner.engine.ids()? {
            if let Some(document) = self.inner.engine.find_by_id(&id)? {
                if filter.matches(&document)? {
                    out.push(document);
                }
            }
        }
        Ok(out)
    }

    fn fetch_ids(&self, ids: &[DocId]) -> MinileafResult<Vec<Document>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(document) = self.inner.engine.find_by_id(id)? {
                out.push(document);
            }
        }
        Ok(out)
    }
}

/// Typed repository over [DocRepository] through the [Entity] codec.
#[derive(Clone)]
pub struct Repository<T: Entity> {
    docs: DocRepository,
    _entity: std::marker::PhantomData<fn() -> T>,
}

impl<T: Entity> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(docs: DocRepository) -> MinileafResult<Repository<T>> {
        if docs.id_kind() != T::id_kind() {
            log::error!(
                "Repository entity id kind {} differs from collection id kind {}",
                T::id_kind(),
                docs.id_kind()
            );
            return Err(MinileafError::new(
                "Entity id kind differs from collection id kind",
                ErrorKind::CollectionIdTypeMismatch {
                    existing: docs.id_kind().name().to_string(),
                    requested: T::id_kind().name().to_string(),
                },
            ));
        }
        Ok(Repository {
            docs,
            _entity: std::marker::PhantomData,
        })
    }

    pub fn docs(&self) -> &DocRepository {
        &self.docs
    }

    /// Saves the entity and decodes the stored document back, so the
    /// caller sees the assigned id.
    pub fn save(&self, entity: &T) -> MinileafResult<T> {
        let stored = self.docs.save(entity.to_document()?)?;
        T::from_document(&stored)
    }

    pub fn save_all(&self, entities: &[T]) -> MinileafResult<Vec<T>> {
        let mut saved = Vec::with_capacity(entities.len());
        for entity in entities {
            saved.push(self.save(entity)?);
        }
        Ok(saved)
    }

    pub fn find_by_id(&self, id: &DocId) -> MinileafResult<Option<T>> {
        match self.docs.find_by_id(id)? {
            Some(document) => Ok(Some(T::from_document(&document)?)),
            None => Ok(None),
        }
    }

    pub fn delete_by_id(&self, id: &DocId) -> MinileafResult<Option<T>> {
        match self.docs.delete_by_id(id)? {
            Some(document) => Ok(Some(T::from_document(&document)?)),
            None => Ok(None),
        }
    }

    pub fn exists(&self, id: &DocId) -> MinileafResult<bool> {
        self.docs.exists(id)
    }

    pub fn count(&self) -> MinileafResult<u64> {
        self.docs.count()
    }

    pub fn find_all(&self) -> MinileafResult<Vec<T>> {
        self.docs.find_all()?.iter().map(T::from_document).collect()
    }

    pub fn find_with_filter(
        &self,
        filter: &Document,
        skip: usize,
        limit: usize,
    ) -> MinileafResult<Vec<T>> {
        self.docs
            .find_with_filter(filter, skip, limit)?
            .iter()
            .map(T::from_document)
            .collect()
    }

    pub fn update_by_id(&self, id: &DocId, ops: &UpdateOps) -> MinileafResult<bool> {
        self.docs.update_by_id(id, ops)
    }
}
