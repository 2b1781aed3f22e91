//! Secondary indexes and their per-collection manager.
//!
//! Indexes store ids only, never documents; rows are re-fetched from
//! storage. The manager fans a document write out to every index under its
//! read lock (each index serializes internally); if any index rejects the
//! write, the already-applied indexes are rolled back in reverse before the
//! error surfaces, so index state never drifts from storage.

pub mod hash;
pub mod ordered;
pub mod partial;
pub mod primary;
pub mod ttl;

pub use hash::HashIndex;
pub use ordered::OrderedIndex;
pub use partial::PartialIndex;
pub use primary::PrimaryIndex;
pub use ttl::TtlIndex;

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common::constants::PRIMARY_INDEX_NAME;
use crate::common::doc_id::DocId;
use crate::common::document::Document;
use crate::common::value::Value;
use crate::errors::{ErrorKind, MinileafError, MinileafResult};

/// Sort direction for an indexed field. Only the generated name depends on
/// it today; the ordered index itself answers both scan directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDirection {
    Ascending,
    Descending,
}

impl IndexDirection {
    fn suffix(&self) -> &'static str {
        match self {
            IndexDirection::Ascending => "1",
            IndexDirection::Descending => "-1",
        }
    }
}

/// The generated index name: the ordered join of `<field>_<dir>`.
pub fn derive_index_name(fields: &[(String, IndexDirection)]) -> String {
    fields
        .iter()
        .map(|(field, direction)| format!("{}_{}", field, direction.suffix()))
        .collect::<Vec<_>>()
        .join("_")
}

/// Summary row returned by index listing and stats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub fields: Vec<String>,
    pub index_type: String,
    pub entry_count: usize,
}

/// A maintained index over a collection.
///
/// `on_update` receives the old document when one existed so each index can
/// choose the cheapest correct action (e.g. skip the write entirely when
/// the extracted key did not change).
pub trait CollectionIndex: Send + Sync {
    fn name(&self) -> &str;

    fn fields(&self) -> Vec<String>;

    fn index_type(&self) -> String;

    fn on_insert(&self, id: &DocId, document: &Document) -> MinileafResult<()>;

    fn on_update(
        &self,
        id: &DocId,
        old: Option<&Document>,
        new: &Document,
    ) -> MinileafResult<()>;

    fn on_remove(&self, id: &DocId, document: &Document) -> MinileafResult<()>;

    /// Number of indexed entries, for stats.
    fn entry_count(&self) -> usize;

    /// Ids whose full key tuple equals `values`. `Ok(None)` means this
    /// index cannot answer equality (e.g. a TTL index).
    fn find_equals(&self, values: &[Value]) -> MinileafResult<Option<Vec<DocId>>> {
        let _ = values;
        Ok(None)
    }

    /// Ids whose first-field value lies in the inclusive range. `Ok(None)`
    /// means range scans are unsupported.
    fn find_range(
        &self,
        min: Option<&Value>,
        max: Option<&Value>,
    ) -> MinileafResult<Option<Vec<DocId>>> {
        let _ = (min, max);
        Ok(None)
    }
}

/// Per-collection index registry and write fan-out.
#[derive(Clone)]
pub struct IndexManager {
    inner: Arc<IndexManagerInner>,
}

struct IndexManagerInner {
    indexes: RwLock<BTreeMap<String, Arc<dyn CollectionIndex>>>,
}

impl IndexManager {
    pub fn new() -> Self {
        IndexManager {
            inner: Arc::new(IndexManagerInner {
                indexes: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Registers an index. Fails when the name is taken.
    pub fn add_index(&self, index: Arc<dyn CollectionIndex>) -> MinileafResult<()> {
        let mut indexes = self.inner.indexes.write();
        let name = index.name().to_string();
        if indexes.contains_key(&name) {
            log::error!("Index '{}' already exists", name);
            return Err(MinileafError::new(
                &format!("Index '{}' already exists", name),
                ErrorKind::IndexAlreadyExists(name),
            ));
        }
        indexes.insert(name, index);
        Ok(())
    }

    /// Unregisters an index. The primary index cannot be dropped.
    pub fn drop_index(&self, name: &str) -> MinileafResult<()> {
        if name == PRIMARY_INDEX_NAME {
            log::error!("Attempt to drop the primary index");
            return Err(MinileafError::new(
                "The primary index cannot be dropped",
                ErrorKind::InvalidOperation,
            ));
        }
        let mut indexes = self.inner.indexes.write();
        if indexes.remove(name).is_none() {
            log::error!("Index '{}' not found", name);
            return Err(MinileafError::new(
                &format!("Index '{}' not found", name),
                ErrorKind::IndexNotFound(name.to_string()),
            ));
        }
        Ok(())
    }

    pub fn get_index(&self, name: &str) -> Option<Arc<dyn CollectionIndex>> {
        self.inner.indexes.read().get(name).cloned()
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.inner.indexes.read().contains_key(name)
    }

    /// Finds a single-field index over `field`, preferring the given type
    /// when more than one matches.
    pub fn find_index_on_field(
        &self,
        field: &str,
        preferred_type: Option<&str>,
    ) -> Option<Arc<dyn CollectionIndex>> {
        let indexes = self.inner.indexes.read();
        let mut fallback = None;
        for index in indexes.values() {
            let fields = index.fields();
            if fields.len() == 1 && fields[0] == field {
                match preferred_type {
                    Some(preferred) if index.index_type().starts_with(preferred) => {
                        return Some(index.clone());
                    }
                    Some(_) => fallback = Some(index.clone()),
                    None => return Some(index.clone()),
                }
            }
        }
        fallback
    }

    pub fn list_indexes(&self) -> Vec<IndexDescriptor> {
        self.inner
            .indexes
            .read()
            .values()
            .map(|index| IndexDescriptor {
                name: index.name().to_string(),
                fields: index.fields(),
                index_type: index.index_type(),
                entry_count: index.entry_count(),
            })
            .collect()
    }

    /// Fans an insert out to every index. On failure, already-notified
    /// indexes are rolled back in reverse order before the error surfaces.
    pub fn on_insert(&self, id: &DocId, document: &Document) -> MinileafResult<()> {
        let indexes = self.inner.indexes.read();
        let mut applied: Vec<&Arc<dyn CollectionIndex>> = Vec::with_capacity(indexes.len());
        for index in indexes.values() {
            if let Err(e) = index.on_insert(id, document) {
                log::error!("Index '{}' rejected insert of {}: {}", index.name(), id, e);
                for done in applied.into_iter().rev() {
                    if let Err(rollback) = done.on_remove(id, document) {
                        log::error!(
                            "Rollback of index '{}' failed for {}: {}",
                            done.name(),
                            id,
                            rollback
                        );
                    }
                }
                return Err(e);
            }
            applied.push(index);
        }
        Ok(())
    }

    /// Fans an update out to every index, rolling back with the inverse
    /// old/new pair on failure.
    pub fn on_update(
        &self,
        id: &DocId,
        old: Option<&Document>,
        new: &Document,
    ) -> MinileafResult<()> {
        let indexes = self.inner.indexes.read();
        let mut applied: Vec<&Arc<dyn CollectionIndex>> = Vec::with_capacity(indexes.len());
        for index in indexes.values() {
            if let Err(e) = index.on_update(id, old, new) {
                log::error!("Index '{}' rejected update of {}: {}", index.name(), id, e);
                for done in applied.into_iter().rev() {
                    let rollback = match old {
                        Some(old) => done.on_update(id, Some(new), old),
                        None => done.on_remove(id, new),
                    };
                    if let Err(rollback) = rollback {
                        log::error!(
                            "Rollback of index '{}' failed for {}: {}",
                            done.name(),
                            id,
                            rollback
                        );
                    }
                }
                return Err(e);
            }
            applied.push(index);
        }
        Ok(())
    }

    /// Fans a removal out to every index, re-inserting on failure.
    pub fn on_remove(&self, id: &DocId, document: &Document) -> MinileafResult<()> {
        let indexes = self.inner.indexes.read();
        let mut applied: Vec<&Arc<dyn CollectionIndex>> = Vec::with_capacity(indexes.len());
        for index in indexes.values() {
            if let Err(e) = index.on_remove(id, document) {
                log::error!("Index '{}' rejected removal of {}: {}", index.name(), id, e);
                for done in applied.into_iter().rev() {
                    if let Err(rollback) = done.on_insert(id, document) {
                        log::error!(
                            "Rollback of index '{}' failed for {}: {}",
                            done.name(),
                            id,
                            rollback
                        );
                    }
                }
                return Err(e);
            }
            applied.push(index);
        }
        Ok(())
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        IndexManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn id(n: i64) -> DocId {
        DocId::Int(n)
    }

    #[test]
    fn test_derive_index_name() {
        assert_eq!(
            derive_index_name(&[("age".to_string(), IndexDirection::Ascending)]),
            "age_1"
        );
        assert_eq!(
            derive_index_name(&[
                ("age".to_string(), IndexDirection::Ascending),
                ("name".to_string(), IndexDirection::Descending),
            ]),
            "age_1_name_-1"
        );
    }

    #[test]
    fn test_add_and_drop_index() {
        let manager = IndexManager::new();
        let index = Arc::new(OrderedIndex::new("age_1", vec!["age".to_string()], false));
        manager.add_index(index.clone()).unwrap();
        assert!(manager.has_index("age_1"));

        let err = manager.add_index(index).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IndexAlreadyExists("age_1".to_string()));

        manager.drop_index("age_1").unwrap();
        assert!(!manager.has_index("age_1"));
        let err = manager.drop_index("age_1").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IndexNotFound("age_1".to_string()));
    }

    #[test]
    fn test_primary_index_cannot_be_dropped() {
        let manager = IndexManager::new();
        manager
            .add_index(Arc::new(OrderedIndex::new(
                PRIMARY_INDEX_NAME,
                vec!["_id".to_string()],
                true,
            )))
            .unwrap();
        let err = manager.drop_index(PRIMARY_INDEX_NAME).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_fan_out_reaches_all_indexes() {
        let manager = IndexManager::new();
        let by_age = Arc::new(OrderedIndex::new("age_1", vec!["age".to_string()], false));
        let by_name = Arc::new(OrderedIndex::new("name_1", vec!["name".to_string()], false));
        manager.add_index(by_age.clone()).unwrap();
        manager.add_index(by_name.clone()).unwrap();

        let doc = doc! { "age": 30i64, "name": "a" };
        manager.on_insert(&id(1), &doc).unwrap();
        assert_eq!(by_age.entry_count(), 1);
        assert_eq!(by_name.entry_count(), 1);

        manager.on_remove(&id(1), &doc).unwrap();
        assert_eq!(by_age.entry_count(), 0);
        assert_eq!(by_name.entry_count(), 0);
    }

    #[test]
    fn test_failed_insert_rolls_back_prior_indexes() {
        let manager = IndexManager::new();
        // alphabetical order puts age_1 before email_1, so age_1 is applied
        // first and must be rolled back when email_1 rejects the duplicate
        let by_age = Arc::new(OrderedIndex::new("age_1", vec!["age".to_string()], false));
        let by_email = Arc::new(OrderedIndex::new("email_1", vec!["email".to_string()], true));
        manager.add_index(by_age.clone()).unwrap();
        manager.add_index(by_email.clone()).unwrap();

        manager
            .on_insert(&id(1), &doc! { "age": 30i64, "email": "x@y.z" })
            .unwrap();

        let err = manager
            .on_insert(&id(2), &doc! { "age": 31i64, "email": "x@y.z" })
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DuplicateKey { .. }));

        // age_1 saw the insert but was rolled back
        assert_eq!(by_age.entry_count(), 1);
        assert_eq!(
            by_age.find_equals(&[Value::Int(31)]).unwrap().unwrap(),
            Vec::<DocId>::new()
        );
    }

    #[test]
    fn test_failed_update_rolls_back_with_inverse_pair() {
        let manager = IndexManager::new();
        let by_age = Arc::new(OrderedIndex::new("age_1", vec!["age".to_string()], false));
        let by_email = Arc::new(OrderedIndex::new("email_1", vec!["email".to_string()], true));
        manager.add_index(by_age.clone()).unwrap();
        manager.add_index(by_email.clone()).unwrap();

        let doc1 = doc! { "age": 30i64, "email": "a@x" };
        let doc2 = doc! { "age": 31i64, "email": "b@x" };
        manager.on_insert(&id(1), &doc1).unwrap();
        manager.on_insert(&id(2), &doc2).unwrap();

        // moving id 2 onto id 1's email must fail and leave age unchanged
        let moved = doc! { "age": 99i64, "email": "a@x" };
        let err = manager.on_update(&id(2), Some(&doc2), &moved).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DuplicateKey { .. }));

        assert_eq!(
            by_age.find_equals(&[Value::Int(31)]).unwrap().unwrap(),
            vec![id(2)]
        );
        assert_eq!(
            by_age.find_equals(&[Value::Int(99)]).unwrap().unwrap(),
            Vec::<DocId>::new()
        );
    }

    #[test]
    fn test_find_index_on_field() {
        let manager = IndexManager::new();
        manager
            .add_index(Arc::new(OrderedIndex::new("age_1", vec!["age".to_string()], false)))
            .unwrap();
        manager
            .add_index(Arc::new(HashIndex::new("tier_hash", "tier")))
            .unwrap();

        assert!(manager.find_index_on_field("age", None).is_some());
        assert!(manager.find_index_on_field("missing", None).is_none());

        let preferred = manager.find_index_on_field("tier", Some("hash")).unwrap();
        assert_eq!(preferred.name(), "tier_hash");
    }

    #[test]
    fn test_list_indexes() {
        let manager = IndexManager::new();
        manager
            .add_index(Arc::new(OrderedIndex::new("age_1", vec!["age".to_string()], false)))
            .unwrap();
        manager.on_insert(&id(1), &doc! { "age": 1i64 }).unwrap();

        let listed = manager.list_indexes();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "age_1");
        assert_eq!(listed[0].fields, vec!["age".to_string()]);
        assert_eq!(listed[0].entry_count, 1);
    }
}
