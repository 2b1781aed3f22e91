use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::common::doc_id::DocId;
use crate::common::document::Document;
use crate::common::type_utils::{atomic, Atomic, ReadExecutor, WriteExecutor};
use crate::errors::{ErrorKind, MinileafError, MinileafResult};
use crate::store::{StorageEngine, StorageStats};
use crate::update::UpdateOps;

/// Ephemeral storage engine backed by an ordered in-memory map.
///
/// No durability; used for tests and memory-only databases. All operations
/// go through one reader-writer lock, so writes are linearizable and readers
/// never observe a torn document.
#[derive(Clone)]
pub struct InMemoryEngine {
    inner: Arc<InMemoryEngineInner>,
}

struct InMemoryEngineInner {
    documents: Atomic<BTreeMap<DocId, Document>>,
    closed: AtomicBool,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        InMemoryEngine {
            inner: Arc::new(InMemoryEngineInner {
                documents: atomic(BTreeMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn check_open(&self) -> MinileafResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            log::error!("Operation on closed in-memory engine");
            return Err(MinileafError::new(
                "Engine already closed",
                ErrorKind::StoreAlreadyClosed,
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        InMemoryEngine::new()
    }
}

impl StorageEngine for InMemoryEngine {
    fn upsert(&self, id: DocId, document: Document) -> MinileafResult<()> {
        self.check_open()?;
        self.inner.documents.write_with(|map| {
            map.insert(id, document);
        });
        Ok(())
    }

    fn find_by_id(&self, id: &DocId) -> MinileafResult<Option<Document>> {
        self.check_open()?;
        Ok(self.inner.documents.read_with(|map| map.get(id).cloned()))
    }

    fn update_fields(&self, id: &DocId, ops: &UpdateOps) -> MinileafResult<bool> {
        self.check_open()?;
        self.inner.documents.write_with(|map| match map.get_mut(id) {
            Some(document) => {
                ops.apply(document)?;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    fn delete(&self, id: &DocId) -> MinileafResult<Option<Document>> {
        self.check_open()?;
        Ok(self.inner.documents.write_with(|map| map.remove(id)))
    }

    fn ids(&self) -> MinileafResult<Vec<DocId>> {
        self.check_open()?;
        Ok(self.inner.documents.read_with(|map| map.keys().cloned().collect()))
    }

    fn exists(&self, id: &DocId) -> MinileafResult<bool> {
        self.check_open()?;
        Ok(self.inner.documents.read_with(|map| map.contains_key(id)))
    }

    fn count(&self) -> MinileafResult<u64> {
        self.check_open()?;
        Ok(self.inner.documents.read_with(|map| map.len() as u64))
    }

    fn compact(&self) -> MinileafResult<()> {
        // nothing on disk to rewrite
        self.check_open()
    }

    fn stats(&self) -> MinileafResult<StorageStats> {
        self.check_open()?;
        Ok(StorageStats {
            document_count: self.inner.documents.read_with(|map| map.len() as u64),
            ..StorageStats::default()
        })
    }

    fn close(&self) -> MinileafResult<()> {
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::common::value::Value;

    fn id(n: i64) -> DocId {
        DocId::Int(n)
    }

    #[test]
    fn test_upsert_and_find() {
        let engine = InMemoryEngine::new();
        engine.upsert(id(1), doc! { "a": 1i64 }).unwrap();
        assert_eq!(
            engine.find_by_id(&id(1)).unwrap().unwrap().get_field("a"),
            Some(&Value::Int(1))
        );
        assert!(engine.find_by_id(&id(2)).unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces() {
        let engine = InMemoryEngine::new();
        engine.upsert(id(1), doc! { "a": 1i64 }).unwrap();
        engine.upsert(id(1), doc! { "a": 2i64 }).unwrap();
        assert_eq!(engine.count().unwrap(), 1);
        assert_eq!(
            engine.find_by_id(&id(1)).unwrap().unwrap().get_field("a"),
            Some(&Value::Int(2))
        );
    }

    #[test]
    fn test_delete_returns_prior_copy() {
        let engine = InMemoryEngine::new();
        engine.upsert(id(1), doc! { "a": 1i64 }).unwrap();
        let removed = engine.delete(&id(1)).unwrap().unwrap();
        assert_eq!(removed.get_field("a"), Some(&Value::Int(1)));
        assert!(engine.delete(&id(1)).unwrap().is_none());
        assert!(!engine.exists(&id(1)).unwrap());
    }

    #[test]
    fn test_update_fields() {
        let engine = InMemoryEngine::new();
        engine.upsert(id(1), doc! { "n": 1i64 }).unwrap();
        let ops = UpdateOps::parse(&doc! { "$inc": doc! { "n": 2i64 } }).unwrap();
        assert!(engine.update_fields(&id(1), &ops).unwrap());
        assert_eq!(
            engine.find_by_id(&id(1)).unwrap().unwrap().get_field("n"),
            Some(&Value::Int(3))
        );
        assert!(!engine.update_fields(&id(9), &ops).unwrap());
    }

    #[test]
    fn test_ids_in_primary_order() {
        let engine = InMemoryEngine::new();
        for n in [3i64, 1, 2] {
            engine.upsert(id(n), doc! { "n": n }).unwrap();
        }
        assert_eq!(engine.ids().unwrap(), vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn test_find_all_paged() {
        let engine = InMemoryEngine::new();
        for n in 1..=5i64 {
            engine.upsert(id(n), doc! { "n": n }).unwrap();
        }
        let page = engine.find_all_paged(1, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].0, id(2));
        assert_eq!(page[1].0, id(3));
    }

    #[test]
    fn test_count_matching() {
        let engine = InMemoryEngine::new();
        for n in 1..=4i64 {
            engine.upsert(id(n), doc! { "n": n }).unwrap();
        }
        let even = engine
            .count_matching(&|d| matches!(d.get_field("n"), Some(Value::Int(n)) if n % 2 == 0))
            .unwrap();
        assert_eq!(even, 2);
    }

    #[test]
    fn test_operations_after_close_fail() {
        let engine = InMemoryEngine::new();
        engine.close().unwrap();
        let err = engine.upsert(id(1), doc! {}).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::StoreAlreadyClosed);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        use std::thread;

        let engine = InMemoryEngine::new();
        engine.upsert(id(1), doc! { "n": 0i64 }).unwrap();

        let mut handles = Vec::new();
        for t in 0..4 {
            let engine = engine.clone();
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    if t % 2 == 0 {
                        engine.upsert(id(1), doc! { "n": i as i64 }).unwrap();
                    } else {
                        // every read sees a whole document, never a torn one
                        if let Some(doc) = engine.find_by_id(&id(1)).unwrap() {
                            assert!(matches!(doc.get_field("n"), Some(Value::Int(_))));
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
