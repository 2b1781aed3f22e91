use parking_lot::RwLock;
use std::collections::HashMap;

use crate::common::doc_id::DocId;
use crate::common::document::Document;
use crate::errors::MinileafResult;
use crate::index::CollectionIndex;

/// Time-to-live index: tracks one recorded timestamp per id and drives the
/// background expiration sweep. Not queryable; only one TTL index per
/// collection is meaningful.
///
/// The tracked field accepts any stored timestamp representation (ISO-8601
/// text, epoch seconds or milliseconds, fractional seconds) through the
/// shared temporal coercion.
pub struct TtlIndex {
    name: String,
    field: String,
    expire_after_ms: i64,
    entries: RwLock<HashMap<DocId, i64>>,
}

impl TtlIndex {
    pub fn new(name: &str, field: &str, expire_after_ms: i64) -> Self {
        TtlIndex {
            name: name.to_string(),
            field: field.to_string(),
            expire_after_ms: expire_after_ms.max(0),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn extract_timestamp(&self, document: &Document) -> Option<i64> {
        document
            .get_path(&self.field)
            .and_then(|value| value.to_epoch_millis())
    }

    /// Runs one sweep: for every entry whose recorded timestamp plus the
    /// expiry duration is past `now_ms`, the expiration callback (the
    /// collection's delete pipeline) is invoked and the entry dropped. A
    /// callback failure is logged and the entry kept, so one bad document
    /// cannot stall the sweeper or lose its retry.
    pub fn sweep(
        &self,
        now_ms: i64,
        expire: &dyn Fn(&DocId) -> MinileafResult<()>,
    ) -> usize {
        let expired: Vec<DocId> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|(_, recorded)| **recorded + self.expire_after_ms <= now_ms)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut swept = 0usize;
        for id in expired {
            match expire(&id) {
                Ok(()) => {
                    self.entries.write().remove(&id);
                    swept += 1;
                }
                Err(e) => {
                    log::error!(
                        "TTL expiration of {} via index '{}' failed: {}",
                        id,
                        self.name,
                        e
                    );
                }
            }
        }
        if swept > 0 {
            log::debug!("TTL index '{}' expired {} documents", self.name, swept);
        }
        swept
    }
}

impl CollectionIndex for TtlIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> Vec<String> {
        vec![self.field.clone()]
    }

    fn index_type(&self) -> String {
        "ttl".to_string()
    }

    fn on_insert(&self, id: &DocId, document: &Document) -> MinileafResult<()> {
        match self.extract_timestamp(document) {
            Some(recorded) => {
                self.entries.write().insert(id.clone(), recorded);
            }
            None => {
                self.entries.write().remove(id);
            }
        }
        Ok(())
    }

    fn on_update(
        &self,
        id: &DocId,
        _old: Option<&Document>,
        new: &Document,
    ) -> MinileafResult<()> {
        self.on_insert(id, new)
    }

    fn on_remove(&self, id: &DocId, _document: &Document) -> MinileafResult<()> {
        self.entries.write().remove(id);
        Ok(())
    }

    fn entry_count(&self) -> usize {
        self.entries.read().len()
    }
}
