use parking_lot::RwLock;
use std::collections::BTreeSet;

use crate::common::constants::{PRIMARY_INDEX_NAME, UNIQUE_INDEX};
use crate::common::constants::DOC_ID;
use crate::common::doc_id::DocId;
use crate::common::document::Document;
use crate::errors::MinileafResult;
use crate::index::CollectionIndex;

/// The always-present unique ordered index over the document id.
///
/// Created at collection birth and undropable. Mirrors the engine's id set
/// (the bijection invariant), honoring the legacy `id` alias that the
/// `_id`-path extraction of a plain ordered index would miss. Lookups by id
/// go straight to the engine; this structure serves listing, stats, and the
/// ordering contract.
pub struct PrimaryIndex {
    ids: RwLock<BTreeSet<DocId>>,
}

impl PrimaryIndex {
    pub fn new() -> Self {
        PrimaryIndex {
            ids: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn contains(&self, id: &DocId) -> bool {
        self.ids.read().contains(id)
    }
}

impl Default for PrimaryIndex {
    fn default() -> Self {
        PrimaryIndex::new()
    }
}

impl CollectionIndex for PrimaryIndex {
    fn name(&self) -> &str {
        PRIMARY_INDEX_NAME
    }

    fn fields(&self) -> Vec<String> {
        vec![DOC_ID.to_string()]
    }

    fn index_type(&self) -> String {
        UNIQUE_INDEX.to_string()
    }

    fn on_insert(&self, id: &DocId, _document: &Document) -> MinileafResult<()> {
        self.ids.write().insert(id.clone());
        Ok(())
    }

    fn on_update(
        &self,
        id: &DocId,
        _old: Option<&Document>,
        _new: &Document,
    ) -> MinileafResult<()> {
        self.ids.write().insert(id.clone());
        Ok(())
    }

    fn on_remove(&self, id: &DocId, _document: &Document) -> MinileafResult<()> {
        self.ids.write().remove(id);
        Ok(())
    }

    fn entry_count(&self) -> usize {
        self.ids.read().len()
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
    fn test_tracks_id_set() {
        let index = PrimaryIndex::new();
        let doc = doc! { "_id": 1i64 };
        index.on_insert(&id(1), &doc).unwrap();
        assert!(index.contains(&id(1)));
        assert_eq!(index.entry_count(), 1);

        // same id re-saved is a no-op, not a duplicate
        index.on_update(&id(1), Some(&doc), &doc).unwrap();
        assert_eq!(index.entry_count(), 1);

        index.on_remove(&id(1), &doc).unwrap();
        assert!(!index.contains(&id(1)));
    }

    #[test]
    fn test_identity() {
        let index = PrimaryIndex::new();
        assert_eq!(index.name(), PRIMARY_INDEX_NAME);
        assert_eq!(index.fields(), vec![DOC_ID.to_string()]);
        assert_eq!(index.index_type(), UNIQUE_INDEX);
    }
}
