use std::sync::Arc;

use crate::common::doc_id::DocId;
use crate::common::document::Document;
use crate::common::value::Value;
use crate::errors::MinileafResult;
use crate::filter::Filter;
use crate::index::CollectionIndex;

/// Wraps any secondary index and restricts membership to documents
/// satisfying a filter expression.
///
/// Tie-breaking on update evaluates the new document first: if it matches,
/// the update (or first-time insert) propagates; if it does not but the old
/// document matched, the wrapped index is told to remove.
pub struct PartialIndex {
    inner: Arc<dyn CollectionIndex>,
    filter: Filter,
}

impl PartialIndex {
    pub fn new(inner: Arc<dyn CollectionIndex>, filter: Filter) -> Self {
        PartialIndex { inner, filter }
    }

    fn member(&self, document: &Document) -> bool {
        // a filter that errors on a document simply excludes it
        self.filter.matches(document).unwrap_or_else(|e| {
            log::warn!(
                "Partial filter of index '{}' failed, excluding document: {}",
                self.inner.name(),
                e
            );
            false
        })
    }
}

impl CollectionIndex for PartialIndex {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn fields(&self) -> Vec<String> {
        self.inner.fields()
    }

    fn index_type(&self) -> String {
        format!("partial({})", self.inner.index_type())
    }

    fn on_insert(&self, id: &DocId, document: &Document) -> MinileafResult<()> {
        if self.member(document) {
            self.inner.on_insert(id, document)
        } else {
            Ok(())
        }
    }

    fn on_update(
        &self,
        id: &DocId,
        old: Option<&Document>,
        new: &Document,
    ) -> MinileafResult<()> {
        let old_member = old.filter(|old| self.member(old));
        if self.member(new) {
            match old_member {
                Some(old) => self.inner.on_update(id, Some(old), new),
                None => self.inner.on_insert(id, new),
            }
        } else if let Some(old) = old_member {
            self.inner.on_remove(id, old)
        } else {
            Ok(())
        }
    }

    fn on_remove(&self, id: &DocId, document: &Document) -> MinileafResult<()> {
        if self.member(document) {
            self.inner.on_remove(id, document)
        } else {
            Ok(())
        }
    }

    fn entry_count(&self) -> usize {
        self.inner.entry_count()
    }

    fn find_equals(&self, values: &[Value]) -> MinileafResult<Option<Vec<DocId>>> {
        self.inner.find_equals(values)
    }

    fn find_range(
        &self,
        min: Option<&Value>,
        max: Option<&Value>,
    ) -> MinileafResult<Option<Vec<DocId>>> {
        self.inner.find_range(min, max)
    }
}
