use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Included, Unbounded};

use crate::common::constants::{NON_UNIQUE_INDEX, UNIQUE_INDEX};
use crate::common::doc_id::DocId;
use crate::common::document::Document;
use crate::common::value::Value;
use crate::errors::{ErrorKind, MinileafError, MinileafResult};
use crate::index::CollectionIndex;
use itertools::Itertools;

/// Ordered secondary index: an ordered map from key tuples to id sets.
///
/// Compound keys are supported; equality needs the full tuple and range
/// scans run over the first field. A key tuple is defined only when every
/// indexed field resolves on the document; documents with undefined tuples
/// simply stay out of the index.
pub struct OrderedIndex {
    name: String,
    fields: Vec<String>,
    unique: bool,
    entries: RwLock<BTreeMap<Vec<Value>, BTreeSet<DocId>>>,
}

impl OrderedIndex {
    pub fn new(name: &str, fields: Vec<String>, unique: bool) -> Self {
        OrderedIndex {
            name: name.to_string(),
            fields,
            unique,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    fn extract_key(&self, document: &Document) -> Option<Vec<Value>> {
        let mut key = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            key.push(document.get_path(field)?);
        }
        Some(key)
    }

    fn key_text(key: &[Value]) -> String {
        key.iter().map(Value::to_key_string).join(",")
    }

    fn duplicate_key_error(&self, key: &[Value]) -> MinileafError {
        let key_text = Self::key_text(key);
        log::error!("Duplicate key '{}' in unique index '{}'", key_text, self.name);
        MinileafError::new(
            &format!("Duplicate key '{}' in index '{}'", key_text, self.name),
            ErrorKind::DuplicateKey {
                index_name: self.name.clone(),
                key: key_text,
            },
        )
    }

    /// Inserts under the index's own write lock. A unique violation is
    /// raised only when the key maps to an id set that does not consist
    /// solely of the incoming id, so re-inserting the same id with the same
    /// key is a no-op rather than a duplicate.
    fn insert_entry(&self, id: &DocId, key: Vec<Value>) -> MinileafResult<()> {
        let mut entries = self.entries.write();
        if self.unique {
            if let Some(existing) = entries.get(&key) {
                let sole_self = existing.len() == 1 && existing.contains(id);
                if !existing.is_empty() && !sole_self {
                    return Err(self.duplicate_key_error(&key));
                }
            }
        }
        entries.entry(key).or_default().insert(id.clone());
        Ok(())
    }

    fn remove_entry(&self, id: &DocId, key: &[Value]) {
        let mut entries = self.entries.write();
        if let Some(ids) = entries.get_mut(key) {
            ids.remove(id);
            if ids.is_empty() {
                entries.remove(key);
            }
        }
    }
}

impl CollectionIndex for OrderedIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> Vec<String> {
        self.fields.clone()
    }

    fn index_type(&self) -> String {
        if self.unique {
            UNIQUE_INDEX.to_string()
        } else {
            NON_UNIQUE_INDEX.to_string()
        }
    }

    fn on_insert(&self, id: &DocId, document: &Document) -> MinileafResult<()> {
        match self.extract_key(document) {
            Some(key) => self.insert_entry(id, key),
            None => Ok(()),
        }
    }

    fn on_update(
        &self,
        id: &DocId,
        old: Option<&Document>,
        new: &Document,
    ) -> MinileafResult<()> {
        let old_key = old.and_then(|old| self.extract_key(old));
        let new_key = self.extract_key(new);
        if old_key == new_key {
            // same key, same id: nothing to move
            return Ok(());
        }
        if let Some(new_key) = &new_key {
            // pre-check before mutating so a duplicate leaves the old entry
            if self.unique {
                let entries = self.entries.read();
                if let Some(existing) = entries.get(new_key) {
                    let sole_self = existing.len() == 1 && existing.contains(id);
                    if !existing.is_empty() && !sole_self {
                        return Err(self.duplicate_key_error(new_key));
                    }
                }
            }
        }
        if let Some(old_key) = &old_key {
            self.remove_entry(id, old_key);
        }
        match new_key {
            Some(new_key) => match self.insert_entry(id, new_key) {
                Ok(()) => Ok(()),
                Err(e) => {
                    // a racing writer can take the key between the pre-check
                    // and the insert; restore the old entry before surfacing
                    if let Some(old_key) = old_key {
                        let _ = self.insert_entry(id, old_key);
                    }
                    Err(e)
                }
            },
            None => Ok(()),
        }
    }

    fn on_remove(&self, id: &DocId, document: &Document) -> MinileafResult<()> {
        if let Some(key) = self.extract_key(document) {
            self.remove_entry(id, &key);
        }
        Ok(())
    }

    fn entry_count(&self) -> usize {
        self.entries.read().values().map(BTreeSet::len).sum()
    }

    fn find_equals(&self, values: &[Value]) -> MinileafResult<Option<Vec<DocId>>> {
        if values.len() != self.fields.len() {
            // partial tuples cannot be answered efficiently
            return Ok(None);
        }
        let entries = self.entries.read();
        Ok(Some(
            entries
                .get(values)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
        ))
    }

    /// Inclusive range scan over the first indexed field. For compound
    /// keys, every tuple whose first value falls in the range matches.
    fn find_range(
        &self,
        min: Option<&Value>,
        max: Option<&Value>,
    ) -> MinileafResult<Option<Vec<DocId>>> {
        let entries = self.entries.read();
        let lower = match min {
            Some(min) => Included(vec![min.clone()]),
            None => Unbounded,
        };
        let mut out = BTreeSet::new();
        for (key, ids) in entries.range((lower, Unbounded)) {
            let first = match key.first() {
                Some(first) => first,
                None => continue,
            };
            if let Some(max) = max {
                if first > max {
                    break;
                }
            }
            out.extend(ids.iter().cloned());
        }
        Ok(Some(out.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn id(n: i64) -> DocId {
        DocId::Int(n)
    }

    fn age_index(unique: bool) -> OrderedIndex {
        OrderedIndex::new("age_1", vec!["age".to_string()], unique)
    }

    #[test]
    fn test_insert_and_find_equals() {
        let index = age_index(false);
        index.on_insert(&id(1), &doc! { "age": 30i64 }).unwrap();
        index.on_insert(&id(2), &doc! { "age": 30i64 }).unwrap();
        index.on_insert(&id(3), &doc! { "age": 31i64 }).unwrap();

        let ids = index.find_equals(&[Value::Int(30)]).unwrap().unwrap();
        assert_eq!(ids, vec![id(1), id(2)]);
        assert_eq!(index.entry_count(), 3);
    }

    #[test]
    fn test_undefined_key_stays_out() {
        let index = age_index(false);
        index.on_insert(&id(1), &doc! { "name": "no age" }).unwrap();
        assert_eq!(index.entry_count(), 0);
    }

    #[test]
    fn test_unique_rejects_second_id() {
        let index = age_index(true);
        index.on_insert(&id(1), &doc! { "age": 30i64 }).unwrap();
        let err = index.on_insert(&id(2), &doc! { "age": 30i64 }).unwrap_err();
        match err.kind() {
            ErrorKind::DuplicateKey { index_name, key } => {
                assert_eq!(index_name, "age_1");
                assert_eq!(key, "30");
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_unique_same_id_reinsert_is_noop() {
        let index = age_index(true);
        index.on_insert(&id(1), &doc! { "age": 30i64 }).unwrap();
        index.on_insert(&id(1), &doc! { "age": 30i64 }).unwrap();
        assert_eq!(index.entry_count(), 1);
    }

    #[test]
    fn test_unique_self_update_same_key_is_noop() {
        let index = age_index(true);
        let doc = doc! { "age": 30i64 };
        index.on_insert(&id(1), &doc).unwrap();
        index.on_update(&id(1), Some(&doc), &doc! { "age": 30i64, "x": 1i64 }).unwrap();
        assert_eq!(index.entry_count(), 1);
    }

    #[test]
    fn test_update_moves_key() {
        let index = age_index(false);
        let old = doc! { "age": 30i64 };
        index.on_insert(&id(1), &old).unwrap();
        index.on_update(&id(1), Some(&old), &doc! { "age": 40i64 }).unwrap();

        assert_eq!(index.find_equals(&[Value::Int(30)]).unwrap().unwrap(), Vec::<DocId>::new());
        assert_eq!(index.find_equals(&[Value::Int(40)]).unwrap().unwrap(), vec![id(1)]);
    }

    #[test]
    fn test_update_to_undefined_key_removes() {
        let index = age_index(false);
        let old = doc! { "age": 30i64 };
        index.on_insert(&id(1), &old).unwrap();
        index.on_update(&id(1), Some(&old), &doc! { "name": "x" }).unwrap();
        assert_eq!(index.entry_count(), 0);
    }

    #[test]
    fn test_update_duplicate_leaves_old_entry() {
        let index = age_index(true);
        let doc1 = doc! { "age": 30i64 };
        let doc2 = doc! { "age": 31i64 };
        index.on_insert(&id(1), &doc1).unwrap();
        index.on_insert(&id(2), &doc2).unwrap();

        let err = index.on_update(&id(2), Some(&doc2), &doc! { "age": 30i64 }).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DuplicateKey { .. }));
        // the failed move left id 2 under its old key
        assert_eq!(index.find_equals(&[Value::Int(31)]).unwrap().unwrap(), vec![id(2)]);
    }

    #[test]
    fn test_remove() {
        let index = age_index(false);
        let doc = doc! { "age": 30i64 };
        index.on_insert(&id(1), &doc).unwrap();
        index.on_remove(&id(1), &doc).unwrap();
        assert_eq!(index.entry_count(), 0);
        assert_eq!(index.find_equals(&[Value::Int(30)]).unwrap().unwrap(), Vec::<DocId>::new());
    }

    #[test]
    fn test_range_inclusive() {
        let index = age_index(false);
        for n in 20..30i64 {
            index.on_insert(&id(n), &doc! { "age": n }).unwrap();
        }
        let ids = index
            .find_range(Some(&Value::Int(22)), Some(&Value::Int(24)))
            .unwrap()
            .unwrap();
        assert_eq!(ids, vec![id(22), id(23), id(24)]);
    }

    #[test]
    fn test_range_open_ends() {
        let index = age_index(false);
        for n in 1..=5i64 {
            index.on_insert(&id(n), &doc! { "age": n }).unwrap();
        }
        let ids = index.find_range(Some(&Value::Int(4)), None).unwrap().unwrap();
        assert_eq!(ids, vec![id(4), id(5)]);
        let ids = index.find_range(None, Some(&Value::Int(2))).unwrap().unwrap();
        assert_eq!(ids, vec![id(1), id(2)]);
    }

    #[test]
    fn test_compound_key() {
        let index = OrderedIndex::new(
            "a_1_b_1",
            vec!["a".to_string(), "b".to_string()],
            false,
        );
        index.on_insert(&id(1), &doc! { "a": 1i64, "b": "x" }).unwrap();
        index.on_insert(&id(2), &doc! { "a": 1i64, "b": "y" }).unwrap();
        index.on_insert(&id(3), &doc! { "a": 2i64, "b": "x" }).unwrap();
        // missing one component keeps the document out
        index.on_insert(&id(4), &doc! { "a": 9i64 }).unwrap();

        let ids = index
            .find_equals(&[Value::Int(1), Value::Text("x".into())])
            .unwrap()
            .unwrap();
        assert_eq!(ids, vec![id(1)]);

        // partial tuple equality is not answerable
        assert!(index.find_equals(&[Value::Int(1)]).unwrap().is_none());

        // first-field range covers all tuples with that prefix
        let ids = index
            .find_range(Some(&Value::Int(1)), Some(&Value::Int(1)))
            .unwrap()
            .unwrap();
        assert_eq!(ids, vec![id(1), id(2)]);
    }

    #[test]
    fn test_nested_field_path() {
        let index = OrderedIndex::new("u_1", vec!["user.age".to_string()], false);
        index
            .on_insert(&id(1), &doc! { "user": doc! { "age": 5i64 } })
            .unwrap();
        assert_eq!(index.find_equals(&[Value::Int(5)]).unwrap().unwrap(), vec![id(1)]);
    }
}
