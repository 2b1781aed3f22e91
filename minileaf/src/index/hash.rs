use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

use crate::common::constants::HASH_INDEX;
use crate::common::doc_id::DocId;
use crate::common::document::Document;
use crate::common::value::Value;
use crate::errors::MinileafResult;
use crate::index::CollectionIndex;

/// Hash secondary index, tuned for enum-like fields with few distinct
/// values. Single-field only, equality only; the key is the stringified
/// field value, so an enum stored as its name and one stored through
/// `to_string` land on the same bucket.
pub struct HashIndex {
    name: String,
    field: String,
    entries: RwLock<HashMap<String, BTreeSet<DocId>>>,
}

impl HashIndex {
    pub fn new(name: &str, field: &str) -> Self {
        HashIndex {
            name: name.to_string(),
            field: field.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn extract_key(&self, document: &Document) -> Option<String> {
        document.get_path(&self.field).map(|value| value.to_key_string())
    }

    fn insert_entry(&self, id: &DocId, key: String) {
        // reinserting the same id under the same key is tolerated
        self.entries.write().entry(key).or_default().insert(id.clone());
    }

    fn remove_entry(&self, id: &DocId, key: &str) {
        let mut entries = self.entries.write();
        if let Some(ids) = entries.get_mut(key) {
            ids.remove(id);
            if ids.is_empty() {
                entries.remove(key);
            }
        }
    }

    /// Equality lookup by the stringified value.
    pub fn find_text(&self, key: &str) -> Vec<DocId> {
        self.entries
            .read()
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl CollectionIndex for HashIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> Vec<String> {
        vec![self.field.clone()]
    }

    fn index_type(&self) -> String {
        HASH_INDEX.to_string()
    }

    fn on_insert(&self, id: &DocId, document: &Document) -> MinileafResult<()> {
        if let Some(key) = self.extract_key(document) {
            self.insert_entry(id, key);
        }
        Ok(())
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
            return Ok(());
        }
        if let Some(old_key) = old_key {
            self.remove_entry(id, &old_key);
        }
        if let Some(new_key) = new_key {
            self.insert_entry(id, new_key);
        }
        Ok(())
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
        if values.len() != 1 {
            return Ok(None);
        }
        Ok(Some(self.find_text(&values[0].to_key_string())))
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
    fn test_equality_by_stringified_value() {
        let index = HashIndex::new("tier_hash", "tier");
        index.on_insert(&id(1), &doc! { "tier": "Gold" }).unwrap();
        index.on_insert(&id(2), &doc! { "tier": "Silver" }).unwrap();
        index.on_insert(&id(3), &doc! { "tier": "Gold" }).unwrap();

        assert_eq!(index.find_text("Gold"), vec![id(1), id(3)]);
        assert_eq!(
            index.find_equals(&[Value::Text("Silver".into())]).unwrap().unwrap(),
            vec![id(2)]
        );
        assert_eq!(index.find_text("Bronze"), Vec::<DocId>::new());
    }

    #[test]
    fn test_non_text_values_stringify() {
        let index = HashIndex::new("level_hash", "level");
        index.on_insert(&id(1), &doc! { "level": 3i64 }).unwrap();
        assert_eq!(index.find_text("3"), vec![id(1)]);
        assert_eq!(
            index.find_equals(&[Value::Int(3)]).unwrap().unwrap(),
            vec![id(1)]
        );
    }

    #[test]
    fn test_same_id_reinserted_with_same_value() {
        let index = HashIndex::new("tier_hash", "tier");
        index.on_insert(&id(1), &doc! { "tier": "Gold" }).unwrap();
        index.on_insert(&id(1), &doc! { "tier": "Gold" }).unwrap();
        assert_eq!(index.entry_count(), 1);
    }

    #[test]
    fn test_update_moves_bucket() {
        let index = HashIndex::new("tier_hash", "tier");
        let old = doc! { "tier": "Gold" };
        index.on_insert(&id(1), &old).unwrap();
        index.on_update(&id(1), Some(&old), &doc! { "tier": "Silver" }).unwrap();
        assert_eq!(index.find_text("Gold"), Vec::<DocId>::new());
        assert_eq!(index.find_text("Silver"), vec![id(1)]);
    }

    #[test]
    fn test_missing_field_stays_out() {
        let index = HashIndex::new("tier_hash", "tier");
        index.on_insert(&id(1), &doc! { "other": 1i64 }).unwrap();
        assert_eq!(index.entry_count(), 0);
    }

    #[test]
    fn test_remove() {
        let index = HashIndex::new("tier_hash", "tier");
        let doc = doc! { "tier": "Gold" };
        index.on_insert(&id(1), &doc).unwrap();
        index.on_remove(&id(1), &doc).unwrap();
        assert_eq!(index.entry_count(), 0);
    }

    #[test]
    fn test_multi_value_equality_unsupported() {
        let index = HashIndex::new("tier_hash", "tier");
        assert!(index
            .find_equals(&[Value::Int(1), Value::Int(2)])
            .unwrap()
            .is_none());
    }
}
