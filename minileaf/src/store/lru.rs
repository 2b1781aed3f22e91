use std::collections::{HashMap, VecDeque};

use crate::common::doc_id::DocId;
use crate::common::document::Document;

/// Bounded LRU cache of materialized documents.
///
/// Plain data structure; the owning engine serializes access through its
/// reader-writer lock, so no interior locking here. Eviction order: front of
/// the queue is the least recently used entry.
pub struct LruCache {
    entries: HashMap<DocId, Document>,
    order: VecDeque<DocId>,
    capacity: usize,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        LruCache {
            entries: HashMap::with_capacity(capacity.min(1024)),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &DocId) -> bool {
        self.entries.contains_key(id)
    }

    /// Fetches an entry and marks it most recently used.
    pub fn get(&mut self, id: &DocId) -> Option<Document> {
        if !self.entries.contains_key(id) {
            return None;
        }
        self.touch(id);
        self.entries.get(id).cloned()
    }

    /// Peeks without disturbing the recency order.
    pub fn peek(&self, id: &DocId) -> Option<&Document> {
        self.entries.get(id)
    }

    /// Inserts or replaces an entry, evicting the least recently used entry
    /// when over capacity.
    pub fn insert(&mut self, id: DocId, document: Document) {
        if self.entries.insert(id.clone(), document).is_some() {
            self.touch(&id);
        } else {
            self.order.push_back(id);
        }
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub fn remove(&mut self, id: &DocId) -> Option<Document> {
        let removed = self.entries.remove(id);
        if removed.is_some() {
            self.order.retain(|queued| queued != id);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn touch(&mut self, id: &DocId) {
        self.order.retain(|queued| queued != id);
        self.order.push_back(id.clone());
    }
}
