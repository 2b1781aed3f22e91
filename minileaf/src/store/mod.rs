//! Storage engines.
//!
//! Three interchangeable engines implement [StorageEngine]: a pure in-memory
//! map, a WAL+snapshot engine holding the full working set in RAM, and an
//! LRU-cached append-only log engine for datasets larger than RAM. Engine
//! selection lives in the top-level handle: `memory_only` picks the
//! in-memory engine, a configured `cache_size` picks the log engine, and the
//! WAL engine is the durable default.

pub mod log;
pub mod lru;
pub mod memory;
pub mod migrate;
pub mod wal;

pub use log::LogEngine;
pub use memory::InMemoryEngine;
pub use migrate::migrate;
pub use wal::WalEngine;

use crate::common::doc_id::DocId;
use crate::common::document::Document;
use crate::errors::MinileafResult;
use crate::update::UpdateOps;

/// Point-in-time counters reported by [StorageEngine::stats].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of live documents.
    pub document_count: u64,
    /// Bytes in the data or snapshot file.
    pub data_bytes: u64,
    /// Bytes currently sitting in the write-ahead log.
    pub wal_bytes: u64,
    /// Epoch milliseconds of the last completed snapshot, if any.
    pub last_snapshot_ms: Option<i64>,
}

/// The per-collection storage contract.
///
/// File-backed implementations return from mutations only after their
/// durability guarantees hold: the write syscall and (with `sync_on_write`)
/// the fsync happen before in-memory indexes are touched or the caller is
/// unblocked.
pub trait StorageEngine: Send + Sync {
    /// Inserts or replaces the document stored under `id`.
    fn upsert(&self, id: DocId, document: Document) -> MinileafResult<()>;

    /// Fetches the document stored under `id`.
    fn find_by_id(&self, id: &DocId) -> MinileafResult<Option<Document>>;

    /// Applies a partial update to the live copy under the engine's write
    /// lock. Returns whether the id existed.
    fn update_fields(&self, id: &DocId, ops: &UpdateOps) -> MinileafResult<bool>;

    /// Deletes the document stored under `id`, returning the prior copy.
    fn delete(&self, id: &DocId) -> MinileafResult<Option<Document>>;

    /// All live ids in primary order.
    fn ids(&self) -> MinileafResult<Vec<DocId>>;

    /// Rewrites the on-disk representation to drop garbage.
    fn compact(&self) -> MinileafResult<()>;

    fn stats(&self) -> MinileafResult<StorageStats>;

    /// Flushes and releases resources. Mutations after close fail.
    fn close(&self) -> MinileafResult<()>;

    fn exists(&self, id: &DocId) -> MinileafResult<bool> {
        Ok(self.find_by_id(id)?.is_some())
    }

    fn count(&self) -> MinileafResult<u64> {
        Ok(self.ids()?.len() as u64)
    }

    /// Streams documents in primary order through a predicate.
    fn count_matching(&self, predicate: &dyn Fn(&Document) -> bool) -> MinileafResult<u64> {
        let mut matched = 0u64;
        for id in self.ids()? {
            if let Some(document) = self.find_by_id(&id)? {
                if predicate(&document) {
                    matched += 1;
                }
            }
        }
        Ok(matched)
    }

    /// Materializes every document in primary order.
    fn find_all(&self) -> MinileafResult<Vec<(DocId, Document)>> {
        let ids = self.ids()?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(document) = self.find_by_id(&id)? {
                out.push((id, document));
            }
        }
        Ok(out)
    }

    /// Primary-order page of documents.
    fn find_all_paged(&self, skip: usize, limit: usize) -> MinileafResult<Vec<(DocId, Document)>> {
        let ids = self.ids()?;
        let mut out = Vec::new();
        for id in ids.into_iter().skip(skip).take(limit) {
            if let Some(document) = self.find_by_id(&id)? {
                out.push((id, document));
            }
        }
        Ok(out)
    }
}
