use std::path::PathBuf;

use crate::common::constants::{
    DEFAULT_MAX_DOCUMENT_SIZE, DEFAULT_SNAPSHOT_INTERVAL_MS, DEFAULT_TTL_SWEEP_INTERVAL_MS,
    DEFAULT_WAL_MAX_BYTES,
};
use crate::crypto::EncryptionKey;

/// Database configuration, normally assembled through
/// [crate::leaf::MinileafBuilder].
///
/// Engine selection: `memory_only` picks the in-memory engine; a set
/// `cache_size` picks the LRU-cached log engine with that many documents in
/// RAM; otherwise the WAL+snapshot engine is used.
#[derive(Clone)]
pub struct LeafConfig {
    /// Root directory holding `collections/<name>.{data,wal,snapshot}`.
    pub data_dir: PathBuf,
    /// Optional 256-bit key enabling authenticated encryption at rest.
    pub encryption_key: Option<EncryptionKey>,
    /// Cadence of the scheduled WAL-engine snapshot.
    pub snapshot_interval_ms: u64,
    /// WAL size that triggers an immediate snapshot.
    pub wal_max_bytes_before_snapshot: u64,
    /// No durability: keep everything in RAM.
    pub memory_only: bool,
    /// Document count held in RAM by the log engine.
    pub cache_size: Option<usize>,
    /// fsync after every write before the caller is unblocked.
    pub sync_on_write: bool,
    /// Reject documents whose serialized form exceeds this many bytes.
    pub max_document_size: usize,
    /// Run create-index builds off the caller's thread.
    pub background_index_build: bool,
    /// Cadence of the TTL expiration sweep.
    pub ttl_sweep_interval_ms: u64,
}

impl Default for LeafConfig {
    fn default() -> Self {
        LeafConfig {
            data_dir: PathBuf::from("minileaf-data"),
            encryption_key: None,
            snapshot_interval_ms: DEFAULT_SNAPSHOT_INTERVAL_MS,
            wal_max_bytes_before_snapshot: DEFAULT_WAL_MAX_BYTES,
            memory_only: false,
            cache_size: None,
            sync_on_write: true,
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
            background_index_build: false,
            ttl_sweep_interval_ms: DEFAULT_TTL_SWEEP_INTERVAL_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LeafConfig::default();
        assert!(config.sync_on_write);
        assert!(!config.memory_only);
        assert!(config.cache_size.is_none());
        assert!(config.encryption_key.is_none());
        assert_eq!(config.max_document_size, DEFAULT_MAX_DOCUMENT_SIZE);
    }
}
