// doc constants
pub const DOC_ID: &str = "_id";
pub const LEGACY_DOC_ID: &str = "id";

// on-disk layout constants
pub const COLLECTIONS_DIR: &str = "collections";
pub const DATA_FILE_SUFFIX: &str = ".data";
pub const WAL_FILE_SUFFIX: &str = ".wal";
pub const SNAPSHOT_FILE_SUFFIX: &str = ".snapshot";
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

// record sanity bounds; anything beyond these is treated as corruption
pub const MAX_ID_LEN: usize = 10_000;
pub const MAX_DOC_LEN: usize = 100 * 1024 * 1024;
pub const MAX_FRAME_LEN: usize = MAX_DOC_LEN + MAX_ID_LEN + 100;

/// Payload of an on-disk deletion marker record.
pub const DELETION_MARKER: &[u8] = b"{}";

// index constants
pub const PRIMARY_INDEX_NAME: &str = "_id_";
pub const UNIQUE_INDEX: &str = "unique";
pub const NON_UNIQUE_INDEX: &str = "non-unique";
pub const HASH_INDEX: &str = "hash";

// defaults
pub const DEFAULT_WAL_MAX_BYTES: u64 = 16 * 1024 * 1024;
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_TTL_SWEEP_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;
pub const MIGRATION_BATCH_SIZE: usize = 256;
