//! The top-level database handle.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::collection::Collection;
use crate::common::constants::{
    COLLECTIONS_DIR, DATA_FILE_SUFFIX, SNAPSHOT_FILE_SUFFIX, WAL_FILE_SUFFIX,
};
use crate::common::doc_id::{IdGenerator, IdKind};
use crate::common::task_util::{schedule_task, stop_scheduled_tasks};
use crate::config::LeafConfig;
use crate::crypto::{CipherBox, EncryptionKey};
use crate::errors::{ErrorKind, MinileafError, MinileafResult};
use crate::store::{InMemoryEngine, LogEngine, StorageEngine, WalEngine};

/// An embedded Minileaf database.
///
/// All clones share one underlying state; the handle is cheap to clone and
/// safe to use from multiple threads. Obtain one through
/// [Minileaf::builder]:
///
/// ```rust,ignore
/// let db = Minileaf::builder()
///     .data_dir("/var/lib/myapp")
///     .cache_size(10_000)
///     .open()?;
/// let users = db.collection("users", IdKind::ObjectId)?;
/// ```
#[derive(Clone)]
pub struct Minileaf {
    inner: Arc<MinileafInner>,
}

struct MinileafInner {
    config: LeafConfig,
    cipher: Option<CipherBox>,
    id_generator: IdGenerator,
    collections: Mutex<HashMap<String, Collection>>,
    closed: AtomicBool,
}

impl Minileaf {
    pub fn builder() -> MinileafBuilder {
        MinileafBuilder::new()
    }

    fn open(config: LeafConfig) -> MinileafResult<Minileaf> {
        let cipher = config.encryption_key.as_ref().map(CipherBox::new);
        if !config.memory_only {
            std::fs::create_dir_all(config.data_dir.join(COLLECTIONS_DIR))?;
        }
        log::info!(
            "Opened Minileaf at {:?} (memory_only: {}, encrypted: {})",
            config.data_dir,
            config.memory_only,
            cipher.is_some()
        );
        Ok(Minileaf {
            inner: Arc::new(MinileafInner {
                config,
                cipher,
                id_generator: IdGenerator::new(),
                collections: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    fn check_open(&self) -> MinileafResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            log::error!("Operation on closed database");
            return Err(MinileafError::new(
                "Database already closed",
                ErrorKind::StoreAlreadyClosed,
            ));
        }
        Ok(())
    }

    fn validate_name(name: &str) -> MinileafResult<()> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            log::error!("Invalid collection name '{}'", name);
            return Err(MinileafError::new(
                &format!("Invalid collection name '{}'", name),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn collection_file(&self, name: &str, suffix: &str) -> PathBuf {
        self.inner
            .config
            .data_dir
            .join(COLLECTIONS_DIR)
            .join(format!("{}{}", name, suffix))
    }

    /// Opens (or creates) a collection. The id kind is fixed at first use;
    /// asking for the same collection with a different kind fails loudly.
    pub fn collection(&self, name: &str, id_kind: IdKind) -> MinileafResult<Collection> {
        self.check_open()?;
        Self::validate_name(name)?;

        let mut collections = self.inner.collections.lock();
        if let Some(existing) = collections.get(name) {
            if existing.id_kind() != id_kind {
                log::error!(
                    "Collection '{}' already uses {} ids, requested {}",
                    name,
                    existing.id_kind(),
                    id_kind
                );
                return Err(MinileafError::new(
                    &format!(
                        "Collection '{}' already uses {} ids",
                        name,
                        existing.id_kind()
                    ),
                    ErrorKind::CollectionIdTypeMismatch {
                        existing: existing.id_kind().name().to_string(),
                        requested: id_kind.name().to_string(),
                    },
                ));
            }
            return Ok(existing.clone());
        }

        let config = &self.inner.config;
        let engine: Arc<dyn StorageEngine> = if config.memory_only {
            Arc::new(InMemoryEngine::new())
        } else if let Some(cache_size) = config.cache_size {
            Arc::new(LogEngine::open(
                &self.collection_file(name, DATA_FILE_SUFFIX),
                id_kind,
                cache_size,
                config.sync_on_write,
                self.inner.cipher.clone(),
            )?)
        } else {
            let engine = WalEngine::open(
                &self.collection_file(name, WAL_FILE_SUFFIX),
                &self.collection_file(name, SNAPSHOT_FILE_SUFFIX),
                id_kind,
                config.sync_on_write,
                self.inner.cipher.clone(),
                config.wal_max_bytes_before_snapshot,
            )?;
            // scheduled snapshots keep the WAL bounded even on idle-write
            // workloads; failures are logged, never fatal
            let snapshotter = engine.clone();
            schedule_task(
                Duration::from_millis(config.snapshot_interval_ms),
                move || {
                    if let Err(e) = snapshotter.snapshot() {
                        log::error!("Scheduled snapshot failed: {:?}", e);
                    }
                },
            );
            Arc::new(engine)
        };

        let collection = Collection::new(
            name,
            engine,
            id_kind,
            self.inner.id_generator.clone(),
            config.max_document_size,
            config.background_index_build,
        )?;

        let sweeper = collection.clone();
        schedule_task(
            Duration::from_millis(config.ttl_sweep_interval_ms),
            move || {
                sweeper.sweep_expired();
            },
        );

        collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    /// Names of the collections opened through this handle.
    pub fn collection_names(&self) -> Vec<String> {
        self.inner.collections.lock().keys().cloned().collect()
    }

    /// The process-wide id generator handle; exposed so tests can reset
    /// auto-increment state.
    pub fn id_generator(&self) -> &IdGenerator {
        &self.inner.id_generator
    }

    /// Stops background tasks and closes every collection. WAL engines
    /// attempt a final snapshot as part of their close.
    pub fn close(&self) -> MinileafResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        stop_scheduled_tasks();
        let collections = self.inner.collections.lock();
        for (name, collection) in collections.iter() {
            if let Err(e) = collection.close() {
                log::error!("Closing collection '{}' failed: {:?}", name, e);
            }
        }
        log::info!("Closed Minileaf at {:?}", self.inner.config.data_dir);
        Ok(())
    }
}

/// Fluent database builder.
pub struct MinileafBuilder {
    config: LeafConfig,
}

impl MinileafBuilder {
    pub fn new() -> Self {
        MinileafBuilder {
            config: LeafConfig::default(),
        }
    }

    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Enables authenticated encryption at rest with a 256-bit key.
    pub fn encryption_key(mut self, key: EncryptionKey) -> Self {
        self.config.encryption_key = Some(key);
        self
    }

    pub fn snapshot_interval_ms(mut self, interval: u64) -> Self {
        self.config.snapshot_interval_ms = interval;
        self
    }

    pub fn wal_max_bytes_before_snapshot(mut self, bytes: u64) -> Self {
        self.config.wal_max_bytes_before_snapshot = bytes;
        self
    }

    /// Keep everything in RAM; no durability.
    pub fn memory_only(mut self) -> Self {
        self.config.memory_only = true;
        self
    }

    /// Select the LRU-cached log engine with this many documents in RAM.
    pub fn cache_size(mut self, documents: usize) -> Self {
        self.config.cache_size = Some(documents);
        self
    }

    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.config.sync_on_write = enabled;
        self
    }

    pub fn max_document_size(mut self, bytes: usize) -> Self {
        self.config.max_document_size = bytes;
        self
    }

    pub fn background_index_build(mut self, enabled: bool) -> Self {
        self.config.background_index_build = enabled;
        self
    }

    pub fn ttl_sweep_interval_ms(mut self, interval: u64) -> Self {
        self.config.ttl_sweep_interval_ms = interval;
        self
    }

    pub fn open(self) -> MinileafResult<Minileaf> {
        Minileaf::open(self.config)
    }
}

impl Default for MinileafBuilder {
    fn default() -> Self {
        MinileafBuilder::new()
    }
}
