use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::common::constants::{MAX_FRAME_LEN, TEMP_FILE_SUFFIX};
use crate::common::doc_id::{DocId, IdKind};
use crate::common::document::Document;
use crate::common::time::get_current_time_millis;
use crate::common::value::Value;
use crate::crypto::{read_frame, write_frame, CipherBox};
use crate::errors::{ErrorKind, MinileafError, MinileafResult};
use crate::store::{StorageEngine, StorageStats};
use crate::update::UpdateOps;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WalOp {
    Insert,
    Update,
    Delete,
}

/// One write-ahead log entry. Unencrypted WALs hold one JSON line per
/// entry; encrypted WALs hold one length-framed AEAD block per entry so
/// each record decrypts independently during replay.
#[derive(Debug, Serialize, Deserialize)]
struct WalRecord {
    #[serde(rename = "type")]
    op: WalOp,
    timestamp: i64,
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document: Option<serde_json::Value>,
}

/// Durable engine for bounded datasets whose working set fits in RAM.
///
/// The full dataset lives in an in-memory map mirrored by a snapshot file
/// plus a write-ahead log. Every mutation appends a typed record to the
/// WAL and fsyncs it before the map changes, so an I/O failure aborts the
/// call with memory untouched. A snapshot serializes the whole map to a
/// temp file, fsyncs, atomically renames it into place, and truncates the
/// WAL; snapshots run on a schedule and whenever the WAL crosses the
/// configured byte threshold.
#[derive(Clone)]
pub struct WalEngine {
    inner: Arc<WalEngineInner>,
}

struct WalEngineInner {
    wal_path: PathBuf,
    snapshot_path: PathBuf,
    sync_on_write: bool,
    cipher: Option<CipherBox>,
    wal_max_bytes: u64,
    closed: AtomicBool,
    /// Epoch millis of the last completed snapshot; 0 means never.
    last_snapshot_ms: AtomicI64,
    state: RwLock<WalState>,
}

struct WalState {
    documents: BTreeMap<DocId, Document>,
    wal_file: File,
    wal_bytes: u64,
}

impl WalEngine {
    /// Opens the engine: loads the snapshot if present, then replays the
    /// WAL in order.
    pub fn open(
        wal_path: &Path,
        snapshot_path: &Path,
        id_kind: IdKind,
        sync_on_write: bool,
        cipher: Option<CipherBox>,
        wal_max_bytes: u64,
    ) -> MinileafResult<WalEngine> {
        if let Some(parent) = wal_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut documents = BTreeMap::new();
        if snapshot_path.exists() {
            load_snapshot(snapshot_path, id_kind, &cipher, &mut documents)?;
        }
        replay_wal(wal_path, id_kind, &cipher, &mut documents)?;

        let wal_file = OpenOptions::new().append(true).create(true).open(wal_path)?;
        let wal_bytes = wal_file.metadata()?.len();

        log::debug!(
            "Opened WAL engine {:?}: {} documents, {} WAL bytes pending",
            wal_path,
            documents.len(),
            wal_bytes
        );

        Ok(WalEngine {
            inner: Arc::new(WalEngineInner {
                wal_path: wal_path.to_path_buf(),
                snapshot_path: snapshot_path.to_path_buf(),
                sync_on_write,
                cipher,
                wal_max_bytes,
                closed: AtomicBool::new(false),
                last_snapshot_ms: AtomicI64::new(0),
                state: RwLock::new(WalState {
                    documents,
                    wal_file,
                    wal_bytes,
                }),
            }),
        })
    }

    fn check_open(&self) -> MinileafResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            log::error!("Operation on closed WAL engine {:?}", self.inner.wal_path);
            return Err(MinileafError::new(
                "Engine already closed",
                ErrorKind::StoreAlreadyClosed,
            ));
        }
        Ok(())
    }

    /// Appends one record to the WAL and fsyncs it. Runs under the state
    /// write lock; the in-memory map is only touched after this returns.
    fn append_wal(&self, state: &mut WalState, record: &WalRecord) -> MinileafResult<()> {
        let json = serde_json::to_vec(record)?;
        let written = match &self.inner.cipher {
            None => {
                let mut line = json;
                line.push(b'\n');
                state.wal_file.write_all(&line)?;
                line.len() as u64
            }
            Some(cipher) => {
                let sealed = cipher.encrypt(&json)?;
                write_frame(&mut state.wal_file, &sealed)?;
                4 + sealed.len() as u64
            }
        };
        if self.inner.sync_on_write {
            state.wal_file.sync_data()?;
        }
        state.wal_bytes += written;
        Ok(())
    }

    fn record(&self, op: WalOp, id: &DocId, document: Option<&Document>) -> WalRecord {
        WalRecord {
            op,
            timestamp: get_current_time_millis(),
            id: id.serialize(),
            document: document.map(Document::to_json),
        }
    }

    /// Serializes the entire map to a fresh snapshot file and truncates the
    /// WAL. Concurrent readers keep running while the snapshot bytes are
    /// produced; the WAL swap happens under the exclusive lock.
    pub fn snapshot(&self) -> MinileafResult<()> {
        self.check_open()?;
        let guard = self.inner.state.upgradable_read();

        let mut entries = Vec::with_capacity(guard.documents.len());
        for (id, document) in guard.documents.iter() {
            let mut entry = serde_json::Map::with_capacity(2);
            entry.insert("_id".to_string(), serde_json::Value::String(id.serialize()));
            entry.insert("doc".to_string(), document.to_json());
            entries.push(serde_json::Value::Object(entry));
        }
        let mut payload = serde_json::to_vec(&serde_json::Value::Array(entries))?;
        if let Some(cipher) = &self.inner.cipher {
            payload = cipher.encrypt(&payload)?;
        }

        let temp_path = self
            .inner
            .snapshot_path
            .with_extension(format!("snapshot{}", TEMP_FILE_SUFFIX));
        let mut temp_file = File::create(&temp_path)?;
        temp_file.write_all(&payload)?;
        temp_file.sync_all()?;
        drop(temp_file);
        std::fs::rename(&temp_path, &self.inner.snapshot_path)?;

        let mut state = RwLockUpgradableReadGuard::upgrade(guard);
        state.wal_file.set_len(0)?;
        state.wal_bytes = 0;
        self.inner
            .last_snapshot_ms
            .store(get_current_time_millis(), Ordering::Release);
        log::debug!("Snapshot of {:?} complete", self.inner.snapshot_path);
        Ok(())
    }

    fn maybe_snapshot(&self, wal_bytes: u64) {
        if wal_bytes > self.inner.wal_max_bytes {
            if let Err(e) = self.snapshot() {
                log::error!("Size-triggered snapshot failed: {:?}", e);
            }
        }
    }
}

impl StorageEngine for WalEngine {
    fn upsert(&self, id: DocId, document: Document) -> MinileafResult<()> {
        self.check_open()?;
        let wal_bytes = {
            let mut state = self.inner.state.write();
            let op = if state.documents.contains_key(&id) {
                WalOp::Update
            } else {
                WalOp::Insert
            };
            let record = self.record(op, &id, Some(&document));
            self.append_wal(&mut state, &record)?;
            state.documents.insert(id, document);
            state.wal_bytes
        };
        self.maybe_snapshot(wal_bytes);
        Ok(())
    }

    fn find_by_id(&self, id: &DocId) -> MinileafResult<Option<Document>> {
        self.check_open()?;
        Ok(self.inner.state.read().documents.get(id).cloned())
    }

    fn update_fields(&self, id: &DocId, ops: &UpdateOps) -> MinileafResult<bool> {
        self.check_open()?;
        let wal_bytes = {
            let mut state = self.inner.state.write();
            let mut updated = match state.documents.get(id) {
                Some(document) => document.clone(),
                None => return Ok(false),
            };
            ops.apply(&mut updated)?;
            let record = self.record(WalOp::Update, id, Some(&updated));
            self.append_wal(&mut state, &record)?;
            state.documents.insert(id.clone(), updated);
            state.wal_bytes
        };
        self.maybe_snapshot(wal_bytes);
        Ok(true)
    }

    fn delete(&self, id: &DocId) -> MinileafResult<Option<Document>> {
        self.check_open()?;
        let mut state = self.inner.state.write();
        if !state.documents.contains_key(id) {
            return Ok(None);
        }
        let record = self.record(WalOp::Delete, id, None);
        self.append_wal(&mut state, &record)?;
        Ok(state.documents.remove(id))
    }

    fn ids(&self) -> MinileafResult<Vec<DocId>> {
        self.check_open()?;
        Ok(self.inner.state.read().documents.keys().cloned().collect())
    }

    fn exists(&self, id: &DocId) -> MinileafResult<bool> {
        self.check_open()?;
        Ok(self.inner.state.read().documents.contains_key(id))
    }

    fn count(&self) -> MinileafResult<u64> {
        self.check_open()?;
        Ok(self.inner.state.read().documents.len() as u64)
    }

    fn compact(&self) -> MinileafResult<()> {
        // a snapshot is the compact form: it drops every superseded record
        self.snapshot()
    }

    fn stats(&self) -> MinileafResult<StorageStats> {
        self.check_open()?;
        let state = self.inner.state.read();
        let data_bytes = std::fs::metadata(&self.inner.snapshot_path)
            .map(|m| m.len())
            .unwrap_or(0);
        let last_snapshot_ms = match self.inner.last_snapshot_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(ms),
        };
        Ok(StorageStats {
            document_count: state.documents.len() as u64,
            data_bytes,
            wal_bytes: state.wal_bytes,
            last_snapshot_ms,
        })
    }

    /// A final snapshot is attempted on close; failure is logged, not
    /// surfaced, because close must release resources regardless.
    fn close(&self) -> MinileafResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Err(e) = self.snapshot() {
            log::error!("Final snapshot on close failed: {:?}", e);
        }
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }
}

fn load_snapshot(
    snapshot_path: &Path,
    id_kind: IdKind,
    cipher: &Option<CipherBox>,
    documents: &mut BTreeMap<DocId, Document>,
) -> MinileafResult<()> {
    let mut payload = Vec::new();
    File::open(snapshot_path)?.read_to_end(&mut payload)?;
    if payload.is_empty() {
        return Ok(());
    }
    if let Some(cipher) = cipher {
        payload = cipher.decrypt(&payload)?;
    }
    let json: serde_json::Value = serde_json::from_slice(&payload)?;
    let entries = json.as_array().ok_or_else(|| {
        log::error!("Snapshot {:?} is not an array", snapshot_path);
        MinileafError::new("Snapshot is not an array", ErrorKind::FileCorrupted)
    })?;
    for entry in entries {
        let id_text = entry
            .get("_id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                MinileafError::new("Snapshot entry missing _id", ErrorKind::FileCorrupted)
            })?;
        let doc_json = entry.get("doc").ok_or_else(|| {
            MinileafError::new("Snapshot entry missing doc", ErrorKind::FileCorrupted)
        })?;
        let id = DocId::parse(id_kind, id_text)?;
        match Value::from_json(doc_json) {
            Value::Object(document) => {
                documents.insert(id, document);
            }
            _ => {
                return Err(MinileafError::new(
                    "Snapshot document is not an object",
                    ErrorKind::FileCorrupted,
                ))
            }
        }
    }
    Ok(())
}

fn apply_wal_record(
    record: WalRecord,
    id_kind: IdKind,
    documents: &mut BTreeMap<DocId, Document>,
) -> MinileafResult<()> {
    let id = DocId::parse(id_kind, &record.id)?;
    match record.op {
        WalOp::Insert | WalOp::Update => {
            let doc_json = record.document.ok_or_else(|| {
                MinileafError::new("WAL record missing document", ErrorKind::FileCorrupted)
            })?;
            match Value::from_json(&doc_json) {
                Value::Object(document) => {
                    documents.insert(id, document);
                    Ok(())
                }
                _ => Err(MinileafError::new(
                    "WAL document is not an object",
                    ErrorKind::FileCorrupted,
                )),
            }
        }
        WalOp::Delete => {
            documents.remove(&id);
            Ok(())
        }
    }
}

/// Replays WAL entries in order. Unframed JSON lines stop at the first
/// corrupt line; length-framed encrypted records are skipped individually,
/// so one bad record does not discard its valid successors.
fn replay_wal(
    wal_path: &Path,
    id_kind: IdKind,
    cipher: &Option<CipherBox>,
    documents: &mut BTreeMap<DocId, Document>,
) -> MinileafResult<()> {
    let file = match File::open(wal_path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    match cipher {
        None => {
            let reader = BufReader::new(file);
            for (line_number, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: WalRecord = match serde_json::from_str(&line) {
                    Ok(record) => record,
                    Err(e) => {
                        log::warn!(
                            "Corrupt WAL line {} in {:?}, stopping replay: {}",
                            line_number,
                            wal_path,
                            e
                        );
                        break;
                    }
                };
                apply_wal_record(record, id_kind, documents)?;
            }
        }
        Some(cipher) => {
            let mut reader = BufReader::new(file);
            loop {
                let sealed = match read_frame(&mut reader, MAX_FRAME_LEN) {
                    Ok(Some(sealed)) => sealed,
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("Corrupt WAL framing in {:?}, stopping replay: {}", wal_path, e);
                        break;
                    }
                };
                let json = match cipher.decrypt(&sealed) {
                    Ok(json) => json,
                    Err(e) => {
                        log::warn!("Skipping undecryptable WAL record in {:?}: {}", wal_path, e);
                        continue;
                    }
                };
                match serde_json::from_slice::<WalRecord>(&json) {
                    Ok(record) => apply_wal_record(record, id_kind, documents)?,
                    Err(e) => {
                        log::warn!("Skipping unparseable WAL record in {:?}: {}", wal_path, e);
                    }
                }
            }
        }
    }
    Ok(())
}
