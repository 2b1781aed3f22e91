use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::common::constants::{DELETION_MARKER, MAX_DOC_LEN, MAX_FRAME_LEN, MAX_ID_LEN, TEMP_FILE_SUFFIX};
use crate::common::doc_id::{DocId, IdKind};
use crate::common::document::Document;
use crate::crypto::CipherBox;
use crate::errors::{ErrorKind, MinileafError, MinileafResult};
use crate::store::lru::LruCache;
use crate::store::{StorageEngine, StorageStats};
use crate::update::UpdateOps;

/// Storage engine for datasets larger than RAM.
///
/// The authoritative store is an append-only record log on disk; memory
/// holds an `id → file offset` map for every live id plus a bounded LRU
/// cache of materialized documents. A delete appends a marker record whose
/// payload is `{}`; a later record for the same id resurrects it.
///
/// Unencrypted record layout:
///
/// ```text
/// [u32 id_len][id_bytes][u32 doc_len][doc_bytes]
/// ```
///
/// Encrypted layout wraps the same bytes in one AEAD block:
///
/// ```text
/// [u32 total_len][nonce ‖ ciphertext ‖ tag]
/// ```
///
/// Write ordering is the durability cornerstone: bytes are appended and
/// fsynced before the offset map or cache change, so a crash between the
/// write syscall and the fsync leaves recovery with the previous record.
#[derive(Clone)]
pub struct LogEngine {
    inner: Arc<LogEngineInner>,
}

impl std::fmt::Debug for LogEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEngine").finish_non_exhaustive()
    }
}

struct LogEngineInner {
    data_path: PathBuf,
    id_kind: IdKind,
    sync_on_write: bool,
    cipher: Option<CipherBox>,
    closed: AtomicBool,
    /// Engine lock over the file handle and the offset maps. Lock order is
    /// always `state` before `cache`; no path takes them the other way.
    state: RwLock<LogState>,
    cache: Mutex<LruCache>,
}

struct LogState {
    file: File,
    end_offset: u64,
    live_offsets: BTreeMap<DocId, u64>,
    deleted: HashSet<DocId>,
}

/// One decoded record: the id, the raw document payload, and the offset
/// just past the record.
struct RawRecord {
    id: DocId,
    doc_bytes: Vec<u8>,
    next_offset: u64,
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut filled = 0usize;
    while filled < buf.len() {
        let read = file.seek_read(&mut buf[filled..], offset + filled as u64)?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short positional read",
            ));
        }
        filled += read;
    }
    Ok(())
}

impl LogEngine {
    /// Opens (or creates) the data file and rebuilds the offset map by a
    /// sequential scan. The scan honors deletion markers and resurrection;
    /// it stops at the first unparseable record, which is the truncated
    /// tail a crash mid-append leaves behind. The tail is cut off so later
    /// appends land on a clean prefix.
    pub fn open(
        data_path: &Path,
        id_kind: IdKind,
        cache_size: usize,
        sync_on_write: bool,
        cipher: Option<CipherBox>,
    ) -> MinileafResult<LogEngine> {
        if let Some(parent) = data_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(data_path)?;

        let file_len = file.metadata()?.len();
        let mut live_offsets = BTreeMap::new();
        let mut deleted = HashSet::new();
        let mut offset = 0u64;

        while offset < file_len {
            match read_record(&file, offset, &cipher, id_kind) {
                Ok(record) => {
                    if record.doc_bytes == DELETION_MARKER {
                        live_offsets.remove(&record.id);
                        deleted.insert(record.id);
                    } else {
                        deleted.remove(&record.id);
                        live_offsets.insert(record.id, offset);
                    }
                    offset = record.next_offset;
                }
                Err(e) => {
                    // a first-record tag mismatch on an encrypted file is a
                    // wrong key, not a truncated tail; refuse to open rather
                    // than cut the whole file away
                    if offset == 0 && cipher.is_some() && e.kind() == &ErrorKind::CorruptedCiphertext
                    {
                        log::error!("Cannot decrypt {:?}: {}", data_path, e);
                        return Err(e);
                    }
                    log::warn!(
                        "Stopping data file scan of {:?} at offset {} ({} bytes): {}",
                        data_path,
                        offset,
                        file_len,
                        e
                    );
                    file.set_len(offset)?;
                    break;
                }
            }
        }

        log::debug!(
            "Opened log engine {:?}: {} live ids, {} tombstoned",
            data_path,
            live_offsets.len(),
            deleted.len()
        );

        Ok(LogEngine {
            inner: Arc::new(LogEngineInner {
                data_path: data_path.to_path_buf(),
                id_kind,
                sync_on_write,
                cipher,
                closed: AtomicBool::new(false),
                state: RwLock::new(LogState {
                    file,
                    end_offset: offset.min(file_len),
                    live_offsets,
                    deleted,
                }),
                cache: Mutex::new(LruCache::new(cache_size)),
            }),
        })
    }

    fn check_open(&self) -> MinileafResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            log::error!("Operation on closed log engine {:?}", self.inner.data_path);
            return Err(MinileafError::new(
                "Engine already closed",
                ErrorKind::StoreAlreadyClosed,
            ));
        }
        Ok(())
    }

    /// Appends one record and, with `sync_on_write`, fsyncs before
    /// returning. Must run under the state write lock.
    fn append_record(&self, state: &mut LogState, id: &DocId, doc_bytes: &[u8]) -> MinileafResult<u64> {
        let encoded = encode_record(id, doc_bytes, &self.inner.cipher)?;
        let offset = state.end_offset;
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&encoded)?;
        if self.inner.sync_on_write {
            state.file.sync_data()?;
        }
        state.end_offset += encoded.len() as u64;
        Ok(offset)
    }

    fn read_document_at(&self, state: &LogState, offset: u64) -> MinileafResult<Document> {
        let record = read_record(&state.file, offset, &self.inner.cipher, self.inner.id_kind)?;
        let text = String::from_utf8(record.doc_bytes)?;
        Document::parse(&text)
    }

    /// Read variant that repairs the offset map when it hits a corrupt
    /// record. Takes the write lock from the outset, re-verifies the
    /// corruption while holding it, and only then unlinks the offset entry.
    /// The plain read path never mutates the map, so readers cannot
    /// deadlock against each other.
    pub fn find_by_id_cleanup(&self, id: &DocId) -> MinileafResult<Option<Document>> {
        self.check_open()?;
        let mut state = self.inner.state.write();
        let offset = match state.live_offsets.get(id) {
            Some(offset) => *offset,
            None => return Ok(None),
        };
        match self.read_document_at(&state, offset) {
            Ok(document) => {
                self.inner.cache.lock().insert(id.clone(), document.clone());
                Ok(Some(document))
            }
            Err(first) => {
                // re-check before mutating: only a repeatably corrupt
                // record loses its offset entry
                match self.read_document_at(&state, offset) {
                    Ok(document) => Ok(Some(document)),
                    Err(_) => {
                        log::warn!(
                            "Dropping corrupt record for id {} at offset {}: {}",
                            id,
                            offset,
                            first
                        );
                        state.live_offsets.remove(id);
                        self.inner.cache.lock().remove(id);
                        Ok(None)
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn cached(&self, id: &DocId) -> bool {
        self.inner.cache.lock().contains(id)
    }
}

impl StorageEngine for LogEngine {
    fn upsert(&self, id: DocId, document: Document) -> MinileafResult<()> {
        self.check_open()?;
        let doc_bytes = document.to_json_string()?.into_bytes();
        let mut state = self.inner.state.write();
        // bytes must be durable before the offset map learns about them
        let offset = self.append_record(&mut state, &id, &doc_bytes)?;
        state.live_offsets.insert(id.clone(), offset);
        state.deleted.remove(&id);
        self.inner.cache.lock().insert(id, document);
        Ok(())
    }

    fn find_by_id(&self, id: &DocId) -> MinileafResult<Option<Document>> {
        self.check_open()?;
        let state = self.inner.state.read();
        let offset = match state.live_offsets.get(id) {
            Some(offset) => *offset,
            None => return Ok(None),
        };
        if let Some(document) = self.inner.cache.lock().get(id) {
            return Ok(Some(document));
        }
        let document = match self.read_document_at(&state, offset) {
            Ok(document) => document,
            Err(e) => {
                // surface absence; the cleanup variant repairs the map
                log::warn!("Corrupt record for id {} at offset {}: {}", id, offset, e);
                return Ok(None);
            }
        };
        // populate under the cache's exclusive lock and re-check: an entry
        // placed meanwhile is fresher or equal, so it wins
        let mut cache = self.inner.cache.lock();
        if let Some(raced) = cache.get(id) {
            return Ok(Some(raced));
        }
        cache.insert(id.clone(), document.clone());
        Ok(Some(document))
    }

    fn update_fields(&self, id: &DocId, ops: &UpdateOps) -> MinileafResult<bool> {
        self.check_open()?;
        let mut state = self.inner.state.write();
        let offset = match state.live_offsets.get(id) {
            Some(offset) => *offset,
            None => return Ok(false),
        };
        let mut document = match self.inner.cache.lock().get(id) {
            Some(document) => document,
            None => self.read_document_at(&state, offset)?,
        };
        ops.apply(&mut document)?;
        let doc_bytes = document.to_json_string()?.into_bytes();
        let new_offset = self.append_record(&mut state, id, &doc_bytes)?;
        state.live_offsets.insert(id.clone(), new_offset);
        self.inner.cache.lock().insert(id.clone(), document);
        Ok(true)
    }

    fn delete(&self, id: &DocId) -> MinileafResult<Option<Document>> {
        self.check_open()?;
        let mut state = self.inner.state.write();
        let offset = match state.live_offsets.get(id) {
            Some(offset) => *offset,
            None => return Ok(None),
        };
        let prior = match self.inner.cache.lock().get(id) {
            Some(document) => document,
            None => self.read_document_at(&state, offset)?,
        };
        // marker first; if the disk write fails the in-memory state is
        // untouched and stays consistent across restart
        self.append_record(&mut state, id, DELETION_MARKER)?;
        state.live_offsets.remove(id);
        state.deleted.insert(id.clone());
        self.inner.cache.lock().remove(id);
        Ok(Some(prior))
    }

    fn ids(&self) -> MinileafResult<Vec<DocId>> {
        self.check_open()?;
        Ok(self.inner.state.read().live_offsets.keys().cloned().collect())
    }

    fn exists(&self, id: &DocId) -> MinileafResult<bool> {
        self.check_open()?;
        Ok(self.inner.state.read().live_offsets.contains_key(id))
    }

    fn count(&self) -> MinileafResult<u64> {
        self.check_open()?;
        Ok(self.inner.state.read().live_offsets.len() as u64)
    }

    /// Rewrites live records into a sibling temp file, fsyncs it, atomically
    /// renames it over the log, and rebuilds the offset map from the new
    /// offsets. Deletion markers and shadowed records are discarded.
    fn compact(&self) -> MinileafResult<()> {
        self.check_open()?;
        let mut state = self.inner.state.write();

        let temp_path = self.inner.data_path.with_extension(
            format!("data{}", TEMP_FILE_SUFFIX),
        );
        let mut temp_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut new_offsets = BTreeMap::new();
        let mut new_end = 0u64;
        for (id, offset) in state.live_offsets.iter() {
            let record = read_record(&state.file, *offset, &self.inner.cipher, self.inner.id_kind)?;
            let encoded = encode_record(id, &record.doc_bytes, &self.inner.cipher)?;
            temp_file.write_all(&encoded)?;
            new_offsets.insert(id.clone(), new_end);
            new_end += encoded.len() as u64;
        }
        temp_file.sync_all()?;
        drop(temp_file);

        std::fs::rename(&temp_path, &self.inner.data_path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.inner.data_path)?;

        state.file = file;
        state.end_offset = new_end;
        state.live_offsets = new_offsets;
        state.deleted.clear();
        log::info!(
            "Compacted {:?} down to {} bytes ({} live records)",
            self.inner.data_path,
            new_end,
            state.live_offsets.len()
        );
        Ok(())
    }

    fn stats(&self) -> MinileafResult<StorageStats> {
        self.check_open()?;
        let state = self.inner.state.read();
        Ok(StorageStats {
            document_count: state.live_offsets.len() as u64,
            data_bytes: state.end_offset,
            wal_bytes: 0,
            last_snapshot_ms: None,
        })
    }

    fn close(&self) -> MinileafResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let state = self.inner.state.write();
        state.file.sync_all()?;
        Ok(())
    }
}

/// Encodes one record, wrapping it in a single AEAD frame when encryption
/// is on.
fn encode_record(id: &DocId, doc_bytes: &[u8], cipher: &Option<CipherBox>) -> MinileafResult<Vec<u8>> {
    let id_bytes = id.serialize().into_bytes();
    let mut plain = Vec::with_capacity(8 + id_bytes.len() + doc_bytes.len());
    plain.extend_from_slice(&(id_bytes.len() as u32).to_le_bytes());
    plain.extend_from_slice(&id_bytes);
    plain.extend_from_slice(&(doc_bytes.len() as u32).to_le_bytes());
    plain.extend_from_slice(doc_bytes);

    match cipher {
        None => Ok(plain),
        Some(cipher) => {
            let sealed = cipher.encrypt(&plain)?;
            let mut framed = Vec::with_capacity(4 + sealed.len());
            framed.extend_from_slice(&(sealed.len() as u32).to_le_bytes());
            framed.extend_from_slice(&sealed);
            Ok(framed)
        }
    }
}

fn corrupt(message: String) -> MinileafError {
    MinileafError::new(&message, ErrorKind::FileCorrupted)
}

/// Decodes the record at `offset` using position-addressed reads, so
/// concurrent readers never fight over a shared cursor. Every length is
/// checked against the sanity caps before it is trusted.
fn read_record(
    file: &File,
    offset: u64,
    cipher: &Option<CipherBox>,
    id_kind: IdKind,
) -> MinileafResult<RawRecord> {
    match cipher {
        None => {
            let mut len_buf = [0u8; 4];
            read_exact_at(file, &mut len_buf, offset)?;
            let id_len = u32::from_le_bytes(len_buf) as usize;
            if id_len > MAX_ID_LEN {
                return Err(corrupt(format!("id length {} exceeds cap", id_len)));
            }
            let mut id_buf = vec![0u8; id_len];
            read_exact_at(file, &mut id_buf, offset + 4)?;

            read_exact_at(file, &mut len_buf, offset + 4 + id_len as u64)?;
            let doc_len = u32::from_le_bytes(len_buf) as usize;
            if doc_len > MAX_DOC_LEN {
                return Err(corrupt(format!("document length {} exceeds cap", doc_len)));
            }
            let mut doc_buf = vec![0u8; doc_len];
            read_exact_at(file, &mut doc_buf, offset + 8 + id_len as u64)?;

            let id_text = String::from_utf8(id_buf)?;
            let id = DocId::parse(id_kind, &id_text)?;
            Ok(RawRecord {
                id,
                doc_bytes: doc_buf,
                next_offset: offset + 8 + id_len as u64 + doc_len as u64,
            })
        }
        Some(cipher) => {
            let mut len_buf = [0u8; 4];
            read_exact_at(file, &mut len_buf, offset)?;
            let total_len = u32::from_le_bytes(len_buf) as usize;
            if total_len > MAX_FRAME_LEN {
                return Err(corrupt(format!("frame length {} exceeds cap", total_len)));
            }
            let mut sealed = vec![0u8; total_len];
            read_exact_at(file, &mut sealed, offset + 4)?;
            let plain = cipher.decrypt(&sealed)?;

            if plain.len() < 8 {
                return Err(corrupt("record shorter than its headers".to_string()));
            }
            let id_len = u32::from_le_bytes([plain[0], plain[1], plain[2], plain[3]]) as usize;
            if id_len > MAX_ID_LEN || 4 + id_len + 4 > plain.len() {
                return Err(corrupt(format!("id length {} inconsistent", id_len)));
            }
            let id_text = String::from_utf8(plain[4..4 + id_len].to_vec())?;
            let doc_start = 4 + id_len + 4;
            let doc_len = u32::from_le_bytes([
                plain[4 + id_len],
                plain[5 + id_len],
                plain[6 + id_len],
                plain[7 + id_len],
            ]) as usize;
            if doc_len > MAX_DOC_LEN || doc_start + doc_len != plain.len() {
                return Err(corrupt(format!("document length {} inconsistent", doc_len)));
            }
            let id = DocId::parse(id_kind, &id_text)?;
            Ok(RawRecord {
                id,
                doc_bytes: plain[doc_start..].to_vec(),
                next_offset: offset + 4 + total_len as u64,
            })
        }
    }
}
