use once_cell::sync::Lazy;
use rand::RngCore;
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;
use uuid::Uuid;

use crate::common::document::Document;
use crate::common::time::get_current_time_millis;
use crate::common::value::Value;
use crate::errors::{ErrorKind, MinileafError, MinileafResult};

/// Per-process random component of generated object ids.
static PROCESS_RANDOM: Lazy<[u8; 5]> = Lazy::new(|| {
    let mut bytes = [0u8; 5];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
});

/// The id variant a collection is keyed by, fixed at first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum IdKind {
    /// 24-character lowercase hex object id (12 bytes).
    ObjectId,
    /// RFC 4122 UUID.
    Uuid,
    /// Arbitrary text.
    Text,
    /// 64-bit signed integer with auto-increment generation.
    Int,
}

impl IdKind {
    pub fn name(&self) -> &'static str {
        match self {
            IdKind::ObjectId => "object-id",
            IdKind::Uuid => "uuid",
            IdKind::Text => "text",
            IdKind::Int => "int",
        }
    }
}

impl Display for IdKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A document identifier, polymorphic over the supported variant set.
///
/// Identifiers are totally ordered (variant rank first, then value) so the
/// primary index can keep them in a single ordered map even though a
/// collection only ever holds one variant.
#[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DocId {
    ObjectId([u8; 12]),
    Uuid(Uuid),
    Text(String),
    Int(i64),
}

impl DocId {
    pub fn kind(&self) -> IdKind {
        match self {
            DocId::ObjectId(_) => IdKind::ObjectId,
            DocId::Uuid(_) => IdKind::Uuid,
            DocId::Text(_) => IdKind::Text,
            DocId::Int(_) => IdKind::Int,
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            DocId::ObjectId(_) => 0,
            DocId::Uuid(_) => 1,
            DocId::Text(_) => 2,
            DocId::Int(_) => 3,
        }
    }

    /// Serializes this id to its text form.
    pub fn serialize(&self) -> String {
        match self {
            DocId::ObjectId(bytes) => {
                let mut out = String::with_capacity(24);
                for b in bytes {
                    out.push_str(&format!("{:02x}", b));
                }
                out
            }
            DocId::Uuid(uuid) => uuid.to_string(),
            DocId::Text(text) => text.clone(),
            DocId::Int(value) => value.to_string(),
        }
    }

    /// Parses an id of the given kind from its text form.
    pub fn parse(kind: IdKind, text: &str) -> MinileafResult<DocId> {
        match kind {
            IdKind::ObjectId => {
                if text.len() != 24 {
                    log::error!("Invalid object id length: {}", text.len());
                    return Err(MinileafError::new(
                        &format!("Invalid object id '{}'", text),
                        ErrorKind::InvalidId,
                    ));
                }
                let mut bytes = [0u8; 12];
                for (i, chunk) in text.as_bytes().chunks(2).enumerate() {
                    let hi = (chunk[0] as char).to_digit(16);
                    let lo = (chunk[1] as char).to_digit(16);
                    match (hi, lo) {
                        (Some(hi), Some(lo)) => bytes[i] = ((hi << 4) | lo) as u8,
                        _ => {
                            log::error!("Invalid object id hex: {}", text);
                            return Err(MinileafError::new(
                                &format!("Invalid object id '{}'", text),
                                ErrorKind::InvalidId,
                            ));
                        }
                    }
                }
                Ok(DocId::ObjectId(bytes))
            }
            IdKind::Uuid => Uuid::parse_str(text).map(DocId::Uuid).map_err(|e| {
                log::error!("Invalid uuid '{}': {}", text, e);
                MinileafError::new(&format!("Invalid uuid '{}'", text), ErrorKind::InvalidId)
            }),
            IdKind::Text => Ok(DocId::Text(text.to_string())),
            IdKind::Int => {
                let value: i64 = text.parse()?;
                Ok(DocId::Int(value))
            }
        }
    }

    /// The [Value] form stored in the document's id field.
    pub fn to_value(&self) -> Value {
        match self {
            DocId::Int(value) => Value::Int(*value),
            other => Value::Text(other.serialize()),
        }
    }

    /// Extracts an id of the given kind from a document's id field
    /// (`_id`, with the legacy `id` alias honored).
    pub fn extract(kind: IdKind, document: &Document) -> MinileafResult<Option<DocId>> {
        let value = match document.id_value() {
            Some(value) => value,
            None => return Ok(None),
        };
        match (kind, value) {
            (IdKind::Int, Value::Int(i)) => Ok(Some(DocId::Int(*i))),
            (IdKind::Int, Value::Text(s)) => Ok(Some(DocId::parse(IdKind::Int, s)?)),
            (_, Value::Text(s)) => Ok(Some(DocId::parse(kind, s)?)),
            (_, other) => {
                log::error!("Id field holds incompatible value: {}", other);
                Err(MinileafError::new(
                    &format!("Id field holds incompatible value for {} id", kind),
                    ErrorKind::InvalidId,
                ))
            }
        }
    }

    /// Writes this id into the document's id field, preferring the field the
    /// document already uses and defaulting to `_id`.
    pub fn write_into(&self, document: &mut Document) {
        let field = document.id_field_name();
        document.insert(field, self.to_value());
    }
}

impl PartialOrd for DocId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DocId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (DocId::ObjectId(a), DocId::ObjectId(b)) => a.cmp(b),
            (DocId::Uuid(a), DocId::Uuid(b)) => a.cmp(b),
            (DocId::Text(a), DocId::Text(b)) => a.cmp(b),
            (DocId::Int(a), DocId::Int(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

impl Debug for DocId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

impl Display for DocId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

/// Generator handle for document ids.
///
/// Holds the monotonic state behind auto-increment integer ids and the
/// object-id counter. The state lives in the handle rather than a free
/// function so a database owns exactly one and tests can reset it.
#[derive(Clone)]
pub struct IdGenerator {
    auto_increment: Arc<AtomicI64>,
    object_id_counter: Arc<AtomicU32>,
}

impl IdGenerator {
    pub fn new() -> Self {
        let mut seed = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut seed);
        IdGenerator {
            auto_increment: Arc::new(AtomicI64::new(0)),
            object_id_counter: Arc::new(AtomicU32::new(u32::from_be_bytes(seed) & 0x00ff_ffff)),
        }
    }

    /// Generates a fresh id of the given kind.
    pub fn generate(&self, kind: IdKind) -> DocId {
        match kind {
            IdKind::ObjectId => DocId::ObjectId(self.next_object_id()),
            IdKind::Uuid => DocId::Uuid(Uuid::new_v4()),
            IdKind::Text => DocId::Text(Uuid::new_v4().simple().to_string()),
            IdKind::Int => DocId::Int(self.auto_increment.fetch_add(1, AtomicOrdering::SeqCst) + 1),
        }
    }

    /// Object id layout: 4-byte big-endian epoch seconds, 5 process-random
    /// bytes, 3-byte process-local counter.
    fn next_object_id(&self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        let seconds = (get_current_time_millis() / 1000) as u32;
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_RANDOM);
        let counter = self.object_id_counter.fetch_add(1, AtomicOrdering::SeqCst) & 0x00ff_ffff;
        bytes[9] = (counter >> 16) as u8;
        bytes[10] = (counter >> 8) as u8;
        bytes[11] = counter as u8;
        bytes
    }

    /// Resets the auto-increment counter. Intended for tests.
    pub fn reset(&self) {
        self.auto_increment.store(0, AtomicOrdering::SeqCst);
    }

    /// Advances the auto-increment floor past an observed id, so ids
    /// assigned after recovery never collide with recovered ones.
    pub fn observe_int(&self, value: i64) {
        self.auto_increment.fetch_max(value, AtomicOrdering::SeqCst);
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        IdGenerator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_object_id_round_trip() {
        let generator = IdGenerator::new();
        let id = generator.generate(IdKind::ObjectId);
        let text = id.serialize();
        assert_eq!(text.len(), 24);
        assert!(Value::is_object_id_hex(&text));
        assert_eq!(DocId::parse(IdKind::ObjectId, &text).unwrap(), id);
    }

    #[test]
    fn test_uuid_round_trip() {
        let generator = IdGenerator::new();
        let id = generator.generate(IdKind::Uuid);
        let text = id.serialize();
        assert_eq!(DocId::parse(IdKind::Uuid, &text).unwrap(), id);
    }

    #[test]
    fn test_text_round_trip() {
        let id = DocId::Text("user:42".to_string());
        assert_eq!(DocId::parse(IdKind::Text, &id.serialize()).unwrap(), id);
    }

    #[test]
    fn test_int_round_trip() {
        let id = DocId::Int(-17);
        assert_eq!(DocId::parse(IdKind::Int, &id.serialize()).unwrap(), id);
    }

    #[test]
    fn test_auto_increment_is_monotonic() {
        let generator = IdGenerator::new();
        let first = generator.generate(IdKind::Int);
        let second = generator.generate(IdKind::Int);
        assert!(second > first);
    }

    #[test]
    fn test_reset_restarts_auto_increment() {
        let generator = IdGenerator::new();
        generator.generate(IdKind::Int);
        generator.generate(IdKind::Int);
        generator.reset();
        assert_eq!(generator.generate(IdKind::Int), DocId::Int(1));
    }

    #[test]
    fn test_observe_int_moves_floor() {
        let generator = IdGenerator::new();
        generator.observe_int(100);
        assert_eq!(generator.generate(IdKind::Int), DocId::Int(101));
    }

    #[test]
    fn test_generated_object_ids_are_unique() {
        let generator = IdGenerator::new();
        let a = generator.generate(IdKind::ObjectId);
        let b = generator.generate(IdKind::ObjectId);
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_rejects_bad_object_id() {
        assert!(DocId::parse(IdKind::ObjectId, "too-short").is_err());
        assert!(DocId::parse(IdKind::ObjectId, "zzzzzzzzzzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_uuid_and_int() {
        assert!(DocId::parse(IdKind::Uuid, "not-a-uuid").is_err());
        assert!(DocId::parse(IdKind::Int, "not-a-number").is_err());
    }

    #[test]
    fn test_extract_prefers_reserved_field() {
        let doc = doc! { "_id": "primary", "id": "legacy" };
        let id = DocId::extract(IdKind::Text, &doc).unwrap().unwrap();
        assert_eq!(id, DocId::Text("primary".to_string()));
    }

    #[test]
    fn test_extract_honors_legacy_alias() {
        let doc = doc! { "id": 7i64 };
        let id = DocId::extract(IdKind::Int, &doc).unwrap().unwrap();
        assert_eq!(id, DocId::Int(7));
    }

    #[test]
    fn test_extract_missing_returns_none() {
        let doc = doc! { "x": 1i64 };
        assert!(DocId::extract(IdKind::Text, &doc).unwrap().is_none());
    }

    #[test]
    fn test_extract_incompatible_value_fails() {
        let doc = doc! { "_id": true };
        assert!(DocId::extract(IdKind::Text, &doc).is_err());
    }

    #[test]
    fn test_write_into_prefers_existing_field() {
        let mut doc = doc! { "id": "old" };
        DocId::Text("new".to_string()).write_into(&mut doc);
        assert_eq!(doc.get_field("id"), Some(&Value::Text("new".into())));
        assert!(!doc.contains_field("_id"));
    }

    #[test]
    fn test_write_into_defaults_to_reserved_field() {
        let mut doc = Document::new();
        DocId::Int(5).write_into(&mut doc);
        assert_eq!(doc.get_field("_id"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_ids_are_totally_ordered() {
        let mut ids = vec![
            DocId::Int(2),
            DocId::Text("b".to_string()),
            DocId::Int(1),
            DocId::Text("a".to_string()),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                DocId::Text("a".to_string()),
                DocId::Text("b".to_string()),
                DocId::Int(1),
                DocId::Int(2),
            ]
        );
    }
}
