use im::OrdMap;
use smallvec::SmallVec;
use std::fmt::{Debug, Display, Formatter};

use crate::common::constants::{DOC_ID, LEGACY_DOC_ID};
use crate::common::value::Value;
use crate::errors::{ErrorKind, MinileafError, MinileafResult};

type Segments<'a> = SmallVec<[&'a str; 8]>;

/// Creates a [Document] from literal key-value pairs.
///
/// ```text
/// let doc = doc! { "name": "Alice", "age": 30i64 };
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::common::document::Document::new() };
    ( $( $key:literal : $value:expr ),* $(,)? ) => {{
        let mut document = $crate::common::document::Document::new();
        $( document.insert($key, $value); )*
        document
    }};
}

/// A schemaless document: an ordered tree of named fields.
///
/// Documents are composed of key-value pairs where the key is always a
/// [String] and the value is a [Value]. Nested fields are addressed with
/// dotted paths (`"a.b.3.c"`); a purely numeric segment indexes into an
/// array slot.
///
/// The `_id` field is reserved for the document identifier. The legacy alias
/// `id` is honored when reading an identifier out of a document, but new ids
/// are always written under `_id`.
///
/// Backed by a persistent ordered map, so cloning a document is O(1) and a
/// cloned document is completely independent of subsequent mutations.
#[derive(Clone, Eq, PartialEq, Hash, Default, Ord, PartialOrd, serde::Deserialize, serde::Serialize)]
pub struct Document {
    data: OrdMap<String, Value>,
}

impl Document {
    /// Creates a new empty document.
    pub fn new() -> Self {
        Document { data: OrdMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Inserts a top-level field, replacing any previous value. The key is
    /// taken literally; use [Document::set_path] for dotted paths.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.data.insert(key.to_string(), value.into());
    }

    /// Gets a top-level field.
    pub fn get_field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Removes a top-level field, returning its previous value.
    pub fn remove_field(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn contains_field(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Iterates top-level fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    fn split_path(path: &str) -> Segments<'_> {
        path.split('.').collect()
    }

    /// Reads the value at a dotted path. A numeric segment addresses an
    /// array slot. Returns `None` when any segment is missing.
    pub fn get_path(&self, path: &str) -> Option<Value> {
        let segments = Self::split_path(path);
        let mut current = self.data.get(segments[0])?.clone();
        for segment in &segments[1..] {
            current = match current {
                Value::Object(doc) => doc.data.get(*segment)?.clone(),
                Value::Array(items) => {
                    let index: usize = segment.parse().ok()?;
                    items.get(index)?.clone()
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Writes a value at a dotted path, auto-creating intermediate objects.
    ///
    /// An intermediate that is present but neither an object nor an
    /// addressable array slot is overwritten with a new object. A numeric
    /// segment descends into an existing array when the slot is in bounds.
    pub fn set_path(&mut self, path: &str, value: impl Into<Value>) -> MinileafResult<()> {
        if path.is_empty() {
            log::error!("Cannot set value at empty path");
            return Err(MinileafError::new(
                "Field path cannot be empty",
                ErrorKind::InvalidOperation,
            ));
        }
        let segments = Self::split_path(path);
        let value = value.into();
        let head = segments[0];
        if segments.len() == 1 {
            self.data.insert(head.to_string(), value);
            return Ok(());
        }
        let mut child = match self.data.get(head) {
            Some(existing) => existing.clone(),
            None => Value::Object(Document::new()),
        };
        Self::set_in_value(&mut child, &segments[1..], value);
        self.data.insert(head.to_string(), child);
        Ok(())
    }

    fn set_in_value(target: &mut Value, segments: &[&str], value: Value) {
        let segment = segments[0];
        if segments.len() == 1 {
            match target {
                Value::Object(doc) => {
                    doc.data.insert(segment.to_string(), value);
                }
                Value::Array(items) => {
                    if let Ok(index) = segment.parse::<usize>() {
                        if index < items.len() {
                            items[index] = value;
                            return;
                        }
                    }
                    let mut doc = Document::new();
                    doc.data.insert(segment.to_string(), value);
                    *target = Value::Object(doc);
                }
                _ => {
                    let mut doc = Document::new();
                    doc.data.insert(segment.to_string(), value);
                    *target = Value::Object(doc);
                }
            }
            return;
        }

        match target {
            Value::Object(doc) => {
                let mut child = match doc.data.get(segment) {
                    Some(existing) => existing.clone(),
                    None => Value::Object(Document::new()),
                };
                Self::set_in_value(&mut child, &segments[1..], value);
                doc.data.insert(segment.to_string(), child);
            }
            Value::Array(items) => {
                if let Ok(index) = segment.parse::<usize>() {
                    if index < items.len() {
                        let mut child = items[index].clone();
                        Self::set_in_value(&mut child, &segments[1..], value);
                        items[index] = child;
                        return;
                    }
                }
                let mut doc = Document::new();
                let mut child = Value::Object(Document::new());
                Self::set_in_value(&mut child, &segments[1..], value);
                doc.data.insert(segment.to_string(), child);
                *target = Value::Object(doc);
            }
            _ => {
                let mut doc = Document::new();
                let mut child = Value::Object(Document::new());
                Self::set_in_value(&mut child, &segments[1..], value);
                doc.data.insert(segment.to_string(), child);
                *target = Value::Object(doc);
            }
        }
    }

    /// Removes the leaf at a dotted path, leaving intermediates intact.
    /// Returns the removed value, if any.
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        let segments = Self::split_path(path);
        let head = segments[0];
        if segments.len() == 1 {
            return self.data.remove(head);
        }
        let mut child = self.data.get(head)?.clone();
        let removed = Self::remove_in_value(&mut child, &segments[1..]);
        if removed.is_some() {
            self.data.insert(head.to_string(), child);
        }
        removed
    }

    fn remove_in_value(target: &mut Value, segments: &[&str]) -> Option<Value> {
        let segment = segments[0];
        if segments.len() == 1 {
            return match target {
                Value::Object(doc) => doc.data.remove(segment),
                Value::Array(items) => {
                    let index: usize = segment.parse().ok()?;
                    if index < items.len() {
                        Some(items.remove(index))
                    } else {
                        None
                    }
                }
                _ => None,
            };
        }
        match target {
            Value::Object(doc) => {
                let mut child = doc.data.get(segment)?.clone();
                let removed = Self::remove_in_value(&mut child, &segments[1..]);
                if removed.is_some() {
                    doc.data.insert(segment.to_string(), child);
                }
                removed
            }
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                let slot = items.get_mut(index)?;
                Self::remove_in_value(slot, &segments[1..])
            }
            _ => None,
        }
    }

    /// Reads the raw identifier value of this document. Prefers `_id` and
    /// falls back to the legacy `id` alias.
    pub fn id_value(&self) -> Option<&Value> {
        self.data.get(DOC_ID).or_else(|| self.data.get(LEGACY_DOC_ID))
    }

    /// Returns the field name the identifier currently lives under, if any.
    /// Writes prefer the existing field and default to `_id`.
    pub fn id_field_name(&self) -> &'static str {
        if self.data.contains_key(DOC_ID) {
            DOC_ID
        } else if self.data.contains_key(LEGACY_DOC_ID) {
            LEGACY_DOC_ID
        } else {
            DOC_ID
        }
    }

    /// Converts this document to its canonical JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::with_capacity(self.data.len());
        for (key, value) in self.data.iter() {
            map.insert(key.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }

    pub(crate) fn from_json_map(map: &serde_json::Map<String, serde_json::Value>) -> Document {
        let mut doc = Document::new();
        for (key, value) in map {
            doc.data.insert(key.clone(), Value::from_json(value));
        }
        doc
    }

    /// Parses a document from canonical JSON text.
    pub fn parse(text: &str) -> MinileafResult<Document> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        match json {
            serde_json::Value::Object(map) => Ok(Document::from_json_map(&map)),
            _ => {
                log::error!("Document text is not a JSON object");
                Err(MinileafError::new(
                    "Document must be a JSON object",
                    ErrorKind::EncodingError,
                ))
            }
        }
    }

    /// Emits canonical JSON text. Partial-update serialization and
    /// full-document serialization of the same typed value are identical
    /// because both funnel through [Value::to_json].
    pub fn to_json_string(&self) -> MinileafResult<String> {
        serde_json::to_string(&self.to_json()).map_err(MinileafError::from)
    }

    /// Serialized byte length, the measure for the document size cap.
    pub fn byte_size(&self) -> MinileafResult<usize> {
        Ok(self.to_json_string()?.len())
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
