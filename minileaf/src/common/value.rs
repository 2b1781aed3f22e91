use crate::common::document::Document;
use crate::common::time;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};

/// JSON wrapper key marking a timestamp value (epoch milliseconds).
pub const TIMESTAMP_TAG: &str = "$date";
/// JSON wrapper key marking a binary value (lowercase hex).
pub const BINARY_TAG: &str = "$bin";

/// Compare two floats with NaN ordered greater than every other value.
#[inline]
fn num_cmp_float(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

#[inline]
fn num_eq_float(a: f64, b: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        true
    } else {
        a == b
    }
}

/// Represents a [Document] field value.
///
/// # Purpose
/// Unified representation for everything storable in a Minileaf document.
/// Integers collapse to 64-bit signed and floats to 64-bit on comparison, so
/// a document written with `3` and queried with `3.0` behaves as expected.
///
/// # Variants
/// - `Null`: explicit absence of a value (still a present field)
/// - `Bool(bool)`: boolean true/false
/// - `Int(i64)`: 64-bit signed integer
/// - `Float(f64)`: 64-bit floating point
/// - `Text(String)`: UTF-8 text
/// - `Binary(Vec<u8>)`: raw bytes; not indexable or queryable
/// - `Timestamp(i64)`: a point in time as epoch milliseconds
/// - `Array(Vec<Value>)`: ordered collection of values
/// - `Object(Document)`: nested document
///
/// # Usage
/// ```text
/// let v1: Value = 42i64.into();
/// let v2 = Value::from("hello");
/// let doc = doc! { "age": 42, "name": "Alice" };
/// ```
#[derive(Clone, Default)]
pub enum Value {
    /// Represents a null value.
    #[default]
    Null,
    /// Represents a boolean value.
    Bool(bool),
    /// Represents a 64-bit signed integer value.
    Int(i64),
    /// Represents a 64-bit floating point value.
    Float(f64),
    /// Represents a text value.
    Text(String),
    /// Represents a binary value. It cannot be indexed or queried.
    Binary(Vec<u8>),
    /// Represents a timestamp as epoch milliseconds.
    Timestamp(i64),
    /// Represents an array value.
    Array(Vec<Value>),
    /// Represents a nested document.
    Object(Document),
}

impl Value {
    /// Rank used to order values of different type classes. Numbers share a
    /// rank so cross-type numeric comparison stays meaningful.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Timestamp(_) => 3,
            Value::Text(_) => 4,
            Value::Binary(_) => 5,
            Value::Array(_) => 6,
            Value::Object(_) => 7,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Document> {
        match self {
            Value::Object(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_timestamp_millis(&self) -> Option<i64> {
        match self {
            Value::Timestamp(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Checks whether a text value looks like a 24-character lowercase hex
    /// object id. Such strings are ordered as object ids on compare.
    pub fn is_object_id_hex(text: &str) -> bool {
        text.len() == 24 && text.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
    }

    /// Stringified form used as a hash index key: text values are used raw,
    /// everything else uses its canonical display form.
    pub fn to_key_string(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Converts this value into its canonical JSON representation.
    ///
    /// Timestamps become `{"$date": <millis>}` and binary becomes
    /// `{"$bin": "<hex>"}`, so the mapping is lossless.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Binary(bytes) => {
                let mut map = serde_json::Map::with_capacity(1);
                map.insert(
                    BINARY_TAG.to_string(),
                    serde_json::Value::String(hex_encode(bytes)),
                );
                serde_json::Value::Object(map)
            }
            Value::Timestamp(ms) => {
                let mut map = serde_json::Map::with_capacity(1);
                map.insert(TIMESTAMP_TAG.to_string(), serde_json::Value::from(*ms));
                serde_json::Value::Object(map)
            }
            Value::Array(values) => {
                serde_json::Value::Array(values.iter().map(Value::to_json).collect())
            }
            Value::Object(doc) => doc.to_json(),
        }
    }

    /// Reconstructs a value from its canonical JSON representation.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(serde_json::Value::Number(n)) = map.get(TIMESTAMP_TAG) {
                        if let Some(ms) = n.as_i64() {
                            return Value::Timestamp(ms);
                        }
                    }
                    if let Some(serde_json::Value::String(s)) = map.get(BINARY_TAG) {
                        if let Some(bytes) = hex_decode(s) {
                            return Value::Binary(bytes);
                        }
                    }
                }
                Value::Object(Document::from_json_map(map))
            }
        }
    }

    /// Resolves this stored value to epoch milliseconds for a temporal
    /// comparison, applying the mixed-serialization rules: ISO-8601 text is
    /// parsed; integers below 10^10 are seconds; floats whose truncation is
    /// below 10^10 are fractional seconds.
    pub fn to_epoch_millis(&self) -> Option<i64> {
        match self {
            Value::Timestamp(ms) => Some(*ms),
            Value::Text(s) => time::parse_iso8601_millis(s),
            Value::Int(i) => Some(time::int_to_epoch_millis(*i)),
            Value::Float(f) => Some(time::float_to_epoch_millis(*f)),
            _ => None,
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    let bytes = text.as_bytes();
    for chunk in bytes.chunks(2) {
        let hi = (chunk[0] as char).to_digit(16)?;
        let lo = (chunk[1] as char).to_digit(16)?;
        out.push(((hi << 4) | lo) as u8);
    }
    Some(out)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        // numeric equality crosses the Int/Float boundary
        if self.is_number() && other.is_number() {
            if let (Value::Int(a), Value::Int(b)) = (self, other) {
                return a == b;
            }
            if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
                return num_eq_float(a, b);
            }
        }

        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.is_number() && other.is_number() {
            if let (Value::Int(a), Value::Int(b)) = (self, other) {
                return a.cmp(b);
            }
            if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
                return num_cmp_float(a, b);
            }
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => {
                if Value::is_object_id_hex(a) && Value::is_object_id_hex(b) {
                    // fixed-length lowercase hex orders as the underlying id
                    a.as_bytes().cmp(b.as_bytes())
                } else {
                    a.cmp(b)
                }
            }
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (Value::Object(a), Value::Object(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            // hash numbers by their f64 bit pattern so 3 and 3.0 collide
            Value::Int(i) => (*i as f64).to_bits().hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Binary(b) => b.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Array(a) => a.hash(state),
            Value::Object(d) => d.hash(state),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Object(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(&json))
    }
}
