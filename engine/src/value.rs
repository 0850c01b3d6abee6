//! Dynamic values flowing through the mapping engine.
//!
//! Source records are nested [`Record`]s and lists of primitives. Target
//! objects are written with the same [`Value`] type, so a produced object can
//! itself be stored inside another object.

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use serde_json::{Map, Number};
use std::fmt;
use std::sync::Arc;

use crate::error::MappingError;
use crate::mapping::annotate::AnnotatedValue;
use crate::models::ObjectRef;

/// Timestamp rendering used for JSON output.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

// =============================================================================
// Value
// =============================================================================

/// A dynamically typed value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    /// Raw bytes, decoded to text before mapping.
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(Record),
    /// A live target object.
    Object(ObjectRef),
    /// A scalar carrying provenance metadata.
    Annotated(Box<AnnotatedValue>),
}

/// Kind of a [`Value`], used in diagnostics and as part of [`TypeKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Integer,
    Float,
    Text,
    Timestamp,
    Bytes,
    List,
    Map,
    Object,
    Annotated,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Text => "text",
            ValueKind::Timestamp => "timestamp",
            ValueKind::Bytes => "bytes",
            ValueKind::List => "list",
            ValueKind::Map => "mapping",
            ValueKind::Object => "object",
            ValueKind::Annotated => "annotated value",
        }
    }
}

/// Runtime type of a value: its kind, or the declared type name for objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Value(ValueKind),
    Object(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
            Value::Object(_) => ValueKind::Object,
            Value::Annotated(_) => ValueKind::Annotated,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn type_key(&self) -> TypeKey {
        match self {
            Value::Object(object) => TypeKey::Object(object.type_name()),
            other => TypeKey::Value(other.kind()),
        }
    }

    /// Scalars are the values the annotation overlay wraps.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Text(_)
                | Value::Bool(_)
                | Value::Integer(_)
                | Value::Float(_)
                | Value::Timestamp(_)
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Map(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_annotated(&self) -> Option<&AnnotatedValue> {
        match self {
            Value::Annotated(annotated) => Some(annotated),
            _ => None,
        }
    }

    /// Decode raw bytes into text; every other kind is returned unchanged.
    pub fn normalize(self) -> Value {
        match self {
            Value::Bytes(bytes) => Value::Text(decode_bytes(&bytes)),
            other => other,
        }
    }

    /// Convert to JSON for output and diagnostics.
    pub fn to_json(&self) -> serde_json::Value {
        let mut seen = Vec::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut Vec<usize>) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(n) => serde_json::Value::Number((*n).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => serde_json::Value::String(ts.format(TIMESTAMP_FORMAT).to_string()),
            Value::Bytes(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json_inner(seen)).collect())
            }
            Value::Map(record) => record.to_json_inner(seen),
            Value::Object(object) => {
                let id = object.id();
                if seen.contains(&id) {
                    return serde_json::Value::String(format!("<{}>", object.type_name()));
                }
                seen.push(id);
                let json = match object.try_borrow() {
                    Ok(inner) => inner.attrs().to_json_inner(seen),
                    Err(_) => serde_json::Value::String(format!("<{}>", object.type_name())),
                };
                seen.pop();
                json
            }
            Value::Annotated(annotated) => {
                let mut map = Map::new();
                map.insert("value".to_string(), annotated.value().to_json_inner(seen));
                for (key, value) in annotated.attrs().iter() {
                    map.insert(key.clone(), value.to_json_inner(seen));
                }
                serde_json::Value::Object(map)
            }
        }
    }

    /// Pretty JSON snapshot used in error messages.
    pub fn snapshot(&self) -> String {
        serde_json::to_string_pretty(&self.to_json()).unwrap_or_else(|_| format!("{:?}", self))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Decode bytes as UTF-8, then Windows-1252, then lossy UTF-8.
pub fn decode_bytes(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    encoding_rs::WINDOWS_1252
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

// =============================================================================
// Conversions
// =============================================================================

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(ts: NaiveDateTime) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Map(record)
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        Value::Object(object)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

// =============================================================================
// Record
// =============================================================================

/// Insertion-ordered string-keyed map.
///
/// Records are small, so lookups are linear scans over the entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Insert or replace in place, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut seen = Vec::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut Vec<usize>) -> serde_json::Value {
        let map: Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json_inner(seen)))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

// =============================================================================
// Raw records
// =============================================================================

/// Input handed to `map_item`: a mapping, or a row of values with headings.
#[derive(Debug, Clone)]
pub enum RawRecord {
    Map(Record),
    Row {
        headings: Arc<[String]>,
        values: Vec<Value>,
    },
}

impl RawRecord {
    pub fn row(headings: impl Into<Arc<[String]>>, values: Vec<Value>) -> Self {
        RawRecord::Row {
            headings: headings.into(),
            values,
        }
    }

    /// Build a raw record from a value. Lists become rows without headings,
    /// which pair with nothing.
    pub fn from_value(value: Value) -> Result<Self, MappingError> {
        match value {
            Value::Map(record) => Ok(RawRecord::Map(record)),
            Value::List(values) => Ok(RawRecord::row(Vec::<String>::new(), values)),
            other => Err(MappingError::InvalidRecord(other.kind_name())),
        }
    }

    /// Header/value pairs in input order. Rows are zipped to the shorter side.
    pub fn into_pairs(self) -> Vec<(String, Value)> {
        match self {
            RawRecord::Map(record) => record.into_iter().collect(),
            RawRecord::Row { headings, values } => headings
                .iter()
                .cloned()
                .zip(values)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RawRecord::Map(record) => record.len(),
            RawRecord::Row { headings, values } => headings.len().min(values.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value under `key`, if the record has one.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            RawRecord::Map(record) => record.get(key),
            RawRecord::Row { headings, values } => headings
                .iter()
                .position(|h| h == key)
                .and_then(|idx| values.get(idx)),
        }
    }
}

impl From<Record> for RawRecord {
    fn from(record: Record) -> Self {
        RawRecord::Map(record)
    }
}

impl From<serde_json::Value> for RawRecord {
    fn from(json: serde_json::Value) -> Self {
        match Value::from(json) {
            Value::Map(record) => RawRecord::Map(record),
            Value::List(values) => RawRecord::row(Vec::<String>::new(), values),
            _ => RawRecord::Map(Record::new()),
        }
    }
}
