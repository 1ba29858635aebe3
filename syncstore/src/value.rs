//! Document data model shared by server, client and wire protocol.
//!
//! A document is a nested mapping of string keys to values. Only
//! [`Value::Map`] is a container for path traversal; every other variant
//! (including [`Value::List`]) is a leaf.
//!
//! ```text
//! Document ── "array" ─► Map ── "key" ─► String("nested_value")
//!          └─ "key"   ─► String("root_value")
//! ```
//!
//! In the JSON layout, values without a native JSON form are wrapped in a
//! single-key object:
//! ```text
//! Bytes([0,1,2])            ─► { "$bytes": "AAEC" }        (base64)
//! Map({ "$bytes": .. })     ─► { "$map": { "$bytes": .. } }
//! ```
//! A map whose only key is `$bytes` or `$map` is itself wrapped in `$map`,
//! so user data can never be mistaken for a tag.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// JSON tag for [`Value::Bytes`].
pub const BYTES_TAG: &str = "$bytes";
/// JSON tag for a map that would otherwise look like a tag.
pub const MAP_TAG: &str = "$map";

/// Root mapping of a document. `BTreeMap` keeps key order stable so that
/// equality checks and the pretty-printed file layout are deterministic.
pub type Document = BTreeMap<String, Value>;

/// Ordered key sequence locating a value inside a [`Document`].
pub type Path = Vec<String>;

/// Build a [`Path`] from string slices.
pub fn path(keys: &[&str]) -> Path {
    keys.iter().map(|k| (*k).to_string()).collect()
}

/// A value stored in a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Ordered list. Treated as a leaf by path operations.
    List(Vec<Value>),
    /// Nested container.
    Map(Document),
}

impl Value {
    /// Empty container.
    pub fn map() -> Self {
        Value::Map(Document::new())
    }

    /// Whether this value is a container that paths can descend into.
    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn as_map(&self) -> Option<&Document> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Document> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Map(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => value_from_json_object(obj),
        }
    }
}

fn value_from_json_object(mut obj: serde_json::Map<String, serde_json::Value>) -> Value {
    if obj.len() == 1 {
        if let Some(serde_json::Value::String(encoded)) = obj.get(BYTES_TAG) {
            match BASE64.decode(encoded) {
                Ok(bytes) => return Value::Bytes(bytes),
                Err(e) => log::warn!("Keeping malformed {BYTES_TAG} entry as a map: {e}"),
            }
        }
        if matches!(obj.get(MAP_TAG), Some(serde_json::Value::Object(_))) {
            if let Some(serde_json::Value::Object(inner)) = obj.remove(MAP_TAG) {
                return Value::Map(json_entries(inner));
            }
        }
    }
    Value::Map(json_entries(obj))
}

fn json_entries(obj: serde_json::Map<String, serde_json::Value>) -> Document {
    obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect()
}

/// A map that would read back as a tag if written verbatim.
fn looks_like_tag(map: &Document) -> bool {
    map.len() == 1 && (map.contains_key(BYTES_TAG) || map.contains_key(MAP_TAG))
}

fn tagged(tag: &str, value: serde_json::Value) -> serde_json::Value {
    let mut obj = serde_json::Map::with_capacity(1);
    obj.insert(tag.to_string(), value);
    serde_json::Value::Object(obj)
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            // NaN and infinities have no JSON form
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Bytes(bytes) => tagged(BYTES_TAG, serde_json::Value::String(BASE64.encode(bytes))),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Map(map) if looks_like_tag(&map) => {
                tagged(MAP_TAG, serde_json::Value::Object(document_to_json(map)))
            }
            Value::Map(map) => serde_json::Value::Object(document_to_json(map)),
        }
    }
}

/// Convert a whole document into a JSON object.
///
/// The root is always written as a plain object; tags only apply to
/// nested values.
pub fn document_to_json(doc: Document) -> serde_json::Map<String, serde_json::Value> {
    doc.into_iter()
        .map(|(k, v)| (k, serde_json::Value::from(v)))
        .collect()
}

/// Convert a JSON value into a document. Non-object roots yield `None`.
pub fn document_from_json(json: serde_json::Value) -> Option<Document> {
    match json {
        serde_json::Value::Object(obj) => Some(json_entries(obj)),
        _ => None,
    }
}
