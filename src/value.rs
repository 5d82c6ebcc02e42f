//! Value model - in-memory field values and their stored forms
//!
//! `Value` is what entity accessors hand out and constructors receive.
//! `SqlValue` is what a connection provider binds or returns. Foreign
//! id lists and key-to-id maps travel through the delimited encodings
//! at the bottom of this module.

use crate::schema::FieldType;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// A dynamically typed field value as held by a live object.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Canonical cache-key rendering.
    ///
    /// Integer `5` and text `"5"` render to the same key, so an id read back
    /// from a foreign column hits the same cache entry as the typed primary
    /// key of the loaded object. Collections and `Null` have no key.
    pub fn key(&self) -> Option<String> {
        match self {
            Value::Null | Value::List(_) | Value::Map(_) => None,
            Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Char(c) => Some(c.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(hex(b)),
        }
    }

    /// True if a list or map holds `Null` at any depth
    pub fn holds_null_item(&self) -> bool {
        match self {
            Value::List(items) => items.iter().any(|v| v.is_null() || v.holds_null_item()),
            Value::Map(entries) => entries.values().any(|v| v.is_null() || v.holds_null_item()),
            _ => false,
        }
    }

    /// Plain text rendering used by the default codec and the delimited encodings.
    ///
    /// `Null` items of lists and maps have no rendering and are skipped.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::List(items) => Some(encode_list(
                &items.iter().filter_map(Value::to_text).collect::<Vec<_>>(),
            )),
            Value::Map(entries) => Some(encode_map(
                &entries
                    .iter()
                    .filter_map(|(k, v)| v.to_text().map(|v| (k.clone(), v)))
                    .collect(),
            )),
            other => other.key(),
        }
    }

    /// Convert a decoded value into the shape the declared field type expects.
    pub fn coerce(self, ty: &FieldType) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }

        let mismatch = |v: &Value| Error::Mapping(format!("cannot read {:?} as {}", v, ty));

        match ty {
            FieldType::Bool => match self {
                Value::Bool(_) => Ok(self),
                Value::Int(i) => Ok(Value::Bool(i != 0)),
                Value::Text(ref s) => match s.trim().to_lowercase().as_str() {
                    "1" | "true" => Ok(Value::Bool(true)),
                    "0" | "false" => Ok(Value::Bool(false)),
                    _ => Err(mismatch(&self)),
                },
                _ => Err(mismatch(&self)),
            },
            FieldType::TinyInt | FieldType::SmallInt | FieldType::Int | FieldType::BigInt => {
                match self {
                    Value::Int(_) => Ok(self),
                    Value::Bool(b) => Ok(Value::Int(b as i64)),
                    Value::Float(f) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
                    Value::Text(ref s) => s
                        .trim()
                        .parse::<i64>()
                        .map(Value::Int)
                        .map_err(|_| mismatch(&self)),
                    _ => Err(mismatch(&self)),
                }
            }
            FieldType::Float | FieldType::Double => match self {
                Value::Float(_) => Ok(self),
                Value::Int(i) => Ok(Value::Float(i as f64)),
                Value::Text(ref s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| mismatch(&self)),
                _ => Err(mismatch(&self)),
            },
            FieldType::Char => match self {
                Value::Char(_) => Ok(self),
                Value::Text(ref s) => {
                    let mut chars = s.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Ok(Value::Char(c)),
                        _ => Err(mismatch(&self)),
                    }
                }
                _ => Err(mismatch(&self)),
            },
            FieldType::Text => match self {
                Value::Text(_) => Ok(self),
                Value::Bytes(b) => String::from_utf8(b)
                    .map(Value::Text)
                    .map_err(|e| Error::Mapping(format!("text column holds invalid utf-8: {}", e))),
                other => other
                    .key()
                    .map(Value::Text)
                    .ok_or_else(|| mismatch(&other)),
            },
            FieldType::Bytes => match self {
                Value::Bytes(_) => Ok(self),
                Value::Text(s) => Ok(Value::Bytes(s.into_bytes())),
                _ => Err(mismatch(&self)),
            },
            FieldType::Enum(variants) => match self {
                Value::Text(ref s) => variants
                    .iter()
                    .find(|v| v.eq_ignore_ascii_case(s.trim()))
                    .map(|v| Value::Text(v.to_string()))
                    .ok_or_else(|| {
                        Error::Mapping(format!("'{}' is not one of {}", s, variants.join(", ")))
                    }),
                _ => Err(mismatch(&self)),
            },
            FieldType::List(inner) => match self {
                Value::List(items) => items
                    .into_iter()
                    .map(|item| item.coerce(inner))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List),
                Value::Text(s) => decode_list(&s)
                    .into_iter()
                    .map(|item| Value::Text(item).coerce(inner))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List),
                _ => Err(mismatch(&self)),
            },
            FieldType::Map(inner) => match self {
                Value::Map(entries) => entries
                    .into_iter()
                    .map(|(k, v)| v.coerce(inner).map(|v| (k, v)))
                    .collect::<Result<BTreeMap<_, _>>>()
                    .map(Value::Map),
                Value::Text(s) => decode_map(&s)?
                    .into_iter()
                    .map(|(k, v)| Value::Text(v).coerce(inner).map(|v| (k, v)))
                    .collect::<Result<BTreeMap<_, _>>>()
                    .map(Value::Map),
                _ => Err(mismatch(&self)),
            },
            // Application types are shaped by their codec.
            FieldType::Record | FieldType::Custom(_) => Ok(self),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_text() {
            Some(text) => write!(f, "{}", text),
            None => write!(f, "NULL"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v as i64)
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

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Char(v)
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

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v.into_iter().map(Value::Text).collect())
    }
}

impl From<&[String]> for Value {
    fn from(v: &[String]) -> Self {
        Value::List(v.iter().cloned().map(Value::Text).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A storable scalar, as bound into or read out of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Text view of a stored id, `None` for `NULL` and blank text.
    pub fn id_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Real(f) => Some(f.to_string()),
            SqlValue::Text(s) if s.trim().is_empty() => None,
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Blob(b) => Some(hex(b)),
        }
    }
}

impl From<SqlValue> for Value {
    fn from(v: SqlValue) -> Self {
        match v {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::Int(i),
            SqlValue::Real(f) => Value::Float(f),
            SqlValue::Text(s) => Value::Text(s),
            SqlValue::Blob(b) => Value::Bytes(b),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ========== Delimited Encodings ==========

const ESCAPE: char = '\\';
const ITEM_SEPARATOR: char = ',';
const PAIR_SEPARATOR: char = ':';

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, ESCAPE | ITEM_SEPARATOR | PAIR_SEPARATOR) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split on every `separator` not preceded by an escape, keeping escapes intact.
fn split_unescaped(raw: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (idx, c) in raw.char_indices() {
        if escaped {
            escaped = false;
        } else if c == ESCAPE {
            escaped = true;
        } else if c == separator {
            parts.push(&raw[start..idx]);
            start = idx + c.len_utf8();
        }
    }
    parts.push(&raw[start..]);
    parts
}

/// Encode an ordered id list as `a,b,c`.
///
/// A list holding a single empty item encodes the same as an empty list.
pub fn encode_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| escape(item))
        .collect::<Vec<_>>()
        .join(&ITEM_SEPARATOR.to_string())
}

/// Decode the output of [`encode_list`]; blank input is the empty list.
pub fn decode_list(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    split_unescaped(raw, ITEM_SEPARATOR)
        .into_iter()
        .map(unescape)
        .collect()
}

/// Encode a key-to-id map as `k1:v1,k2:v2`, ordered by key.
pub fn encode_map(entries: &BTreeMap<String, String>) -> String {
    entries
        .iter()
        .map(|(k, v)| format!("{}{}{}", escape(k), PAIR_SEPARATOR, escape(v)))
        .collect::<Vec<_>>()
        .join(&ITEM_SEPARATOR.to_string())
}

/// Decode the output of [`encode_map`].
pub fn decode_map(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut entries = BTreeMap::new();
    if raw.is_empty() {
        return Ok(entries);
    }
    for pair in split_unescaped(raw, ITEM_SEPARATOR) {
        match split_unescaped(pair, PAIR_SEPARATOR).as_slice() {
            [key, value] => {
                entries.insert(unescape(key), unescape(value));
            }
            _ => {
                return Err(Error::Mapping(format!("malformed map entry '{}'", pair)));
            }
        }
    }
    Ok(entries)
}
