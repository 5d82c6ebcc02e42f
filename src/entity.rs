//! Entity trait - how application types expose their fields to the mapper
//!
//! An entity declares its table once through [`Entity::descriptor`], hands
//! field values out by key through [`Entity::field`], and is rebuilt from a
//! stored row by [`Entity::construct`]. Live objects are shared as
//! [`Record`]s so that foreign references point at the cached instance.

use crate::schema::TableDescriptor;
use crate::value::Value;
use crate::{Error, Result};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A live cached object
pub type Record<E> = Arc<RwLock<E>>;

/// A live object of a table whose entity type is not statically known
pub type AnyRecord = Arc<dyn Any + Send + Sync>;

/// An application type stored in one table.
pub trait Entity: Sized + Send + Sync + 'static {
    /// Table name, columns and constructor binding.
    fn descriptor() -> TableDescriptor;

    /// Rebuild an object from one value per column, keyed by field key.
    fn construct(args: FieldSet) -> Result<Self>;

    /// Current value of the field with the given key.
    fn field(&self, key: &str) -> Option<Field>;

    /// Overwrite one field; used to write generated keys back after a save.
    fn assign(&mut self, key: &str, value: Value) -> Result<()> {
        let _ = value;
        Err(Error::Mapping(format!(
            "field '{}' of '{}' cannot be assigned",
            key,
            std::any::type_name::<Self>()
        )))
    }
}

pub fn record<E: Entity>(entity: E) -> Record<E> {
    Arc::new(RwLock::new(entity))
}

pub fn erase<E: Entity>(record: &Record<E>) -> AnyRecord {
    record.clone()
}

pub fn downcast<E: Entity>(any: AnyRecord) -> Option<Record<E>> {
    any.downcast::<RwLock<E>>().ok()
}

/// Read access to a record. A poisoned lock still yields the data.
pub fn read<E>(record: &Record<E>) -> RwLockReadGuard<'_, E> {
    record.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write access to a record. A poisoned lock still yields the data.
pub fn write<E>(record: &Record<E>) -> RwLockWriteGuard<'_, E> {
    record.write().unwrap_or_else(PoisonError::into_inner)
}

/// A field value as exchanged with the mapper
#[derive(Debug, Clone)]
pub enum Field {
    Value(Value),
    One(Option<AnyRecord>),
    List(Vec<AnyRecord>),
    Map(BTreeMap<String, AnyRecord>),
}

impl Field {
    pub fn value(v: impl Into<Value>) -> Self {
        Field::Value(v.into())
    }

    pub fn one<E: Entity>(record: Option<&Record<E>>) -> Self {
        Field::One(record.map(erase))
    }

    pub fn list<E: Entity>(records: &[Record<E>]) -> Self {
        Field::List(records.iter().map(erase).collect())
    }

    pub fn map<E: Entity>(records: &BTreeMap<String, Record<E>>) -> Self {
        Field::Map(records.iter().map(|(k, r)| (k.clone(), erase(r))).collect())
    }

    /// Every record referenced by this field
    pub fn records(&self) -> Vec<AnyRecord> {
        match self {
            Field::Value(_) | Field::One(None) => Vec::new(),
            Field::One(Some(record)) => vec![record.clone()],
            Field::List(records) => records.clone(),
            Field::Map(records) => records.values().cloned().collect(),
        }
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        Field::Value(value)
    }
}

/// Constructor arguments, one per column.
#[derive(Debug, Default)]
pub struct FieldSet {
    fields: HashMap<String, Field>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, field: Field) {
        self.fields.insert(key.into(), field);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn remove(&mut self, key: &str) -> Result<Field> {
        self.fields
            .remove(key)
            .ok_or_else(|| Error::Mapping(format!("no value for field '{}'", key)))
    }

    /// Take a plain value, converted to the parameter type
    pub fn take<T: FromValue>(&mut self, key: &str) -> Result<T> {
        match self.remove(key)? {
            Field::Value(value) => T::from_value(value)
                .map_err(|e| Error::Mapping(format!("field '{}': {}", key, e))),
            _ => Err(Error::Mapping(format!("field '{}' holds records, not a value", key))),
        }
    }

    pub fn take_one<E: Entity>(&mut self, key: &str) -> Result<Option<Record<E>>> {
        match self.remove(key)? {
            Field::One(None) => Ok(None),
            Field::One(Some(any)) => downcast::<E>(any)
                .map(Some)
                .ok_or_else(|| wrong_record::<E>(key)),
            _ => Err(Error::Mapping(format!("field '{}' is not a single record", key))),
        }
    }

    pub fn take_list<E: Entity>(&mut self, key: &str) -> Result<Vec<Record<E>>> {
        match self.remove(key)? {
            Field::List(items) => items
                .into_iter()
                .map(|any| downcast::<E>(any).ok_or_else(|| wrong_record::<E>(key)))
                .collect(),
            _ => Err(Error::Mapping(format!("field '{}' is not a record list", key))),
        }
    }

    pub fn take_map<E: Entity>(&mut self, key: &str) -> Result<BTreeMap<String, Record<E>>> {
        match self.remove(key)? {
            Field::Map(entries) => entries
                .into_iter()
                .map(|(k, any)| {
                    downcast::<E>(any)
                        .map(|r| (k, r))
                        .ok_or_else(|| wrong_record::<E>(key))
                })
                .collect(),
            _ => Err(Error::Mapping(format!("field '{}' is not a record map", key))),
        }
    }
}

fn wrong_record<E>(key: &str) -> Error {
    Error::Mapping(format!(
        "field '{}' does not hold {} records",
        key,
        std::any::type_name::<E>()
    ))
}

// ========== Value Conversions ==========

/// Conversion from a decoded column value into a constructor parameter type
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn unexpected(value: &Value, wanted: &str) -> Error {
    Error::Mapping(format!("expected {}, found {:?}", wanted, value))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(i) => Ok(i != 0),
            other => Err(unexpected(&other, "bool")),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(i),
            other => Err(unexpected(&other, "integer")),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| Error::Mapping(format!("{} does not fit in i32", wide)))
    }
}

impl FromValue for i16 {
    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        i16::try_from(wide).map_err(|_| Error::Mapping(format!("{} does not fit in i16", wide)))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(unexpected(&other, "number")),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for char {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Char(c) => Ok(c),
            other => Err(unexpected(&other, "char")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(unexpected(&other, "text")),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(unexpected(&other, "bytes")),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(unexpected(&other, "list")),
        }
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(BTreeMap::new()),
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| T::from_value(v).map(|v| (k, v)))
                .collect(),
            other => Err(unexpected(&other, "map")),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
