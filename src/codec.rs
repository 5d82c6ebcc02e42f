//! Field codecs - conversion between in-memory values and stored scalars
//!
//! Codecs are looked up by exact [`FieldType`] identity. Types without a
//! registered codec fall through to [`DefaultCodec`].

use crate::schema::FieldType;
use crate::value::{SqlValue, Value, decode_list, encode_list};
use crate::{Error, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::debug;

/// Two-way converter for one semantic field type
pub trait FieldCodec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<SqlValue>;
    fn decode(&self, stored: SqlValue) -> Result<Value>;
}

/// Fallback codec: stringifies scalars, passes bytes through.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCodec;

impl FieldCodec for DefaultCodec {
    fn encode(&self, value: &Value) -> Result<SqlValue> {
        if value.holds_null_item() {
            return Err(Error::Mapping(format!(
                "cannot store NULL inside a collection: {:?}",
                value
            )));
        }
        Ok(match value {
            Value::Null => SqlValue::Null,
            Value::Bytes(bytes) => SqlValue::Blob(bytes.clone()),
            other => other.to_text().map(SqlValue::Text).unwrap_or(SqlValue::Null),
        })
    }

    fn decode(&self, stored: SqlValue) -> Result<Value> {
        Ok(stored.into())
    }
}

/// Delimited encoding for lists of strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringListCodec;

impl FieldCodec for StringListCodec {
    fn encode(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::Null => Ok(SqlValue::Null),
            Value::List(items) => {
                let items = items
                    .iter()
                    .map(|item| match item {
                        Value::Text(s) => Ok(s.clone()),
                        other => Err(Error::Mapping(format!("expected text list item, found {:?}", other))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(SqlValue::Text(encode_list(&items)))
            }
            other => Err(Error::Mapping(format!("expected a list, found {:?}", other))),
        }
    }

    fn decode(&self, stored: SqlValue) -> Result<Value> {
        match stored {
            SqlValue::Null => Ok(Value::Null),
            SqlValue::Text(s) => Ok(Value::List(decode_list(&s).into_iter().map(Value::Text).collect())),
            other => Err(Error::Mapping(format!("expected delimited text, found {:?}", other))),
        }
    }
}

/// Registry of codecs by field type. The first registration for a type wins.
pub struct CodecRegistry {
    codecs: DashMap<FieldType, Arc<dyn FieldCodec>>,
    fallback: Arc<dyn FieldCodec>,
}

impl CodecRegistry {
    /// Registry with the built-in string list codec
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(FieldType::list(FieldType::Text), Arc::new(StringListCodec));
        registry
    }

    pub fn empty() -> Self {
        Self {
            codecs: DashMap::new(),
            fallback: Arc::new(DefaultCodec),
        }
    }

    /// Register a codec; returns false if one is already registered for `ty`.
    pub fn register(&self, ty: FieldType, codec: Arc<dyn FieldCodec>) -> bool {
        match self.codecs.entry(ty) {
            Entry::Occupied(existing) => {
                debug!(field_type = %existing.key(), "Codec already registered; ignoring");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(codec);
                true
            }
        }
    }

    /// Codec for `ty`, or the default codec
    pub fn resolve(&self, ty: &FieldType) -> Arc<dyn FieldCodec> {
        self.codecs
            .get(ty)
            .map(|codec| codec.value().clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn contains(&self, ty: &FieldType) -> bool {
        self.codecs.contains_key(ty)
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl FieldCodec for Upper {
        fn encode(&self, value: &Value) -> Result<SqlValue> {
            Ok(SqlValue::Text(value.to_string().to_uppercase()))
        }

        fn decode(&self, stored: SqlValue) -> Result<Value> {
            Ok(Value::from(stored))
        }
    }

    struct Lower;

    impl FieldCodec for Lower {
        fn encode(&self, value: &Value) -> Result<SqlValue> {
            Ok(SqlValue::Text(value.to_string().to_lowercase()))
        }

        fn decode(&self, stored: SqlValue) -> Result<Value> {
            Ok(Value::from(stored))
        }
    }

    #[test]
    fn test_default_codec_stringifies() {
        let codec = DefaultCodec;
        assert_eq!(codec.encode(&Value::Bool(true)).unwrap(), SqlValue::Text("1".into()));
        assert_eq!(codec.encode(&Value::Bool(false)).unwrap(), SqlValue::Text("0".into()));
        assert_eq!(codec.encode(&Value::Int(12)).unwrap(), SqlValue::Text("12".into()));
        assert_eq!(codec.encode(&Value::Null).unwrap(), SqlValue::Null);
        assert_eq!(codec.encode(&Value::Bytes(vec![1, 2])).unwrap(), SqlValue::Blob(vec![1, 2]));
        assert_eq!(codec.decode(SqlValue::Integer(4)).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_default_codec_refuses_null_items() {
        let codec = DefaultCodec;
        let list = Value::List(vec![Value::Int(1), Value::Null, Value::Int(3)]);
        assert!(matches!(codec.encode(&list), Err(Error::Mapping(_))));

        let nested = Value::Map(
            [("k".to_string(), Value::List(vec![Value::Null]))]
                .into_iter()
                .collect(),
        );
        assert!(matches!(codec.encode(&nested), Err(Error::Mapping(_))));

        let clean = Value::List(vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(codec.encode(&clean).unwrap(), SqlValue::Text("1,3".into()));
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = CodecRegistry::empty();
        let ty = FieldType::Custom("shout");
        assert!(registry.register(ty.clone(), Arc::new(Upper)));
        assert!(!registry.register(ty.clone(), Arc::new(Lower)));

        let codec = registry.resolve(&ty);
        assert_eq!(codec.encode(&Value::from("hi")).unwrap(), SqlValue::Text("HI".into()));
    }

    #[test]
    fn test_generic_parameters_are_part_of_identity() {
        let registry = CodecRegistry::new();
        assert!(registry.contains(&FieldType::list(FieldType::Text)));
        assert!(!registry.contains(&FieldType::list(FieldType::Int)));
        assert!(!registry.contains(&FieldType::Text));
    }

    #[test]
    fn test_string_list_codec() {
        let codec = CodecRegistry::new().resolve(&FieldType::list(FieldType::Text));
        let value = Value::from(vec!["a".to_string(), "b,c".to_string()]);
        let stored = codec.encode(&value).unwrap();
        assert_eq!(stored, SqlValue::Text("a,b\\,c".into()));
        assert_eq!(codec.decode(stored).unwrap(), value);
    }
}
