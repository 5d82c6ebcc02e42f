//! Column descriptors and declared field types

use crate::table::DynTable;
use std::sync::{Arc, OnceLock, Weak};

/// Declared semantic type of an entity field.
///
/// Generic parameterization is part of the identity, so `List(Text)` and
/// `Text` resolve to different codecs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Char,
    Text,
    Bytes,
    /// Enumeration stored by variant name
    Enum(&'static [&'static str]),
    List(Box<FieldType>),
    /// String-keyed map
    Map(Box<FieldType>),
    /// Another registered entity
    Record,
    /// Application type converted by a registered codec
    Custom(&'static str),
}

impl FieldType {
    pub fn list(inner: FieldType) -> Self {
        FieldType::List(Box::new(inner))
    }

    pub fn map(inner: FieldType) -> Self {
        FieldType::Map(Box::new(inner))
    }

    /// Relationship carried by a foreign column of this type, if it can carry one.
    pub fn foreign_kind(&self) -> Option<ForeignKind> {
        match self {
            FieldType::Record => Some(ForeignKind::One),
            FieldType::List(inner) if **inner == FieldType::Record => Some(ForeignKind::List),
            FieldType::Map(inner) if **inner == FieldType::Record => Some(ForeignKind::Map),
            _ => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, FieldType::List(_) | FieldType::Map(_))
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Bool => write!(f, "bool"),
            FieldType::TinyInt => write!(f, "tinyint"),
            FieldType::SmallInt => write!(f, "smallint"),
            FieldType::Int => write!(f, "int"),
            FieldType::BigInt => write!(f, "bigint"),
            FieldType::Float => write!(f, "float"),
            FieldType::Double => write!(f, "double"),
            FieldType::Char => write!(f, "char"),
            FieldType::Text => write!(f, "text"),
            FieldType::Bytes => write!(f, "bytes"),
            FieldType::Enum(variants) => write!(f, "enum({})", variants.join("|")),
            FieldType::List(inner) => write!(f, "list<{}>", inner),
            FieldType::Map(inner) => write!(f, "map<{}>", inner),
            FieldType::Record => write!(f, "record"),
            FieldType::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// How a foreign column relates to the referenced table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForeignKind {
    /// Single object, stored as the referenced primary key
    One,
    /// Ordered list, stored as a delimited id list
    List,
    /// String-keyed map, stored as an encoded key-to-id map
    Map,
}

impl ForeignKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForeignKind::One => "one",
            ForeignKind::List => "list",
            ForeignKind::Map => "map",
        }
    }
}

impl std::fmt::Display for ForeignKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resolved foreign reference: the target table and its primary key column.
#[derive(Debug, Clone)]
pub struct ForeignBinding {
    target: Weak<dyn DynTable>,
    primary_key: Box<ColumnDescriptor>,
}

impl ForeignBinding {
    pub fn new(target: &Arc<dyn DynTable>, primary_key: ColumnDescriptor) -> Self {
        Self {
            target: Arc::downgrade(target),
            primary_key: Box::new(primary_key),
        }
    }

    /// The referenced table, unless the registry has been closed.
    pub fn target(&self) -> Option<Arc<dyn DynTable>> {
        self.target.upgrade()
    }

    pub fn primary_key(&self) -> &ColumnDescriptor {
        &self.primary_key
    }
}

/// Describes how one entity field maps onto one stored column.
///
/// Built with chained options:
///
/// ```
/// use rowcache::{ColumnDescriptor, FieldType};
///
/// let id = ColumnDescriptor::new("id", FieldType::Int).primary_key().auto_increment();
/// let user = ColumnDescriptor::new("user", FieldType::Record)
///     .column_name("user_id")
///     .foreign_table("users");
/// assert_eq!(id.name(), "id");
/// assert_eq!(user.name(), "user_id");
/// ```
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    field: &'static str,
    field_type: FieldType,
    column_name: Option<String>,
    storage_type: Option<String>,
    allow_null: bool,
    primary_key: bool,
    auto_increment: bool,
    update_on_save: bool,
    foreign_table: Option<String>,
    cascade_delete: bool,
    codec: Option<FieldType>,
    sub_object: Vec<&'static str>,
    binding: OnceLock<ForeignBinding>,
}

impl ColumnDescriptor {
    pub fn new(field: &'static str, field_type: FieldType) -> Self {
        Self {
            field,
            field_type,
            column_name: None,
            storage_type: None,
            allow_null: false,
            primary_key: false,
            auto_increment: false,
            update_on_save: true,
            foreign_table: None,
            cascade_delete: false,
            codec: None,
            sub_object: Vec::new(),
            binding: OnceLock::new(),
        }
    }

    // ========== Options ==========

    pub fn column_name(mut self, name: impl Into<String>) -> Self {
        self.column_name = Some(name.into());
        self
    }

    /// Explicit storage type, bypassing type inference
    pub fn storage_type(mut self, sql_type: impl Into<String>) -> Self {
        self.storage_type = Some(sql_type.into());
        self
    }

    pub fn allow_null(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn update_on_save(mut self, update: bool) -> Self {
        self.update_on_save = update;
        self
    }

    pub fn foreign_table(mut self, table: impl Into<String>) -> Self {
        self.foreign_table = Some(table.into());
        self
    }

    pub fn cascade_delete(mut self) -> Self {
        self.cascade_delete = true;
        self
    }

    /// Look up the codec for `ty` instead of the declared field type
    pub fn codec(mut self, ty: FieldType) -> Self {
        self.codec = Some(ty);
        self
    }

    /// Place the field inside an embedded sub-object. Nested calls build a path.
    pub fn sub_object(mut self, name: &'static str) -> Self {
        self.sub_object.push(name);
        self
    }

    // ========== Accessors ==========

    /// Field key used by entity accessors and constructor parameters.
    ///
    /// Fields of embedded sub-objects are addressed by their dotted path,
    /// e.g. `home.world`.
    pub fn key(&self) -> String {
        if self.sub_object.is_empty() {
            self.field.to_string()
        } else {
            format!("{}.{}", self.sub_object.join("."), self.field)
        }
    }

    /// Storage column name
    pub fn name(&self) -> String {
        if let Some(name) = &self.column_name {
            return name.clone();
        }
        match self.sub_object.last() {
            Some(parent) => format!("{}_{}", parent, self.field),
            None => self.field.to_string(),
        }
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    /// Type used for codec lookup
    pub fn codec_type(&self) -> &FieldType {
        self.codec.as_ref().unwrap_or(&self.field_type)
    }

    pub fn explicit_storage_type(&self) -> Option<&str> {
        self.storage_type.as_deref()
    }

    pub fn is_nullable(&self) -> bool {
        self.allow_null
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    pub fn is_update_on_save(&self) -> bool {
        self.update_on_save
    }

    pub fn is_cascade_delete(&self) -> bool {
        self.cascade_delete
    }

    pub fn foreign_table_name(&self) -> Option<&str> {
        self.foreign_table.as_deref()
    }

    pub fn sub_object_path(&self) -> &[&'static str] {
        &self.sub_object
    }

    pub fn is_foreign(&self) -> bool {
        self.foreign_table.is_some()
    }

    pub fn foreign_kind(&self) -> Option<ForeignKind> {
        self.foreign_table.as_ref()?;
        self.field_type.foreign_kind()
    }

    /// Attach the resolved foreign reference. Returns false if already bound.
    pub fn bind(&self, binding: ForeignBinding) -> bool {
        self.binding.set(binding).is_ok()
    }

    pub fn binding(&self) -> Option<&ForeignBinding> {
        self.binding.get()
    }
}
