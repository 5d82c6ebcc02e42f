//! Table descriptors and registration-time validation

use super::column::{ColumnDescriptor, FieldType};
use crate::{Error, Result};
use std::collections::HashSet;
use tracing::warn;

/// `[A-Za-z_][A-Za-z0-9_]*`, the names both dialects accept unquoted.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Ordered parameter list of an entity's constructor.
///
/// Registration checks it against the column descriptors so that a row can
/// always be turned into an object once every column has a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constructor {
    params: Vec<(String, FieldType)>,
}

impl Constructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, by field key and declared type
    pub fn param(mut self, key: impl Into<String>, ty: FieldType) -> Self {
        self.params.push((key.into(), ty));
        self
    }

    pub fn params(&self) -> &[(String, FieldType)] {
        &self.params
    }

    /// Constructor taking every column in declaration order
    pub fn from_columns(columns: &[ColumnDescriptor]) -> Self {
        Self {
            params: columns
                .iter()
                .map(|c| (c.key(), c.field_type().clone()))
                .collect(),
        }
    }
}

/// Everything the engine knows about one entity type.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    name: String,
    load_data: bool,
    constructor: Option<Constructor>,
    columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            load_data: true,
            constructor: None,
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Skip the eager load at registration; rows are then pulled on demand.
    pub fn lazy(mut self) -> Self {
        self.load_data = false;
        self
    }

    pub fn constructor(mut self, constructor: Constructor) -> Self {
        self.constructor = Some(constructor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn loads_data(&self) -> bool {
        self.load_data
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn primary_key(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.is_primary_key())
    }

    pub fn foreign_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.foreign_kind().is_some())
    }

    /// Lowercased names of every table this one references
    pub fn references(&self) -> HashSet<String> {
        self.foreign_columns()
            .filter_map(|c| c.foreign_table_name())
            .map(str::to_lowercase)
            .collect()
    }

    /// Validate the descriptor and drop foreign columns that cannot carry a reference.
    pub fn validate(mut self) -> Result<Self> {
        if !is_identifier(&self.name) {
            return Err(Error::Configuration(format!(
                "'{}' is not a valid table name",
                self.name
            )));
        }

        let table = self.name.clone();
        self.columns.retain(|column| {
            if column.is_foreign() && column.foreign_kind().is_none() {
                warn!(
                    table = %table,
                    column = %column.name(),
                    "Foreign column must be a record, a list of records or a map of records; skipping"
                );
                return false;
            }
            true
        });

        if self.columns.is_empty() {
            return Err(Error::Configuration(format!("table '{}' has no columns", self.name)));
        }

        let mut names = HashSet::new();
        for column in &self.columns {
            let name = column.name();
            if !is_identifier(&name) {
                return Err(Error::Configuration(format!(
                    "'{}' is not a valid column name in table '{}'",
                    name, self.name
                )));
            }
            if !names.insert(name.to_lowercase()) {
                return Err(Error::Configuration(format!(
                    "column '{}' appears twice in table '{}'",
                    name, self.name
                )));
            }
            if column.field_type().foreign_kind().is_some() && !column.is_foreign() {
                return Err(Error::Configuration(format!(
                    "column '{}' holds records but names no foreign table",
                    name
                )));
            }
            if column.is_auto_increment() && !column.is_primary_key() {
                return Err(Error::Configuration(format!(
                    "auto-increment column '{}' must be the primary key",
                    name
                )));
            }
        }

        let primary_keys = self.columns.iter().filter(|c| c.is_primary_key()).count();
        if primary_keys > 1 {
            return Err(Error::Configuration(format!(
                "table '{}' declares {} primary keys",
                self.name, primary_keys
            )));
        }

        self.check_constructor()?;
        Ok(self)
    }

    fn check_constructor(&self) -> Result<()> {
        let constructor = self.constructor.as_ref().ok_or_else(|| {
            Error::Configuration(format!("table '{}' has no constructor binding", self.name))
        })?;

        let expected: Vec<(String, &FieldType)> = self
            .columns
            .iter()
            .map(|c| (c.key(), c.field_type()))
            .collect();

        let matches = constructor.params().len() == expected.len()
            && expected.iter().all(|(key, ty)| {
                constructor
                    .params()
                    .iter()
                    .any(|(param, param_ty)| param == key && param_ty == *ty)
            });

        if !matches {
            let wanted = expected
                .iter()
                .map(|(key, ty)| format!("{}: {}", key, ty))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(Error::Configuration(format!(
                "no constructor of '{}' matches ({})",
                self.name, wanted
            )));
        }
        Ok(())
    }
}
