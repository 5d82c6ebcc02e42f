//! Statement compilation - descriptors and encoded values to SQL text
//!
//! Both dialects share the lookup and delete shapes; they differ in how a
//! column is declared and in the upsert form:
//! - `NetworkStatements`: `INSERT ... ON DUPLICATE KEY UPDATE` with inline literals
//! - `EmbeddedStatements`: `INSERT OR REPLACE` with bound parameters
//!
//! Values arrive already encoded by the table's codecs, one [`SqlValue`] per
//! column of the descriptor, in declaration order.

mod embedded;
mod network;

pub use embedded::EmbeddedStatements;
pub use network::NetworkStatements;

use crate::schema::{ColumnDescriptor, FieldType, ForeignKind, TableDescriptor};
use crate::value::SqlValue;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// SQL dialect of a connection provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Server-backed relational store (MySQL family)
    Network,
    /// Single-file embedded store (SQLite)
    Embedded,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Network => "network",
            Dialect::Embedded => "embedded",
        }
    }

    pub fn all() -> &'static [Dialect] {
        &[Dialect::Network, Dialect::Embedded]
    }

    /// Statement compiler for this dialect
    pub fn compiler(&self) -> Box<dyn StatementCompiler> {
        match self {
            Dialect::Network => Box::new(NetworkStatements),
            Dialect::Embedded => Box::new(EmbeddedStatements),
        }
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "network" | "mysql" | "mariadb" => Ok(Dialect::Network),
            "embedded" | "sqlite" | "file" => Ok(Dialect::Embedded),
            _ => Err(Error::Configuration(format!("Unknown dialect: {}", s))),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A compiled statement and its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// A parameterized statement executed once per row of a batch.
///
/// `columns` lists, in parameter order, the descriptor column indexes whose
/// values each row binds.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatement {
    pub sql: String,
    pub columns: Vec<usize>,
}

impl BatchStatement {
    /// Pick this statement's parameters out of one encoded row
    pub fn bind(&self, row: &[SqlValue]) -> Vec<SqlValue> {
        self.columns
            .iter()
            .map(|&idx| row.get(idx).cloned().unwrap_or(SqlValue::Null))
            .collect()
    }
}

/// Compiles descriptors and encoded rows into dialect-specific SQL.
pub trait StatementCompiler: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Column clause of a CREATE TABLE statement
    fn column_definition(&self, column: &ColumnDescriptor) -> String;

    fn create_table(&self, table: &TableDescriptor) -> Statement;

    /// Upsert of one row. `fields` restricts which columns the update part touches.
    fn save(&self, table: &TableDescriptor, row: &[SqlValue], fields: Option<&[&str]>) -> Statement;

    /// Parameterized upsert for batch execution
    fn batch_save(&self, table: &TableDescriptor) -> BatchStatement;

    /// Placeholder or literal for a value inside a statement
    fn bind(&self, value: &SqlValue, params: &mut Vec<SqlValue>) -> String;

    /// SQL literal for a value
    fn literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(f) => f.to_string(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Blob(b) => format!(
                "X'{}'",
                b.iter().map(|byte| format!("{:02X}", byte)).collect::<String>()
            ),
        }
    }

    /// `UPDATE t SET c = v, ... WHERE pk = v;` over the updatable columns.
    ///
    /// `None` without a primary key or without any column to update.
    fn update(&self, table: &TableDescriptor, row: &[SqlValue], fields: Option<&[&str]>) -> Option<Statement> {
        let (pk_idx, pk) = primary_key(table)?;
        let mut params = Vec::new();
        let assignments: Vec<String> = updatable(table, fields)
            .into_iter()
            .map(|(idx, column)| format!("{} = {}", column.name(), self.bind(value_at(row, idx), &mut params)))
            .collect();
        if assignments.is_empty() {
            return None;
        }
        let key = self.bind(value_at(row, pk_idx), &mut params);
        Some(Statement::with_params(
            format!(
                "UPDATE {} SET {} WHERE {} = {};",
                table.name(),
                assignments.join(", "),
                pk.name(),
                key
            ),
            params,
        ))
    }

    /// `DELETE FROM t WHERE pk = v;`, `None` without a primary key.
    fn delete(&self, table: &TableDescriptor, key: &SqlValue) -> Option<Statement> {
        let (_, pk) = primary_key(table)?;
        Some(Statement::new(format!(
            "DELETE FROM {} WHERE {} = {};",
            table.name(),
            pk.name(),
            self.literal(key)
        )))
    }

    fn select_all(&self, table: &TableDescriptor) -> Statement {
        Statement::new(format!("SELECT * FROM {};", table.name()))
    }

    /// `SELECT * FROM t WHERE pk = v;`, `None` without a primary key.
    fn select_by_id(&self, table: &TableDescriptor, key: &SqlValue) -> Option<Statement> {
        let (_, pk) = primary_key(table)?;
        Some(Statement::new(format!(
            "SELECT * FROM {} WHERE {} = {};",
            table.name(),
            pk.name(),
            self.literal(key)
        )))
    }
}

// ========== Shared Helpers ==========

/// Storage type of a column: explicit, inherited from the referenced key, or inferred.
pub fn sql_type(column: &ColumnDescriptor) -> String {
    if let Some(explicit) = column.explicit_storage_type() {
        return explicit.to_string();
    }
    match column.foreign_kind() {
        Some(ForeignKind::List) | Some(ForeignKind::Map) => return "LONGTEXT".to_string(),
        Some(ForeignKind::One) => {
            return column
                .binding()
                .map(|binding| sql_type(binding.primary_key()))
                .unwrap_or_else(|| "TEXT".to_string());
        }
        None => {}
    }
    match column.field_type() {
        FieldType::Int => "INT",
        FieldType::BigInt => "LONG",
        FieldType::Double => "DOUBLE",
        FieldType::Float => "FLOAT",
        FieldType::SmallInt => "SMALLINT",
        FieldType::TinyInt => "TINYINT",
        FieldType::Bool => "BOOLEAN",
        FieldType::Char => "CHAR",
        FieldType::List(_) | FieldType::Map(_) => "LONGTEXT",
        _ => "TEXT",
    }
    .to_string()
}

fn value_at(row: &[SqlValue], idx: usize) -> &SqlValue {
    row.get(idx).unwrap_or(&SqlValue::Null)
}

/// Primary key column and its index in the descriptor
fn primary_key(table: &TableDescriptor) -> Option<(usize, &ColumnDescriptor)> {
    table
        .columns()
        .iter()
        .enumerate()
        .find(|(_, c)| c.is_primary_key())
}

/// Columns in statement order with their descriptor indexes: key first.
fn ordered(table: &TableDescriptor) -> Vec<(usize, &ColumnDescriptor)> {
    let mut columns: Vec<(usize, &ColumnDescriptor)> = primary_key(table).into_iter().collect();
    columns.extend(
        table
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_primary_key()),
    );
    columns
}

/// Non-key, non-generated columns that a save may overwrite
fn updatable<'a>(table: &'a TableDescriptor, fields: Option<&[&str]>) -> Vec<(usize, &'a ColumnDescriptor)> {
    ordered(table)
        .into_iter()
        .filter(|(_, c)| !c.is_primary_key() && !c.is_auto_increment() && c.is_update_on_save())
        .filter(|(_, c)| fields.is_none_or(|keys| keys.contains(&c.key().as_str())))
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::schema::{ColumnDescriptor, Constructor, FieldType, TableDescriptor};

    pub fn users() -> TableDescriptor {
        let columns = vec![
            ColumnDescriptor::new("id", FieldType::Int).primary_key().auto_increment(),
            ColumnDescriptor::new("name", FieldType::Text),
            ColumnDescriptor::new("nickname", FieldType::Text).allow_null(),
            ColumnDescriptor::new("created", FieldType::BigInt).update_on_save(false),
        ];
        let constructor = Constructor::from_columns(&columns);
        columns
            .into_iter()
            .fold(TableDescriptor::new("users"), TableDescriptor::column)
            .constructor(constructor)
    }

    pub fn tags() -> TableDescriptor {
        let columns = vec![
            ColumnDescriptor::new("label", FieldType::Text).storage_type("VARCHAR(32)").primary_key(),
            ColumnDescriptor::new("weight", FieldType::Double),
        ];
        let constructor = Constructor::from_columns(&columns);
        columns
            .into_iter()
            .fold(TableDescriptor::new("tags"), TableDescriptor::column)
            .constructor(constructor)
    }
}
