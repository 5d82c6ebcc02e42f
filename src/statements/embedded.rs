//! Embedded-file dialect (SQLite)

use super::{BatchStatement, Dialect, Statement, StatementCompiler, ordered, sql_type, value_at};
use crate::schema::{ColumnDescriptor, TableDescriptor};
use crate::value::SqlValue;

/// Binds values as parameters and upserts with `INSERT OR REPLACE`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedStatements;

impl EmbeddedStatements {
    /// Key plus every update-on-save column, with descriptor indexes
    fn saved_columns(table: &TableDescriptor) -> Vec<(usize, &ColumnDescriptor)> {
        ordered(table)
            .into_iter()
            .filter(|(_, c)| c.is_primary_key() || c.is_update_on_save())
            .collect()
    }

    fn insert_or_replace(table: &TableDescriptor, columns: &[(usize, &ColumnDescriptor)]) -> String {
        let names: Vec<String> = columns.iter().map(|(_, c)| c.name()).collect();
        format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({});",
            table.name(),
            names.join(", "),
            vec!["?"; columns.len()].join(", ")
        )
    }
}

impl StatementCompiler for EmbeddedStatements {
    fn dialect(&self) -> Dialect {
        Dialect::Embedded
    }

    fn column_definition(&self, column: &ColumnDescriptor) -> String {
        if column.is_auto_increment() {
            return format!("{} INTEGER PRIMARY KEY", column.name());
        }
        let mut definition = format!("{} {}", column.name(), sql_type(column));
        if !column.is_nullable() {
            definition.push_str(" NOT NULL");
        }
        definition
    }

    fn create_table(&self, table: &TableDescriptor) -> Statement {
        let mut parts: Vec<String> = ordered(table)
            .into_iter()
            .map(|(_, c)| self.column_definition(c))
            .collect();
        // An auto-increment key is already declared INTEGER PRIMARY KEY.
        if let Some(pk) = table.primary_key().filter(|pk| !pk.is_auto_increment()) {
            parts.push(format!("PRIMARY KEY({})", pk.name()));
        }
        Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            table.name(),
            parts.join(", ")
        ))
    }

    fn save(&self, table: &TableDescriptor, row: &[SqlValue], _fields: Option<&[&str]>) -> Statement {
        let columns = Self::saved_columns(table);
        let params = columns
            .iter()
            .map(|(idx, _)| value_at(row, *idx).clone())
            .collect();
        Statement::with_params(Self::insert_or_replace(table, &columns), params)
    }

    fn batch_save(&self, table: &TableDescriptor) -> BatchStatement {
        let columns = Self::saved_columns(table);
        BatchStatement {
            sql: Self::insert_or_replace(table, &columns),
            columns: columns.into_iter().map(|(idx, _)| idx).collect(),
        }
    }

    fn bind(&self, value: &SqlValue, params: &mut Vec<SqlValue>) -> String {
        params.push(value.clone());
        "?".to_string()
    }
}
