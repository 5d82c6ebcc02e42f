//! Network-relational dialect (MySQL family)

use super::{BatchStatement, Dialect, Statement, StatementCompiler, ordered, sql_type, updatable, value_at};
use crate::schema::{ColumnDescriptor, TableDescriptor};
use crate::value::SqlValue;

/// Renders values inline and upserts with `ON DUPLICATE KEY UPDATE`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkStatements;

impl NetworkStatements {
    /// `ON DUPLICATE KEY UPDATE` clause; falls back to a no-op assignment of
    /// the key so the statement stays valid when nothing is updatable.
    fn on_duplicate(table: &TableDescriptor, fields: Option<&[&str]>) -> String {
        let mut assignments: Vec<String> = updatable(table, fields)
            .into_iter()
            .map(|(_, c)| format!("{0}=VALUES({0})", c.name()))
            .collect();
        if assignments.is_empty() {
            if let Some(pk) = table.primary_key() {
                assignments.push(format!("{0}={0}", pk.name()));
            }
        }
        assignments.join(", ")
    }
}

impl StatementCompiler for NetworkStatements {
    fn dialect(&self) -> Dialect {
        Dialect::Network
    }

    fn column_definition(&self, column: &ColumnDescriptor) -> String {
        let mut definition = format!("{} {}", column.name(), sql_type(column));
        if !column.is_nullable() {
            definition.push_str(" NOT NULL");
        }
        if column.is_auto_increment() {
            definition.push_str(" AUTO_INCREMENT");
        }
        definition
    }

    fn create_table(&self, table: &TableDescriptor) -> Statement {
        let mut parts: Vec<String> = ordered(table)
            .into_iter()
            .map(|(_, c)| self.column_definition(c))
            .collect();
        if let Some(pk) = table.primary_key() {
            parts.push(format!("PRIMARY KEY({})", pk.name()));
        }
        Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            table.name(),
            parts.join(", ")
        ))
    }

    fn save(&self, table: &TableDescriptor, row: &[SqlValue], fields: Option<&[&str]>) -> Statement {
        let columns = ordered(table);
        let names: Vec<String> = columns.iter().map(|(_, c)| c.name()).collect();
        let values: Vec<String> = columns
            .iter()
            .map(|(idx, _)| self.literal(value_at(row, *idx)))
            .collect();
        Statement::new(format!(
            "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {};",
            table.name(),
            names.join(", "),
            values.join(", "),
            Self::on_duplicate(table, fields)
        ))
    }

    fn batch_save(&self, table: &TableDescriptor) -> BatchStatement {
        let columns = ordered(table);
        let names: Vec<String> = columns.iter().map(|(_, c)| c.name()).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        BatchStatement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {};",
                table.name(),
                names.join(", "),
                placeholders,
                Self::on_duplicate(table, None)
            ),
            columns: columns.into_iter().map(|(idx, _)| idx).collect(),
        }
    }

    fn bind(&self, value: &SqlValue, _params: &mut Vec<SqlValue>) -> String {
        self.literal(value)
    }

    /// Backslashes are escapes inside MySQL string literals.
    fn literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Text(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''")),
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(f) => f.to_string(),
            SqlValue::Blob(b) => format!(
                "X'{}'",
                b.iter().map(|byte| format!("{:02X}", byte)).collect::<String>()
            ),
        }
    }
}
