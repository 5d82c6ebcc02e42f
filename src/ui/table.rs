use crate::schema::TableDescriptor;
use crate::statements::sql_type;
use tabled::{Table, Tabled, settings::Style};

#[derive(Tabled)]
struct TableRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Two-column metric table; empty when there are no rows
pub fn stats_table(stats: &[(&str, &str)]) -> String {
    if stats.is_empty() {
        return String::new();
    }
    let rows: Vec<TableRow> = stats
        .iter()
        .map(|(label, value)| TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        })
        .collect();
    Table::new(&rows).with(Style::rounded()).to_string()
}

/// One column of a table descriptor, as listed by `rowcache schema`
#[derive(Tabled)]
pub struct ColumnRow {
    #[tabled(rename = "Column")]
    pub column: String,
    #[tabled(rename = "Field")]
    pub field: String,
    #[tabled(rename = "Type")]
    pub sql_type: String,
    #[tabled(rename = "Flags")]
    pub flags: String,
}

impl ColumnRow {
    pub fn rows(descriptor: &TableDescriptor) -> Vec<ColumnRow> {
        descriptor
            .columns()
            .iter()
            .map(|column| {
                let mut flags = Vec::new();
                if column.is_primary_key() {
                    flags.push("pk".to_string());
                }
                if column.is_auto_increment() {
                    flags.push("auto".to_string());
                }
                if column.is_nullable() {
                    flags.push("null".to_string());
                }
                if !column.is_update_on_save() {
                    flags.push("insert-only".to_string());
                }
                if let (Some(kind), Some(table)) = (column.foreign_kind(), column.foreign_table_name()) {
                    flags.push(format!("{} -> {}", kind, table));
                }
                if column.is_cascade_delete() {
                    flags.push("cascade".to_string());
                }
                ColumnRow {
                    column: column.name(),
                    field: column.key(),
                    sql_type: sql_type(column),
                    flags: flags.join(", "),
                }
            })
            .collect()
    }
}

pub fn column_table(descriptor: &TableDescriptor) -> String {
    let rows = ColumnRow::rows(descriptor);
    if rows.is_empty() {
        return String::new();
    }
    Table::new(&rows).with(Style::rounded()).to_string()
}
