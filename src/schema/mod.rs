//! Schema descriptors - the compile-time description of entity tables

mod column;
mod table;

pub use column::{ColumnDescriptor, FieldType, ForeignBinding, ForeignKind};
pub use table::{Constructor, TableDescriptor, is_identifier};
