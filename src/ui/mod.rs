pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    header, info, muted, phase, row_deleted, row_failed, row_saved, section, status, success,
    summary_row, timing, warn,
};
pub use table::{ColumnRow, column_table, stats_table};
pub use theme::{Theme, theme};
