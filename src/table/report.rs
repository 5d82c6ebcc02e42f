//! Outcome types of table mutations

/// Result of a successful save
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    pub rows_affected: u64,
    /// Key generated by the store and written back into the object
    pub generated_key: Option<i64>,
}

/// A row removed by a delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedRow {
    pub table: String,
    pub id: String,
}

/// A row a delete could not remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelete {
    pub table: String,
    /// `None` when the object had no usable primary key
    pub id: Option<String>,
    pub reason: String,
}

/// Everything a (possibly cascading) delete touched.
///
/// Cascades are best-effort: a failed child does not stop its siblings or
/// the parent, it is only recorded here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: Vec<DeletedRow>,
    pub failed: Vec<FailedDelete>,
}

impl DeleteReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_deleted(&mut self, table: &str, id: &str) {
        self.deleted.push(DeletedRow {
            table: table.to_string(),
            id: id.to_string(),
        });
    }

    pub fn record_failed(&mut self, table: &str, id: Option<&str>, reason: impl Into<String>) {
        self.failed.push(FailedDelete {
            table: table.to_string(),
            id: id.map(str::to_string),
            reason: reason.into(),
        });
    }

    /// Fold a descendant's report into this one
    pub fn merge(&mut self, other: DeleteReport) {
        self.deleted.extend(other.deleted);
        self.failed.extend(other.failed);
    }

    /// True when nothing failed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Rows removed from `table` (case-insensitive)
    pub fn deleted_from(&self, table: &str) -> usize {
        self.deleted
            .iter()
            .filter(|row| row.table.eq_ignore_ascii_case(table))
            .count()
    }

    pub fn was_deleted(&self, table: &str, id: &str) -> bool {
        self.deleted
            .iter()
            .any(|row| row.table.eq_ignore_ascii_case(table) && row.id == id)
    }
}

impl std::fmt::Display for DeleteReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} deleted, {} failed", self.deleted.len(), self.failed.len())
    }
}
