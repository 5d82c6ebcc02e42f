//! Dependency Graph - foreign-key relationships between registered tables
//!
//! Kept by the registry so that a registration which would close a
//! reference cycle is refused before anything is created.

use std::collections::{BTreeSet, HashMap, HashSet};

/// Table-level reference graph. Names are stored lowercased.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Tables referenced by a table (outgoing edges)
    references: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table and the tables it references
    pub fn add_table<I, S>(&mut self, table: &str, references: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let outgoing = self.references.entry(table.to_lowercase()).or_default();
        for to in references {
            outgoing.insert(to.as_ref().to_lowercase());
        }
    }

    /// Find the cycle that adding `table -> references` would close.
    ///
    /// Returns the path starting and ending at `table`, e.g.
    /// `["a", "b", "a"]`. A self-reference yields `["a", "a"]`.
    pub fn find_cycle<I, S>(&self, table: &str, references: I) -> Option<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let start = table.to_lowercase();
        let mut references: Vec<String> = references
            .into_iter()
            .map(|r| r.as_ref().to_lowercase())
            .collect();
        references.sort();

        for first in references {
            let mut visited = HashSet::new();
            let mut path = vec![start.clone()];
            if self.reaches(&first, &start, &mut visited, &mut path) {
                return Some(path);
            }
        }
        None
    }

    /// Depth-first search from `current` to `target`, recording the path.
    fn reaches(
        &self,
        current: &str,
        target: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        path.push(current.to_string());
        if current == target {
            return true;
        }
        if visited.insert(current.to_string()) {
            if let Some(next) = self.references.get(current) {
                for to in next {
                    if self.reaches(to, target, visited, path) {
                        return true;
                    }
                }
            }
        }
        path.pop();
        false
    }

    /// Tables in an order where every table comes after the tables it references.
    ///
    /// Referenced tables that were never added are listed as well.
    pub fn load_order(&self) -> Vec<String> {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut tables: Vec<&String> = self.references.keys().collect();
        tables.sort();
        for table in tables {
            self.visit(table, &mut done, &mut order);
        }
        order
    }

    fn visit(&self, table: &str, done: &mut HashSet<String>, order: &mut Vec<String>) {
        if !done.insert(table.to_string()) {
            return;
        }
        if let Some(next) = self.references.get(table) {
            for to in next {
                self.visit(to, done, order);
            }
        }
        order.push(table.to_string());
    }

    /// Get statistics about the graph
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            tables: self.references.len(),
            references: self.references.values().map(BTreeSet::len).sum(),
        }
    }
}

/// Statistics about a dependency graph
#[derive(Debug, Clone)]
pub struct GraphStats {
    pub tables: usize,
    pub references: usize,
}

impl std::fmt::Display for GraphStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Dependency Graph Statistics:")?;
        writeln!(f, "  Tables: {}", self.tables)?;
        writeln!(f, "  References: {}", self.references)
    }
}
