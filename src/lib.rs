//! # rowcache - Object-relational mapping and caching engine
//!
//! Entity types describe their columns once; rowcache turns that description
//! into relational schema and keeps the rows as live in-memory objects.
//!
//! rowcache provides:
//! - Compile-time column descriptors instead of runtime reflection
//! - Two statement dialects (network-relational and embedded-file)
//! - A per-table cache of live objects keyed by primary key
//! - Foreign references (single, list, string-keyed map) resolved across
//!   tables that register in any order, with cycle detection
//! - Best-effort cascading deletes with an explicit report
//! - Cross-process cache invalidation over a message bus

pub mod codec;
pub mod config;
pub mod demo;
pub mod entity;
pub mod graph;
pub mod invalidation;
pub mod registry;
pub mod schema;
pub mod statements;
pub mod storage;
pub mod table;
pub mod ui;
pub mod value;

use std::future::Future;
use std::pin::Pin;

// Re-exports for convenient access
pub use codec::{CodecRegistry, DefaultCodec, FieldCodec, StringListCodec};
pub use entity::{AnyRecord, Entity, Field, FieldSet, FromValue, Record};
pub use invalidation::{Invalidation, InvalidationBus, LocalBus, UpdateType};
pub use registry::{Orm, OrmBuilder};
pub use schema::{ColumnDescriptor, Constructor, FieldType, ForeignKind, TableDescriptor};
pub use statements::{Dialect, Statement, StatementCompiler};
pub use storage::{ConnectionProvider, Row, SqliteProvider};
pub use table::{DeleteReport, DynTable, NoHooks, Readiness, SaveOutcome, Table, TableHooks};
pub use value::{SqlValue, Value};

/// Result type alias for rowcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed future used where async work recurses across tables
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error types for rowcache operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The entity or table description cannot be used; fatal to that table.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A statement failed to execute.
    #[error("Query error: {0}")]
    Query(String),

    /// A codec or field accessor failed; aborts one object's materialization.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// A foreign table could not be resolved when it was needed.
    #[error("Foreign key error: {0}")]
    ForeignKey(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry is closed")]
    Closed,
}
