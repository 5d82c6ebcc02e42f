//! Table Cache / Object Mapper
//!
//! A [`Table`] owns the live objects of one entity type, keyed by the
//! canonical rendering of their primary key. It loads rows, materializes
//! them (resolving foreign references through the referenced tables),
//! and writes mutations back through the registry's provider.
//!
//! Other tables reach it through the type-erased [`DynTable`] handle.

mod report;
mod resolve;

pub use report::{DeleteReport, DeletedRow, FailedDelete, SaveOutcome};

use crate::entity::{self, AnyRecord, Entity, Field, FieldSet, Record, read, write};
use crate::invalidation::{UpdateType, listener};
use crate::registry::Context;
use crate::schema::{ColumnDescriptor, ForeignKind, TableDescriptor};
use crate::storage::Row;
use crate::value::{SqlValue, Value, encode_list, encode_map};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle of a registered table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Readiness {
    /// Waiting for referenced tables to become ready
    Pending,
    /// Creating the table and loading rows
    Loading,
    Ready,
    /// Table creation failed; the table is unusable
    Failed,
}

impl Readiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Readiness::Pending => "pending",
            Readiness::Loading => "loading",
            Readiness::Ready => "ready",
            Readiness::Failed => "failed",
        }
    }

    /// Ready or failed; no further transition happens
    pub fn is_settled(&self) -> bool {
        matches!(self, Readiness::Ready | Readiness::Failed)
    }
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle callbacks of one table. Every method defaults to a no-op.
pub trait TableHooks<E: Entity>: Send + Sync + 'static {
    /// An object entered the cache
    fn on_data_added(&self, _record: &Record<E>) {}

    /// A full load finished, also when it found nothing or failed
    fn on_data_loaded(&self, _count: usize) {}

    /// An object's row was deleted
    fn on_data_deleted(&self, _record: &Record<E>) {}
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl<E: Entity> TableHooks<E> for NoHooks {}

/// Type-erased access to a table, used across foreign references.
#[async_trait]
pub trait DynTable: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn descriptor(&self) -> &TableDescriptor;

    fn readiness(&self) -> Readiness;

    fn cached_len(&self) -> usize;

    fn contains_key(&self, key: &str) -> bool;

    /// Cache key of an object of this table
    fn primary_key_of(&self, record: &AnyRecord) -> Option<String>;

    /// Drop one cached object; true if it was cached
    fn evict_key(&self, key: &str) -> bool;

    /// Drop every cached object
    fn clear(&self);

    /// Give up on a table whose references can never be bound
    fn mark_failed(&self);

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Create the table, load rows if eager, and mark it ready
    async fn initialize(&self) -> Result<()>;

    /// Cache-or-fetch lookup that populates the cache
    async fn fetch(&self, key: &str) -> Option<AnyRecord>;

    /// Bypass the cache, fetch the row and cache it; true if found
    async fn refetch(&self, key: &str) -> bool;

    async fn delete_any(&self, record: AnyRecord) -> DeleteReport;

    /// Wait until the table is ready or failed
    async fn wait_ready(&self) -> Readiness;
}

/// Cache and mapper for one entity type
pub struct Table<E: Entity> {
    descriptor: TableDescriptor,
    cache: DashMap<String, Record<E>>,
    ctx: Arc<Context>,
    hooks: Arc<dyn TableHooks<E>>,
    state: watch::Sender<Readiness>,
}

impl<E: Entity> std::fmt::Debug for Table<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("descriptor", &self.descriptor)
            .field("cached", &self.cache.len())
            .field("readiness", &self.readiness())
            .finish_non_exhaustive()
    }
}

impl<E: Entity> Table<E> {
    pub(crate) fn new(descriptor: TableDescriptor, ctx: Arc<Context>, hooks: Arc<dyn TableHooks<E>>) -> Self {
        let (state, _) = watch::channel(Readiness::Pending);
        Self {
            descriptor,
            cache: DashMap::new(),
            ctx,
            hooks,
            state,
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    pub fn readiness(&self) -> Readiness {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    /// Wait until the table is ready or failed.
    ///
    /// A table whose references never register stays pending forever;
    /// wrap this in `tokio::time::timeout` when that can happen.
    pub async fn wait_ready(&self) -> Readiness {
        let mut rx = self.state.subscribe();
        match rx.wait_for(Readiness::is_settled).await {
            Ok(state) => *state,
            Err(_) => self.readiness(),
        }
    }

    pub(crate) fn set_readiness(&self, readiness: Readiness) {
        debug!(table = %self.name(), state = %readiness, "Table state changed");
        self.state.send_replace(readiness);
    }

    // ========== Cache ==========

    /// Cache-only lookup
    pub fn get_data_by_id(&self, id: impl Into<Value>) -> Option<Record<E>> {
        let key = id.into().key()?;
        self.cache.get(&key).map(|found| found.value().clone())
    }

    pub fn contains(&self, id: impl Into<Value>) -> bool {
        id.into().key().is_some_and(|key| self.cache.contains_key(&key))
    }

    /// Snapshot of every cached object
    pub fn cached(&self) -> Vec<Record<E>> {
        self.cache.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Remove an object from the cache without touching the store
    pub fn evict(&self, id: impl Into<Value>) -> Option<Record<E>> {
        let key = id.into().key()?;
        self.cache.remove(&key).map(|(_, record)| record)
    }

    /// Cache key of an object, from its primary-key field
    pub fn key_of(&self, record: &Record<E>) -> Option<String> {
        let pk = self.descriptor.primary_key()?;
        match read(record).field(&pk.key())? {
            Field::Value(value) => value.key(),
            _ => None,
        }
    }

    /// Insert an object if its key is not cached yet, optionally saving it.
    ///
    /// Returns false when the object has no key or the key is taken.
    pub async fn add(&self, record: Record<E>, save: bool) -> bool {
        let Some(key) = self.key_of(&record) else {
            warn!(table = %self.name(), "Cannot cache an object without a primary key");
            return false;
        };
        let cached = self.cache_record(key, record.clone());
        if !Arc::ptr_eq(&cached, &record) {
            return false;
        }
        if save {
            self.save(&record).await;
        }
        true
    }

    /// Cache `record` under `key` unless another instance holds the key.
    /// Returns the instance that ends up cached.
    fn cache_record(&self, key: String, record: Record<E>) -> Record<E> {
        let existing = match self.cache.entry(key) {
            Entry::Occupied(existing) => Some(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                None
            }
        };
        match existing {
            Some(existing) => existing,
            None => {
                self.hooks.on_data_added(&record);
                record
            }
        }
    }

    // ========== Loading ==========

    pub(crate) async fn create_and_load(&self) -> Result<()> {
        self.set_readiness(Readiness::Loading);
        let statement = self.ctx.compiler.create_table(&self.descriptor);
        debug!(table = %self.name(), sql = %statement.sql, "Creating table");
        if let Err(e) = self.ctx.provider.execute(statement).await {
            error!(table = %self.name(), error = %e, "Failed to create table");
            self.set_readiness(Readiness::Failed);
            return Err(e);
        }

        if self.descriptor.loads_data() {
            self.load_data().await;
        } else {
            info!(table = %self.name(), "Finished loading table; rows are pulled on demand");
        }
        self.set_readiness(Readiness::Ready);
        Ok(())
    }

    /// Replace the cache with every stored row. Returns the number cached.
    pub async fn load_data(&self) -> usize {
        self.cache.clear();
        info!(table = %self.name(), "Retrieving data from database");

        let statement = self.ctx.compiler.select_all(&self.descriptor);
        let rows = match self.ctx.provider.query(statement).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(table = %self.name(), error = %e, "Failed to retrieve rows");
                self.hooks.on_data_loaded(0);
                return 0;
            }
        };

        let mut loaded = 0;
        for row in &rows {
            match self.materialize(row).await {
                Ok(entity) => {
                    let record = entity::record(entity);
                    match self.key_of(&record) {
                        Some(key) => {
                            self.cache_record(key, record);
                            loaded += 1;
                        }
                        None => warn!(table = %self.name(), "Loaded object has no primary key; not cached"),
                    }
                }
                Err(e) => warn!(table = %self.name(), error = %e, "Skipping row that could not be materialized"),
            }
        }

        info!(table = %self.name(), rows = loaded, "Finished retrieving data");
        self.hooks.on_data_loaded(loaded);
        loaded
    }

    /// Look an object up by id.
    ///
    /// With `check_cache` a cached object is returned without a round trip.
    /// Otherwise the row is fetched and the fresh object returned; with
    /// `cache` it is also cached if no instance holds the key yet.
    /// Failures and absence both yield `None`; failures are logged.
    pub async fn get_data_from_db(&self, id: impl Into<Value>, check_cache: bool, cache: bool) -> Option<Record<E>> {
        let key = id.into().key()?;
        self.lookup(&key, check_cache, cache).await
    }

    async fn lookup(&self, key: &str, check_cache: bool, cache: bool) -> Option<Record<E>> {
        if check_cache {
            if let Some(found) = self.cache.get(key).map(|found| found.value().clone()) {
                return Some(found);
            }
        }

        let Some(statement) = self
            .ctx
            .compiler
            .select_by_id(&self.descriptor, &SqlValue::Text(key.to_string()))
        else {
            error!(table = %self.name(), "Lookup by id needs a primary key");
            return None;
        };

        let rows = match self.ctx.provider.query(statement).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(table = %self.name(), id = %key, error = %e, "Failed to fetch row");
                return None;
            }
        };
        let Some(row) = rows.first() else {
            debug!(table = %self.name(), id = %key, "No row with this id");
            return None;
        };

        match self.materialize(row).await {
            Ok(entity) => {
                let record = entity::record(entity);
                if !cache {
                    return Some(record);
                }
                let key = self.key_of(&record).unwrap_or_else(|| key.to_string());
                let cached = self.cache_record(key, record.clone());
                // Bypassing the cache always hands back the row just read.
                if check_cache { Some(cached) } else { Some(record) }
            }
            Err(e) => {
                warn!(table = %self.name(), id = %key, error = %e, "Failed to materialize row");
                None
            }
        }
    }

    /// Build an object from one row, resolving foreign columns.
    async fn materialize(&self, row: &Row) -> Result<E> {
        let mut args = FieldSet::new();
        for column in self.descriptor.columns() {
            let stored = row.get(&column.name()).cloned().unwrap_or(SqlValue::Null);
            let field = match column.foreign_kind() {
                Some(kind) => {
                    let target = self.foreign_target(column)?;
                    resolve::resolve_foreign(target, kind, stored).await?
                }
                None => Field::Value(self.decode(column, stored)?),
            };
            args.insert(column.key(), field);
        }
        E::construct(args)
    }

    fn decode(&self, column: &ColumnDescriptor, stored: SqlValue) -> Result<Value> {
        let codec = self.ctx.codecs.resolve(column.codec_type());
        codec.decode(stored)?.coerce(column.field_type())
    }

    fn foreign_target(&self, column: &ColumnDescriptor) -> Result<Arc<dyn DynTable>> {
        let foreign = column.foreign_table_name().unwrap_or_default();
        let binding = column.binding().ok_or_else(|| {
            Error::ForeignKey(format!(
                "column '{}' of '{}' is not bound to '{}'",
                column.name(),
                self.name(),
                foreign
            ))
        })?;
        binding
            .target()
            .ok_or_else(|| Error::ForeignKey(format!("table '{}' is no longer registered", foreign)))
    }

    // ========== Persistence ==========

    /// Encode every column of an object, in descriptor order.
    fn encode(&self, entity: &E) -> Result<Vec<SqlValue>> {
        self.descriptor
            .columns()
            .iter()
            .map(|column| {
                let field = entity.field(&column.key()).ok_or_else(|| {
                    Error::Mapping(format!("'{}' has no value for field '{}'", self.name(), column.key()))
                })?;
                self.encode_field(column, field)
            })
            .collect()
    }

    fn encode_field(&self, column: &ColumnDescriptor, field: Field) -> Result<SqlValue> {
        let Some(kind) = column.foreign_kind() else {
            return match field {
                Field::Value(Value::Null) => Ok(SqlValue::Null),
                Field::Value(value) => self.ctx.codecs.resolve(column.codec_type()).encode(&value),
                _ => Err(Error::Mapping(format!("field '{}' holds records", column.key()))),
            };
        };

        let target = self.foreign_target(column)?;
        let id_of = |record: &AnyRecord| {
            target.primary_key_of(record).ok_or_else(|| {
                Error::Mapping(format!("object referenced by '{}' has no primary key", column.key()))
            })
        };

        match (kind, field) {
            (ForeignKind::One, Field::One(None)) => Ok(SqlValue::Null),
            (ForeignKind::One, Field::One(Some(record))) => id_of(&record).map(SqlValue::Text),
            (ForeignKind::List, Field::List(records)) => {
                let ids = records.iter().map(id_of).collect::<Result<Vec<_>>>()?;
                Ok(SqlValue::Text(encode_list(&ids)))
            }
            (ForeignKind::Map, Field::Map(records)) => {
                let ids = records
                    .iter()
                    .map(|(key, record)| id_of(record).map(|id| (key.clone(), id)))
                    .collect::<Result<BTreeMap<_, _>>>()?;
                Ok(SqlValue::Text(encode_map(&ids)))
            }
            (kind, _) => Err(Error::Mapping(format!(
                "field '{}' does not hold a {} reference",
                column.key(),
                kind
            ))),
        }
    }

    /// Upsert an object, write back a generated key, cache it and publish SAVE.
    pub async fn save(&self, record: &Record<E>) -> Option<SaveOutcome> {
        let row = match self.encode(&read(record)) {
            Ok(row) => row,
            Err(e) => {
                warn!(table = %self.name(), error = %e, "Cannot encode object for saving");
                return None;
            }
        };

        let statement = self.ctx.compiler.save(&self.descriptor, &row, None);
        let outcome = match self.ctx.provider.execute(statement).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(table = %self.name(), error = %e, "Failed to save object");
                return None;
            }
        };

        let generated_key = if self.write_back(record, outcome.generated_key) {
            outcome.generated_key
        } else {
            None
        };
        if let Some(key) = self.key_of(record) {
            self.cache_saved(key.clone(), record);
            self.ctx.publish(UpdateType::Save, self.name(), &key);
        }

        Some(SaveOutcome {
            rows_affected: outcome.rows_affected,
            generated_key,
        })
    }

    /// Write a generated key into the auto-increment key field. True if written.
    fn write_back(&self, record: &Record<E>, generated: Option<i64>) -> bool {
        let (Some(generated), Some(pk)) = (
            generated,
            self.descriptor.primary_key().filter(|pk| pk.is_auto_increment()),
        ) else {
            return false;
        };
        match write(record).assign(&pk.key(), Value::Int(generated)) {
            Ok(()) => true,
            Err(e) => {
                warn!(table = %self.name(), error = %e, "Cannot write generated key back");
                false
            }
        }
    }

    fn cache_saved(&self, key: String, record: &Record<E>) {
        let cached = self.cache_record(key.clone(), record.clone());
        if !Arc::ptr_eq(&cached, record) {
            debug!(
                table = %self.name(),
                id = %key,
                "Another instance is cached under this key; evict it to replace it"
            );
        }
    }

    /// Update only the named fields of an object's row, then publish SAVE.
    pub async fn save_fields(&self, record: &Record<E>, fields: &[&str]) -> Option<SaveOutcome> {
        let row = match self.encode(&read(record)) {
            Ok(row) => row,
            Err(e) => {
                warn!(table = %self.name(), error = %e, "Cannot encode object for saving");
                return None;
            }
        };

        let Some(statement) = self.ctx.compiler.update(&self.descriptor, &row, Some(fields)) else {
            warn!(table = %self.name(), fields = ?fields, "Nothing to update");
            return None;
        };
        let outcome = match self.ctx.provider.execute(statement).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(table = %self.name(), error = %e, "Failed to update object");
                return None;
            }
        };

        if let Some(key) = self.key_of(record) {
            self.ctx.publish(UpdateType::Save, self.name(), &key);
        }
        Some(SaveOutcome {
            rows_affected: outcome.rows_affected,
            generated_key: None,
        })
    }

    /// Save every cached object in one batch.
    ///
    /// SAVE is published per object only after the whole batch succeeded.
    /// Returns the number of rows written.
    pub async fn save_all(&self) -> Option<u64> {
        let batch = self.ctx.compiler.batch_save(&self.descriptor);
        let mut rows = Vec::with_capacity(self.cache.len());
        let mut keys = Vec::with_capacity(self.cache.len());

        for record in self.cached() {
            let encoded = self.encode(&read(&record));
            match encoded {
                Ok(row) => {
                    rows.push(batch.bind(&row));
                    keys.extend(self.key_of(&record));
                }
                Err(e) => warn!(table = %self.name(), error = %e, "Skipping object in batch save"),
            }
        }
        if rows.is_empty() {
            return Some(0);
        }

        let commit_every = self.ctx.batch_save_size();
        match self.ctx.provider.execute_batch(batch.sql, rows, commit_every).await {
            Ok(written) => {
                info!(table = %self.name(), rows = written, "Batch save finished");
                for key in &keys {
                    self.ctx.publish(UpdateType::Save, self.name(), key);
                }
                Some(written)
            }
            Err(e) => {
                error!(table = %self.name(), error = %e, "Batch save failed");
                None
            }
        }
    }

    /// Delete an object, cascading into referenced objects where configured.
    ///
    /// The object leaves the cache first. Cascade failures are collected in
    /// the report and do not stop the parent's own delete.
    pub async fn delete(&self, record: &Record<E>) -> DeleteReport {
        let mut report = DeleteReport::new();
        let Some(key) = self.key_of(record) else {
            error!(table = %self.name(), "Cannot delete an object without a primary key");
            report.record_failed(self.name(), None, "object has no primary key");
            return report;
        };
        self.cache.remove(&key);

        let cascades: Vec<(&ColumnDescriptor, Vec<AnyRecord>)> = {
            let entity = read(record);
            self.descriptor
                .foreign_columns()
                .filter(|column| column.is_cascade_delete())
                .map(|column| {
                    let children = entity
                        .field(&column.key())
                        .map(|field| field.records())
                        .unwrap_or_default();
                    (column, children)
                })
                .collect()
        };

        for (column, children) in cascades {
            if children.is_empty() {
                continue;
            }
            let target = match self.foreign_target(column) {
                Ok(target) => target,
                Err(e) => {
                    warn!(table = %self.name(), error = %e, "Cannot cascade delete");
                    let foreign = column.foreign_table_name().unwrap_or_default();
                    for _ in &children {
                        report.record_failed(foreign, None, e.to_string());
                    }
                    continue;
                }
            };
            for child in children {
                report.merge(target.delete_any(child).await);
            }
        }

        let Some(statement) = self
            .ctx
            .compiler
            .delete(&self.descriptor, &SqlValue::Text(key.clone()))
        else {
            report.record_failed(self.name(), Some(&key), "table has no primary key");
            return report;
        };
        match self.ctx.provider.execute(statement).await {
            Ok(_) => {
                report.record_deleted(self.name(), &key);
                self.hooks.on_data_deleted(record);
                self.ctx.publish(UpdateType::Delete, self.name(), &key);
            }
            Err(e) => {
                error!(table = %self.name(), id = %key, error = %e, "Failed to delete object");
                report.record_failed(self.name(), Some(&key), e.to_string());
            }
        }
        report
    }

    // ========== Invalidation ==========

    /// Listen for invalidations of this table from other instances.
    ///
    /// Returns false when the registry has no bus attached.
    pub fn listen(self: &Arc<Self>) -> bool {
        let table: Arc<dyn DynTable> = self.clone();
        let resolver = Arc::new(listener::SingleTable::new(&table));
        listener::spawn(&self.ctx, resolver)
    }
}

#[async_trait]
impl<E: Entity> DynTable for Table<E> {
    fn name(&self) -> &str {
        self.descriptor.name()
    }

    fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    fn readiness(&self) -> Readiness {
        *self.state.borrow()
    }

    fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn contains_key(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    fn primary_key_of(&self, record: &AnyRecord) -> Option<String> {
        let record = entity::downcast::<E>(Arc::clone(record))?;
        self.key_of(&record)
    }

    fn evict_key(&self, key: &str) -> bool {
        self.cache.remove(key).is_some()
    }

    fn clear(&self) {
        self.cache.clear();
    }

    fn mark_failed(&self) {
        self.set_readiness(Readiness::Failed);
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    async fn initialize(&self) -> Result<()> {
        self.create_and_load().await
    }

    async fn fetch(&self, key: &str) -> Option<AnyRecord> {
        self.lookup(key, true, true).await.map(|record| entity::erase(&record))
    }

    async fn refetch(&self, key: &str) -> bool {
        self.lookup(key, false, true).await.is_some()
    }

    async fn delete_any(&self, record: AnyRecord) -> DeleteReport {
        match entity::downcast::<E>(record) {
            Some(record) => self.delete(&record).await,
            None => {
                let mut report = DeleteReport::new();
                report.record_failed(self.descriptor.name(), None, "object belongs to another table");
                report
            }
        }
    }

    async fn wait_ready(&self) -> Readiness {
        Table::wait_ready(self).await
    }
}
