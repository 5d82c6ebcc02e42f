//! Schema Registry - the orchestrator owning every table
//!
//! An [`Orm`] owns one connection provider, one statement compiler, the
//! codec registry and every registered table. Tables may register in any
//! order: a table whose referenced tables are not ready yet waits as
//! *pending* and loads as soon as the last of them becomes ready.

use crate::codec::CodecRegistry;
use crate::config::{Backend, DEFAULT_BATCH_SAVE_SIZE, DEFAULT_SETTLE_DELAY_MS, OrmConfig};
use crate::entity::Entity;
use crate::graph::{DependencyGraph, GraphStats};
use crate::invalidation::listener::{self, TableResolver};
use crate::invalidation::{DEFAULT_CHANNEL, Envelope, Invalidation, InvalidationBus, UpdateType};
use crate::schema::{ColumnDescriptor, ForeignBinding};
use crate::statements::StatementCompiler;
use crate::storage::{ConnectionProvider, SqliteProvider};
use crate::table::{DynTable, NoHooks, Readiness, Table, TableHooks};
use crate::{BoxFuture, Error, Result};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// State shared by the registry and every table it owns.
pub(crate) struct Context {
    pub(crate) provider: Arc<dyn ConnectionProvider>,
    pub(crate) compiler: Box<dyn StatementCompiler>,
    pub(crate) codecs: CodecRegistry,
    pub(crate) bus: Option<Arc<dyn InvalidationBus>>,
    /// Stamped on outgoing envelopes so a registry ignores its own messages
    pub(crate) node: Uuid,
    pub(crate) channel: String,
    pub(crate) settle_delay: Duration,
    batch_save_size: AtomicUsize,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Context {
    /// Publish an invalidation if a bus is attached. Failures are logged.
    pub(crate) fn publish(&self, update: UpdateType, table: &str, id: &str) {
        let Some(bus) = &self.bus else {
            return;
        };
        let payload = match Invalidation::new(update, table, id).encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(table = %table, id = %id, error = %e, "Cannot encode invalidation");
                return;
            }
        };
        let envelope = Envelope {
            channel: self.channel.clone(),
            origin: self.node,
            payload,
        };
        match bus.publish(envelope) {
            Ok(()) => debug!(table = %table, id = %id, update = %update, "Published invalidation"),
            Err(e) => warn!(table = %table, id = %id, error = %e, "Failed to publish invalidation"),
        }
    }

    pub(crate) fn batch_save_size(&self) -> usize {
        self.batch_save_size.load(Ordering::Relaxed)
    }

    pub(crate) fn track_listener(&self, handle: JoinHandle<()>) {
        if self.is_closed() {
            handle.abort();
            return;
        }
        lock(&self.listeners).push(handle);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One registered table, both erased and typed.
struct Registered {
    table: Arc<dyn DynTable>,
    typed: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
}

#[derive(Default)]
struct RegistryState {
    /// Keyed by lowercased table name
    tables: HashMap<String, Registered>,
    by_type: HashMap<TypeId, String>,
    /// Pending table -> referenced tables not ready yet
    pending: HashMap<String, HashSet<String>>,
    graph: DependencyGraph,
}

struct OrmInner {
    ctx: Arc<Context>,
    state: Mutex<RegistryState>,
}

impl OrmInner {
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        lock(&self.state)
    }
}

/// Resolves message table names against the whole registry.
struct RegistryTables {
    inner: Weak<OrmInner>,
}

impl TableResolver for RegistryTables {
    fn resolve(&self, name: &str) -> Option<Arc<dyn DynTable>> {
        let inner = self.inner.upgrade()?;
        let state = inner.state();
        state
            .tables
            .get(&name.to_lowercase())
            .map(|registered| Arc::clone(&registered.table))
    }
}

/// Builder for an [`Orm`] with non-default settings
pub struct OrmBuilder {
    provider: Arc<dyn ConnectionProvider>,
    bus: Option<Arc<dyn InvalidationBus>>,
    settle_delay: Duration,
    batch_save_size: usize,
    channel: String,
    codecs: CodecRegistry,
}

impl OrmBuilder {
    /// Attach an invalidation bus; saves and deletes are published on it
    pub fn bus(mut self, bus: Arc<dyn InvalidationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn batch_save_size(mut self, rows: usize) -> Self {
        self.batch_save_size = rows.max(1);
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Start from a custom codec registry instead of the built-in one
    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn build(self) -> Orm {
        let compiler = self.provider.dialect().compiler();
        let ctx = Context {
            provider: self.provider,
            compiler,
            codecs: self.codecs,
            bus: self.bus,
            node: Uuid::now_v7(),
            channel: self.channel,
            settle_delay: self.settle_delay,
            batch_save_size: AtomicUsize::new(self.batch_save_size),
            listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };
        debug!(node = %ctx.node, dialect = %ctx.compiler.dialect(), "Registry created");
        Orm {
            inner: Arc::new(OrmInner {
                ctx: Arc::new(ctx),
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }
}

/// Registry of tables sharing one store, one codec registry and one bus.
///
/// Cloning is cheap; clones share the same tables.
#[derive(Clone)]
pub struct Orm {
    inner: Arc<OrmInner>,
}

impl Orm {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self::builder(provider).build()
    }

    pub fn builder(provider: Arc<dyn ConnectionProvider>) -> OrmBuilder {
        OrmBuilder {
            provider,
            bus: None,
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            batch_save_size: DEFAULT_BATCH_SAVE_SIZE,
            channel: DEFAULT_CHANNEL.to_string(),
            codecs: CodecRegistry::new(),
        }
    }

    /// Open the store a configuration names.
    ///
    /// Only the embedded backend ships a provider; a network backend needs
    /// an external [`ConnectionProvider`] passed to [`Orm::builder`].
    pub fn open(config: &OrmConfig) -> Result<Self> {
        let provider: Arc<dyn ConnectionProvider> = match &config.backend {
            Backend::Embedded { path } => Arc::new(SqliteProvider::open(path)?),
            Backend::Network { address, port, .. } => {
                return Err(Error::Configuration(format!(
                    "no built-in provider for network backend {}:{}",
                    address, port
                )));
            }
        };
        Ok(Self::builder(provider)
            .settle_delay(config.settle_delay())
            .batch_save_size(config.batch_save_size)
            .channel(config.channel.clone())
            .build())
    }

    fn ctx(&self) -> &Arc<Context> {
        &self.inner.ctx
    }

    /// Node id stamped on published invalidations
    pub fn node_id(&self) -> Uuid {
        self.ctx().node
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.ctx().codecs
    }

    pub fn set_batch_save_size(&self, rows: usize) {
        self.ctx().batch_save_size.store(rows.max(1), Ordering::Relaxed);
    }

    pub fn batch_save_size(&self) -> usize {
        self.ctx().batch_save_size()
    }

    // ========== Registration ==========

    /// Register an entity type with no lifecycle hooks
    pub async fn register<E: Entity>(&self) -> Result<Arc<Table<E>>> {
        self.register_with_hooks::<E, _>(NoHooks).await
    }

    /// Register an entity type.
    ///
    /// Returns once the table is ready, or immediately when it has to wait
    /// for referenced tables. Registering the same type twice returns the
    /// first table. Any tables waiting on this one are loaded before this
    /// returns, or marked failed along with it when its creation fails.
    /// Registering a failed type, or one referencing a failed table, is an
    /// error.
    pub async fn register_with_hooks<E, H>(&self, hooks: H) -> Result<Arc<Table<E>>>
    where
        E: Entity,
        H: TableHooks<E>,
    {
        if self.ctx().is_closed() {
            return Err(Error::Closed);
        }

        let descriptor = E::descriptor().validate()?;
        let key = descriptor.name().to_lowercase();
        let references = descriptor.references();

        let (table, pending) = {
            let mut state = self.inner.state();

            if let Some(existing) = state.tables.get(&key) {
                if existing.type_id != TypeId::of::<E>() {
                    return Err(Error::Configuration(format!(
                        "table '{}' is already registered by another entity type",
                        descriptor.name()
                    )));
                }
                if existing.table.readiness() == Readiness::Failed {
                    return Err(Error::Configuration(format!(
                        "table '{}' failed to initialize and cannot be used",
                        descriptor.name()
                    )));
                }
                warn!(table = %descriptor.name(), "Entity registered twice; keeping the first registration");
                return Arc::clone(&existing.typed)
                    .downcast::<Table<E>>()
                    .map_err(|_| Error::Configuration(format!("table '{}' has an unexpected type", key)));
            }

            if let Some(cycle) = state.graph.find_cycle(&key, &references) {
                return Err(Error::Configuration(format!(
                    "reference cycle: {}",
                    cycle.join(" -> ")
                )));
            }

            let table = Arc::new(Table::new(descriptor, Arc::clone(self.ctx()), Arc::new(hooks)));
            let erased: Arc<dyn DynTable> = table.clone();
            let missing = bind_ready(&state.tables, erased.as_ref())?;

            state.graph.add_table(&key, &references);
            state.by_type.insert(TypeId::of::<E>(), key.clone());
            state.tables.insert(
                key.clone(),
                Registered {
                    table: erased,
                    typed: table.clone(),
                    type_id: TypeId::of::<E>(),
                },
            );

            let pending = !missing.is_empty();
            if pending {
                let mut waiting: Vec<&String> = missing.iter().collect();
                waiting.sort();
                warn!(table = %table.name(), waiting_for = ?waiting, "Referenced tables not ready; table is pending");
                state.pending.insert(key.clone(), missing);
            }
            (table, pending)
        };

        if pending {
            return Ok(table);
        }

        if let Err(e) = table.create_and_load().await {
            self.fail_dependents(&key);
            return Err(e);
        }
        self.resolve_pending(key).await;
        Ok(table)
    }

    /// Load every pending table that was only waiting on `ready`,
    /// cascading through tables that become ready in turn.
    fn resolve_pending(&self, ready: String) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut failed = Vec::new();
            let unblocked: Vec<Arc<dyn DynTable>> = {
                let mut state = self.inner.state();
                let mut names = Vec::new();
                for (name, missing) in state.pending.iter_mut() {
                    if missing.remove(&ready) && missing.is_empty() {
                        names.push(name.clone());
                    }
                }
                names.sort();

                let mut unblocked = Vec::with_capacity(names.len());
                for name in names {
                    state.pending.remove(&name);
                    let Some(registered) = state.tables.get(&name) else {
                        continue;
                    };
                    let table = Arc::clone(&registered.table);
                    match bind_ready(&state.tables, table.as_ref()) {
                        Ok(missing) if missing.is_empty() => unblocked.push(table),
                        Ok(missing) => {
                            // A reference became unready again; keep waiting on it.
                            state.pending.insert(name, missing);
                        }
                        Err(e) => {
                            error!(table = %table.name(), error = %e, "Cannot bind foreign columns");
                            table.mark_failed();
                            failed.push(name);
                        }
                    }
                }
                unblocked
            };
            for name in &failed {
                self.fail_dependents(name);
            }

            for table in unblocked {
                info!(table = %table.name(), "References ready; loading pending table");
                let name = table.name().to_lowercase();
                match table.initialize().await {
                    Ok(()) => self.resolve_pending(name).await,
                    Err(e) => {
                        error!(table = %table.name(), error = %e, "Pending table failed to load");
                        self.fail_dependents(&name);
                    }
                }
            }
        })
    }

    /// Fail every pending table waiting on `failed`, and the tables waiting
    /// on those in turn.
    fn fail_dependents(&self, failed: &str) {
        let mut state = self.inner.state();
        let mut queue = vec![failed.to_string()];
        while let Some(name) = queue.pop() {
            let mut dependents: Vec<String> = state
                .pending
                .iter()
                .filter(|(_, missing)| missing.contains(&name))
                .map(|(dependent, _)| dependent.clone())
                .collect();
            dependents.sort();

            for dependent in dependents {
                state.pending.remove(&dependent);
                if let Some(registered) = state.tables.get(&dependent) {
                    let e = Error::ForeignKey(format!("referenced table '{}' failed to initialize", name));
                    error!(table = %registered.table.name(), error = %e, "Pending table cannot load");
                    registered.table.mark_failed();
                }
                queue.push(dependent);
            }
        }
    }

    // ========== Lookup ==========

    /// The table registered for `E`
    pub fn table<E: Entity>(&self) -> Option<Arc<Table<E>>> {
        let state = self.inner.state();
        let name = state.by_type.get(&TypeId::of::<E>())?;
        let registered = state.tables.get(name)?;
        Arc::clone(&registered.typed).downcast::<Table<E>>().ok()
    }

    /// Case-insensitive lookup of a registered table
    pub fn table_named(&self, name: &str) -> Option<Arc<dyn DynTable>> {
        let state = self.inner.state();
        state
            .tables
            .get(&name.to_lowercase())
            .map(|registered| Arc::clone(&registered.table))
    }

    /// Every registered table, referenced tables first
    pub fn tables(&self) -> Vec<Arc<dyn DynTable>> {
        let state = self.inner.state();
        state
            .graph
            .load_order()
            .iter()
            .filter_map(|name| state.tables.get(name))
            .map(|registered| Arc::clone(&registered.table))
            .collect()
    }

    /// Names of tables waiting on referenced tables, sorted
    pub fn pending_tables(&self) -> Vec<String> {
        let state = self.inner.state();
        let mut names: Vec<String> = state.pending.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.inner.state().pending.contains_key(&name.to_lowercase())
    }

    pub fn graph_stats(&self) -> GraphStats {
        self.inner.state().graph.stats()
    }

    // ========== Lifecycle ==========

    /// Apply invalidations from other registries to every table.
    ///
    /// Must be called inside a Tokio runtime. Returns false when no bus is
    /// attached.
    pub fn listen(&self) -> bool {
        let resolver = Arc::new(RegistryTables {
            inner: Arc::downgrade(&self.inner),
        });
        listener::spawn(self.ctx(), resolver)
    }

    /// Stop listeners, close the provider and drop every cached object.
    ///
    /// Idempotent. Registration fails with [`Error::Closed`] afterwards.
    pub async fn close(&self) {
        if self.ctx().closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let listeners = std::mem::take(&mut *lock(&self.ctx().listeners));
        for handle in listeners {
            handle.abort();
        }

        let tables: Vec<Arc<dyn DynTable>> = {
            let mut state = self.inner.state();
            state.pending.clear();
            state.by_type.clear();
            state.graph = DependencyGraph::new();
            state.tables.drain().map(|(_, registered)| registered.table).collect()
        };
        for table in &tables {
            table.clear();
        }

        self.ctx().provider.close().await;
        info!(tables = tables.len(), "Registry closed");
    }

    pub fn is_closed(&self) -> bool {
        self.ctx().is_closed()
    }
}

/// Bind every unbound foreign column of `table` whose referenced table is
/// registered and ready. Returns the referenced names that are not; a
/// referenced table that failed is an error.
fn bind_ready(tables: &HashMap<String, Registered>, table: &dyn DynTable) -> Result<HashSet<String>> {
    let mut missing = HashSet::new();
    for column in table.descriptor().foreign_columns() {
        if column.binding().is_some() {
            continue;
        }
        let Some(foreign) = column.foreign_table_name().map(str::to_lowercase) else {
            continue;
        };
        let target = tables.get(&foreign).map(|registered| &registered.table);
        match target.map(|target| (target, target.readiness())) {
            Some((target, Readiness::Ready)) => bind(table.name(), column, target)?,
            Some((target, Readiness::Failed)) => {
                return Err(Error::ForeignKey(format!(
                    "column '{}' of '{}' references '{}', which failed to initialize",
                    column.name(),
                    table.name(),
                    target.name()
                )));
            }
            _ => {
                missing.insert(foreign);
            }
        }
    }
    Ok(missing)
}

fn bind(table: &str, column: &ColumnDescriptor, target: &Arc<dyn DynTable>) -> Result<()> {
    let primary_key = target.descriptor().primary_key().cloned().ok_or_else(|| {
        Error::Configuration(format!(
            "column '{}' of '{}' references '{}', which has no primary key",
            column.name(),
            table,
            target.name()
        ))
    })?;
    column.bind(ForeignBinding::new(target, primary_key));
    debug!(table = %table, column = %column.name(), target = %target.name(), "Bound foreign column");
    Ok(())
}
