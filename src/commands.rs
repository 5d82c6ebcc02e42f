use anyhow::Context;
use rowcache::config::{self, Backend, OrmConfig};
use rowcache::demo::{self, Basket, Order, User};
use rowcache::entity::{self, read};
use rowcache::ui::{
    Icons, column_table, header, info, muted, phase, row_deleted, row_failed, row_saved, section,
    stats_table, status, success, summary_row, timing, warn,
};
use rowcache::{Dialect, DynTable, Orm, SqliteProvider};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Configured database path, overridden by `database`
fn resolve_database(config_path: Option<&Path>, database: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(database) = database {
        return Ok(database);
    }
    match config::load_config(config_path)? {
        Some(OrmConfig {
            backend: Backend::Embedded { path },
            ..
        }) => Ok(path),
        Some(OrmConfig {
            backend: Backend::Network { address, port, .. },
            ..
        }) => anyhow::bail!(
            "configured backend is network ({}:{}); pass --database to use a local file",
            address,
            port
        ),
        None => Ok(config::default_database_path_in(Path::new("."))),
    }
}

/// Open a store and register the demo schema, dependents first.
async fn open_demo(database: &Path) -> anyhow::Result<Orm> {
    config::ensure_db_dir(database)?;
    let orm = Orm::open(&OrmConfig::embedded(database))?;
    demo::install_codecs(orm.codecs());

    orm.register::<Basket>().await?;
    orm.register::<Order>().await?;
    orm.register::<User>().await?;

    let pending = orm.pending_tables();
    if !pending.is_empty() {
        warn(&format!("Tables still pending: {}", pending.join(", ")));
    }
    Ok(orm)
}

fn summary(tables: &[Arc<dyn DynTable>]) -> String {
    let rows: Vec<(String, String)> = tables
        .iter()
        .map(|table| {
            (
                table.name().to_string(),
                format!("{} cached ({})", table.cached_len(), table.readiness()),
            )
        })
        .collect();
    let borrowed: Vec<(&str, &str)> = rows.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    stats_table(&borrowed)
}

pub fn run_init(config_path: Option<&Path>, database: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(config::default_config_path);
    let database = database.unwrap_or_else(|| config::default_database_path_in(Path::new(".")));

    config::write_config(&path, &OrmConfig::embedded(&database), force)?;
    success(&format!("Wrote {}", path.display()));
    status(Icons::DATABASE, "Database", &database.display().to_string());
    Ok(())
}

pub async fn run_schema(dialect: Dialect) -> anyhow::Result<()> {
    // Foreign column types come from the referenced keys, so bind the
    // schema against a scratch store first.
    let orm = Orm::new(Arc::new(SqliteProvider::open_in_memory()?));
    demo::install_codecs(orm.codecs());
    orm.register::<User>().await?;
    orm.register::<Order>().await?;
    orm.register::<Basket>().await?;

    let compiler = dialect.compiler();
    header(&format!("Demo schema ({} dialect)", dialect));
    for table in orm.tables() {
        section(table.name());
        println!("{}", compiler.create_table(table.descriptor()).sql);
        println!("{}", column_table(table.descriptor()));
    }

    let stats = orm.graph_stats();
    summary_row("Tables", &stats.tables.to_string());
    summary_row("References", &stats.references.to_string());
    orm.close().await;
    Ok(())
}

pub async fn run_demo(config_path: Option<&Path>, database: Option<PathBuf>) -> anyhow::Result<()> {
    let database = resolve_database(config_path, database)?;
    let started = Instant::now();
    header("rowcache demo");
    status(Icons::DATABASE, "Database", &database.display().to_string());

    let orm = open_demo(&database).await?;
    let users = orm.table::<User>().context("users table is not registered")?;
    let orders = orm.table::<Order>().context("orders table is not registered")?;
    let baskets = orm.table::<Basket>().context("baskets table is not registered")?;

    phase("Saving");
    let ada = entity::record(User {
        email: Some("ada@example.com".to_string()),
        tags: vec!["admin".to_string(), "early, adopter".to_string()],
        ..User::new("Ada")
    });
    users.save(&ada).await.context("saving the user failed")?;
    let ada_id = read(&ada).id.context("the store generated no user id")?;
    row_saved(users.name(), &ada_id.to_string());

    let mut placed = Vec::new();
    for amount in [12.5, 99.99] {
        let order = entity::record(Order::new(&ada, amount));
        orders.save(&order).await.context("saving an order failed")?;
        let id = read(&order).id.context("the store generated no order id")?;
        row_saved(orders.name(), &id.to_string());
        placed.push((id, order));
    }

    let mut basket = Basket::new(format!("basket-{}", ada_id));
    basket.owner = Some(ada.clone());
    basket.orders = placed.iter().map(|(_, order)| order.clone()).collect();
    basket.notes.insert("gift".to_string(), "yes".to_string());
    let basket = entity::record(basket);
    baskets.save(&basket).await.context("saving the basket failed")?;
    row_saved(baskets.name(), &read(&basket).label);

    phase("Resolving");
    if let Some((order_id, _)) = placed.first() {
        let fresh = orders
            .get_data_from_db(*order_id, false, false)
            .await
            .context("the saved order could not be read back")?;
        let same_user = read(&fresh)
            .user
            .as_ref()
            .is_some_and(|user| Arc::ptr_eq(user, &ada));
        info(
            &format!("orders#{} user", order_id),
            if same_user { "cached instance" } else { "different instance" },
        );
        info(
            &format!("orders#{} amount", order_id),
            &format!("{:.2}", read(&fresh).amount),
        );
    }

    phase("Cascade delete");
    let report = baskets.delete(&basket).await;
    for row in &report.deleted {
        row_deleted(&row.table, &row.id);
    }
    for failed in &report.failed {
        row_failed(&failed.table, failed.id.as_deref().unwrap_or("?"), &failed.reason);
    }
    if report.is_complete() {
        success(&format!("Delete finished: {}", report));
    } else {
        warn(&format!("Delete incomplete: {}", report));
    }

    section("Summary");
    println!("{}", summary(&orm.tables()));
    timing(&format!("{:.2?}", started.elapsed()));
    orm.close().await;
    Ok(())
}

pub async fn run_stats(config_path: Option<&Path>, database: Option<PathBuf>) -> anyhow::Result<()> {
    let database = resolve_database(config_path, database)?;
    if !database.exists() {
        anyhow::bail!("no database at {} (run `rowcache demo` first)", database.display());
    }

    header("rowcache stats");
    status(Icons::DATABASE, "Database", &database.display().to_string());
    let orm = open_demo(&database).await?;

    section("Tables");
    println!("{}", summary(&orm.tables()));
    let stats = orm.graph_stats();
    summary_row("Graph", &muted(&stats.to_string()));
    orm.close().await;
    Ok(())
}
