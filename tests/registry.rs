mod common;

use common::{CountingProvider, FailingCreate, RecordingProvider, count_rows};
use rowcache::demo::{self, Basket, Order, User};
use rowcache::entity::{self, read, write};
use rowcache::schema::{ColumnDescriptor, Constructor, FieldType, TableDescriptor};
use rowcache::value::encode_map;
use rowcache::{
    ConnectionProvider, Entity, Error, Field, FieldSet, Orm, Readiness, Record, Result, SqlValue, SqliteProvider,
    Statement, TableHooks,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn memory_orm() -> (Orm, Arc<SqliteProvider>) {
    let provider = Arc::new(SqliteProvider::open_in_memory().unwrap());
    let orm = Orm::new(provider.clone());
    demo::install_codecs(orm.codecs());
    (orm, provider)
}

async fn register_demo(orm: &Orm) {
    orm.register::<User>().await.unwrap();
    orm.register::<Order>().await.unwrap();
    orm.register::<Basket>().await.unwrap();
}

/// Store one user and one order for it; returns (user id, order id).
async fn seed(path: &Path) -> (i64, i64) {
    let orm = Orm::new(Arc::new(SqliteProvider::open(path).unwrap()));
    demo::install_codecs(orm.codecs());
    let users = orm.register::<User>().await.unwrap();
    let orders = orm.register::<Order>().await.unwrap();

    let ada = entity::record(User::new("Ada"));
    users.save(&ada).await.unwrap();
    let order = entity::record(Order::new(&ada, 42.0));
    orders.save(&order).await.unwrap();

    let ids = (read(&ada).id.unwrap(), read(&order).id.unwrap());
    orm.close().await;
    ids
}

#[tokio::test]
async fn test_save_then_lookup_hits_cache() {
    let (orm, _) = memory_orm();
    let users = orm.register::<User>().await.unwrap();

    let ada = entity::record(User {
        email: None,
        tags: vec!["x".to_string(), "y,z".to_string()],
        ..User::new("Ada")
    });
    let outcome = users.save(&ada).await.unwrap();
    let id = read(&ada).id.unwrap();
    assert_eq!(outcome.generated_key, Some(id));

    let cached = users.get_data_by_id(id).unwrap();
    assert!(Arc::ptr_eq(&cached, &ada));

    let fresh = users.get_data_from_db(id, false, false).await.unwrap();
    assert!(!Arc::ptr_eq(&fresh, &ada));
    assert_eq!(*read(&fresh), *read(&ada));

    // A text rendering of the key finds the same object.
    assert!(users.contains(id.to_string()));
    assert!(users.get_data_from_db(id + 100, true, true).await.is_none());
}

#[tokio::test]
async fn test_save_fields_updates_named_columns() {
    let (orm, _) = memory_orm();
    let users = orm.register::<User>().await.unwrap();

    let ada = entity::record(User::new("Ada"));
    users.save(&ada).await.unwrap();
    let id = read(&ada).id.unwrap();

    {
        let mut user = entity::write(&ada);
        user.name = "Ada Lovelace".to_string();
        user.email = Some("ada@example.com".to_string());
    }
    users.save_fields(&ada, &["name"]).await.unwrap();

    let fresh = users.get_data_from_db(id, false, false).await.unwrap();
    assert_eq!(read(&fresh).name, "Ada Lovelace");
    assert_eq!(read(&fresh).email, None);
}

#[tokio::test]
async fn test_registering_twice_keeps_one_table() {
    let (orm, _) = memory_orm();
    let first = orm.register::<User>().await.unwrap();
    let second = orm.register::<User>().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(orm.tables().len(), 1);
    assert!(orm.table_named("USERS").is_some());
}

struct Impostor;

impl Entity for Impostor {
    fn descriptor() -> TableDescriptor {
        let columns = vec![ColumnDescriptor::new("id", FieldType::BigInt).primary_key()];
        let constructor = Constructor::from_columns(&columns);
        TableDescriptor::new("Users")
            .column(columns[0].clone())
            .constructor(constructor)
    }

    fn construct(_args: FieldSet) -> Result<Self> {
        Ok(Impostor)
    }

    fn field(&self, _key: &str) -> Option<Field> {
        None
    }
}

#[tokio::test]
async fn test_table_name_clash_is_refused() {
    let (orm, _) = memory_orm();
    orm.register::<User>().await.unwrap();
    let err = orm.register::<Impostor>().await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

struct LoadLog {
    table: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl<E: Entity> TableHooks<E> for LoadLog {
    fn on_data_loaded(&self, _count: usize) {
        self.log.lock().unwrap().push(self.table);
    }
}

#[tokio::test]
async fn test_dependent_table_loads_after_its_reference() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shop.db");
    let (user_id, order_id) = seed(&path).await;

    let orm = Orm::new(Arc::new(SqliteProvider::open(&path).unwrap()));
    demo::install_codecs(orm.codecs());
    let log = Arc::new(Mutex::new(Vec::new()));

    let orders = orm
        .register_with_hooks::<Order, _>(LoadLog {
            table: "orders",
            log: log.clone(),
        })
        .await
        .unwrap();
    assert!(orm.is_pending("orders"));
    assert_eq!(orders.readiness(), Readiness::Pending);
    assert!(orders.is_empty());

    let users = orm
        .register_with_hooks::<User, _>(LoadLog {
            table: "users",
            log: log.clone(),
        })
        .await
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["users", "orders"]);
    assert!(orm.pending_tables().is_empty());
    assert_eq!(orders.readiness(), Readiness::Ready);

    let order = orders.get_data_by_id(order_id).unwrap();
    let user = users.get_data_by_id(user_id).unwrap();
    assert!(Arc::ptr_eq(read(&order).user.as_ref().unwrap(), &user));
    assert_eq!(read(&order).amount, 42.0);
}

#[tokio::test]
async fn test_loaded_reference_needs_no_extra_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shop.db");
    let (user_id, order_id) = seed(&path).await;

    let provider = CountingProvider::open(&path);
    let orm = Orm::new(provider.clone());
    demo::install_codecs(orm.codecs());
    let users = orm.register::<User>().await.unwrap();
    let orders = orm.register::<Order>().await.unwrap();

    let order = orders.get_data_from_db(order_id, true, true).await.unwrap();
    let user = users.get_data_by_id(user_id).unwrap();
    assert!(Arc::ptr_eq(read(&order).user.as_ref().unwrap(), &user));
    assert_eq!(provider.lookups(), 0);
    assert_eq!(provider.queries(), 2);
}

#[tokio::test]
async fn test_cascade_delete_removes_children() {
    let (orm, provider) = memory_orm();
    register_demo(&orm).await;
    let users = orm.table::<User>().unwrap();
    let orders = orm.table::<Order>().unwrap();
    let baskets = orm.table::<Basket>().unwrap();

    let ada = entity::record(User::new("Ada"));
    users.save(&ada).await.unwrap();

    let mut basket = Basket::new("weekly");
    for amount in [1.0, 2.5, 3.75] {
        let order = entity::record(Order::new(&ada, amount));
        orders.save(&order).await.unwrap();
        basket.orders.push(order);
    }
    let basket = entity::record(basket);
    baskets.save(&basket).await.unwrap();
    assert_eq!(count_rows(provider.as_ref(), "orders").await, 3);

    let report = baskets.delete(&basket).await;
    assert!(report.is_complete(), "{:?}", report.failed);
    assert_eq!(report.deleted_from("orders"), 3);
    assert!(report.was_deleted("baskets", "weekly"));

    assert!(baskets.get_data_by_id("weekly").is_none());
    assert!(orders.is_empty());
    assert_eq!(count_rows(provider.as_ref(), "orders").await, 0);
    assert_eq!(count_rows(provider.as_ref(), "baskets").await, 0);
    assert_eq!(count_rows(provider.as_ref(), "users").await, 1);
}

#[tokio::test]
async fn test_basket_round_trips_references_and_notes() {
    let (orm, _) = memory_orm();
    register_demo(&orm).await;
    let users = orm.table::<User>().unwrap();
    let orders = orm.table::<Order>().unwrap();
    let baskets = orm.table::<Basket>().unwrap();

    let ada = entity::record(User::new("Ada"));
    users.save(&ada).await.unwrap();
    let first = entity::record(Order::new(&ada, 10.0));
    let second = entity::record(Order::new(&ada, 20.0));
    orders.save(&first).await.unwrap();
    orders.save(&second).await.unwrap();

    let mut basket = Basket::new("gifts");
    basket.owner = Some(ada.clone());
    basket.orders = vec![second.clone(), first.clone()];
    basket.notes.insert("wrap".to_string(), "red, gold".to_string());
    baskets.save(&entity::record(basket)).await.unwrap();

    let fresh = baskets.get_data_from_db("gifts", false, false).await.unwrap();
    let fresh = read(&fresh);
    assert!(Arc::ptr_eq(fresh.owner.as_ref().unwrap(), &ada));
    assert_eq!(fresh.orders.len(), 2);
    assert!(Arc::ptr_eq(&fresh.orders[0], &second));
    assert!(Arc::ptr_eq(&fresh.orders[1], &first));
    assert_eq!(fresh.notes.get("wrap").map(String::as_str), Some("red, gold"));
}

#[tokio::test]
async fn test_save_all_writes_every_cached_object() {
    let (orm, provider) = memory_orm();
    register_demo(&orm).await;
    let baskets = orm.table::<Basket>().unwrap();

    assert!(baskets.add(entity::record(Basket::new("a")), false).await);
    assert!(baskets.add(entity::record(Basket::new("b")), false).await);
    assert!(!baskets.add(entity::record(Basket::new("a")), false).await);

    orm.set_batch_save_size(1);
    assert_eq!(baskets.save_all().await, Some(2));
    assert_eq!(count_rows(provider.as_ref(), "baskets").await, 2);
}

struct Left {
    id: i64,
    right: Option<Record<Right>>,
}

struct Right {
    id: i64,
    left: Option<Record<Left>>,
}

struct Node {
    id: i64,
    parent: Option<Record<Node>>,
}

fn linked(name: &str, link: &'static str, target: &str) -> TableDescriptor {
    let columns = vec![
        ColumnDescriptor::new("id", FieldType::BigInt).primary_key(),
        ColumnDescriptor::new(link, FieldType::Record)
            .foreign_table(target)
            .allow_null(),
    ];
    let constructor = Constructor::from_columns(&columns);
    columns
        .into_iter()
        .fold(TableDescriptor::new(name), TableDescriptor::column)
        .constructor(constructor)
}

impl Entity for Left {
    fn descriptor() -> TableDescriptor {
        linked("lefts", "right", "rights")
    }

    fn construct(mut args: FieldSet) -> Result<Self> {
        Ok(Self {
            id: args.take("id")?,
            right: args.take_one("right")?,
        })
    }

    fn field(&self, key: &str) -> Option<Field> {
        match key {
            "id" => Some(Field::value(self.id)),
            "right" => Some(Field::one(self.right.as_ref())),
            _ => None,
        }
    }
}

impl Entity for Right {
    fn descriptor() -> TableDescriptor {
        linked("rights", "left", "lefts")
    }

    fn construct(mut args: FieldSet) -> Result<Self> {
        Ok(Self {
            id: args.take("id")?,
            left: args.take_one("left")?,
        })
    }

    fn field(&self, key: &str) -> Option<Field> {
        match key {
            "id" => Some(Field::value(self.id)),
            "left" => Some(Field::one(self.left.as_ref())),
            _ => None,
        }
    }
}

impl Entity for Node {
    fn descriptor() -> TableDescriptor {
        linked("nodes", "parent", "nodes")
    }

    fn construct(mut args: FieldSet) -> Result<Self> {
        Ok(Self {
            id: args.take("id")?,
            parent: args.take_one("parent")?,
        })
    }

    fn field(&self, key: &str) -> Option<Field> {
        match key {
            "id" => Some(Field::value(self.id)),
            "parent" => Some(Field::one(self.parent.as_ref())),
            _ => None,
        }
    }
}

#[tokio::test]
async fn test_reference_cycles_fail_fast() {
    let (orm, _) = memory_orm();

    orm.register::<Left>().await.unwrap();
    assert!(orm.is_pending("lefts"));

    let err = orm.register::<Right>().await.unwrap_err();
    match err {
        Error::Configuration(message) => assert!(message.contains("rights -> lefts -> rights"), "{}", message),
        other => panic!("expected a configuration error, got {:?}", other),
    }
    assert!(orm.table_named("rights").is_none());

    let err = orm.register::<Node>().await.unwrap_err();
    assert!(matches!(err, Error::Configuration(ref m) if m.contains("nodes -> nodes")));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (orm, provider) = memory_orm();
    let users = orm.register::<User>().await.unwrap();
    users.save(&entity::record(User::new("Ada"))).await.unwrap();

    orm.close().await;
    orm.close().await;
    assert!(orm.is_closed());
    assert!(users.is_empty());
    assert!(matches!(orm.register::<Order>().await, Err(Error::Closed)));
    assert!(provider.query(Statement::new("SELECT 1;")).await.is_err());
}

#[tokio::test]
async fn test_network_dialect_statements() {
    let provider = RecordingProvider::new();
    let orm = Orm::new(provider.clone());
    let users = orm.register::<User>().await.unwrap();

    let statements = provider.statements();
    assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS users ("));
    assert!(statements[0].contains("id LONG NOT NULL AUTO_INCREMENT"));
    assert_eq!(statements[1], "SELECT * FROM users;");

    let ada = entity::record(User {
        id: Some(5),
        ..User::new("Ada")
    });
    let outcome = users.save(&ada).await.unwrap();
    assert_eq!(outcome.generated_key, None);
    let insert = provider.statements().pop().unwrap();
    assert!(insert.starts_with("INSERT INTO users (id, name, email, tags) VALUES ("));
    assert!(insert.contains("ON DUPLICATE KEY UPDATE name=VALUES(name)"));
    assert!(Arc::ptr_eq(&users.get_data_by_id(5).unwrap(), &ada));

    assert!(users.get_data_from_db(6, true, true).await.is_none());
    assert_eq!(provider.statements().pop().unwrap(), "SELECT * FROM users WHERE id = '6';");
}

#[tokio::test]
async fn test_bypassing_the_cache_returns_the_stored_row() {
    let (orm, provider) = memory_orm();
    let users = orm.register::<User>().await.unwrap();

    let ada = entity::record(User::new("Ada"));
    users.save(&ada).await.unwrap();
    let id = read(&ada).id.unwrap();
    provider
        .execute(Statement::new(format!("UPDATE users SET name = 'Grace' WHERE id = {};", id)))
        .await
        .unwrap();

    let fresh = users.get_data_from_db(id, false, true).await.unwrap();
    assert_eq!(read(&fresh).name, "Grace");
    assert!(!Arc::ptr_eq(&fresh, &ada));
    // The cached instance keeps its key until evicted.
    assert!(Arc::ptr_eq(&users.get_data_by_id(id).unwrap(), &ada));

    users.evict(id);
    let reloaded = users.get_data_from_db(id, false, true).await.unwrap();
    assert!(Arc::ptr_eq(&users.get_data_by_id(id).unwrap(), &reloaded));
}

#[tokio::test]
async fn test_failed_table_fails_tables_waiting_on_it() {
    let provider = FailingCreate::new("users");
    let orm = Orm::new(provider);
    demo::install_codecs(orm.codecs());

    let baskets = orm.register::<Basket>().await.unwrap();
    let orders = orm.register::<Order>().await.unwrap();
    assert_eq!(orm.pending_tables(), vec!["baskets", "orders"]);

    let err = orm.register::<User>().await.unwrap_err();
    assert!(matches!(err, Error::Query(_)));

    assert!(orm.pending_tables().is_empty());
    assert_eq!(orders.wait_ready().await, Readiness::Failed);
    assert_eq!(baskets.wait_ready().await, Readiness::Failed);

    assert!(matches!(orm.register::<User>().await, Err(Error::Configuration(_))));
    assert!(matches!(orm.register::<Order>().await, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn test_reference_to_failed_table_is_refused() {
    let provider = FailingCreate::new("users");
    let orm = Orm::new(provider);
    demo::install_codecs(orm.codecs());

    assert!(orm.register::<User>().await.is_err());
    let err = orm.register::<Order>().await.unwrap_err();
    assert!(matches!(err, Error::ForeignKey(ref m) if m.contains("users")), "{:?}", err);
    assert!(orm.table_named("orders").is_none());
    assert!(orm.pending_tables().is_empty());
}

/// Named slots holding users; emptying a shelf deletes its users.
struct Shelf {
    name: String,
    slots: BTreeMap<String, Record<User>>,
}

impl Entity for Shelf {
    fn descriptor() -> TableDescriptor {
        let columns = vec![
            ColumnDescriptor::new("name", FieldType::Text)
                .storage_type("VARCHAR(32)")
                .primary_key(),
            ColumnDescriptor::new("slots", FieldType::map(FieldType::Record))
                .foreign_table("users")
                .cascade_delete(),
        ];
        let constructor = Constructor::from_columns(&columns);
        columns
            .into_iter()
            .fold(TableDescriptor::new("shelves"), TableDescriptor::column)
            .constructor(constructor)
    }

    fn construct(mut args: FieldSet) -> Result<Self> {
        Ok(Self {
            name: args.take("name")?,
            slots: args.take_map("slots")?,
        })
    }

    fn field(&self, key: &str) -> Option<Field> {
        match key {
            "name" => Some(Field::value(&self.name)),
            "slots" => Some(Field::map(&self.slots)),
            _ => None,
        }
    }
}

#[tokio::test]
async fn test_foreign_map_round_trips_and_cascades() {
    let (orm, provider) = memory_orm();
    let users = orm.register::<User>().await.unwrap();
    let shelves = orm.register::<Shelf>().await.unwrap();

    let ada = entity::record(User::new("Ada"));
    let grace = entity::record(User::new("Grace"));
    users.save(&ada).await.unwrap();
    users.save(&grace).await.unwrap();
    let (ada_id, grace_id) = (read(&ada).id.unwrap(), read(&grace).id.unwrap());

    let shelf = entity::record(Shelf {
        name: "hall".to_string(),
        slots: BTreeMap::from([("top".to_string(), ada.clone()), ("bottom".to_string(), grace.clone())]),
    });
    shelves.save(&shelf).await.unwrap();

    let rows = provider
        .query(Statement::new("SELECT slots FROM shelves;"))
        .await
        .unwrap();
    let expected = encode_map(&BTreeMap::from([
        ("bottom".to_string(), grace_id.to_string()),
        ("top".to_string(), ada_id.to_string()),
    ]));
    assert_eq!(rows[0].get("slots"), Some(&SqlValue::Text(expected)));

    let fresh = shelves.get_data_from_db("hall", false, false).await.unwrap();
    {
        let fresh = read(&fresh);
        assert_eq!(fresh.slots.len(), 2);
        assert!(Arc::ptr_eq(&fresh.slots["top"], &ada));
        assert!(Arc::ptr_eq(&fresh.slots["bottom"], &grace));
    }

    let report = shelves.delete(&shelf).await;
    assert!(report.is_complete(), "{:?}", report.failed);
    assert_eq!(report.deleted_from("users"), 2);
    assert!(users.is_empty());
    assert_eq!(count_rows(provider.as_ref(), "users").await, 0);
}

struct Note {
    id: i64,
    body: String,
}

impl Entity for Note {
    fn descriptor() -> TableDescriptor {
        let columns = vec![
            ColumnDescriptor::new("id", FieldType::BigInt).primary_key(),
            ColumnDescriptor::new("body", FieldType::Text),
        ];
        let constructor = Constructor::from_columns(&columns);
        columns
            .into_iter()
            .fold(TableDescriptor::new("notes"), TableDescriptor::column)
            .constructor(constructor)
            .lazy()
    }

    fn construct(mut args: FieldSet) -> Result<Self> {
        Ok(Self {
            id: args.take("id")?,
            body: args.take("body")?,
        })
    }

    fn field(&self, key: &str) -> Option<Field> {
        match key {
            "id" => Some(Field::value(self.id)),
            "body" => Some(Field::value(&self.body)),
            _ => None,
        }
    }
}

#[tokio::test]
async fn test_lazy_table_pulls_rows_on_demand() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes.db");
    {
        let orm = Orm::new(Arc::new(SqliteProvider::open(&path).unwrap()));
        let notes = orm.register::<Note>().await.unwrap();
        for (id, body) in [(1, "first"), (2, "second")] {
            let note = entity::record(Note {
                id,
                body: body.to_string(),
            });
            notes.save(&note).await.unwrap();
        }
        orm.close().await;
    }

    let provider = CountingProvider::open(&path);
    let orm = Orm::new(provider.clone());
    let notes = orm.register::<Note>().await.unwrap();
    assert_eq!(notes.readiness(), Readiness::Ready);
    assert!(notes.is_empty());
    assert_eq!(provider.queries(), 0);

    assert!(notes.get_data_by_id(2).is_none());
    let second = notes.get_data_from_db(2, true, true).await.unwrap();
    assert_eq!(read(&second).body, "second");
    let again = notes.get_data_from_db(2, true, true).await.unwrap();
    assert!(Arc::ptr_eq(&second, &again));
    assert_eq!(provider.lookups(), 1);
    assert_eq!(notes.len(), 1);
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

/// A place with its coordinates embedded as `home_x` / `home_y`.
struct Place {
    id: i64,
    home: Point,
}

impl Entity for Place {
    fn descriptor() -> TableDescriptor {
        let columns = vec![
            ColumnDescriptor::new("id", FieldType::BigInt).primary_key(),
            ColumnDescriptor::new("x", FieldType::Double).sub_object("home"),
            ColumnDescriptor::new("y", FieldType::Double).sub_object("home"),
        ];
        let constructor = Constructor::from_columns(&columns);
        columns
            .into_iter()
            .fold(TableDescriptor::new("places"), TableDescriptor::column)
            .constructor(constructor)
    }

    fn construct(mut args: FieldSet) -> Result<Self> {
        Ok(Self {
            id: args.take("id")?,
            home: Point {
                x: args.take("home.x")?,
                y: args.take("home.y")?,
            },
        })
    }

    fn field(&self, key: &str) -> Option<Field> {
        match key {
            "id" => Some(Field::value(self.id)),
            "home.x" => Some(Field::value(self.home.x)),
            "home.y" => Some(Field::value(self.home.y)),
            _ => None,
        }
    }
}

#[tokio::test]
async fn test_sub_object_fields_round_trip() {
    let (orm, provider) = memory_orm();
    let places = orm.register::<Place>().await.unwrap();

    let place = entity::record(Place {
        id: 9,
        home: Point { x: 1.5, y: -2.25 },
    });
    places.save(&place).await.unwrap();

    let rows = provider
        .query(Statement::new("SELECT home_x, home_y FROM places;"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].get("home_x").is_some());

    let fresh = places.get_data_from_db(9, false, false).await.unwrap();
    assert_eq!(read(&fresh).id, 9);
    assert_eq!(read(&fresh).home, Point { x: 1.5, y: -2.25 });
}

#[derive(Default)]
struct Events {
    log: Arc<Mutex<Vec<String>>>,
}

impl TableHooks<User> for Events {
    fn on_data_added(&self, record: &Record<User>) {
        self.log.lock().unwrap().push(format!("added {}", read(record).name));
    }

    fn on_data_deleted(&self, record: &Record<User>) {
        self.log.lock().unwrap().push(format!("deleted {}", read(record).name));
    }
}

#[tokio::test]
async fn test_added_and_deleted_hooks() {
    let (orm, _) = memory_orm();
    let events = Events::default();
    let log = events.log.clone();
    let users = orm.register_with_hooks::<User, _>(events).await.unwrap();

    let ada = entity::record(User::new("Ada"));
    users.save(&ada).await.unwrap();
    write(&ada).name = "Ada L".to_string();
    users.save(&ada).await.unwrap();
    let id = read(&ada).id.unwrap();

    // An occupied key is not re-added by a lookup that bypasses the cache.
    users.get_data_from_db(id, false, true).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["added Ada"]);

    let report = users.delete(&ada).await;
    assert!(report.is_complete());
    assert_eq!(*log.lock().unwrap(), vec!["added Ada", "deleted Ada L"]);
}

#[tokio::test]
async fn test_cascade_failure_is_reported_without_stopping_the_delete() {
    let (orm, provider) = memory_orm();
    register_demo(&orm).await;
    let users = orm.table::<User>().unwrap();
    let orders = orm.table::<Order>().unwrap();
    let baskets = orm.table::<Basket>().unwrap();

    let ada = entity::record(User::new("Ada"));
    users.save(&ada).await.unwrap();
    let mut basket = Basket::new("weekly");
    for amount in [1.0, 2.0] {
        let order = entity::record(Order::new(&ada, amount));
        orders.save(&order).await.unwrap();
        basket.orders.push(order);
    }
    let lost = basket.orders[1].clone();
    let basket = entity::record(basket);
    baskets.save(&basket).await.unwrap();

    // The second order loses its key, so its row cannot be addressed.
    write(&lost).id = None;

    let report = baskets.delete(&basket).await;
    assert!(!report.is_complete());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].table, "orders");
    assert_eq!(report.failed[0].id, None);
    assert_eq!(report.deleted_from("orders"), 1);
    assert!(report.was_deleted("baskets", "weekly"));

    assert_eq!(count_rows(provider.as_ref(), "baskets").await, 0);
    assert_eq!(count_rows(provider.as_ref(), "orders").await, 1);
}
