//! Demo schema used by the CLI and the integration tests
//!
//! `users` <- `orders` <- `baskets`: an order points at its user, a basket
//! holds a list of orders (deleted with the basket) and an optional owner.

use crate::codec::{CodecRegistry, FieldCodec};
use crate::entity::{Entity, Field, FieldSet, Record};
use crate::schema::{ColumnDescriptor, Constructor, FieldType, TableDescriptor};
use crate::value::{SqlValue, Value};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const ORDER_STATUSES: &[&str] = &["OPEN", "PAID", "SHIPPED"];

/// Field type of money amounts stored as whole cents
pub const CENTS: FieldType = FieldType::Custom("cents");

fn table(name: &str, columns: Vec<ColumnDescriptor>) -> TableDescriptor {
    let constructor = Constructor::from_columns(&columns);
    columns
        .into_iter()
        .fold(TableDescriptor::new(name), TableDescriptor::column)
        .constructor(constructor)
}

fn assign_id(id: &mut Option<i64>, key: &str, value: Value) -> Result<()> {
    match (key, value) {
        ("id", Value::Int(generated)) => {
            *id = Some(generated);
            Ok(())
        }
        (key, value) => Err(Error::Mapping(format!("cannot assign {:?} to '{}'", value, key))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Option<i64>,
    pub name: String,
    pub email: Option<String>,
    pub tags: Vec<String>,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            email: None,
            tags: Vec::new(),
        }
    }
}

impl Entity for User {
    fn descriptor() -> TableDescriptor {
        table(
            "users",
            vec![
                ColumnDescriptor::new("id", FieldType::BigInt).primary_key().auto_increment(),
                ColumnDescriptor::new("name", FieldType::Text).storage_type("VARCHAR(64)"),
                ColumnDescriptor::new("email", FieldType::Text).allow_null(),
                ColumnDescriptor::new("tags", FieldType::list(FieldType::Text)).allow_null(),
            ],
        )
    }

    fn construct(mut args: FieldSet) -> Result<Self> {
        Ok(Self {
            id: args.take("id")?,
            name: args.take("name")?,
            email: args.take("email")?,
            tags: args.take::<Option<Vec<String>>>("tags")?.unwrap_or_default(),
        })
    }

    fn field(&self, key: &str) -> Option<Field> {
        match key {
            "id" => Some(Field::value(self.id)),
            "name" => Some(Field::value(&self.name)),
            "email" => Some(Field::value(self.email.clone())),
            "tags" => Some(Field::value(self.tags.clone())),
            _ => None,
        }
    }

    fn assign(&mut self, key: &str, value: Value) -> Result<()> {
        assign_id(&mut self.id, key, value)
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: Option<i64>,
    pub user: Option<Record<User>>,
    /// Dollars in memory, cents in the store
    pub amount: f64,
    pub status: String,
}

impl Order {
    pub fn new(user: &Record<User>, amount: f64) -> Self {
        Self {
            id: None,
            user: Some(user.clone()),
            amount,
            status: ORDER_STATUSES[0].to_string(),
        }
    }
}

impl Entity for Order {
    fn descriptor() -> TableDescriptor {
        table(
            "orders",
            vec![
                ColumnDescriptor::new("id", FieldType::BigInt).primary_key().auto_increment(),
                ColumnDescriptor::new("user", FieldType::Record)
                    .column_name("user_id")
                    .foreign_table("users")
                    .allow_null(),
                ColumnDescriptor::new("amount", FieldType::Double)
                    .codec(CENTS)
                    .storage_type("BIGINT"),
                ColumnDescriptor::new("status", FieldType::Enum(ORDER_STATUSES)).storage_type("VARCHAR(16)"),
            ],
        )
    }

    fn construct(mut args: FieldSet) -> Result<Self> {
        Ok(Self {
            id: args.take("id")?,
            user: args.take_one("user")?,
            amount: args.take("amount")?,
            status: args.take("status")?,
        })
    }

    fn field(&self, key: &str) -> Option<Field> {
        match key {
            "id" => Some(Field::value(self.id)),
            "user" => Some(Field::one(self.user.as_ref())),
            "amount" => Some(Field::value(self.amount)),
            "status" => Some(Field::value(&self.status)),
            _ => None,
        }
    }

    fn assign(&mut self, key: &str, value: Value) -> Result<()> {
        assign_id(&mut self.id, key, value)
    }
}

#[derive(Debug, Clone)]
pub struct Basket {
    pub label: String,
    pub owner: Option<Record<User>>,
    pub orders: Vec<Record<Order>>,
    pub notes: BTreeMap<String, String>,
}

impl Basket {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            owner: None,
            orders: Vec::new(),
            notes: BTreeMap::new(),
        }
    }
}

impl Entity for Basket {
    fn descriptor() -> TableDescriptor {
        table(
            "baskets",
            vec![
                ColumnDescriptor::new("label", FieldType::Text)
                    .storage_type("VARCHAR(64)")
                    .primary_key(),
                ColumnDescriptor::new("owner", FieldType::Record)
                    .column_name("owner_id")
                    .foreign_table("users")
                    .allow_null(),
                ColumnDescriptor::new("orders", FieldType::list(FieldType::Record))
                    .foreign_table("orders")
                    .cascade_delete(),
                ColumnDescriptor::new("notes", FieldType::map(FieldType::Text)).allow_null(),
            ],
        )
    }

    fn construct(mut args: FieldSet) -> Result<Self> {
        Ok(Self {
            label: args.take("label")?,
            owner: args.take_one("owner")?,
            orders: args.take_list("orders")?,
            notes: args.take::<Option<BTreeMap<String, String>>>("notes")?.unwrap_or_default(),
        })
    }

    fn field(&self, key: &str) -> Option<Field> {
        match key {
            "label" => Some(Field::value(&self.label)),
            "owner" => Some(Field::one(self.owner.as_ref())),
            "orders" => Some(Field::list(&self.orders)),
            "notes" => Some(Field::Value(Value::Map(
                self.notes
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::Text(v.clone())))
                    .collect(),
            ))),
            _ => None,
        }
    }
}

/// Stores dollar amounts as integer cents.
#[derive(Debug, Default, Clone, Copy)]
pub struct CentsCodec;

impl FieldCodec for CentsCodec {
    fn encode(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Float(dollars) => {
                let cents = (dollars * 100.0).round();
                if !cents.is_finite() || cents < i64::MIN as f64 || cents >= i64::MAX as f64 {
                    return Err(out_of_range(value));
                }
                Ok(SqlValue::Integer(cents as i64))
            }
            Value::Int(dollars) => dollars
                .checked_mul(100)
                .map(SqlValue::Integer)
                .ok_or_else(|| out_of_range(value)),
            other => Err(Error::Mapping(format!("expected an amount, found {:?}", other))),
        }
    }

    fn decode(&self, stored: SqlValue) -> Result<Value> {
        match stored {
            SqlValue::Null => Ok(Value::Null),
            SqlValue::Integer(cents) => Ok(Value::Float(cents as f64 / 100.0)),
            SqlValue::Real(cents) => Ok(Value::Float(cents / 100.0)),
            SqlValue::Text(ref text) => text
                .trim()
                .parse::<i64>()
                .map(|cents| Value::Float(cents as f64 / 100.0))
                .map_err(|_| Error::Mapping(format!("expected cents, found {:?}", stored))),
            other => Err(Error::Mapping(format!("expected cents, found {:?}", other))),
        }
    }
}

fn out_of_range(value: &Value) -> Error {
    Error::Mapping(format!("amount {:?} does not fit in cents", value))
}

/// Register the codecs the demo schema needs. Call before registering tables.
pub fn install_codecs(codecs: &CodecRegistry) {
    codecs.register(CENTS, Arc::new(CentsCodec));
}
