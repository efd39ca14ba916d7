//! Shared fixtures for integration tests
//!
//! A `Customer` aggregate exercising every feature the engine supports:
//! a single owned child (`address`), a nested collection
//! (`orders[].lines[]`), a case-insensitive unique key (`email`), both
//! encryption modes and a cross-root reference to a `Manager`.

#![allow(dead_code)]

use anyhow::Result;
use docstore_core::db::{RecordStore, SqlStore, SurrealStore};
use docstore_core::models::{
    AuditFields, FieldSchema, IndexSpec, Record, RecordId, RecordSchema, RootRecord,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Once};
use tempfile::TempDir;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: RecordId,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
}

impl Record for Address {
    fn schema() -> RecordSchema {
        RecordSchema::child("Address", "addresses")
            .field(FieldSchema::text("street"))
            .field(FieldSchema::text("city").required())
    }

    fn id(&self) -> RecordId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: RecordId,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub quantity: i64,
}

impl Record for OrderLine {
    fn schema() -> RecordSchema {
        RecordSchema::child("OrderLine", "order_lines")
            .field(FieldSchema::text("sku").required())
            .field(FieldSchema::integer("quantity").range(1.0, 1000.0))
    }

    fn id(&self) -> RecordId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: RecordId,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub lines: Vec<OrderLine>,
}

impl Record for Order {
    fn schema() -> RecordSchema {
        RecordSchema::child("Order", "orders")
            .field(FieldSchema::text("number").required())
            .field(FieldSchema::records::<OrderLine>("lines"))
    }

    fn id(&self) -> RecordId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manager {
    pub id: RecordId,
    #[serde(flatten)]
    pub audit: AuditFields,
    #[serde(default)]
    pub name: String,
}

impl Record for Manager {
    fn schema() -> RecordSchema {
        RecordSchema::root("Manager", "managers").field(FieldSchema::text("name").required())
    }

    fn id(&self) -> RecordId {
        self.id
    }
}

impl RootRecord for Manager {
    fn audit(&self) -> &AuditFields {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditFields {
        &mut self.audit
    }
}

impl Manager {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            audit: AuditFields::default(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: RecordId,
    #[serde(flatten)]
    pub audit: AuditFields,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub tier: i64,
    /// Randomized encryption
    #[serde(default)]
    pub ssn: Option<String>,
    /// Deterministic encryption, equality-searchable
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub manager_id: Option<RecordId>,
    #[serde(default)]
    pub manager: Option<Manager>,
}

impl Record for Customer {
    fn schema() -> RecordSchema {
        RecordSchema::root("Customer", "customers")
            .field(FieldSchema::text("name").required().max_length(40))
            .field(FieldSchema::text("email").required())
            .field(FieldSchema::integer("tier").indexed())
            .field(FieldSchema::text("ssn").encrypted())
            .field(FieldSchema::text("tax_id").encrypted_searchable())
            .field(FieldSchema::record::<Address>("address"))
            .field(FieldSchema::records::<Order>("orders"))
            .field(FieldSchema::uuid("manager_id"))
            .field(FieldSchema::reference::<Manager>("manager", "manager_id"))
            .unique_key("email")
            .index(IndexSpec::on(["tier", "name"]).descending("name"))
    }

    fn id(&self) -> RecordId {
        self.id
    }
}

impl RootRecord for Customer {
    fn audit(&self) -> &AuditFields {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditFields {
        &mut self.audit
    }
}

impl Customer {
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            audit: AuditFields::default(),
            name: name.to_string(),
            email: email.to_string(),
            tier: 1,
            ssn: None,
            tax_id: None,
            address: None,
            orders: Vec::new(),
            manager_id: None,
            manager: None,
        }
    }

    pub fn with_order(mut self, number: &str, skus: &[&str]) -> Self {
        self.orders.push(order(number, skus));
        self
    }
}

pub fn order(number: &str, skus: &[&str]) -> Order {
    Order {
        id: Uuid::new_v4(),
        number: number.to_string(),
        lines: skus.iter().map(|sku| line(sku, 1)).collect(),
    }
}

pub fn line(sku: &str, quantity: i64) -> OrderLine {
    OrderLine {
        id: Uuid::new_v4(),
        sku: sku.to_string(),
        quantity,
    }
}

pub fn address(street: &str, city: &str) -> Address {
    Address {
        id: Uuid::new_v4(),
        street: street.to_string(),
        city: city.to_string(),
    }
}

/// Store engines every behavioral test runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Sql,
    Surreal,
}

impl Engine {
    pub const ALL: [Engine; 2] = [Engine::Sql, Engine::Surreal];
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Sql => write!(f, "sql"),
            Engine::Surreal => write!(f, "surreal"),
        }
    }
}

/// Route engine logs to the test harness; `RUST_LOG=debug` to see them
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Fresh on-disk store for `engine`; keep the `TempDir` alive with it
pub async fn create_test_store(engine: Engine) -> Result<(Arc<dyn RecordStore>, TempDir)> {
    init_tracing();
    let temp_dir = TempDir::new()?;
    let store: Arc<dyn RecordStore> = match engine {
        Engine::Sql => Arc::new(SqlStore::new(temp_dir.path().join("test.db")).await?),
        Engine::Surreal => Arc::new(SurrealStore::new(temp_dir.path().join("test.surreal")).await?),
    };
    Ok((store, temp_dir))
}

/// Fresh relational store, concretely typed for raw row inspection
pub async fn create_sql_store() -> Result<(Arc<SqlStore>, TempDir)> {
    init_tracing();
    let temp_dir = TempDir::new()?;
    let store = Arc::new(SqlStore::new(temp_dir.path().join("test.db")).await?);
    Ok((store, temp_dir))
}

/// Number of rows in `table` with the given id
pub async fn sql_row_count(store: &SqlStore, table: &str, id: RecordId) -> Result<i64> {
    let conn = store.connect_with_timeout().await?;
    let mut rows = conn
        .query(
            &format!("SELECT COUNT(*) FROM {} WHERE id = ?", table),
            libsql::params![id.to_string()],
        )
        .await?;
    let row = rows
        .next()
        .await?
        .ok_or_else(|| anyhow::anyhow!("COUNT(*) returned no row"))?;
    Ok(row.get::<i64>(0)?)
}
