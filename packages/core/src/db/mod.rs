//! Storage Layer
//!
//! Two interchangeable engines behind the [`RecordStore`] contract:
//!
//! - [`SqlStore`] - libsql (SQLite-compatible). One table per record type,
//!   children in their own rows keyed by parent.
//! - [`SurrealStore`] - embedded SurrealDB. One document per aggregate,
//!   children embedded in their parent.
//!
//! # Architecture
//!
//! Stores are deliberately unaware of records as Rust types. They receive
//! and return plain JSON [`crate::models::Document`] graphs already in stored
//! form (encrypted fields stay encrypted), translate predicate ASTs into
//! their own query language, and apply write batches atomically with an
//! optimistic-concurrency witness check per root.
//!
//! Index declarations are planned once per record type by
//! [`IndexManager`] and rendered by each engine.

mod error;
pub mod events;
mod index_manager;
mod record_store;
pub mod sql_store;
pub mod sql_translate;
pub mod surreal_store;
pub mod surreal_translate;

pub use error::StoreError;
pub use events::RecordEvent;
pub use index_manager::{IndexManager, IndexPlan};
pub use record_store::{RecordStore, StoreKind, StoreQuery, WriteBatch, WriteOp};
pub use sql_store::{SqlStore, DEFAULT_BUSY_TIMEOUT_MS};
pub use surreal_store::{SurrealStore, DEFAULT_DATABASE, DEFAULT_NAMESPACE};
