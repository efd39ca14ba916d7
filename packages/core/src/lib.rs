//! Docstore Core - Aggregate Persistence Engine
//!
//! Persists graphs of typed records (a root plus the children it owns) into
//! either a relational or a document store behind one repository contract.
//!
//! # Architecture
//!
//! - **Declarative records**: record types are serde structs that describe
//!   themselves with a [`RecordSchema`]; no runtime reflection
//! - **Reconciliation, not replacement**: an incoming graph is merged into
//!   the persisted one, so removed children are detected and deleted
//! - **Two storage models**: libsql with one table per type, SurrealDB with
//!   one document per aggregate
//! - **Optimistic concurrency**: the root's `modified_at` is the witness
//! - **Field encryption**: schema-marked fields are sealed before they reach
//!   a store and opened after they leave it
//!
//! # Modules
//!
//! - [`models`] - Record traits, schema metadata, predicates, grid requests
//! - [`services`] - Reflector, Validator, Reconciler, encryption, Repository
//! - [`db`] - Store contract and the libsql/SurrealDB engines
//! - [`crypto`] - Field cipher contract and AES-GCM implementation
//! - [`config`] - Store selection from JSON or environment

pub mod config;
pub mod crypto;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::{open_store, Backend, ConfigError, StoreConfig};
pub use crypto::{AesFieldCipher, CryptoError, FieldCipher};
pub use db::{RecordEvent, RecordStore, SqlStore, StoreError, SurrealStore};
pub use models::*;
pub use services::*;
