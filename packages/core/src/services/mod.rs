//! Record Services
//!
//! - `Reflector` - memoized field maps per record type
//! - `Validator` - declarative rule checks over a whole graph
//! - `Reconciler` - merges a source graph into a persisted graph
//! - `EncryptionAdapter` - field-level encryption driven by schema marks
//! - `QueryTranslator` - data-grid requests to predicate ASTs
//! - `Repository` - the persistence contract callers use
//!
//! The repository composes the others; each is usable on its own.

pub mod encryption;
pub mod error;
pub mod query_service;
pub mod reconciler;
pub mod reflector;
pub mod repository;
pub mod validator;

pub use encryption::EncryptionAdapter;
pub use error::{RepositoryError, UsageFault};
pub use query_service::{QueryTranslator, TranslatedQuery};
pub use reconciler::{NoopHooks, ReconcileHooks, Reconciler};
pub use reflector::{FieldMap, Reflector};
pub use repository::{Repository, Transaction};
pub use validator::{Validator, Violation};
