//! RecordStore Trait - Store Engine Abstraction
//!
//! The narrow contract every storage backend implements for the repository:
//! bootstrap tables and indexes, load a root's graph, find and count roots by
//! predicate, and apply a batch of writes atomically.
//!
//! # Architecture
//!
//! - **Relational** ([`crate::db::SqlStore`]): one table per record type,
//!   children linked to their owner by `parent_id`. Every removed record is
//!   deleted explicitly, so the repository stages a delete for each record
//!   the reconciler removes.
//! - **Document** ([`crate::db::SurrealStore`]): one document per aggregate.
//!   Children disappear when the root document is replaced, so only root
//!   deletions are staged.
//!
//! # Write batches
//!
//! Operations in a [`WriteBatch`] are applied in order inside one store
//! transaction. A save carries the modification witness it expects to find
//! persisted; if the stored value differs the whole batch fails with
//! [`StoreError::ConcurrencyConflict`]. Unique-index rejections surface as
//! [`StoreError::ConstraintViolation`]. A relational save that would move a
//! child row out from under a different parent fails with
//! [`StoreError::OwnershipConflict`].

use crate::db::error::StoreError;
use crate::models::{document_id, Document, Expr, RecordId, RecordType, SortSpec};
use async_trait::async_trait;

/// Storage model of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Relational,
    Document,
}

/// Root-level find request
#[derive(Debug, Clone, PartialEq)]
pub struct StoreQuery {
    pub predicate: Expr,
    /// First key sorts, later keys break ties
    pub sort: Vec<SortSpec>,
    pub offset: u64,
    pub limit: Option<u64>,
}

impl StoreQuery {
    pub fn new(predicate: Expr) -> Self {
        Self {
            predicate,
            sort: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    pub fn sorted(mut self, sort: Vec<SortSpec>) -> Self {
        self.sort = sort;
        self
    }

    pub fn paged(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

/// One write in a batch
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Persist a root's full (stored-form) graph
    Save {
        root: RecordType,
        graph: Document,
        /// Witness the persisted row must still carry; `None` for inserts
        expected_modified: Option<String>,
    },
    /// Delete one record (a root, or a child row in relational stores)
    Delete { record: RecordType, id: RecordId },
}

impl WriteOp {
    /// Identity of the record written
    pub fn id(&self) -> Option<RecordId> {
        match self {
            WriteOp::Save { graph, .. } => document_id(graph),
            WriteOp::Delete { id, .. } => Some(*id),
        }
    }
}

/// Ordered writes applied atomically
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn extend(&mut self, ops: impl IntoIterator<Item = WriteOp>) {
        self.ops.extend(ops);
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl From<Vec<WriteOp>> for WriteBatch {
    fn from(ops: Vec<WriteOp>) -> Self {
        Self { ops }
    }
}

/// Store engine contract
///
/// Implementations must be `Send + Sync`; repositories share them through
/// `Arc<dyn RecordStore>`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Create tables/collections and indexes for `root` and everything it
    /// owns. Idempotent.
    async fn initialize(&self, root: &RecordType) -> Result<(), StoreError>;

    /// Stored-form graph of one root, children included
    async fn load_graph(
        &self,
        root: &RecordType,
        id: RecordId,
    ) -> Result<Option<Document>, StoreError>;

    /// Stored-form graphs of roots matching `query`
    async fn find(&self, root: &RecordType, query: &StoreQuery)
        -> Result<Vec<Document>, StoreError>;

    async fn count(&self, root: &RecordType, predicate: &Expr) -> Result<u64, StoreError>;

    /// Apply `batch` atomically
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}
