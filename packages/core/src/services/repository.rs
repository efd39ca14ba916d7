//! Repository - Aggregate Persistence Orchestration
//!
//! One repository per root record type. It sits between callers and a
//! [`RecordStore`], running every write through the same pipeline regardless
//! of the store's storage model.
//!
//! # Upsert pipeline
//!
//! ```text
//! stamp audit fields
//!   -> validate graph            (Validation)
//!   -> unique-key lookup         (DuplicateUniqueKey)
//!   -> capture witness, restamp
//!   -> load persisted graph
//!   -> compare witness           (ConcurrencyConflict)
//!   -> reconcile into persisted graph, staging deletes
//!   -> encrypt every level
//!   -> commit (or buffer in the open transaction)
//!   -> emit RecordEvent::Upserted
//! ```
//!
//! Nothing reaches the store before every check has passed.
//!
//! # Deletes
//!
//! The reconciler's removal hook stages deletes. Relational stores get one
//! delete per removed record, children first; document stores only get root
//! deletes because embedded children disappear with the document.
//!
//! # Transactions
//!
//! [`Repository::begin_transaction`] opens a buffer; upserts and deletes made
//! while it is open are applied to the buffer instead of the store, and their
//! events are held back. [`Repository::commit_transaction`] writes the whole
//! buffer as one store batch and then emits the held events in order.
//! Dropping the handle without committing discards the buffer.
//!
//! `get` and the unique-key check see the buffered graphs of the open
//! transaction; `find` and `query` only see committed data.

use crate::crypto::FieldCipher;
use crate::db::{
    RecordEvent, RecordStore, StoreError, StoreKind, StoreQuery, WriteBatch, WriteOp,
};
use crate::models::{
    document_id, document_modified_at, empty_document, from_document, timestamp, to_document,
    Document, Expr, FieldKind, QueryRequest, QueryResult, RecordId, RecordType, RootRecord,
    ID_FIELD, MODIFIED_AT_FIELD,
};
use crate::models::record::json_type_name;
use crate::services::encryption::EncryptionAdapter;
use crate::services::error::{RepositoryError, UsageFault};
use crate::services::query_service::QueryTranslator;
use crate::services::reconciler::{ReconcileHooks, Reconciler};
use crate::services::reflector::Reflector;
use crate::services::validator::Validator;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Writes buffered by an open transaction
struct PendingTransaction<T> {
    token: u64,
    batch: WriteBatch,
    /// Stored-form graph per touched root; `None` once deleted
    overlay: HashMap<RecordId, Option<Document>>,
    events: Vec<RecordEvent<T>>,
}

type TransactionSlot<T> = Arc<Mutex<Option<PendingTransaction<T>>>>;

fn lock_slot<T>(slot: &TransactionSlot<T>) -> MutexGuard<'_, Option<PendingTransaction<T>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle for an open repository transaction
///
/// Dropping the handle without passing it to
/// [`Repository::commit_transaction`] rolls the transaction back.
pub struct Transaction<T> {
    token: u64,
    slot: TransactionSlot<T>,
    committed: bool,
}

impl<T> Transaction<T> {
    /// Discard every buffered write
    pub fn rollback(self) {}
}

impl<T> Drop for Transaction<T> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slot = lock_slot(&self.slot);
        if slot.as_ref().is_some_and(|p| p.token == self.token) {
            if let Some(pending) = slot.take() {
                debug!(
                    ops = pending.batch.len(),
                    "transaction dropped, buffered writes discarded"
                );
            }
        }
    }
}

/// Reconcile hooks that turn removals into staged store deletes
struct DeletionStager<'a> {
    kind: StoreKind,
    reflector: &'a Reflector,
    staged: Vec<WriteOp>,
    removed: HashSet<RecordId>,
}

impl<'a> DeletionStager<'a> {
    fn new(kind: StoreKind, reflector: &'a Reflector) -> Self {
        Self {
            kind,
            reflector,
            staged: Vec::new(),
            removed: HashSet::new(),
        }
    }
}

impl ReconcileHooks for DeletionStager<'_> {
    fn should_remove(&mut self, _record_type: &RecordType, record: &Document) -> bool {
        document_id(record).map_or(true, |id| !self.removed.contains(&id))
    }

    fn commit_deletion(
        &mut self,
        record_type: &RecordType,
        record: &Document,
    ) -> Result<(), UsageFault> {
        let schema = self.reflector.schema_of(record_type);
        let id = document_id(record)
            .ok_or_else(|| UsageFault::missing_identity(&schema.name, ID_FIELD))?;
        self.removed.insert(id);

        if self.kind == StoreKind::Relational || schema.is_root {
            self.staged.push(WriteOp::Delete {
                record: *record_type,
                id,
            });
        }
        Ok(())
    }
}

/// Persistence contract for one root record type
pub struct Repository<T: RootRecord> {
    store: Arc<dyn RecordStore>,
    encryption: EncryptionAdapter,
    reflector: &'static Reflector,
    record_type: RecordType,
    event_tx: broadcast::Sender<RecordEvent<T>>,
    transaction: TransactionSlot<T>,
    next_token: AtomicU64,
}

impl<T: RootRecord> Repository<T> {
    /// Repository without field encryption
    ///
    /// Upserting a record with encrypted fields fails with
    /// [`crate::crypto::CryptoError::MissingKey`].
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_cipher(store, None)
    }

    /// Repository encrypting marked fields with `cipher`
    pub fn with_encryption(store: Arc<dyn RecordStore>, cipher: Arc<dyn FieldCipher>) -> Self {
        Self::with_cipher(store, Some(cipher))
    }

    pub fn with_cipher(store: Arc<dyn RecordStore>, cipher: Option<Arc<dyn FieldCipher>>) -> Self {
        let reflector = Reflector::global();
        let record_type = RecordType::of::<T>();
        reflector.register(&record_type);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            store,
            encryption: EncryptionAdapter::new(cipher),
            reflector,
            record_type,
            event_tx,
            transaction: Arc::new(Mutex::new(None)),
            next_token: AtomicU64::new(1),
        }
    }

    /// Declared name of the root type
    pub fn record_name(&self) -> String {
        self.reflector.schema_of(&self.record_type).name.clone()
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Subscribe to post-commit record events
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<RecordEvent<T>> {
        self.event_tx.subscribe()
    }

    fn emit_event(&self, event: RecordEvent<T>) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn store_error(&self, operation: &'static str) -> impl FnOnce(StoreError) -> RepositoryError {
        let name = self.record_name();
        move |err| RepositoryError::from_store(&name, operation, err)
    }

    /// Create tables/collections and indexes for this root, its children and
    /// every root it references
    #[tracing::instrument(skip(self), fields(record_type = %self.record_name()))]
    pub async fn initialize(&self) -> Result<(), RepositoryError> {
        self.store
            .initialize(&self.record_type)
            .await
            .map_err(self.store_error("initialize"))?;

        for target in self.reference_targets() {
            if self.reflector.schema_of(&target).is_root {
                self.store
                    .initialize(&target)
                    .await
                    .map_err(self.store_error("initialize"))?;
            }
        }
        debug!("repository initialized");
        Ok(())
    }

    fn reference_targets(&self) -> Vec<RecordType> {
        self.reflector
            .schema_of(&self.record_type)
            .fields
            .iter()
            .filter_map(|field| match &field.kind {
                FieldKind::Reference { target, .. } => Some(*target),
                _ => None,
            })
            .collect()
    }

    /// Stored-form graph, preferring the open transaction's buffer
    async fn load_stored(&self, id: RecordId) -> Result<Option<Document>, RepositoryError> {
        {
            let slot = lock_slot(&self.transaction);
            if let Some(state) = slot.as_ref().and_then(|p| p.overlay.get(&id)) {
                return Ok(state.clone());
            }
        }
        self.store
            .load_graph(&self.record_type, id)
            .await
            .map_err(self.store_error("load"))
    }

    /// Apply `ops` now, or buffer them in the open transaction
    async fn persist(
        &self,
        id: RecordId,
        ops: Vec<WriteOp>,
        stored: Option<Document>,
        event: RecordEvent<T>,
        operation: &'static str,
    ) -> Result<(), RepositoryError> {
        {
            let mut slot = lock_slot(&self.transaction);
            if let Some(pending) = slot.as_mut() {
                debug!(ops = ops.len(), operation, "buffered in transaction");
                pending.batch.extend(ops);
                pending.overlay.insert(id, stored);
                pending.events.push(event);
                return Ok(());
            }
        }

        self.store
            .commit(WriteBatch::from(ops))
            .await
            .map_err(self.store_error(operation))?;
        self.emit_event(event);
        Ok(())
    }

    /// Whether another root already uses `key` (case-insensitive)
    async fn key_taken(&self, key: &str, id: RecordId) -> Result<bool, RepositoryError> {
        let Some(field) = self.reflector.schema_of(&self.record_type).unique_key.clone() else {
            return Ok(false);
        };
        if self.key_buffered(&field, key, id) {
            return Ok(true);
        }
        let predicate = Expr::and(vec![
            Expr::equals_ignore_case(field, key),
            Expr::ne(ID_FIELD, id.to_string()),
        ]);
        let count = self
            .store
            .count(&self.record_type, &predicate)
            .await
            .map_err(self.store_error("unique key lookup"))?;
        Ok(count > 0)
    }

    /// Whether a root buffered by the open transaction already uses `key`
    fn key_buffered(&self, field: &str, key: &str, id: RecordId) -> bool {
        let key = key.to_lowercase();
        let slot = lock_slot(&self.transaction);
        slot.as_ref().is_some_and(|pending| {
            pending.overlay.iter().any(|(other, stored)| {
                *other != id
                    && stored
                        .as_ref()
                        .and_then(|doc| doc.get(field))
                        .and_then(Value::as_str)
                        .is_some_and(|value| value.to_lowercase() == key)
            })
        })
    }

    /// Whether `record`'s unique key is used by a different root
    pub async fn is_duplicate(&self, record: &T) -> Result<bool, RepositoryError> {
        match record.unique_key() {
            Some(key) => self.key_taken(&key, record.id()).await,
            None => Ok(false),
        }
    }

    /// Insert or update `record` and everything it owns
    ///
    /// Returns the record as persisted (plaintext), with its new
    /// modification stamp.
    #[tracing::instrument(skip(self, record), fields(record_type = %self.record_name(), id = %record.id()))]
    pub async fn upsert(&self, mut record: T) -> Result<T, RepositoryError> {
        let ty = self.record_type;
        let name = self.record_name();
        let id = record.id();

        let now = timestamp::now();
        let audit = record.audit_mut();
        if audit.created_at.is_none() {
            audit.created_at = Some(now);
        }
        if audit.modified_at.is_none() {
            audit.modified_at = Some(now);
        }
        let witness = audit.modified_at;
        let stamp = timestamp::next_after(witness);

        let mut source = to_document(&record)?;

        let violations = Validator::new(self.reflector).validate(&ty, &source)?;
        if !violations.is_empty() {
            warn!(count = violations.len(), "upsert rejected by validation");
            return Err(RepositoryError::validation(name, violations));
        }

        if let Some(key) = record.unique_key() {
            if self.key_taken(&key, id).await? {
                warn!(key = %key, "upsert rejected: duplicate unique key");
                return Err(RepositoryError::duplicate_unique_key(name, key));
            }
        }

        source.insert(
            MODIFIED_AT_FIELD.to_string(),
            Value::String(timestamp::format(&stamp)),
        );

        let persisted = self.load_stored(id).await?;
        let expected = persisted
            .as_ref()
            .and_then(|doc| document_modified_at(doc).map(str::to_string));
        if persisted.is_some() {
            let current = expected.as_deref().and_then(timestamp::parse);
            if current != witness {
                warn!(
                    expected = ?witness,
                    found = ?current,
                    "upsert rejected: concurrency conflict"
                );
                return Err(RepositoryError::concurrency_conflict(
                    name,
                    id,
                    format!(
                        "record was modified at {} since it was read",
                        expected.as_deref().unwrap_or("an unknown time")
                    ),
                ));
            }
        }

        let mut target = match persisted {
            Some(mut doc) => {
                self.encryption.decrypt_graph(&ty, &mut doc)?;
                doc
            }
            None => empty_document(id),
        };

        let mut stager = DeletionStager::new(self.store.kind(), self.reflector);
        Reconciler::new(self.reflector).reconcile(&ty, &source, &ty, &mut target, &mut stager)?;

        let mut stored = target.clone();
        self.encryption.encrypt_graph(&ty, &mut stored)?;

        let mut ops = stager.staged;
        debug!(deletes = ops.len(), "reconciled graph");
        ops.push(WriteOp::Save {
            root: ty,
            graph: stored.clone(),
            expected_modified: expected,
        });

        let saved: T = from_document(target)?;
        self.persist(
            id,
            ops,
            Some(stored),
            RecordEvent::Upserted(saved.clone()),
            "upsert",
        )
        .await?;
        Ok(saved)
    }

    /// Load a root with its children decrypted and references resolved
    #[tracing::instrument(skip(self), fields(record_type = %self.record_name()))]
    pub async fn get(&self, id: RecordId) -> Result<Option<T>, RepositoryError> {
        match self.load_stored(id).await? {
            Some(doc) => Ok(Some(self.materialize(doc).await?)),
            None => Ok(None),
        }
    }

    /// Delete a root and everything it owns
    ///
    /// Returns whether anything was deleted.
    #[tracing::instrument(skip(self), fields(record_type = %self.record_name()))]
    pub async fn delete(&self, id: RecordId) -> Result<bool, RepositoryError> {
        let Some(mut doc) = self.load_stored(id).await? else {
            debug!("nothing to delete");
            return Ok(false);
        };
        self.encryption.decrypt_graph(&self.record_type, &mut doc)?;
        let snapshot: T = from_document(doc.clone())?;

        let mut stager = DeletionStager::new(self.store.kind(), self.reflector);
        Reconciler::new(self.reflector).remove(&self.record_type, &doc, &mut stager)?;

        self.persist(
            id,
            stager.staged,
            None,
            RecordEvent::Deleted(snapshot),
            "delete",
        )
        .await?;
        Ok(true)
    }

    /// Roots matching `predicate`
    ///
    /// Literals compared against encrypted fields are rewritten first; see
    /// [`EncryptionAdapter::rewrite`] for what is supported.
    #[tracing::instrument(skip(self, predicate), fields(record_type = %self.record_name()))]
    pub async fn find(&self, predicate: Expr) -> Result<Vec<T>, RepositoryError> {
        let predicate = self.encryption.rewrite(&self.record_type, &predicate)?;
        let docs = self
            .store
            .find(&self.record_type, &StoreQuery::new(predicate))
            .await
            .map_err(self.store_error("find"))?;
        self.materialize_all(docs).await
    }

    /// One page of a data-grid request
    #[tracing::instrument(skip(self, request), fields(record_type = %self.record_name()))]
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResult<T>, RepositoryError> {
        let translated =
            QueryTranslator::new(self.reflector).translate(&self.record_type, &request)?;
        let predicate = self
            .encryption
            .rewrite(&self.record_type, &translated.predicate)?;

        let total = self
            .store
            .count(&self.record_type, &predicate)
            .await
            .map_err(self.store_error("query"))?;
        let query = StoreQuery::new(predicate)
            .sorted(translated.sort)
            .paged(translated.offset, translated.limit);
        let docs = self
            .store
            .find(&self.record_type, &query)
            .await
            .map_err(self.store_error("query"))?;

        Ok(QueryResult {
            data: self.materialize_all(docs).await?,
            total_record_count: total,
            total_page_count: QueryTranslator::page_count(total, translated.limit),
        })
    }

    async fn materialize_all(&self, docs: Vec<Document>) -> Result<Vec<T>, RepositoryError> {
        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            records.push(self.materialize(doc).await?);
        }
        Ok(records)
    }

    /// Decrypt a stored graph, resolve references and deserialize
    async fn materialize(&self, mut doc: Document) -> Result<T, RepositoryError> {
        self.encryption.decrypt_graph(&self.record_type, &mut doc)?;
        self.resolve_references(&mut doc).await?;
        Ok(from_document(doc)?)
    }

    /// Populate root-level reference fields, one lookup per field
    async fn resolve_references(&self, doc: &mut Document) -> Result<(), RepositoryError> {
        let schema = self.reflector.schema_of(&self.record_type);
        for field in &schema.fields {
            let FieldKind::Reference { target, key_field } = &field.kind else {
                continue;
            };
            let target_schema = self.reflector.schema_of(target);
            if !target_schema.is_root {
                return Err(UsageFault::InvalidReference {
                    record_type: schema.name.clone(),
                    field: field.name.clone(),
                    target: target_schema.name.clone(),
                }
                .into());
            }

            let resolved = match doc.get(key_field) {
                None | Some(Value::Null) => Value::Null,
                Some(Value::String(raw)) => {
                    let target_id = Uuid::parse_str(raw).map_err(|_| {
                        UsageFault::shape_mismatch(&schema.name, key_field, "uuid", "string")
                    })?;
                    match self
                        .store
                        .load_graph(target, target_id)
                        .await
                        .map_err(self.store_error("reference lookup"))?
                    {
                        Some(mut referenced) => {
                            self.encryption.decrypt_graph(target, &mut referenced)?;
                            Value::Object(referenced)
                        }
                        None => Value::Null,
                    }
                }
                Some(other) => {
                    return Err(UsageFault::shape_mismatch(
                        &schema.name,
                        key_field,
                        "uuid",
                        json_type_name(other),
                    )
                    .into())
                }
            };
            doc.insert(field.name.clone(), resolved);
        }
        Ok(())
    }

    /// Open a transaction; only one may be open per repository
    pub fn begin_transaction(&self) -> Result<Transaction<T>, RepositoryError> {
        let mut slot = lock_slot(&self.transaction);
        if slot.is_some() {
            return Err(UsageFault::transaction("a transaction is already open").into());
        }
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        *slot = Some(PendingTransaction {
            token,
            batch: WriteBatch::new(),
            overlay: HashMap::new(),
            events: Vec::new(),
        });
        debug!(token, "transaction opened");

        Ok(Transaction {
            token,
            slot: Arc::clone(&self.transaction),
            committed: false,
        })
    }

    /// Write every buffered change as one batch, then emit held events
    ///
    /// # Errors
    ///
    /// A handle from another repository, or one whose transaction is no
    /// longer open, is a [`UsageFault`]. When the store rejects the batch the
    /// transaction is closed and nothing is written.
    #[tracing::instrument(skip(self, transaction), fields(record_type = %self.record_name()))]
    pub async fn commit_transaction(
        &self,
        mut transaction: Transaction<T>,
    ) -> Result<(), RepositoryError> {
        if !Arc::ptr_eq(&transaction.slot, &self.transaction) {
            return Err(
                UsageFault::transaction("transaction belongs to another repository").into(),
            );
        }

        let pending = {
            let mut slot = lock_slot(&self.transaction);
            match slot.take() {
                Some(pending) if pending.token == transaction.token => pending,
                other => {
                    *slot = other;
                    return Err(UsageFault::transaction("stale transaction handle").into());
                }
            }
        };
        transaction.committed = true;

        debug!(ops = pending.batch.len(), "committing transaction");
        self.store
            .commit(pending.batch)
            .await
            .map_err(self.store_error("commit"))?;

        for event in pending.events {
            self.emit_event(event);
        }
        Ok(())
    }
}
