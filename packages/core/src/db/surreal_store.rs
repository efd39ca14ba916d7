//! SurrealStore - RecordStore Implementation for SurrealDB
//!
//! Document backend: each aggregate is one record in its root's table,
//! children embedded in the body. Records are addressed as
//! `type::thing($table, $id)` with the root's UUID as the record key.
//!
//! # Stored shape
//!
//! ```text
//! {
//!     doc_id:      "<uuid>",        -- identity, queried as `id`
//!     modified_at: "<rfc3339>",     -- concurrency witness
//!     unique_key:  "<lowercased>",  -- present when the root declares one
//!     child_ids:   ["<uuid>", ...], -- every record owned below the root
//!     body:        { ...graph... }  -- full aggregate including children
//! }
//! ```
//!
//! The unique index is defined on `unique_key`, so keys differing only in
//! case collide inside the engine. `child_ids` lets a save detect a child
//! that is already embedded in another aggregate.
//!
//! # Writes
//!
//! Batches are checked against persisted witnesses and then applied as a
//! single `BEGIN TRANSACTION ... COMMIT TRANSACTION` query. Both steps run
//! under a store-wide write lock so the check and the write cannot
//! interleave with another batch from this process.
//!
//! # Engines
//!
//! - `kv-rocksdb` for on-disk stores ([`SurrealStore::new`])
//! - `kv-mem` for ephemeral stores ([`SurrealStore::new_in_memory`])

use crate::db::error::StoreError;
use crate::db::index_manager::{validate_identifier, IndexManager, IndexPlan};
use crate::db::record_store::{RecordStore, StoreKind, StoreQuery, WriteBatch, WriteOp};
use crate::db::surreal_translate::{self, field_idiom};
use crate::models::{
    document_modified_at, Document, Expr, RecordId, RecordSchema, RecordType, SortDirection,
    SortSpec, ID_FIELD,
};
use crate::services::Reflector;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use surrealdb::engine::local::{Db, Mem, RocksDb};
use surrealdb::Surreal;
use tokio::sync::Mutex;

pub const DEFAULT_NAMESPACE: &str = "docstore";
pub const DEFAULT_DATABASE: &str = "records";

const UNIQUE_KEY_FIELD: &str = "unique_key";
const CHILD_IDS_FIELD: &str = "child_ids";

/// Row shape returned by aggregate selects
#[derive(Debug, Clone, Deserialize)]
struct StoredAggregate {
    doc_id: String,
    body: Value,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct WitnessRow {
    modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwnerRow {
    doc_id: String,
    #[serde(default)]
    child_ids: Option<Vec<String>>,
}

/// SurrealDB-backed record store
pub struct SurrealStore {
    db: Arc<Surreal<Db>>,
    reflector: &'static Reflector,
    index_manager: IndexManager,
    write_lock: Mutex<()>,
}

impl SurrealStore {
    /// Open an embedded RocksDB store in the default namespace
    pub async fn new(db_path: PathBuf) -> Result<Self, StoreError> {
        Self::open(db_path, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await
    }

    /// Open an embedded RocksDB store
    pub async fn open(
        db_path: PathBuf,
        namespace: &str,
        database: &str,
    ) -> Result<Self, StoreError> {
        let db = Surreal::new::<RocksDb>(db_path.clone())
            .await
            .map_err(|e| StoreError::connection_failed(db_path.clone(), e.to_string()))?;
        tracing::info!(path = %db_path.display(), "opened document store");
        Self::with_engine(db, namespace, database).await
    }

    /// Open a store that lives only as long as this value
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        Self::open_in_memory(DEFAULT_NAMESPACE, DEFAULT_DATABASE).await
    }

    pub async fn open_in_memory(namespace: &str, database: &str) -> Result<Self, StoreError> {
        let db = Surreal::new::<Mem>(())
            .await
            .map_err(|e| StoreError::connection_failed(PathBuf::from(":memory:"), e.to_string()))?;
        Self::with_engine(db, namespace, database).await
    }

    async fn with_engine(
        db: Surreal<Db>,
        namespace: &str,
        database: &str,
    ) -> Result<Self, StoreError> {
        db.use_ns(namespace).use_db(database).await.map_err(|e| {
            StoreError::initialization_failed(format!(
                "Failed to set namespace/database {}/{}: {}",
                namespace, database, e
            ))
        })?;

        Ok(Self {
            db: Arc::new(db),
            reflector: Reflector::global(),
            index_manager: IndexManager::new(),
            write_lock: Mutex::new(()),
        })
    }

    fn table_of(&self, ty: &RecordType) -> Result<Arc<RecordSchema>, StoreError> {
        let schema = self.reflector.schema_of(ty);
        validate_identifier(&schema.table)?;
        Ok(schema)
    }

    fn into_document(row: StoredAggregate) -> Result<Document, StoreError> {
        match row.body {
            Value::Object(mut doc) => {
                doc.insert(ID_FIELD.to_string(), Value::String(row.doc_id));
                Ok(doc)
            }
            _ => Err(StoreError::serialization(format!(
                "body of record {} is not an object",
                row.doc_id
            ))),
        }
    }

    /// Persisted witness: `None` when the record does not exist
    async fn witness(&self, table: &str, id: &str) -> Result<Option<Option<String>>, StoreError> {
        let mut response = self
            .db
            .query("SELECT modified_at FROM type::thing($table, $id);")
            .bind(("table", table.to_string()))
            .bind(("id", id.to_string()))
            .await?
            .check()?;
        let rows: Vec<WitnessRow> = response.take(0)?;
        Ok(rows.into_iter().next().map(|row| row.modified_at))
    }

    /// Other aggregates in `table` that embed any of `child_ids`
    async fn owners_of(
        &self,
        table: &str,
        id: &str,
        child_ids: &[String],
    ) -> Result<Vec<OwnerRow>, StoreError> {
        let mut response = self
            .db
            .query(
                "SELECT doc_id, child_ids FROM type::table($table) \
                 WHERE doc_id != $id AND child_ids CONTAINSANY $children;",
            )
            .bind(("table", table.to_string()))
            .bind(("id", id.to_string()))
            .bind(("children", child_ids.to_vec()))
            .await?
            .check()?;
        Ok(response.take(0)?)
    }

    /// `(table, id)` of every record owned below `doc`
    fn collect_children(&self, ty: &RecordType, doc: &Document, out: &mut Vec<(String, String)>) {
        let schema = self.reflector.schema_of(ty);
        for field in schema.child_fields() {
            let Some(child_ty) = field
                .kind
                .child_record()
                .or_else(|| field.kind.child_collection())
            else {
                continue;
            };
            let children: Vec<&Document> = match doc.get(&field.name) {
                Some(Value::Object(child)) => vec![child],
                Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
                _ => Vec::new(),
            };
            let child_table = self.reflector.schema_of(child_ty).table.clone();
            for child in children {
                if let Some(id) = child.get(ID_FIELD).and_then(Value::as_str) {
                    out.push((child_table.clone(), id.to_string()));
                }
                self.collect_children(child_ty, child, out);
            }
        }
    }
}

/// Render an index plan as SurrealQL
///
/// SurrealDB indexes carry neither column ordering nor include columns;
/// both are dropped with a warning.
fn render_index(plan: &IndexPlan) -> Result<String, StoreError> {
    if !plan.include.is_empty()
        || plan
            .columns
            .iter()
            .any(|c| c.direction == SortDirection::Descending)
    {
        tracing::warn!(
            index = %plan.name,
            "document store ignores index ordering and include columns"
        );
    }
    if plan.unique {
        // Enforced on the lowercased shadow, never on the body field
        return Ok(format!(
            "DEFINE INDEX IF NOT EXISTS {} ON TABLE {} FIELDS {} UNIQUE;",
            plan.name, plan.table, UNIQUE_KEY_FIELD
        ));
    }
    let fields = plan
        .columns
        .iter()
        .map(|c| field_idiom(&c.field))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(
        "DEFINE INDEX IF NOT EXISTS {} ON TABLE {} FIELDS {};",
        plan.name,
        plan.table,
        fields.join(", ")
    ))
}

/// Value at a dotted path; the identity resolves to the document id
fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    match current {
        Value::Null => None,
        other => Some(other),
    }
}

/// Order JSON values: missing first, then by type-specific comparison
fn compare_json_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(va), Some(vb)) => match (va, vb) {
            (Value::String(sa), Value::String(sb)) => sa.cmp(sb),
            (Value::Number(na), Value::Number(nb)) => {
                let fa = na.as_f64().unwrap_or(0.0);
                let fb = nb.as_f64().unwrap_or(0.0);
                fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
            }
            (Value::Bool(ba), Value::Bool(bb)) => ba.cmp(bb),
            // Mixed types or arrays/objects: compare their JSON text
            _ => va.to_string().cmp(&vb.to_string()),
        },
    }
}

fn sort_documents(docs: &mut [Document], sort: &[SortSpec]) {
    docs.sort_by(|a, b| {
        for spec in sort {
            let ordering = compare_json_values(lookup(a, &spec.field), lookup(b, &spec.field));
            let ordering = match spec.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        compare_json_values(a.get(ID_FIELD), b.get(ID_FIELD))
    });
}

/// Map a failed write query, lifting unique-index rejections
fn write_error(table: &str, errors: HashMap<usize, surrealdb::Error>) -> StoreError {
    let mut errors: Vec<_> = errors.into_iter().collect();
    errors.sort_by_key(|(index, _)| *index);

    if let Some((_, err)) = errors
        .iter()
        .find(|(_, e)| e.to_string().contains("already contains"))
    {
        return StoreError::constraint_violation(table, err.to_string());
    }
    match errors.into_iter().next() {
        Some((_, err)) => StoreError::Surreal(err),
        None => StoreError::query_execution("write batch failed without an error"),
    }
}

#[async_trait]
impl RecordStore for SurrealStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Document
    }

    async fn initialize(&self, root: &RecordType) -> Result<(), StoreError> {
        let schema = self.table_of(root)?;
        self.db
            .query(format!(
                "DEFINE TABLE IF NOT EXISTS {} SCHEMALESS;",
                schema.table
            ))
            .await?
            .check()
            .map_err(|e| {
                StoreError::initialization_failed(format!(
                    "Failed to create {} table: {}",
                    schema.table, e
                ))
            })?;

        let mut defined = 0;
        for plan in self.index_manager.plan(root)? {
            // Children are embedded; only root-table indexes apply
            if plan.table != schema.table {
                tracing::debug!(index = %plan.name, "skipping index on embedded records");
                continue;
            }
            self.db
                .query(render_index(&plan)?)
                .await?
                .check()
                .map_err(|e| {
                    StoreError::initialization_failed(format!(
                        "Failed to define index {}: {}",
                        plan.name, e
                    ))
                })?;
            defined += 1;
        }

        tracing::debug!(
            root = root.type_name(),
            indexes = defined,
            "initialized document table"
        );
        Ok(())
    }

    async fn load_graph(
        &self,
        root: &RecordType,
        id: RecordId,
    ) -> Result<Option<Document>, StoreError> {
        let schema = self.table_of(root)?;
        let mut response = self
            .db
            .query("SELECT doc_id, body FROM type::thing($table, $id);")
            .bind(("table", schema.table.clone()))
            .bind(("id", id.to_string()))
            .await?
            .check()?;
        let rows: Vec<StoredAggregate> = response.take(0)?;
        rows.into_iter().next().map(Self::into_document).transpose()
    }

    async fn find(
        &self,
        root: &RecordType,
        query: &StoreQuery,
    ) -> Result<Vec<Document>, StoreError> {
        let schema = self.table_of(root)?;
        let filter = surreal_translate::translate(&query.predicate)?;
        let mut bindings = filter.bindings;
        bindings.insert("table".to_string(), Value::String(schema.table.clone()));

        let mut response = self
            .db
            .query(format!(
                "SELECT doc_id, body FROM type::table($table) WHERE {};",
                filter.clause
            ))
            .bind(bindings)
            .await?
            .check()?;
        let rows: Vec<StoredAggregate> = response.take(0)?;

        let mut docs = rows
            .into_iter()
            .map(Self::into_document)
            .collect::<Result<Vec<_>, _>>()?;
        sort_documents(&mut docs, &query.sort);

        let limit = query.limit.unwrap_or(u64::MAX);
        Ok(docs
            .into_iter()
            .skip(query.offset as usize)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect())
    }

    async fn count(&self, root: &RecordType, predicate: &Expr) -> Result<u64, StoreError> {
        let schema = self.table_of(root)?;
        let filter = surreal_translate::translate(predicate)?;
        let mut bindings = filter.bindings;
        bindings.insert("table".to_string(), Value::String(schema.table.clone()));

        let mut response = self
            .db
            .query(format!(
                "SELECT count() AS count FROM type::table($table) WHERE {} GROUP ALL;",
                filter.clause
            ))
            .bind(bindings)
            .await?
            .check()?;
        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.into_iter().next().map(|row| row.count).unwrap_or(0))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;

        // Witnesses as they will be after the earlier ops of this batch
        let mut seen: HashMap<(String, String), Option<Option<String>>> = HashMap::new();
        // Child ids per aggregate as they will be after the earlier ops
        let mut claimed: HashMap<(String, String), HashSet<String>> = HashMap::new();
        let mut statements = vec!["BEGIN TRANSACTION;".to_string()];
        let mut bindings = Map::new();
        let mut last_table = String::new();

        for (n, op) in batch.ops().iter().enumerate() {
            match op {
                WriteOp::Delete { record, id } => {
                    let schema = self.table_of(record)?;
                    if !schema.is_root {
                        // embedded children go away with their root's body
                        continue;
                    }
                    let key = (schema.table.clone(), id.to_string());
                    bindings.insert(format!("t{}", n), Value::String(key.0.clone()));
                    bindings.insert(format!("i{}", n), Value::String(key.1.clone()));
                    statements.push(format!("DELETE type::thing($t{0}, $i{0});", n));
                    claimed.insert(key.clone(), HashSet::new());
                    seen.insert(key, None);
                    last_table = schema.table.clone();
                }
                WriteOp::Save {
                    root,
                    graph,
                    expected_modified,
                } => {
                    let schema = self.table_of(root)?;
                    let id = graph
                        .get(ID_FIELD)
                        .and_then(Value::as_str)
                        .ok_or_else(|| StoreError::serialization("root without id"))?
                        .to_string();
                    let key = (schema.table.clone(), id.clone());

                    let persisted = match seen.get(&key) {
                        Some(state) => state.clone(),
                        None => self.witness(&key.0, &key.1).await?,
                    };
                    let matches = match (expected_modified, &persisted) {
                        (Some(expected), Some(Some(current))) => expected == current,
                        (None, None) => true,
                        _ => false,
                    };
                    if !matches {
                        return Err(StoreError::concurrency_conflict(schema.table.clone(), id));
                    }

                    let mut children = Vec::new();
                    self.collect_children(root, graph, &mut children);
                    let child_ids: Vec<String> =
                        children.iter().map(|(_, child)| child.clone()).collect();

                    let mut owners: Vec<(String, HashSet<String>)> = claimed
                        .iter()
                        .filter(|((table, owner), _)| *table == key.0 && *owner != id)
                        .map(|((_, owner), owned)| (owner.clone(), owned.clone()))
                        .collect();
                    if !child_ids.is_empty() {
                        for row in self.owners_of(&key.0, &id, &child_ids).await? {
                            // Rewritten earlier in this batch; `claimed` is current
                            if claimed.contains_key(&(key.0.clone(), row.doc_id.clone())) {
                                continue;
                            }
                            owners.push((
                                row.doc_id,
                                row.child_ids.unwrap_or_default().into_iter().collect(),
                            ));
                        }
                    }
                    for (owner, owned) in &owners {
                        if let Some((table, child)) =
                            children.iter().find(|(_, child)| owned.contains(child))
                        {
                            tracing::warn!(
                                table = %table,
                                id = %child,
                                owner = %owner,
                                "child record is embedded in another aggregate"
                            );
                            return Err(StoreError::ownership_conflict(
                                table.clone(),
                                child.clone(),
                            ));
                        }
                    }

                    let mut content = Map::new();
                    content.insert("doc_id".to_string(), Value::String(id.clone()));
                    let modified = document_modified_at(graph).map(str::to_string);
                    content.insert("modified_at".to_string(), json!(modified));
                    if let Some(key_field) = &schema.unique_key {
                        if let Some(unique) = graph.get(key_field).and_then(Value::as_str) {
                            content.insert(
                                UNIQUE_KEY_FIELD.to_string(),
                                Value::String(unique.to_lowercase()),
                            );
                        }
                    }
                    content.insert(CHILD_IDS_FIELD.to_string(), json!(child_ids));
                    content.insert("body".to_string(), Value::Object(graph.clone()));

                    bindings.insert(format!("t{}", n), Value::String(key.0.clone()));
                    bindings.insert(format!("i{}", n), Value::String(id.clone()));
                    bindings.insert(format!("c{}", n), Value::Object(content));
                    claimed.insert(key.clone(), child_ids.into_iter().collect());
                    statements.push(format!(
                        "UPSERT type::thing($t{0}, $i{0}) CONTENT $c{0};",
                        n
                    ));
                    seen.insert(key, Some(modified));
                    last_table = schema.table.clone();
                }
            }
        }

        if statements.len() == 1 {
            return Ok(());
        }
        statements.push("COMMIT TRANSACTION;".to_string());

        let mut response = self
            .db
            .query(statements.join("\n"))
            .bind(bindings)
            .await?;
        let errors = response.take_errors();
        if !errors.is_empty() {
            return Err(write_error(&last_table, errors));
        }

        tracing::debug!(ops = batch.len(), "committed write batch");
        Ok(())
    }
}
