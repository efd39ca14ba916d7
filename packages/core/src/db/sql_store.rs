//! SqlStore - RecordStore Implementation for libsql
//!
//! Relational backend: one table per record type, children linked to their
//! owner through `parent_id`/`parent_field` and ordered by `position`.
//!
//! # Table layout
//!
//! ```text
//! id            TEXT PRIMARY KEY
//! parent_id     TEXT              -- NULL for roots
//! parent_field  TEXT              -- owning field on the parent
//! position      INTEGER           -- order inside the parent's list
//! body          TEXT              -- JSON of the record's own fields
//! modified_at   TEXT              -- concurrency witness (roots only)
//! ```
//!
//! A record's `body` never contains its children; those are rows of their
//! own tables and are stitched back into the graph on load.
//!
//! # Connections
//!
//! Every operation opens a fresh connection through
//! [`SqlStore::connect_with_timeout`] so the busy timeout is always set on
//! the connection actually used.

use crate::db::error::StoreError;
use crate::db::index_manager::{validate_identifier, IndexManager, IndexPlan};
use crate::db::record_store::{RecordStore, StoreKind, StoreQuery, WriteBatch, WriteOp};
use crate::db::sql_translate::{self, field_sql};
use crate::models::{
    document_modified_at, Document, Expr, RecordId, RecordSchema, RecordType, SortDirection,
    ID_FIELD,
};
use crate::services::Reflector;
use async_trait::async_trait;
use libsql::{Builder, Connection, Database, Row};
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

/// Busy timeout applied to every connection unless configured otherwise
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// libsql-backed record store
pub struct SqlStore {
    db: Arc<Database>,
    db_path: PathBuf,
    busy_timeout_ms: u64,
    reflector: &'static Reflector,
    index_manager: IndexManager,
}

impl SqlStore {
    /// Open (or create) a database file with the default busy timeout
    pub async fn new(db_path: PathBuf) -> Result<Self, StoreError> {
        Self::with_busy_timeout(db_path, DEFAULT_BUSY_TIMEOUT_MS).await
    }

    /// Open (or create) a database file
    ///
    /// Creates the parent directory when missing and switches the database
    /// to WAL journaling.
    pub async fn with_busy_timeout(
        db_path: PathBuf,
        busy_timeout_ms: u64,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| StoreError::connection_failed(db_path.clone(), e.to_string()))?;

        let store = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout_ms,
            reflector: Reflector::global(),
            index_manager: IndexManager::new(),
        };

        let conn = store.connect_with_timeout().await?;
        store
            .execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        tracing::info!(path = %store.db_path.display(), "opened relational store");
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Connect and set the busy timeout on the new connection
    pub async fn connect_with_timeout(&self) -> Result<Connection, StoreError> {
        let conn = self.db.connect().map_err(|e| {
            StoreError::connection_failed(self.db_path.clone(), e.to_string())
        })?;
        self.execute_pragma(
            &conn,
            &format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms),
        )
        .await?;
        Ok(conn)
    }

    /// PRAGMA statements return rows, so they go through query()
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), StoreError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            StoreError::query_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            StoreError::query_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    async fn ddl(&self, conn: &Connection, sql: &str) -> Result<(), StoreError> {
        conn.execute(sql, ())
            .await
            .map_err(|e| StoreError::initialization_failed(format!("{}: {}", sql, e)))?;
        Ok(())
    }

    fn table_of(&self, ty: &RecordType) -> Result<Arc<RecordSchema>, StoreError> {
        let schema = self.reflector.schema_of(ty);
        validate_identifier(&schema.table)?;
        Ok(schema)
    }

    /// Decode an `(id, body)` row
    fn row_document(row: &Row) -> Result<Document, StoreError> {
        let id: String = row.get(0)?;
        let body: String = row.get(1)?;
        let mut doc = match serde_json::from_str(&body)? {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::serialization(format!(
                    "body of record {} is not a JSON object",
                    id
                )))
            }
        };
        doc.insert(ID_FIELD.to_string(), Value::String(id));
        Ok(doc)
    }

    /// A record's own fields, without identity or children
    fn body_of(schema: &RecordSchema, doc: &Document) -> Result<String, StoreError> {
        let mut body = doc.clone();
        body.remove(ID_FIELD);
        for field in schema.child_fields() {
            body.remove(&field.name);
        }
        Ok(serde_json::to_string(&Value::Object(body))?)
    }

    fn load_children<'a>(
        &'a self,
        conn: &'a Connection,
        ty: &'a RecordType,
        doc: &'a mut Document,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let schema = self.reflector.schema_of(ty);
            let parent_id = match doc.get(ID_FIELD).and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => return Ok(()),
            };

            for field in schema.child_fields() {
                let Some(child_ty) = field
                    .kind
                    .child_record()
                    .or_else(|| field.kind.child_collection())
                else {
                    continue;
                };
                let child_schema = self.table_of(child_ty)?;

                let mut rows = conn
                    .query(
                        &format!(
                            "SELECT id, body FROM {} WHERE parent_id = ? AND parent_field = ? \
                             ORDER BY position",
                            child_schema.table
                        ),
                        (parent_id.clone(), field.name.clone()),
                    )
                    .await?;
                let mut children = Vec::new();
                while let Some(row) = rows.next().await? {
                    children.push(Self::row_document(&row)?);
                }
                drop(rows);

                let mut loaded = Vec::with_capacity(children.len());
                for mut child in children {
                    self.load_children(conn, child_ty, &mut child).await?;
                    loaded.push(Value::Object(child));
                }

                let value = if field.kind.child_record().is_some() {
                    loaded.into_iter().next().unwrap_or(Value::Null)
                } else {
                    Value::Array(loaded)
                };
                doc.insert(field.name.clone(), value);
            }
            Ok(())
        })
    }

    fn save_children<'a>(
        &'a self,
        conn: &'a Connection,
        ty: &'a RecordType,
        doc: &'a Document,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let schema = self.reflector.schema_of(ty);
            let parent_id = doc
                .get(ID_FIELD)
                .and_then(Value::as_str)
                .ok_or_else(|| StoreError::serialization("record without id"))?
                .to_string();

            for field in schema.child_fields() {
                let Some(child_ty) = field
                    .kind
                    .child_record()
                    .or_else(|| field.kind.child_collection())
                else {
                    continue;
                };
                let child_schema = self.table_of(child_ty)?;
                let children: Vec<&Document> = match doc.get(&field.name) {
                    Some(Value::Object(child)) => vec![child],
                    Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
                    _ => Vec::new(),
                };

                for (position, child) in children.into_iter().enumerate() {
                    let child_id = child
                        .get(ID_FIELD)
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            StoreError::serialization(format!(
                                "child in {}.{} without id",
                                schema.name, field.name
                            ))
                        })?
                        .to_string();
                    let body = Self::body_of(&child_schema, child)?;

                    // An existing row is only rewritten while it stays under the same parent
                    let changed = conn
                        .execute(
                            &format!(
                                "INSERT INTO {0} (id, parent_id, parent_field, position, body) \
                                 VALUES (?, ?, ?, ?, ?) \
                                 ON CONFLICT(id) DO UPDATE SET parent_field = excluded.parent_field, \
                                 position = excluded.position, body = excluded.body \
                                 WHERE {0}.parent_id = excluded.parent_id",
                                child_schema.table
                            ),
                            (
                                child_id.clone(),
                                parent_id.clone(),
                                field.name.clone(),
                                position as i64,
                                body,
                            ),
                        )
                        .await
                        .map_err(|e| write_error(&child_schema.table, e))?;
                    if changed == 0 {
                        tracing::warn!(
                            table = %child_schema.table,
                            id = %child_id,
                            parent = %parent_id,
                            "child row belongs to another parent"
                        );
                        return Err(StoreError::ownership_conflict(
                            child_schema.table.clone(),
                            child_id,
                        ));
                    }

                    self.save_children(conn, child_ty, child).await?;
                }
            }
            Ok(())
        })
    }

    async fn apply(&self, conn: &Connection, op: &WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::Delete { record, id } => {
                let schema = self.table_of(record)?;
                conn.execute(
                    &format!("DELETE FROM {} WHERE id = ?", schema.table),
                    [id.to_string()],
                )
                .await?;
                Ok(())
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
                let body = Self::body_of(&schema, graph)?;
                let modified = document_modified_at(graph).map(str::to_string);

                let changed = match expected_modified {
                    Some(expected) => conn
                        .execute(
                            &format!(
                                "UPDATE {} SET body = ?, modified_at = ? \
                                 WHERE id = ? AND parent_id IS NULL AND modified_at = ?",
                                schema.table
                            ),
                            (body, modified, id.clone(), expected.clone()),
                        )
                        .await
                        .map_err(|e| write_error(&schema.table, e))?,
                    None => conn
                        .execute(
                            &format!(
                                "INSERT INTO {} (id, parent_id, parent_field, position, body, modified_at) \
                                 VALUES (?, NULL, NULL, 0, ?, ?) ON CONFLICT(id) DO NOTHING",
                                schema.table
                            ),
                            (id.clone(), body, modified),
                        )
                        .await
                        .map_err(|e| write_error(&schema.table, e))?,
                };
                if changed == 0 {
                    return Err(StoreError::concurrency_conflict(schema.table.clone(), id));
                }

                self.save_children(conn, root, graph).await
            }
        }
    }
}

/// Map a write failure, lifting unique-index rejections
fn write_error(table: &str, err: libsql::Error) -> StoreError {
    let message = err.to_string();
    if message.contains("UNIQUE constraint failed") {
        StoreError::constraint_violation(table, message)
    } else {
        StoreError::Libsql(err)
    }
}

/// Render an index plan as SQLite DDL
///
/// SQLite has no INCLUDE clause; include columns become trailing key
/// columns, which still lets the planner answer from the index.
fn render_index(plan: &IndexPlan) -> Result<String, StoreError> {
    if plan.unique {
        let columns = plan
            .columns
            .iter()
            .map(|c| field_sql(&c.field).map(|f| format!("lower({})", f)))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {}({}) WHERE parent_id IS NULL",
            plan.name,
            plan.table,
            columns.join(", ")
        ));
    }

    let mut columns = Vec::with_capacity(plan.columns.len() + plan.include.len());
    for column in &plan.columns {
        let direction = match column.direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        columns.push(format!("{} {}", field_sql(&column.field)?, direction));
    }
    for field in &plan.include {
        columns.push(field_sql(field)?);
    }
    Ok(format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}({})",
        plan.name,
        plan.table,
        columns.join(", ")
    ))
}

#[async_trait]
impl RecordStore for SqlStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Relational
    }

    async fn initialize(&self, root: &RecordType) -> Result<(), StoreError> {
        let conn = self.connect_with_timeout().await?;

        for ty in self.reflector.record_types(root) {
            let schema = self.table_of(&ty)?;
            self.ddl(
                &conn,
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        id TEXT PRIMARY KEY,
                        parent_id TEXT,
                        parent_field TEXT,
                        position INTEGER NOT NULL DEFAULT 0,
                        body TEXT NOT NULL,
                        modified_at TEXT
                    )",
                    schema.table
                ),
            )
            .await?;
            self.ddl(
                &conn,
                &format!(
                    "CREATE INDEX IF NOT EXISTS idx_{0}_parent ON {0}(parent_id, parent_field, position)",
                    schema.table
                ),
            )
            .await?;
        }

        let plans = self.index_manager.plan(root)?;
        for plan in &plans {
            self.ddl(&conn, &render_index(plan)?).await?;
        }

        tracing::debug!(
            root = root.type_name(),
            indexes = plans.len(),
            "initialized relational tables"
        );
        Ok(())
    }

    async fn load_graph(
        &self,
        root: &RecordType,
        id: RecordId,
    ) -> Result<Option<Document>, StoreError> {
        let schema = self.table_of(root)?;
        let conn = self.connect_with_timeout().await?;

        let mut rows = conn
            .query(
                &format!(
                    "SELECT id, body FROM {} WHERE id = ? AND parent_id IS NULL",
                    schema.table
                ),
                [id.to_string()],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let mut doc = Self::row_document(&row)?;
        drop(rows);

        self.load_children(&conn, root, &mut doc).await?;
        Ok(Some(doc))
    }

    async fn find(
        &self,
        root: &RecordType,
        query: &StoreQuery,
    ) -> Result<Vec<Document>, StoreError> {
        let schema = self.table_of(root)?;
        let filter = sql_translate::translate(&query.predicate)?;
        let order = sql_translate::order_by(&query.sort)?;

        let mut sql = format!(
            "SELECT id, body FROM {} WHERE parent_id IS NULL AND ({}) ORDER BY {}",
            schema.table, filter.clause, order
        );
        let mut params = filter.params;
        match query.limit {
            Some(limit) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                params.push(libsql::Value::Integer(limit as i64));
                params.push(libsql::Value::Integer(query.offset as i64));
            }
            None if query.offset > 0 => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(libsql::Value::Integer(query.offset as i64));
            }
            None => {}
        }

        let conn = self.connect_with_timeout().await?;
        let mut rows = conn.query(&sql, params).await?;
        let mut roots = Vec::new();
        while let Some(row) = rows.next().await? {
            roots.push(Self::row_document(&row)?);
        }
        drop(rows);

        for doc in roots.iter_mut() {
            self.load_children(&conn, root, doc).await?;
        }
        Ok(roots)
    }

    async fn count(&self, root: &RecordType, predicate: &Expr) -> Result<u64, StoreError> {
        let schema = self.table_of(root)?;
        let filter = sql_translate::translate(predicate)?;
        let conn = self.connect_with_timeout().await?;

        let mut rows = conn
            .query(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE parent_id IS NULL AND ({})",
                    schema.table, filter.clause
                ),
                filter.params,
            )
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let conn = self.connect_with_timeout().await?;

        conn.execute("BEGIN IMMEDIATE TRANSACTION", ())
            .await
            .map_err(|e| {
                StoreError::query_execution(format!("Failed to begin transaction: {}", e))
            })?;

        for op in batch.ops() {
            if let Err(e) = self.apply(&conn, op).await {
                let _rollback = conn.execute("ROLLBACK", ()).await;
                tracing::debug!(error = %e, "rolled back write batch");
                return Err(e);
            }
        }

        if let Err(e) = conn.execute("COMMIT", ()).await {
            let _rollback = conn.execute("ROLLBACK", ()).await;
            return Err(StoreError::query_execution(format!(
                "Failed to commit transaction: {}",
                e
            )));
        }

        tracing::debug!(ops = batch.len(), "committed write batch");
        Ok(())
    }
}
