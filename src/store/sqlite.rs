//! Document store on SQLite
//!
//! Each namespace maps to one table `<database>__<collection>` holding the
//! document body as JSON text. Field access goes through SQLite's JSON
//! functions, so filters, sorts and unique indexes work on any document path.

use super::{
    BulkWriteResult, Condition, Document, DocumentId, DocumentStore, FieldPath, FindOptions,
    Filter, IndexSpec, Namespace, SortOrder, WriteError,
};
use crate::error::{DataHubError, Result};
use hashbrown::HashSet;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed document store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    /// Tables known to exist
    tables: Mutex<HashSet<String>>,
}

impl SqliteStore {
    /// Create or open a store at path
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| DataHubError::StoreError(format!("Failed to open database: {}", e)))?;
        Ok(Self::from_connection(conn))
    }

    /// Create in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            DataHubError::StoreError(format!("Failed to create in-memory database: {}", e))
        })?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            tables: Mutex::new(HashSet::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DataHubError::StoreError("Connection lock poisoned".to_string()))
    }

    fn table_name(ns: &Namespace) -> String {
        format!("{}__{}", ns.database, ns.collection)
    }

    fn ensure_table(&self, conn: &Connection, ns: &Namespace) -> Result<String> {
        let table = Self::table_name(ns);
        let mut known = self
            .tables
            .lock()
            .map_err(|_| DataHubError::StoreError("Table cache lock poisoned".to_string()))?;
        if !known.contains(&table) {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    id TEXT PRIMARY KEY,
                    body TEXT NOT NULL
                )",
                table
            ))
            .map_err(|e| {
                DataHubError::StoreError(format!("Failed to create collection {}: {}", ns, e))
            })?;
            known.insert(table.clone());
        }
        Ok(table)
    }

    fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .map_err(|e| DataHubError::StoreError(format!("Failed to inspect schema: {}", e)))?;
        Ok(count > 0)
    }

    fn insert_body(conn: &Connection, table: &str, doc: &Document) -> rusqlite::Result<DocumentId> {
        let id = uuid::Uuid::new_v4();
        let body = doc.as_map();
        let json = serde_json::to_string(body)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        conn.execute(
            &format!("INSERT INTO \"{}\" (id, body) VALUES (?1, ?2)", table),
            params![id.to_string(), json],
        )?;
        Ok(id)
    }

    fn is_constraint_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
        )
    }

    fn parse_body(body: String) -> Result<Document> {
        let value: Value = serde_json::from_str(&body)?;
        Document::from_value(value)
    }
}

/// JSON path literal for SQLite, quoting every key so dots inside keys survive
pub(crate) fn json_path(path: &FieldPath) -> Result<String> {
    let mut out = String::from("$");
    for segment in path.segments() {
        if segment.contains('"') {
            return Err(DataHubError::Validation(format!(
                "Field name '{}' cannot contain a double quote",
                segment
            )));
        }
        out.push_str(".\"");
        out.push_str(segment);
        out.push('"');
    }
    Ok(out)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(x) => Value::from(x),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(_) => Value::Null,
    }
}

/// Translate a filter into a WHERE clause and its bound parameters
fn where_clause(filter: &Filter) -> Result<(String, Vec<SqlValue>)> {
    if filter.is_empty() {
        return Ok((String::new(), Vec::new()));
    }

    let mut parts = Vec::with_capacity(filter.clauses().len());
    let mut params = Vec::new();
    for (path, condition) in filter.clauses() {
        let json = json_path(path)?;
        let part = match condition {
            Condition::Eq(v) => {
                params.push(SqlValue::Text(json));
                params.push(to_sql_value(v));
                "json_extract(body, ?) = ?".to_string()
            }
            Condition::Gte(v) => {
                params.push(SqlValue::Text(json));
                params.push(to_sql_value(v));
                "json_extract(body, ?) >= ?".to_string()
            }
            Condition::Lte(v) => {
                params.push(SqlValue::Text(json));
                params.push(to_sql_value(v));
                "json_extract(body, ?) <= ?".to_string()
            }
            Condition::In(values) if values.is_empty() => "0".to_string(),
            Condition::In(values) => {
                params.push(SqlValue::Text(json));
                params.extend(values.iter().map(to_sql_value));
                format!(
                    "json_extract(body, ?) IN ({})",
                    vec!["?"; values.len()].join(", ")
                )
            }
            Condition::Exists(present) => {
                params.push(SqlValue::Text(json));
                if *present {
                    "json_type(body, ?) IS NOT NULL".to_string()
                } else {
                    "json_type(body, ?) IS NULL".to_string()
                }
            }
        };
        parts.push(part);
    }

    Ok((format!(" WHERE {}", parts.join(" AND ")), params))
}

impl DocumentStore for SqliteStore {
    fn index_names(&self, ns: &Namespace) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let table = Self::table_name(ns);
        let prefix = format!("{}__", table);

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1")
            .map_err(|e| DataHubError::StoreError(format!("Failed to prepare query: {}", e)))?;
        let names = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))
            .map_err(|e| DataHubError::StoreError(format!("Failed to list indexes: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DataHubError::StoreError(format!("Failed to collect indexes: {}", e)))?;

        // Auto-indexes (primary key) are internal to SQLite
        Ok(names
            .into_iter()
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    fn create_index(&self, ns: &Namespace, spec: &IndexSpec) -> Result<()> {
        let conn = self.lock()?;
        let table = self.ensure_table(&conn, ns)?;
        let path = json_path(&spec.field)?;
        let order = match spec.order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        let sql = format!(
            "CREATE {}INDEX IF NOT EXISTS \"{}__{}\" ON \"{}\" (json_extract(body, '{}') {})",
            if spec.unique { "UNIQUE " } else { "" },
            table,
            spec.name(),
            table,
            path.replace('\'', "''"),
            order
        );
        conn.execute_batch(&sql).map_err(|e| {
            DataHubError::StoreError(format!("Failed to create index {} on {}: {}", spec.name(), ns, e))
        })
    }

    fn insert_one(&self, ns: &Namespace, doc: &Document) -> Result<DocumentId> {
        let conn = self.lock()?;
        let table = self.ensure_table(&conn, ns)?;
        Self::insert_body(&conn, &table, doc).map_err(|e| {
            if Self::is_constraint_violation(&e) {
                DataHubError::PersistenceConflict {
                    key: "unique index".to_string(),
                    value: e.to_string(),
                }
            } else {
                DataHubError::StoreError(format!("Failed to insert into {}: {}", ns, e))
            }
        })
    }

    fn insert_many(&self, ns: &Namespace, docs: &[Document], ordered: bool) -> Result<BulkWriteResult> {
        let mut conn = self.lock()?;
        let table = self.ensure_table(&conn, ns)?;
        let tx = conn
            .transaction()
            .map_err(|e| DataHubError::StoreError(format!("Failed to begin transaction: {}", e)))?;

        let mut result = BulkWriteResult::default();
        for (index, doc) in docs.iter().enumerate() {
            match Self::insert_body(&tx, &table, doc) {
                Ok(id) => result.inserted_ids.push(id),
                Err(e) => {
                    let duplicate = Self::is_constraint_violation(&e);
                    if !duplicate {
                        return Err(DataHubError::StoreError(format!(
                            "Failed to insert into {}: {}",
                            ns, e
                        )));
                    }
                    result.write_errors.push(WriteError {
                        index,
                        error: e.to_string(),
                        duplicate,
                    });
                    if ordered {
                        break;
                    }
                }
            }
        }

        tx.commit()
            .map_err(|e| DataHubError::StoreError(format!("Failed to commit batch: {}", e)))?;
        Ok(result)
    }

    fn find(&self, ns: &Namespace, options: &FindOptions) -> Result<Vec<Document>> {
        let conn = self.lock()?;
        let table = Self::table_name(ns);
        if !Self::table_exists(&conn, &table)? {
            return Ok(Vec::new());
        }

        let (clause, mut params) = where_clause(&options.filter)?;
        let mut sql = format!("SELECT body FROM \"{}\"{}", table, clause);
        if let Some((path, order)) = &options.sort {
            params.push(SqlValue::Text(json_path(path)?));
            sql.push_str(match order {
                SortOrder::Ascending => " ORDER BY json_extract(body, ?) ASC",
                SortOrder::Descending => " ORDER BY json_extract(body, ?) DESC",
            });
        }
        sql.push_str(" LIMIT ? OFFSET ?");

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DataHubError::StoreError(format!("Failed to prepare query: {}", e)))?;

        // Pull the cursor in batches until exhausted or the limit is reached
        let mut docs = Vec::new();
        loop {
            let remaining = options.limit.map(|l| l.saturating_sub(docs.len()));
            if remaining == Some(0) {
                break;
            }
            let batch = remaining.map_or(options.batch_size, |r| r.min(options.batch_size));

            let mut batch_params = params.clone();
            batch_params.push(SqlValue::Integer(batch as i64));
            batch_params.push(SqlValue::Integer(docs.len() as i64));

            let bodies = stmt
                .query_map(params_from_iter(batch_params), |row| row.get::<_, String>(0))
                .map_err(|e| DataHubError::StoreError(format!("Failed to query {}: {}", ns, e)))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| DataHubError::StoreError(format!("Failed to read {}: {}", ns, e)))?;

            let fetched = bodies.len();
            for body in bodies {
                let doc = Self::parse_body(body)?;
                docs.push(match &options.projection {
                    Some(projection) => doc.project(projection),
                    None => doc,
                });
            }
            if fetched < batch {
                break;
            }
        }

        Ok(docs)
    }

    fn distinct(&self, ns: &Namespace, path: &FieldPath, filter: &Filter) -> Result<Vec<Value>> {
        let conn = self.lock()?;
        let table = Self::table_name(ns);
        if !Self::table_exists(&conn, &table)? {
            return Ok(Vec::new());
        }

        let (clause, mut params) = where_clause(filter)?;
        params.insert(0, SqlValue::Text(json_path(path)?));
        let sql = format!(
            "SELECT DISTINCT json_extract(body, ?) AS v FROM \"{}\"{} ORDER BY v",
            table, clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DataHubError::StoreError(format!("Failed to prepare query: {}", e)))?;
        let values = stmt
            .query_map(params_from_iter(params), |row| row.get::<_, SqlValue>(0))
            .map_err(|e| DataHubError::StoreError(format!("Failed to query {}: {}", ns, e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DataHubError::StoreError(format!("Failed to read {}: {}", ns, e)))?;

        Ok(values
            .into_iter()
            .map(from_sql_value)
            .filter(|v| !v.is_null())
            .collect())
    }

    fn count(&self, ns: &Namespace, filter: &Filter) -> Result<usize> {
        let conn = self.lock()?;
        let table = Self::table_name(ns);
        if !Self::table_exists(&conn, &table)? {
            return Ok(0);
        }

        let (clause, params) = where_clause(filter)?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM \"{}\"{}", table, clause),
                params_from_iter(params),
                |row| row.get(0),
            )
            .map_err(|e| DataHubError::StoreError(format!("Failed to count {}: {}", ns, e)))?;
        Ok(count as usize)
    }
}
