//! Document store abstraction
//!
//! Durability, indexing and query execution are delegated to a document
//! store. Documents are JSON objects grouped into collections, and
//! collections are grouped into databases.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::{DataHubError, Result};
use crate::types::{format_created_at, format_timestamp, Timestamp, CREATED_AT_FIELD, TIMESTAMP_FIELD, VALUES_FIELD};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Unique identifier assigned by the store on insert
pub type DocumentId = uuid::Uuid;

/// A (database, collection) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    /// Create a namespace. Names are restricted to ASCII alphanumerics and `_`.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Result<Self> {
        let ns = Self {
            database: database.into(),
            collection: collection.into(),
        };
        for name in [&ns.database, &ns.collection] {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(DataHubError::Validation(format!(
                    "Invalid namespace component '{}'",
                    name
                )));
            }
        }
        Ok(ns)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Path to a (possibly nested) document field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Path to one key inside the `values` payload. Keys may contain dots.
    pub fn value_key(key: &str) -> Self {
        Self(vec![VALUES_FIELD.to_string(), key.to_string()])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for FieldPath {
    /// Dotted notation, e.g. `"values.gics_sector"`
    fn from(path: &str) -> Self {
        Self(path.split('.').map(str::to_string).collect())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// A JSON document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// A time-series document: `{timestamp, created_at, values}`
    pub fn series(timestamp: Timestamp, values: impl Into<Value>) -> Self {
        Self::new()
            .with(TIMESTAMP_FIELD, format_timestamp(timestamp))
            .with(CREATED_AT_FIELD, format_created_at(Utc::now()))
            .with(VALUES_FIELD, values)
    }

    /// Builder-style field setter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a nested field
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let mut current = self.0.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Data date of a series document
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.0
            .get(TIMESTAMP_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| NaiveDate::parse_from_str(s, crate::types::DATE_FORMAT).ok())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.0
            .get(CREATED_AT_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn values(&self) -> Option<&Value> {
        self.0.get(VALUES_FIELD)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Wrap a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(DataHubError::Validation(format!(
                "Document must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Copy of this document keeping only the projected paths
    pub fn project(&self, projection: &Projection) -> Document {
        let mut out = Document::new();
        for path in projection.paths() {
            if let Some(value) = self.get_path(path) {
                set_path(&mut out.0, path.segments(), value.clone());
            }
        }
        out
    }
}

fn set_path(map: &mut Map<String, Value>, segments: &[String], value: Value) {
    match segments {
        [] => {}
        [last] => {
            map.insert(last.clone(), value);
        }
        [first, rest @ ..] => {
            let child = map
                .entry(first.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child_map) = child {
                set_path(child_map, rest, value);
            }
        }
    }
}

/// Predicate on one field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Gte(Value),
    Lte(Value),
    In(Vec<Value>),
    Exists(bool),
}

/// Conjunction of field conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(FieldPath, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<FieldPath>, condition: Condition) -> Self {
        self.clauses.push((path.into(), condition));
        self
    }

    pub fn eq(self, path: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        self.with(path, Condition::Eq(value.into()))
    }

    pub fn gte(self, path: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        self.with(path, Condition::Gte(value.into()))
    }

    pub fn lte(self, path: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        self.with(path, Condition::Lte(value.into()))
    }

    pub fn is_in<V: Into<Value>>(self, path: impl Into<FieldPath>, values: impl IntoIterator<Item = V>) -> Self {
        self.with(path, Condition::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn exists(self, path: impl Into<FieldPath>, present: bool) -> Self {
        self.with(path, Condition::Exists(present))
    }

    /// Inclusive timestamp range
    pub fn timestamp_between(self, start: Timestamp, end: Timestamp) -> Self {
        self.gte(TIMESTAMP_FIELD, format_timestamp(start))
            .lte(TIMESTAMP_FIELD, format_timestamp(end))
    }

    /// Timestamp at or before `end`
    pub fn timestamp_until(self, end: Timestamp) -> Self {
        self.lte(TIMESTAMP_FIELD, format_timestamp(end))
    }

    /// Merge another filter in. Clauses of `other` replace clauses of `self`
    /// on the same field.
    pub fn merge(mut self, other: &Filter) -> Self {
        for (path, _) in &other.clauses {
            self.clauses.retain(|(p, _)| p != path);
        }
        self.clauses.extend(other.clauses.iter().cloned());
        self
    }

    pub fn clauses(&self) -> &[(FieldPath, Condition)] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Set of field paths to return
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    paths: Vec<FieldPath>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, path: impl Into<FieldPath>) -> Self {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
        self
    }

    /// Restrict `values` to the given keys
    pub fn value_keys<S: AsRef<str>>(keys: &[S]) -> Self {
        keys.iter()
            .fold(Self::new(), |p, key| p.field(FieldPath::value_key(key.as_ref())))
    }

    /// Same projection, guaranteed to retain the timestamp field
    pub fn with_timestamp(self) -> Self {
        self.field(TIMESTAMP_FIELD)
    }

    pub fn paths(&self) -> &[FieldPath] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    /// Conventional index-direction suffix (1 / -1)
    pub fn direction(self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

/// Query parameters for `DocumentStore::find`
#[derive(Debug, Clone)]
pub struct FindOptions {
    pub filter: Filter,
    pub projection: Option<Projection>,
    pub sort: Option<(FieldPath, SortOrder)>,
    pub limit: Option<usize>,
    pub batch_size: usize,
}

impl FindOptions {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            projection: None,
            sort: None,
            limit: None,
            batch_size: 1000,
        }
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn sort(mut self, path: impl Into<FieldPath>, order: SortOrder) -> Self {
        self.sort = Some((path.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Single-field index definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub field: FieldPath,
    pub order: SortOrder,
    pub unique: bool,
}

impl IndexSpec {
    pub fn unique(field: impl Into<FieldPath>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
            unique: true,
        }
    }

    /// Name derived from the field and direction, e.g. `timestamp_-1`
    pub fn name(&self) -> String {
        format!("{}_{}", self.field.segments().join("_"), self.order.direction())
    }
}

/// One rejected document of a bulk insert
#[derive(Debug, Clone, PartialEq)]
pub struct WriteError {
    /// Position of the document in the submitted batch
    pub index: usize,
    pub error: String,
    pub duplicate: bool,
}

/// Outcome of an unordered bulk insert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteResult {
    pub inserted_ids: Vec<DocumentId>,
    pub write_errors: Vec<WriteError>,
}

/// Backing document store
pub trait DocumentStore: Send + Sync {
    /// Names of indexes defined on a collection
    fn index_names(&self, ns: &Namespace) -> Result<Vec<String>>;

    /// Create an index (no-op when an index with the same name exists)
    fn create_index(&self, ns: &Namespace, spec: &IndexSpec) -> Result<()>;

    /// Insert one document; a unique-index violation is `PersistenceConflict`
    fn insert_one(&self, ns: &Namespace, doc: &Document) -> Result<DocumentId>;

    /// Insert many documents. With `ordered == false` every document is
    /// attempted and failures are reported per document.
    fn insert_many(&self, ns: &Namespace, docs: &[Document], ordered: bool) -> Result<BulkWriteResult>;

    fn find(&self, ns: &Namespace, options: &FindOptions) -> Result<Vec<Document>>;

    fn find_one(
        &self,
        ns: &Namespace,
        filter: &Filter,
        sort: Option<(FieldPath, SortOrder)>,
    ) -> Result<Option<Document>> {
        let mut options = FindOptions::new(filter.clone()).limit(1);
        options.sort = sort;
        Ok(self.find(ns, &options)?.into_iter().next())
    }

    /// Distinct non-null values of a field among matching documents
    fn distinct(&self, ns: &Namespace, path: &FieldPath, filter: &Filter) -> Result<Vec<Value>>;

    fn count(&self, ns: &Namespace, filter: &Filter) -> Result<usize>;
}
