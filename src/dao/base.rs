//! Table assembler: maps one collection of date-keyed documents to a wide table

use crate::error::{DataHubError, Result};
use crate::store::{
    Document, DocumentId, DocumentStore, FieldPath, Filter, FindOptions, IndexSpec, Namespace,
    Projection, SortOrder,
};
use crate::table::{Cell, Frame};
use crate::types::{parse_timestamp, Timestamp, Window, TIMESTAMP_FIELD};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Post-assembly hook turning the raw frame into the adapter's table
pub type Transform = Arc<dyn Fn(Frame) -> Result<Frame> + Send + Sync>;

/// Transform that returns the raw frame unchanged
pub fn identity_transform() -> Transform {
    Arc::new(|frame: Frame| -> Result<Frame> { Ok(frame) })
}

/// Column name of a scalar-valued series
pub const SCALAR_COLUMN: &str = "value";

/// Optional filter and projection for a read. Empty parts mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    filter: Option<Filter>,
    projection: Option<Projection>,
}

impl Selection {
    /// No filter, every field
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict `values` to the given tickers
    pub fn tickers<S: AsRef<str>>(tickers: &[S]) -> Self {
        Self::all().with_projection(Projection::value_keys(tickers))
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = (!filter.is_empty()).then_some(filter);
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = (!projection.is_empty()).then_some(projection);
        self
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }
}

/// Binds one (database, collection) pair and assembles its documents into tables
#[derive(Clone)]
pub struct TableAssembler {
    store: Arc<dyn DocumentStore>,
    namespace: Namespace,
    transform: Transform,
    batch_size: usize,
}

impl fmt::Debug for TableAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableAssembler")
            .field("namespace", &self.namespace)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl TableAssembler {
    pub fn new(store: Arc<dyn DocumentStore>, namespace: Namespace) -> Self {
        Self {
            store,
            namespace,
            transform: identity_transform(),
            batch_size: 1000,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Ensure a unique descending index on `key`, created at most once
    pub fn ensure_unique_index(&self, key: &str) -> Result<()> {
        let spec = IndexSpec::unique(key, SortOrder::Descending);
        let name = spec.name();
        if self.store.index_names(&self.namespace)?.contains(&name) {
            log::debug!("Index {} already exists on {}. Skipping creation.", name, self.namespace);
            return Ok(());
        }
        self.store.create_index(&self.namespace, &spec)?;
        log::info!("Index {} created on {}", name, self.namespace);
        Ok(())
    }

    /// Insert one document. With a dedup key, a duplicate is skipped and
    /// `None` is returned.
    pub fn insert_one(&self, doc: &Document, dedup_key: Option<&str>) -> Result<Option<DocumentId>> {
        if let Some(key) = dedup_key {
            self.ensure_unique_index(key)?;
            if !doc.contains(key) {
                log::warn!("Document without dedup key '{}' skipped in {}", key, self.namespace);
                return Ok(None);
            }
        }

        match self.store.insert_one(&self.namespace, doc) {
            Ok(id) => Ok(Some(id)),
            Err(e) if e.is_conflict() => {
                let conflict = DataHubError::PersistenceConflict {
                    key: dedup_key.unwrap_or_default().to_string(),
                    value: dedup_value(doc, dedup_key),
                };
                log::warn!("{} in {}. Skipping insert.", conflict, self.namespace);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Unordered bulk insert. With a dedup key, documents lacking the key are
    /// dropped and duplicates are skipped while the rest of the batch commits.
    pub fn insert_many(&self, docs: &[Document], dedup_key: Option<&str>) -> Result<Vec<DocumentId>> {
        let to_insert: Vec<Document> = match dedup_key {
            Some(key) => {
                self.ensure_unique_index(key)?;
                docs.iter().filter(|d| d.contains(key)).cloned().collect()
            }
            None => docs.to_vec(),
        };

        if to_insert.is_empty() {
            log::warn!("No documents to insert into {}", self.namespace);
            return Ok(Vec::new());
        }

        let result = self.store.insert_many(&self.namespace, &to_insert, false)?;
        for error in &result.write_errors {
            if error.duplicate {
                let conflict = DataHubError::PersistenceConflict {
                    key: dedup_key.unwrap_or_default().to_string(),
                    value: dedup_value(&to_insert[error.index], dedup_key),
                };
                log::warn!("{} in {}. Skipping insert.", conflict, self.namespace);
            } else {
                log::warn!("Write error in {}: {}", self.namespace, error.error);
            }
        }
        log::debug!(
            "Inserted {}/{} documents into {}",
            result.inserted_ids.len(),
            to_insert.len(),
            self.namespace
        );
        Ok(result.inserted_ids)
    }

    /// Every document with a timestamp in `[start, end]`
    pub fn get_by_date_range(
        &self,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
        selection: &Selection,
    ) -> Result<Frame> {
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(DataHubError::validation(
                    "start and end must both be timestamps for a date range read",
                ))
            }
        };
        if start > end {
            log::debug!("Empty range {} > {} on {}", start, end, self.namespace);
            return Ok(Frame::empty());
        }

        let mut filter = Filter::new().timestamp_between(start, end);
        if let Some(extra) = selection.filter() {
            filter = filter.merge(extra);
        }
        self.execute(self.find_options(filter, selection))
    }

    /// The `count` most recent documents at or before `end`
    pub fn get_by_count(
        &self,
        count: Option<usize>,
        end: Option<Timestamp>,
        selection: &Selection,
    ) -> Result<Frame> {
        let count = match count {
            Some(0) => return Err(DataHubError::validation("count must be greater than 0")),
            Some(count) => count,
            None => return Err(DataHubError::validation("count is required for a count read")),
        };

        let mut filter = match end {
            Some(end) => Filter::new().timestamp_until(end),
            None => Filter::new(),
        };
        if let Some(extra) = selection.filter() {
            filter = filter.merge(extra);
        }
        self.execute(self.find_options(filter, selection).limit(count))
    }

    /// Dispatch on a resolved window
    pub fn read(&self, window: Window, selection: &Selection) -> Result<Frame> {
        match window {
            Window::Range { start, end } => self.get_by_date_range(Some(start), Some(end), selection),
            Window::Recent { count, end } => self.get_by_count(Some(count), end, selection),
        }
    }

    /// Timestamp of the most recent document
    pub fn latest_timestamp(&self) -> Result<Option<Timestamp>> {
        let latest = self.store.find_one(
            &self.namespace,
            &Filter::new(),
            Some((FieldPath::from(TIMESTAMP_FIELD), SortOrder::Descending)),
        )?;
        Ok(latest.and_then(|doc| doc.timestamp()))
    }

    /// Distinct document timestamps in `[start, end]`
    pub fn timestamps_between(&self, start: Timestamp, end: Timestamp) -> Result<BTreeSet<Timestamp>> {
        let values = self.store.distinct(
            &self.namespace,
            &FieldPath::from(TIMESTAMP_FIELD),
            &Filter::new().timestamp_between(start, end),
        )?;
        values
            .iter()
            .filter_map(Value::as_str)
            .map(parse_timestamp)
            .collect()
    }

    fn find_options(&self, filter: Filter, selection: &Selection) -> FindOptions {
        let mut options = FindOptions::new(filter)
            .sort(TIMESTAMP_FIELD, SortOrder::Descending)
            .batch_size(self.batch_size);
        if let Some(projection) = selection.projection() {
            options = options.projection(projection.clone().with_timestamp());
        }
        options
    }

    fn execute(&self, options: FindOptions) -> Result<Frame> {
        let docs = self.store.find(&self.namespace, &options)?;
        if docs.is_empty() {
            log::info!("No documents matched query on {}", self.namespace);
            return Ok(Frame::empty());
        }

        let raw = assemble_rows(&docs);
        let table = (self.transform)(raw)?;
        Ok(table.retain_columns(|c| !is_null_key(c)).sorted())
    }
}

/// Expand each document's `values` into one row
fn assemble_rows(docs: &[Document]) -> Frame {
    let mut entries: BTreeMap<Timestamp, BTreeMap<String, Cell>> = BTreeMap::new();
    for doc in docs {
        let Some(timestamp) = doc.timestamp() else {
            log::debug!("Skipping document without a valid timestamp");
            continue;
        };
        let row: BTreeMap<String, Cell> = match doc.values() {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), Cell::from_json(v)))
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), Cell::from_json(v)))
                .collect(),
            Some(scalar) => BTreeMap::from([(SCALAR_COLUMN.to_string(), Cell::from_json(scalar))]),
            None => BTreeMap::new(),
        };
        entries.entry(timestamp).or_default().extend(row);
    }
    Frame::from_entries(entries, Cell::Missing)
}

/// Column names that stand for a missing key
fn is_null_key(name: &str) -> bool {
    let name = name.trim();
    name.is_empty()
        || name.eq_ignore_ascii_case("nan")
        || name.eq_ignore_ascii_case("null")
        || name.eq_ignore_ascii_case("none")
}

fn dedup_value(doc: &Document, key: Option<&str>) -> String {
    key.and_then(|k| doc.get(k))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}
