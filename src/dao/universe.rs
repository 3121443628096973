//! Universe membership adapter
//!
//! Each document lists the tickers that belonged to a universe on its date.
//! Reads stack those lists into a boolean membership table.

use super::base::{Selection, TableAssembler, Transform};
use crate::error::Result;
use crate::store::{FindOptions, Filter, Projection, SortOrder};
use crate::table::{Cell, Frame, Table};
use crate::types::{Window, TIMESTAMP_FIELD, VALUES_FIELD};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Delisted tickers carry a numeric suffix that makes them at least this long
const DELISTED_MIN_LEN: usize = 8;

pub fn is_delisted(ticker: &str) -> bool {
    ticker.chars().count() >= DELISTED_MIN_LEN
}

/// Stack per-date ticker lists into a flag matrix over every ticker seen
pub fn membership_transform(exclude_delisted: bool) -> Transform {
    Arc::new(move |raw: Frame| -> Result<Frame> {
        let mut entries: BTreeMap<_, BTreeMap<String, Cell>> = BTreeMap::new();
        for (date, row) in raw.rows() {
            let listed = entries.entry(date).or_default();
            for ticker in row.iter().filter_map(Cell::as_text) {
                if exclude_delisted && is_delisted(ticker) {
                    continue;
                }
                listed.insert(ticker.to_string(), Cell::Flag(true));
            }
        }
        Ok(Frame::from_entries(entries, Cell::Flag(false)))
    })
}

/// Adapter over one universe collection
#[derive(Debug, Clone)]
pub struct UniverseDao {
    assembler: TableAssembler,
}

impl UniverseDao {
    pub fn new(assembler: TableAssembler) -> Self {
        Self {
            assembler: assembler.with_transform(membership_transform(false)),
        }
    }

    pub fn assembler(&self) -> &TableAssembler {
        &self.assembler
    }

    /// Membership over a window: cell (d, t) is true iff t was listed on d
    pub fn membership_table(&self, window: Window, exclude_delisted: bool) -> Result<Table<bool>> {
        let frame = if exclude_delisted {
            self.assembler
                .clone()
                .with_transform(membership_transform(true))
                .read(window, &Selection::all())?
        } else {
            self.assembler.read(window, &Selection::all())?
        };
        Ok(frame.to_mask())
    }

    /// Sorted union of every ticker listed in the window
    pub fn tickers(&self, window: Window) -> Result<Vec<String>> {
        let options = match window {
            Window::Range { start, end } => {
                FindOptions::new(Filter::new().timestamp_between(start, end))
            }
            Window::Recent { count, end } => {
                let filter = match end {
                    Some(end) => Filter::new().timestamp_until(end),
                    None => Filter::new(),
                };
                FindOptions::new(filter).limit(count)
            }
        }
        .projection(Projection::new().field(VALUES_FIELD))
        .sort(TIMESTAMP_FIELD, SortOrder::Descending);

        let docs = self
            .assembler
            .store()
            .find(self.assembler.namespace(), &options)?;

        let tickers: BTreeSet<String> = docs
            .iter()
            .filter_map(|doc| doc.values().and_then(Value::as_array))
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        Ok(tickers.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Document, Namespace, SqliteStore};
    use chrono::NaiveDate;
    use serde_json::json;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn universe() -> UniverseDao {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let dao = UniverseDao::new(TableAssembler::new(
            store,
            Namespace::new("Universe", "univ_spx500").unwrap(),
        ));
        dao.assembler()
            .insert_many(
                &[
                    Document::series(d(2), json!(["AAPL", "MSFT"])),
                    Document::series(d(3), json!(["AAPL", "1234567D"])),
                    Document::series(d(4), json!(["MSFT", "TSLA"])),
                ],
                Some(TIMESTAMP_FIELD),
            )
            .unwrap();
        dao
    }

    #[test]
    fn test_membership_matrix() {
        let table = universe()
            .membership_table(Window::range(d(2), d(3)), false)
            .unwrap();
        assert_eq!(
            table.columns(),
            &["1234567D".to_string(), "AAPL".to_string(), "MSFT".to_string()]
        );
        assert!(*table.get(d(3), "1234567D").unwrap());
        assert!(!*table.get(d(3), "MSFT").unwrap());
        assert!(*table.get(d(2), "MSFT").unwrap());
    }

    #[test]
    fn test_exclude_delisted() {
        let table = universe()
            .membership_table(Window::range(d(2), d(4)), true)
            .unwrap();
        assert!(!table.has_column("1234567D"));
        assert_eq!(table.shape(), (3, 3));
    }

    #[test]
    fn test_tickers_by_window() {
        let dao = universe();
        assert_eq!(
            dao.tickers(Window::range(d(3), d(4))).unwrap(),
            vec!["1234567D", "AAPL", "MSFT", "TSLA"]
        );
        assert_eq!(dao.tickers(Window::recent(1)).unwrap(), vec!["MSFT", "TSLA"]);
        assert_eq!(
            dao.tickers(Window::Recent { count: 1, end: Some(d(2)) }).unwrap(),
            vec!["AAPL", "MSFT"]
        );
        assert!(dao.tickers(Window::range(d(10), d(20))).unwrap().is_empty());
    }

    #[test]
    fn test_empty_window_gives_empty_table() {
        let table = universe()
            .membership_table(Window::range(d(10), d(20)), false)
            .unwrap();
        assert!(table.is_empty());
    }
}
