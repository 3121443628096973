//! Wide tables: dates as rows, tickers (or fields) as columns
//!
//! Tables are derived views over stored documents and are never persisted.
//! Tables produced by the adapters are sorted ascending on both axes.

use crate::error::{DataHubError, Result};
use crate::types::Timestamp;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One cell of a raw table assembled from document values
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Cell {
    #[default]
    Missing,
    Number(f64),
    Text(String),
    Flag(bool),
}

impl Cell {
    /// Convert a JSON scalar into a cell
    pub fn from_json(value: &Value) -> Cell {
        match value {
            Value::Null => Cell::Missing,
            Value::Bool(b) => Cell::Flag(*b),
            Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Missing),
            Value::String(s) => Cell::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => {
                log::debug!("Nested value ignored while assembling table: {}", value);
                Cell::Missing
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(x) if !x.is_nan() => Some(*x),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Cell::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Missing => true,
            Cell::Number(x) => x.is_nan(),
            _ => false,
        }
    }
}

/// Raw assembled table
pub type Frame = Table<Cell>;

/// Dense row-major table indexed by date
#[derive(Debug, Clone, PartialEq)]
pub struct Table<T> {
    index: Vec<Timestamp>,
    columns: Vec<String>,
    data: Vec<Vec<T>>,
}

impl<T: Clone> Table<T> {
    /// Create a table, checking that the data matches the axes
    pub fn new(index: Vec<Timestamp>, columns: Vec<String>, data: Vec<Vec<T>>) -> Result<Self> {
        if data.len() != index.len() {
            return Err(DataHubError::Validation(format!(
                "Table has {} index entries but {} rows",
                index.len(),
                data.len()
            )));
        }
        if let Some(bad) = data.iter().position(|row| row.len() != columns.len()) {
            return Err(DataHubError::Validation(format!(
                "Row {} has {} cells, expected {}",
                bad,
                data[bad].len(),
                columns.len()
            )));
        }
        Ok(Self {
            index,
            columns,
            data,
        })
    }

    /// Table with no rows and no columns
    pub fn empty() -> Self {
        Self {
            index: Vec::new(),
            columns: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Build a sorted table from sparse entries, filling absent cells with `fill`.
    /// Columns are the union of every row's keys.
    pub fn from_entries(entries: BTreeMap<Timestamp, BTreeMap<String, T>>, fill: T) -> Self {
        let columns: Vec<String> = entries
            .values()
            .flat_map(|row| row.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut index = Vec::with_capacity(entries.len());
        let mut data = Vec::with_capacity(entries.len());
        for (date, mut row) in entries {
            index.push(date);
            data.push(
                columns
                    .iter()
                    .map(|col| row.remove(col).unwrap_or_else(|| fill.clone()))
                    .collect(),
            );
        }

        Self {
            index,
            columns,
            data,
        }
    }

    pub fn index(&self) -> &[Timestamp] {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.index.len(), self.columns.len())
    }

    /// Number of cells
    pub fn size(&self) -> usize {
        self.index.len() * self.columns.len()
    }

    /// A table is empty when either axis is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty() || self.columns.is_empty()
    }

    /// Iterate over `(date, row)` pairs
    pub fn rows(&self) -> impl Iterator<Item = (Timestamp, &[T])> + '_ {
        self.index
            .iter()
            .copied()
            .zip(self.data.iter().map(|row| row.as_slice()))
    }

    pub fn row_position(&self, date: Timestamp) -> Option<usize> {
        self.index.iter().position(|d| *d == date)
    }

    pub fn column_position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_position(column).is_some()
    }

    /// Cell at (date, column)
    pub fn get(&self, date: Timestamp, column: &str) -> Option<&T> {
        let row = self.row_position(date)?;
        let col = self.column_position(column)?;
        Some(&self.data[row][col])
    }

    pub fn row_values(&self, date: Timestamp) -> Option<&[T]> {
        self.row_position(date).map(|row| self.data[row].as_slice())
    }

    pub fn column_values(&self, column: &str) -> Option<Vec<T>> {
        let col = self.column_position(column)?;
        Some(self.data.iter().map(|row| row[col].clone()).collect())
    }

    /// Sort rows by date and columns by name
    pub fn sorted(self) -> Self {
        let mut row_order: Vec<usize> = (0..self.index.len()).collect();
        row_order.sort_by_key(|&i| self.index[i]);
        let mut col_order: Vec<usize> = (0..self.columns.len()).collect();
        col_order.sort_by(|&a, &b| self.columns[a].cmp(&self.columns[b]));

        let index = row_order.iter().map(|&i| self.index[i]).collect();
        let columns = col_order.iter().map(|&j| self.columns[j].clone()).collect();
        let data = row_order
            .iter()
            .map(|&i| col_order.iter().map(|&j| self.data[i][j].clone()).collect())
            .collect();

        Self {
            index,
            columns,
            data,
        }
    }

    /// Conform the table to the given axes, filling new cells with `fill`.
    /// Duplicate labels resolve to their first occurrence, as in [`Table::get`].
    pub fn reindex(&self, index: &[Timestamp], columns: &[String], fill: T) -> Self {
        let rows: HashMap<Timestamp, usize> = self
            .index
            .iter()
            .enumerate()
            .rev()
            .map(|(i, d)| (*d, i))
            .collect();
        let cols: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .rev()
            .map(|(j, c)| (c.as_str(), j))
            .collect();
        let col_map: Vec<Option<usize>> = columns
            .iter()
            .map(|c| cols.get(c.as_str()).copied())
            .collect();

        let data = index
            .iter()
            .map(|date| match rows.get(date).copied() {
                Some(row) => col_map
                    .iter()
                    .map(|col| match col {
                        Some(j) => self.data[row][*j].clone(),
                        None => fill.clone(),
                    })
                    .collect(),
                None => vec![fill.clone(); columns.len()],
            })
            .collect();

        Self {
            index: index.to_vec(),
            columns: columns.to_vec(),
            data,
        }
    }

    /// Keep only columns accepted by the predicate
    pub fn retain_columns(self, keep: impl Fn(&str) -> bool) -> Self {
        let kept: Vec<usize> = (0..self.columns.len())
            .filter(|&j| keep(&self.columns[j]))
            .collect();
        if kept.len() == self.columns.len() {
            return self;
        }

        let columns = kept.iter().map(|&j| self.columns[j].clone()).collect();
        let data = self
            .data
            .iter()
            .map(|row| kept.iter().map(|&j| row[j].clone()).collect())
            .collect();

        Self {
            index: self.index,
            columns,
            data,
        }
    }

    /// Drop the first `n` rows
    pub fn skip_rows(&self, n: usize) -> Self {
        let n = n.min(self.index.len());
        Self {
            index: self.index[n..].to_vec(),
            columns: self.columns.clone(),
            data: self.data[n..].to_vec(),
        }
    }

    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> Table<U> {
        Table {
            index: self.index.clone(),
            columns: self.columns.clone(),
            data: self
                .data
                .iter()
                .map(|row| row.iter().map(&f).collect())
                .collect(),
        }
    }

    /// Combine two tables cell by cell. Both must share the same axes.
    pub fn zip_with<U: Clone, V>(&self, other: &Table<U>, f: impl Fn(&T, &U) -> V) -> Result<Table<V>> {
        if self.index != other.index || self.columns != other.columns {
            return Err(DataHubError::Validation(format!(
                "Cannot combine tables of shape {:?} and {:?} with different axes",
                self.shape(),
                other.shape()
            )));
        }
        Ok(Table {
            index: self.index.clone(),
            columns: self.columns.clone(),
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| a.iter().zip(b.iter()).map(|(x, y)| f(x, y)).collect())
                .collect(),
        })
    }
}

impl Table<f64> {
    /// Running product down each column
    pub fn cumprod(&self) -> Self {
        let mut data = self.data.clone();
        for i in 1..data.len() {
            for j in 0..self.columns.len() {
                data[i][j] *= data[i - 1][j];
            }
        }
        Self {
            index: self.index.clone(),
            columns: self.columns.clone(),
            data,
        }
    }

    /// Period-over-period change. No gap filling: a cell is NaN unless both
    /// the current and the previous row hold a value. The first row is NaN.
    pub fn pct_change(&self) -> Self {
        let data = self
            .data
            .iter()
            .enumerate()
            .map(|(i, row)| {
                if i == 0 {
                    return vec![f64::NAN; row.len()];
                }
                row.iter()
                    .zip(self.data[i - 1].iter())
                    .map(|(cur, prev)| {
                        if cur.is_nan() || prev.is_nan() || *prev == 0.0 {
                            f64::NAN
                        } else {
                            cur / prev - 1.0
                        }
                    })
                    .collect()
            })
            .collect();
        Self {
            index: self.index.clone(),
            columns: self.columns.clone(),
            data,
        }
    }

    /// Replace NaN cells with `value`
    pub fn fill_nan(&self, value: f64) -> Self {
        self.map(|x| if x.is_nan() { value } else { *x })
    }

    pub fn last_row(&self) -> Option<&[f64]> {
        self.data.last().map(|row| row.as_slice())
    }

    /// Non-NaN cells of one row keyed by column
    pub fn present_values(&self, date: Timestamp) -> BTreeMap<String, f64> {
        self.row_values(date)
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .filter(|(_, v)| !v.is_nan())
                    .map(|(c, v)| (c.clone(), *v))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Table<bool> {
    pub fn count_true(&self) -> usize {
        self.data
            .iter()
            .map(|row| row.iter().filter(|b| **b).count())
            .sum()
    }

    /// Coordinates of every true cell, row-major
    pub fn true_cells(&self) -> Vec<(Timestamp, String)> {
        self.rows()
            .flat_map(|(date, row)| {
                row.iter()
                    .zip(self.columns.iter())
                    .filter(|(b, _)| **b)
                    .map(move |(_, col)| (date, col.clone()))
            })
            .collect()
    }

    /// Cell-wise OR of two masks on the same axes
    pub fn or(&self, other: &Table<bool>) -> Result<Table<bool>> {
        self.zip_with(other, |a, b| *a || *b)
    }
}

impl Frame {
    /// Numeric view; non-numeric cells become NaN
    pub fn to_numeric(&self) -> Table<f64> {
        self.map(|cell| cell.as_f64().unwrap_or(f64::NAN))
    }

    /// Boolean view; flags map directly, non-zero numbers are true
    pub fn to_mask(&self) -> Table<bool> {
        self.map(|cell| match cell {
            Cell::Flag(b) => *b,
            Cell::Number(x) => !x.is_nan() && *x != 0.0,
            _ => false,
        })
    }
}

/// Reindex every table onto the union of all dates and columns, NaN-filled,
/// so they share one date/ticker shape.
pub fn align_tables(tables: &BTreeMap<String, Table<f64>>) -> BTreeMap<String, Table<f64>> {
    let index: Vec<Timestamp> = tables
        .values()
        .flat_map(|t| t.index().iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let columns: Vec<String> = tables
        .values()
        .flat_map(|t| t.columns().iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    tables
        .iter()
        .map(|(name, table)| (name.clone(), table.reindex(&index, &columns, f64::NAN)))
        .collect()
}
