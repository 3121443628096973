//! Market calendar adapter
//!
//! The `market_status` collection holds one scalar per calendar day:
//! 1 for a trading day, 0 for a weekend, -1 for a holiday.

use super::base::{Selection, TableAssembler, SCALAR_COLUMN};
use crate::error::{DataHubError, Result};
use crate::types::{Direction, MarketStatus, Timestamp, Window};
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;

/// Default scan bound of `closest_trading_date`, in days
pub const DEFAULT_SEARCH_DAYS: u32 = 10;

#[derive(Debug, Clone)]
pub struct MarketCalendarDao {
    assembler: TableAssembler,
    search_days: u32,
}

impl MarketCalendarDao {
    pub fn new(assembler: TableAssembler) -> Self {
        Self {
            assembler,
            search_days: DEFAULT_SEARCH_DAYS,
        }
    }

    pub fn with_search_days(mut self, days: u32) -> Self {
        self.search_days = days;
        self
    }

    pub fn assembler(&self) -> &TableAssembler {
        &self.assembler
    }

    pub fn search_days(&self) -> u32 {
        self.search_days
    }

    /// Stored status of every day in `[start, end]`
    pub fn status_series(&self, start: Timestamp, end: Timestamp) -> Result<BTreeMap<Timestamp, MarketStatus>> {
        let frame = self.assembler.read(Window::range(start, end), &Selection::all())?;
        let Some(col) = frame.column_position(SCALAR_COLUMN) else {
            return Ok(BTreeMap::new());
        };

        let mut series = BTreeMap::new();
        for (date, row) in frame.rows() {
            match row[col].as_f64().and_then(|code| MarketStatus::from_code(code as i64)) {
                Some(status) => {
                    series.insert(date, status);
                }
                None => log::warn!("Unrecognised market status {:?} on {}", row[col], date),
            }
        }
        Ok(series)
    }

    /// Trading days in `[start, end]`, ascending
    pub fn trading_dates_in_range(&self, start: Timestamp, end: Timestamp) -> Result<Vec<Timestamp>> {
        Ok(self
            .status_series(start, end)?
            .into_iter()
            .filter(|(_, status)| *status == MarketStatus::Trading)
            .map(|(date, _)| date)
            .collect())
    }

    pub fn is_trading_date(&self, date: Timestamp) -> Result<bool> {
        Ok(self.status_series(date, date)?.get(&date) == Some(&MarketStatus::Trading))
    }

    /// `date ± search_days`, clipped to the years the storage format can hold
    fn search_window(&self, date: Timestamp) -> Result<(Timestamp, Timestamp)> {
        let out_of_range = || {
            DataHubError::CalendarError(format!(
                "Date {} is outside the storable calendar range",
                date
            ))
        };
        let floor = NaiveDate::from_ymd_opt(1, 1, 1).ok_or_else(out_of_range)?;
        let ceiling = NaiveDate::from_ymd_opt(9999, 12, 31).ok_or_else(out_of_range)?;
        if date < floor || date > ceiling {
            return Err(out_of_range());
        }

        let bound = Duration::days(i64::from(self.search_days));
        let start = date.checked_sub_signed(bound).map_or(floor, |d| d.max(floor));
        let end = date.checked_add_signed(bound).map_or(ceiling, |d| d.min(ceiling));
        Ok((start, end))
    }

    /// Nearest trading day to `date`, scanning one day at a time in `direction`.
    ///
    /// The scan never leaves `date ± search_days`; running off the stored
    /// calendar or past that bound is a `CalendarError`.
    pub fn closest_trading_date(
        &self,
        date: Timestamp,
        direction: Direction,
        include_self: bool,
    ) -> Result<Timestamp> {
        let (start, end) = self.search_window(date)?;
        let series = self.status_series(start, end)?;
        if series.is_empty() {
            return Err(DataHubError::CalendarError(format!(
                "No market status found between {} and {}",
                start, end
            )));
        }

        let step = Duration::days(direction.step());
        let mut current = date;
        if !include_self || series.get(&current) != Some(&MarketStatus::Trading) {
            current += step;
        }

        loop {
            match series.get(&current) {
                Some(MarketStatus::Trading) => return Ok(current),
                Some(_) if current > start && current < end => current += step,
                _ => {
                    return Err(DataHubError::CalendarError(format!(
                        "No trading day found between {} and {}",
                        start, end
                    )))
                }
            }
        }
    }
}
