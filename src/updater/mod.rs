//! Ingestion
//!
//! Pulls raw data from a [`MarketDataProvider`] and writes it through the
//! data manager's assemblers. Every write declares `timestamp` as its dedup
//! key, so re-running a routine over a populated window stores nothing new.

pub mod provider;

pub use provider::{fan_out, provider_failure, DividendKind, MarketDataProvider, TickerValues};

use crate::adjustments::daily_returns;
use crate::error::{DataHubError, Result};
use crate::manager::registry::{
    CLOSE, EX_DIVIDEND, HIGH, LOW, MARKET_STATUS, OPEN, SHARES_OUTSTANDING, STOCK_SPLIT,
    UNIV_US_STOCK, VOLUME,
};
use crate::manager::{DataManager, ItemQuery};
use crate::store::Document;
use crate::types::{AdjustMethod, Direction, Timestamp, TIMESTAMP_FIELD};
use chrono::{Datelike, Duration, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const BAR_FIELDS: [&str; 5] = [OPEN, HIGH, LOW, CLOSE, VOLUME];

/// Outcome of one ingestion routine for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub item: String,
    /// Documents handed to the store
    pub submitted: usize,
    /// Documents actually stored (duplicates excluded)
    pub inserted: usize,
}

impl IngestSummary {
    fn empty(item: &str) -> Self {
        Self {
            item: item.to_string(),
            submitted: 0,
            inserted: 0,
        }
    }
}

/// Which price a daily return is computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    CloseToClose,
    OpenToOpen,
}

impl ReturnKind {
    pub fn item(self) -> &'static str {
        match self {
            ReturnKind::CloseToClose => crate::manager::registry::C2C_RET,
            ReturnKind::OpenToOpen => crate::manager::registry::O2O_RET,
        }
    }

    pub fn price_item(self) -> &'static str {
        match self {
            ReturnKind::CloseToClose => CLOSE,
            ReturnKind::OpenToOpen => OPEN,
        }
    }
}

/// Writes provider data into the hub
pub struct Updater {
    manager: DataManager,
    provider: Arc<dyn MarketDataProvider>,
}

impl Updater {
    pub fn new(manager: DataManager, provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { manager, provider }
    }

    pub fn manager(&self) -> &DataManager {
        &self.manager
    }

    /// Daily OHLCV bars, one document per field and date
    pub fn update_price_volume(
        &self,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<Vec<IngestSummary>> {
        let start = self.resolve_start(CLOSE, start)?;
        let end = end.unwrap_or_else(today);
        if start > end {
            log::info!("Price/volume already up to date ({} > {})", start, end);
            return Ok(BAR_FIELDS.iter().map(|f| IngestSummary::empty(f)).collect());
        }

        let days: Vec<Timestamp> = start.iter_days().take_while(|d| *d <= end).collect();
        log::info!(
            "Fetching daily bars for {} days from {} ({} ~ {})",
            days.len(),
            self.provider.name(),
            start,
            end
        );
        let bars = fan_out(days, self.manager.config().provider_launch_delay(), |date| {
            self.provider.daily_bars(*date)
        });

        BAR_FIELDS
            .iter()
            .map(|field| {
                let by_date: BTreeMap<Timestamp, TickerValues> = bars
                    .iter()
                    .filter_map(|(date, fields)| Some((*date, fields.get(*field)?.clone())))
                    .collect();
                self.write(field, series_documents(&by_date))
            })
            .collect()
    }

    /// Market calendar entries newer than the latest stored day
    pub fn update_market_status(&self) -> Result<IngestSummary> {
        let calendar = self.provider_data("market status", self.provider.market_status());
        let latest = self.manager.latest_data_date(MARKET_STATUS);

        let docs: Vec<Document> = calendar
            .into_iter()
            .filter(|(date, _)| latest.map_or(true, |latest| *date > latest))
            .map(|(date, status)| Document::series(date, status.code()))
            .collect();
        if docs.is_empty() {
            log::info!("Market status already up to date");
            return Ok(IngestSummary::empty(MARKET_STATUS));
        }
        self.write(MARKET_STATUS, docs)
    }

    pub fn update_stock_splits(
        &self,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<IngestSummary> {
        let start = self.resolve_start(STOCK_SPLIT, start)?;
        let end = end.unwrap_or_else(today);
        let splits = self.provider_data("stock splits", self.provider.stock_splits(start, end));
        self.write(STOCK_SPLIT, series_documents(&splits))
    }

    pub fn update_cash_dividends(
        &self,
        kind: DividendKind,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<IngestSummary> {
        let item = kind.item();
        let start = self.resolve_start(item, start)?;
        let end = end.unwrap_or_else(today);
        let dividends = self.provider_data(item, self.provider.cash_dividends(kind, start, end));
        if dividends.is_empty() {
            log::info!("No {} data between {} and {}", item, start, end);
        }
        self.write(item, series_documents(&dividends))
    }

    /// Split- and dividend-adjusted daily returns derived from stored prices.
    ///
    /// The default start is the latest stored return date itself: the price
    /// on that day is the reference for the first new return.
    pub fn update_daily_returns(
        &self,
        kind: ReturnKind,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<IngestSummary> {
        let item = kind.item();
        let start = match start {
            Some(start) => start,
            None => self.manager.latest_data_date(item).ok_or_else(|| missing_start(item))?,
        };
        let end = end.unwrap_or_else(today);
        if start >= end {
            log::warn!(
                "{} is already up to date at {}; pass explicit dates to recompute",
                item,
                start
            );
            return Ok(IngestSummary::empty(item));
        }

        let prices = self
            .manager
            .get_numeric_table(&ItemQuery::by_date(kind.price_item(), start, end))?;
        let factors = self
            .manager
            .adjustment_factor_table(start, end, AdjustMethod::Forward)?;
        let dividends = self
            .manager
            .get_numeric_table(&ItemQuery::by_date(EX_DIVIDEND, start, end))?;
        let returns = daily_returns(&prices, &factors, &dividends)?;

        let by_date: BTreeMap<Timestamp, TickerValues> = returns
            .index()
            .iter()
            .map(|date| (*date, returns.present_values(*date)))
            .collect();
        self.write(item, series_documents(&by_date))
    }

    /// Membership lists of a universe on each trading day of the window
    pub fn update_universe(
        &self,
        universe: &str,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<IngestSummary> {
        let assembler = self.manager.adapter(universe)?.as_universe()?.assembler().clone();
        let start = self.resolve_start(universe, start)?;
        let end = end.unwrap_or_else(today);

        let trading_dates = self.manager.trading_dates(start, end)?;
        let members = fan_out(
            trading_dates.clone(),
            self.manager.config().provider_launch_delay(),
            |date| self.provider.universe_members(universe, *date),
        );

        let mut summary = IngestSummary::empty(universe);
        for date in trading_dates {
            let Some(tickers) = members.get(&date) else {
                log::info!("No {} membership for {}", universe, date);
                continue;
            };
            summary.submitted += 1;
            let doc = Document::series(date, tickers.clone());
            if assembler.insert_one(&doc, Some(TIMESTAMP_FIELD))?.is_some() {
                summary.inserted += 1;
                log::info!("Stored {} members of {} for {}", tickers.len(), universe, date);
            }
        }
        Ok(summary)
    }

    /// Shares outstanding per trading day.
    ///
    /// Ordinary days roll the previous day's counts forward through that
    /// day's splits. The last trading day of a month re-fetches every ticker
    /// of the broad-market universe, except those that split in the two most
    /// recent split documents, which keep the rolled count. A day is stored
    /// only when some count changed.
    pub fn update_shares_outstanding(
        &self,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<IngestSummary> {
        let start = self.resolve_start(SHARES_OUTSTANDING, start)?;
        let end = end.unwrap_or_else(today);
        let assembler = self.manager.assembler(SHARES_OUTSTANDING)?;
        let mut summary = IngestSummary::empty(SHARES_OUTSTANDING);

        for date in self.manager.trading_dates(start, end)? {
            let previous = self.previous_shares(date)?;
            let splits = self
                .manager
                .get_numeric_table(&ItemQuery::by_date(STOCK_SPLIT, date, date))?
                .present_values(date);
            let rolled = roll_forward(&previous, &splits);

            let shares = if self.is_month_end(date) {
                log::info!("{} is the last trading day of the month; refreshing shares", date);
                self.refetch_shares(date, &rolled)?
            } else {
                rolled
            };

            let changed: BTreeMap<&str, f64> = shares
                .iter()
                .filter_map(|(ticker, count)| match previous.get(ticker) {
                    Some(prev) if *prev != 0.0 && count / prev == 1.0 => None,
                    Some(prev) if *prev != 0.0 => Some((ticker.as_str(), count / prev)),
                    _ => Some((ticker.as_str(), f64::NAN)),
                })
                .collect();
            if changed.is_empty() {
                log::debug!("Shares outstanding unchanged on {}", date);
                continue;
            }
            log::info!("Shares outstanding changed on {} for {} tickers", date, changed.len());

            // Written now so the next day rolls forward from it
            summary.submitted += 1;
            if assembler
                .insert_one(&Document::series(date, values_json(&shares)), Some(TIMESTAMP_FIELD))?
                .is_some()
            {
                summary.inserted += 1;
            }
        }

        log::info!(
            "Stored {}/{} shares outstanding documents",
            summary.inserted,
            summary.submitted
        );
        Ok(summary)
    }

    fn previous_shares(&self, date: Timestamp) -> Result<TickerValues> {
        let reference = match self.manager.closest_trading_date(date, Direction::Last, false) {
            Ok(previous) => previous,
            Err(e) => {
                log::warn!("No previous trading day for {}: {}", date, e);
                date - Duration::days(1)
            }
        };
        let table = self
            .manager
            .get_numeric_table(&ItemQuery::by_count(SHARES_OUTSTANDING, 1).end(reference))?;
        Ok(table
            .index()
            .last()
            .map(|last| table.present_values(*last))
            .unwrap_or_default())
    }

    fn is_month_end(&self, date: Timestamp) -> bool {
        match self.manager.closest_trading_date(date, Direction::Next, false) {
            Ok(next) => next.month() != date.month(),
            Err(e) => {
                log::warn!("No next trading day for {}: {}", date, e);
                false
            }
        }
    }

    fn refetch_shares(&self, date: Timestamp, rolled: &TickerValues) -> Result<TickerValues> {
        let members = self.manager.latest_universe_tickers(UNIV_US_STOCK)?;
        let recently_split: BTreeSet<String> = self
            .manager
            .get_item_table(&ItemQuery::by_count(STOCK_SPLIT, 2).end(date))?
            .columns()
            .iter()
            .cloned()
            .collect();
        let targets: Vec<String> = members
            .iter()
            .filter(|t| !recently_split.contains(*t))
            .cloned()
            .collect();

        let fetched = fan_out(targets, self.manager.config().provider_launch_delay(), |ticker| {
            self.provider.shares_outstanding(ticker, date)
        });
        let mut shares: TickerValues = fetched
            .into_iter()
            .filter_map(|(ticker, count)| Some((ticker, count.filter(|c| c.is_finite())?)))
            .collect();

        // Recently split or unavailable tickers keep the rolled count
        for ticker in &members {
            if !shares.contains_key(ticker) {
                if let Some(count) = rolled.get(ticker) {
                    shares.insert(ticker.clone(), *count);
                }
            }
        }
        Ok(shares)
    }

    fn resolve_start(&self, item: &str, start: Option<Timestamp>) -> Result<Timestamp> {
        match start {
            Some(start) => Ok(start),
            None => self
                .manager
                .latest_data_date(item)
                .map(|latest| latest + Duration::days(1))
                .ok_or_else(|| missing_start(item)),
        }
    }

    fn provider_data<T: Default>(&self, what: &str, result: anyhow::Result<T>) -> T {
        result.unwrap_or_else(|e| {
            log::warn!(
                "{}",
                provider_failure(format_args!("{} providing {}", self.provider.name(), what), &e)
            );
            T::default()
        })
    }

    fn write(&self, item: &str, docs: Vec<Document>) -> Result<IngestSummary> {
        if docs.is_empty() {
            log::info!("Nothing to store for {}", item);
            return Ok(IngestSummary::empty(item));
        }
        let inserted = self
            .manager
            .assembler(item)?
            .insert_many(&docs, Some(TIMESTAMP_FIELD))?;
        log::info!("Stored {}/{} documents for {}", inserted.len(), docs.len(), item);
        Ok(IngestSummary {
            item: item.to_string(),
            submitted: docs.len(),
            inserted: inserted.len(),
        })
    }
}

fn today() -> Timestamp {
    Utc::now().date_naive()
}

fn missing_start(item: &str) -> DataHubError {
    DataHubError::Validation(format!(
        "No stored data for '{}'; an explicit start date is required",
        item
    ))
}

/// Counts carried through split ratios; tickers without a split keep their count
fn roll_forward(previous: &TickerValues, splits: &TickerValues) -> TickerValues {
    previous
        .iter()
        .map(|(ticker, count)| {
            let ratio = splits
                .get(ticker)
                .copied()
                .filter(|r| r.is_finite() && *r != 0.0)
                .unwrap_or(1.0);
            (ticker.clone(), count * ratio)
        })
        .collect()
}

/// Finite values as a JSON object
fn values_json(values: &TickerValues) -> Value {
    Value::Object(
        values
            .iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect::<Map<String, Value>>(),
    )
}

/// One series document per date with at least one finite value
fn series_documents(by_date: &BTreeMap<Timestamp, TickerValues>) -> Vec<Document> {
    by_date
        .iter()
        .filter_map(|(date, values)| {
            let json = values_json(values);
            let empty = json.as_object().map_or(true, Map::is_empty);
            (!empty).then(|| Document::series(*date, json))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn values(entries: &[(&str, f64)]) -> TickerValues {
        entries.iter().map(|(t, v)| (t.to_string(), *v)).collect()
    }

    #[test]
    fn test_roll_forward() {
        let previous = values(&[("AAPL", 100.0), ("MSFT", 50.0)]);
        let splits = values(&[("AAPL", 4.0), ("MSFT", 0.0), ("TSLA", 3.0)]);
        assert_eq!(roll_forward(&previous, &splits), values(&[("AAPL", 400.0), ("MSFT", 50.0)]));
    }

    #[test]
    fn test_series_documents_skip_empty_days() {
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let by_date = BTreeMap::from([
            (d1, values(&[("AAPL", 0.01), ("MSFT", f64::NAN)])),
            (d2, values(&[("MSFT", f64::INFINITY)])),
        ]);
        let docs = series_documents(&by_date);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].timestamp(), Some(d1));
        assert_eq!(docs[0].values(), Some(&serde_json::json!({"AAPL": 0.01})));
    }

    #[test]
    fn test_return_kinds() {
        assert_eq!(ReturnKind::CloseToClose.item(), "c2c_ret");
        assert_eq!(ReturnKind::OpenToOpen.price_item(), "open");
    }
}
