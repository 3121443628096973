//! Shared fixtures for the integration tests
#![allow(dead_code)]

use anyhow::anyhow;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use equity_datahub::config::HubConfig;
use equity_datahub::manager::registry::MARKET_STATUS;
use equity_datahub::manager::DataManager;
use equity_datahub::store::{Document, SqliteStore};
use equity_datahub::types::{MarketStatus, Timestamp, TIMESTAMP_FIELD};
use equity_datahub::updater::{DividendKind, MarketDataProvider, TickerValues};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn ymd(year: i32, month: u32, day: u32) -> Timestamp {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn jan(day: u32) -> Timestamp {
    ymd(2024, 1, day)
}

pub fn values(entries: &[(&str, f64)]) -> TickerValues {
    entries.iter().map(|(t, v)| (t.to_string(), *v)).collect()
}

/// NYSE-like status: weekends, New Year, MLK day and Presidents' day closed
pub fn market_status(date: Timestamp) -> MarketStatus {
    let holidays = [ymd(2024, 1, 1), ymd(2024, 1, 15), ymd(2024, 2, 19)];
    match date.weekday() {
        Weekday::Sat | Weekday::Sun => MarketStatus::Weekend,
        _ if holidays.contains(&date) => MarketStatus::Holiday,
        _ => MarketStatus::Trading,
    }
}

/// Calendar from mid-December 2023 through February 2024
pub fn calendar() -> BTreeMap<Timestamp, MarketStatus> {
    ymd(2023, 12, 15)
        .iter_days()
        .take_while(|d| *d <= ymd(2024, 2, 29))
        .map(|d| (d, market_status(d)))
        .collect()
}

pub fn test_config() -> HubConfig {
    HubConfig {
        provider_launch_delay_ms: 0,
        ..HubConfig::default()
    }
}

pub fn empty_manager() -> DataManager {
    equity_datahub::init_logging();
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    DataManager::new(store, test_config())
}

pub fn seed(manager: &DataManager, item: &str, docs: Vec<(Timestamp, Value)>) -> usize {
    let docs: Vec<Document> = docs
        .into_iter()
        .map(|(date, values)| Document::series(date, values))
        .collect();
    manager
        .assembler(item)
        .unwrap()
        .insert_many(&docs, Some(TIMESTAMP_FIELD))
        .unwrap()
        .len()
}

pub fn seed_calendar(manager: &DataManager) {
    let docs = calendar()
        .into_iter()
        .map(|(date, status)| (date, Value::from(status.code())))
        .collect();
    seed(manager, MARKET_STATUS, docs);
}

/// Manager with the calendar already stored
pub fn manager_with_calendar() -> DataManager {
    let manager = empty_manager();
    seed_calendar(&manager);
    manager
}

/// In-memory provider with canned responses
#[derive(Default)]
pub struct FakeProvider {
    /// date -> field -> ticker -> value
    pub bars: BTreeMap<Timestamp, BTreeMap<String, TickerValues>>,
    pub splits: BTreeMap<Timestamp, TickerValues>,
    pub ex_dividends: BTreeMap<Timestamp, TickerValues>,
    pub pay_dividends: BTreeMap<Timestamp, TickerValues>,
    pub shares: BTreeMap<String, f64>,
    pub universes: BTreeMap<String, Vec<String>>,
    pub failing_days: BTreeSet<Timestamp>,
    pub share_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same OHLC for every field except volume
    pub fn with_bar(mut self, date: Timestamp, ticker: &str, price: f64, volume: f64) -> Self {
        let fields = self.bars.entry(date).or_default();
        for field in ["open", "high", "low", "close"] {
            fields
                .entry(field.to_string())
                .or_default()
                .insert(ticker.to_string(), price);
        }
        fields
            .entry("volume".to_string())
            .or_default()
            .insert(ticker.to_string(), volume);
        self
    }

    fn in_range(
        data: &BTreeMap<Timestamp, TickerValues>,
        start: Timestamp,
        end: Timestamp,
    ) -> BTreeMap<Timestamp, TickerValues> {
        data.range(start..=end)
            .map(|(d, v)| (*d, v.clone()))
            .collect()
    }
}

impl MarketDataProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn daily_bars(&self, date: Timestamp) -> anyhow::Result<BTreeMap<String, TickerValues>> {
        if self.failing_days.contains(&date) {
            return Err(anyhow!("HTTP 502 for {}", date));
        }
        Ok(self.bars.get(&date).cloned().unwrap_or_default())
    }

    fn stock_splits(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> anyhow::Result<BTreeMap<Timestamp, TickerValues>> {
        Ok(Self::in_range(&self.splits, start, end))
    }

    fn cash_dividends(
        &self,
        kind: DividendKind,
        start: Timestamp,
        end: Timestamp,
    ) -> anyhow::Result<BTreeMap<Timestamp, TickerValues>> {
        let data = match kind {
            DividendKind::ExDividend => &self.ex_dividends,
            DividendKind::PayDividend => &self.pay_dividends,
        };
        Ok(Self::in_range(data, start, end))
    }

    fn shares_outstanding(&self, ticker: &str, _date: Timestamp) -> anyhow::Result<Option<f64>> {
        self.share_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.shares.get(ticker).copied())
    }

    fn market_status(&self) -> anyhow::Result<BTreeMap<Timestamp, MarketStatus>> {
        Ok(calendar())
    }

    fn universe_members(&self, universe: &str, date: Timestamp) -> anyhow::Result<Vec<String>> {
        if self.failing_days.contains(&date) {
            return Err(anyhow!("HTTP 502 for {} on {}", universe, date));
        }
        self.universes
            .get(universe)
            .cloned()
            .ok_or_else(|| anyhow!("unknown universe {}", universe))
    }
}

/// Every calendar day in `[start, end]`
pub fn days(start: Timestamp, end: Timestamp) -> Vec<Timestamp> {
    let mut out = Vec::new();
    let mut current = start;
    while current <= end {
        out.push(current);
        current += Duration::days(1);
    }
    out
}
