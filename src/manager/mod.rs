//! Data manager
//!
//! Resolves logical item names to adapters through the [`Registry`] and
//! memoises one adapter per item for the life of the manager. Universe
//! scoping, calendar lookups and split adjustment are layered on top.

pub mod registry;

pub use registry::{default_registry, AdapterKind, ItemSpec, Registry};

use crate::adjustments::adjustment_factors;
use crate::config::HubConfig;
use crate::dao::{
    Adapter, ErrorReportDao, GicsCodeDao, GicsInfo, GicsLevel, GicsMappingDao, MarketCalendarDao,
    Selection, TableAssembler, UniverseDao,
};
use crate::error::{DataHubError, Result};
use crate::store::{DocumentStore, Filter};
use crate::table::{align_tables, Frame, Table};
use crate::types::{AdjustMethod, Direction, ReadMode, Timestamp, Window};
use hashbrown::HashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Arguments of one item read
#[derive(Debug, Clone, PartialEq)]
pub struct ItemQuery {
    pub item: String,
    pub mode: ReadMode,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub count: Option<usize>,
    /// Restrict columns to the members of this universe over the same window
    pub universe: Option<String>,
    /// Restrict columns to these tickers; empty means no restriction
    pub tickers: Vec<String>,
    pub filter: Option<Filter>,
}

impl ItemQuery {
    pub fn new(item: impl Into<String>, mode: ReadMode) -> Self {
        Self {
            item: item.into(),
            mode,
            start: None,
            end: None,
            count: None,
            universe: None,
            tickers: Vec::new(),
            filter: None,
        }
    }

    pub fn by_date(item: impl Into<String>, start: Timestamp, end: Timestamp) -> Self {
        Self::new(item, ReadMode::ByDate).start(start).end(end)
    }

    pub fn by_count(item: impl Into<String>, count: usize) -> Self {
        Self::new(item, ReadMode::ByCount).count(count)
    }

    pub fn start(mut self, start: Timestamp) -> Self {
        self.start = Some(start);
        self
    }

    pub fn end(mut self, end: Timestamp) -> Self {
        self.end = Some(end);
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn universe(mut self, universe: impl Into<String>) -> Self {
        self.universe = Some(universe.into());
        self
    }

    pub fn tickers<S: AsRef<str>>(mut self, tickers: &[S]) -> Self {
        self.tickers = tickers.iter().map(|t| t.as_ref().to_string()).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = (!filter.is_empty()).then_some(filter);
        self
    }

    /// Resolve the read window, validating the mode's arguments
    pub fn window(&self) -> Result<Window> {
        Window::resolve(self.mode, self.start, self.end, self.count)
    }
}

/// Façade over every registered item
pub struct DataManager {
    store: Arc<dyn DocumentStore>,
    config: HubConfig,
    registry: Registry,
    adapters: HashMap<String, OnceLock<Arc<Adapter>>>,
}

impl fmt::Debug for DataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loaded: Vec<&str> = self
            .adapters
            .iter()
            .filter(|(_, cell)| cell.get().is_some())
            .map(|(item, _)| item.as_str())
            .collect();
        f.debug_struct("DataManager")
            .field("config", &self.config)
            .field("items", &self.registry.items())
            .field("loaded", &loaded)
            .finish()
    }
}

impl DataManager {
    /// Manager over the standard item catalogue
    pub fn new(store: Arc<dyn DocumentStore>, config: HubConfig) -> Self {
        Self::with_registry(store, config, default_registry())
    }

    pub fn with_registry(store: Arc<dyn DocumentStore>, config: HubConfig, registry: Registry) -> Self {
        let adapters = registry
            .items()
            .into_iter()
            .map(|item| (item.to_string(), OnceLock::new()))
            .collect();
        Self {
            store,
            config,
            registry,
            adapters,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Pre-seed the adapter of a registered item
    pub fn install_adapter(&mut self, item: &str, adapter: Adapter) -> Result<()> {
        self.registry.get(item)?;
        let cell = OnceLock::new();
        let _ = cell.set(Arc::new(adapter));
        self.adapters.insert(item.to_string(), cell);
        log::debug!("Adapter for '{}' installed", item);
        Ok(())
    }

    /// Adapter of an item, built on first use
    pub fn adapter(&self, item: &str) -> Result<Arc<Adapter>> {
        let spec = self.registry.get(item)?;
        let cell = self
            .adapters
            .get(item)
            .ok_or_else(|| DataHubError::Validation(format!("Unknown item '{}'", item)))?;
        if let Some(adapter) = cell.get() {
            return Ok(Arc::clone(adapter));
        }

        let built = Arc::new(self.build_adapter(spec)?);
        log::debug!("Adapter for '{}' built on {}", item, built.assembler().namespace());
        Ok(Arc::clone(cell.get_or_init(|| built)))
    }

    /// Table assembler of an item, for writers
    pub fn assembler(&self, item: &str) -> Result<TableAssembler> {
        Ok(self.adapter(item)?.assembler().clone())
    }

    fn build_adapter(&self, spec: &ItemSpec) -> Result<Adapter> {
        let assembler = TableAssembler::new(Arc::clone(&self.store), spec.namespace()?)
            .with_batch_size(self.config.query_batch_size);

        Ok(match spec.kind {
            AdapterKind::Series => Adapter::Series(assembler),
            AdapterKind::Universe => Adapter::Universe(UniverseDao::new(assembler)),
            AdapterKind::Calendar => Adapter::Calendar(
                MarketCalendarDao::new(assembler).with_search_days(self.config.calendar_search_days),
            ),
            AdapterKind::TaxonomyMapping => Adapter::TaxonomyMapping(GicsMappingDao::new(assembler)),
            AdapterKind::Taxonomy => {
                let mapping = self.kind_adapter(AdapterKind::TaxonomyMapping)?;
                Adapter::Taxonomy(GicsCodeDao::new(
                    assembler,
                    mapping.as_taxonomy_mapping()?.clone(),
                ))
            }
            AdapterKind::Reports => Adapter::Reports(ErrorReportDao::new(assembler)),
        })
    }

    fn kind_adapter(&self, kind: AdapterKind) -> Result<Arc<Adapter>> {
        let item = self.registry.item_of_kind(kind).ok_or_else(|| {
            DataHubError::Validation(format!("No item registered for {:?} adapters", kind))
        })?;
        self.adapter(item)
    }

    /// Read one item as a raw frame, sorted on both axes.
    ///
    /// Universe and ticker scoping only apply to items registered as
    /// scopable and are ignored otherwise. A universe takes precedence over
    /// explicit tickers; if it resolves to no tickers the result is empty.
    pub fn get_item_table(&self, query: &ItemQuery) -> Result<Frame> {
        let spec = self.registry.get(&query.item)?;
        let window = query.window()?;
        let adapter = self.adapter(&query.item)?;

        let mut tickers: Vec<String> = Vec::new();
        if spec.ticker_scopable {
            tickers = query.tickers.clone();
        } else if !query.tickers.is_empty() {
            log::debug!("'{}' is not ticker-scopable; tickers ignored", query.item);
        }

        match query.universe.as_deref() {
            Some(universe) if spec.universe_scopable => {
                tickers = self.universe_tickers(universe, window)?;
                if tickers.is_empty() {
                    log::info!("Universe '{}' has no members in {:?}", universe, window);
                    return Ok(Frame::empty());
                }
            }
            Some(universe) => {
                log::debug!("'{}' is not universe-scopable; '{}' ignored", query.item, universe);
            }
            None => {}
        }

        let mut selection = Selection::tickers(&tickers);
        if let Some(filter) = &query.filter {
            selection = selection.with_filter(filter.clone());
        }
        adapter.read(window, &selection)
    }

    /// Numeric view of an item read
    pub fn get_numeric_table(&self, query: &ItemQuery) -> Result<Table<f64>> {
        Ok(self.get_item_table(query)?.to_numeric())
    }

    /// Numeric tables of several items over one window. With `align`, every
    /// table is reindexed onto the union of dates and tickers.
    pub fn get_item_tables<S: AsRef<str>>(
        &self,
        items: &[S],
        window: Window,
        align: bool,
    ) -> Result<BTreeMap<String, Table<f64>>> {
        let mut tables = BTreeMap::new();
        for item in items {
            let item = item.as_ref();
            let table = self.adapter(item)?.read(window, &Selection::all())?.to_numeric();
            tables.insert(item.to_string(), table);
        }
        Ok(if align { align_tables(&tables) } else { tables })
    }

    /// Split adjustment factors over the trading days of `[start, end]`
    pub fn adjustment_factor_table(
        &self,
        start: Timestamp,
        end: Timestamp,
        method: AdjustMethod,
    ) -> Result<Table<f64>> {
        let trading_dates = self.trading_dates(start, end)?;
        let splits = self.get_numeric_table(&ItemQuery::by_date(registry::STOCK_SPLIT, start, end))?;
        Ok(adjustment_factors(&splits, &trading_dates, method))
    }

    pub fn calendar(&self) -> Result<MarketCalendarDao> {
        Ok(self.kind_adapter(AdapterKind::Calendar)?.as_calendar()?.clone())
    }

    pub fn trading_dates(&self, start: Timestamp, end: Timestamp) -> Result<Vec<Timestamp>> {
        self.calendar()?.trading_dates_in_range(start, end)
    }

    pub fn is_trading_date(&self, date: Timestamp) -> Result<bool> {
        self.calendar()?.is_trading_date(date)
    }

    pub fn closest_trading_date(
        &self,
        date: Timestamp,
        direction: Direction,
        include_self: bool,
    ) -> Result<Timestamp> {
        self.calendar()?.closest_trading_date(date, direction, include_self)
    }

    /// Sorted union of a universe's members over a window
    pub fn universe_tickers(&self, universe: &str, window: Window) -> Result<Vec<String>> {
        self.adapter(universe)?.as_universe()?.tickers(window)
    }

    /// Members on the most recent stored date
    pub fn latest_universe_tickers(&self, universe: &str) -> Result<Vec<String>> {
        self.universe_tickers(universe, Window::recent(1))
    }

    /// Most recent stored date of an item. Failures are logged, not raised.
    pub fn latest_data_date(&self, item: &str) -> Option<Timestamp> {
        match self
            .adapter(item)
            .and_then(|adapter| adapter.assembler().latest_timestamp())
        {
            Ok(Some(date)) => Some(date),
            Ok(None) => {
                log::warn!("No data stored for '{}'", item);
                None
            }
            Err(e) => {
                log::error!("Failed to read the latest date of '{}': {}", item, e);
                None
            }
        }
    }

    pub fn latest_data_dates<S: AsRef<str>>(&self, items: &[S]) -> BTreeMap<String, Option<Timestamp>> {
        items
            .iter()
            .map(|item| (item.as_ref().to_string(), self.latest_data_date(item.as_ref())))
            .collect()
    }

    /// Dates in `[start, end]` that have a stored document
    pub fn stored_dates(&self, item: &str, start: Timestamp, end: Timestamp) -> Result<BTreeSet<Timestamp>> {
        self.adapter(item)?.assembler().timestamps_between(start, end)
    }

    /// Trading days in `[start, end]` without a stored document
    pub fn missing_dates(&self, item: &str, start: Timestamp, end: Timestamp) -> Result<Vec<Timestamp>> {
        let stored = self.stored_dates(item, start, end)?;
        Ok(self
            .trading_dates(start, end)?
            .into_iter()
            .filter(|date| !stored.contains(date))
            .collect())
    }

    pub fn error_reports(&self) -> Result<ErrorReportDao> {
        Ok(self.kind_adapter(AdapterKind::Reports)?.as_reports()?.clone())
    }

    fn taxonomy(&self) -> Result<GicsCodeDao> {
        Ok(self.kind_adapter(AdapterKind::Taxonomy)?.as_taxonomy()?.clone())
    }

    pub fn gics_names_by_level(&self, level: GicsLevel) -> Result<Vec<String>> {
        self.taxonomy()?.names_by_level(level)
    }

    pub fn gics_codes_by_level(&self, level: GicsLevel) -> Result<BTreeMap<String, String>> {
        self.taxonomy()?.codes_by_level(level)
    }

    pub fn gics_info(&self, ticker: &str) -> Result<Option<GicsInfo>> {
        self.taxonomy()?.info_by_ticker(ticker)
    }

    pub fn gics_tickers_by_name(&self, level: GicsLevel, name: &str) -> Result<Vec<String>> {
        self.taxonomy()?.tickers_by_name(level, name)
    }
}

#[cfg(test)]
mod tests {
    use super::registry::*;
    use super::*;
    use crate::store::{Document, Namespace, SqliteStore};
    use crate::types::TIMESTAMP_FIELD;
    use approx::assert_relative_eq;
    use chrono::{Datelike, NaiveDate, Weekday};
    use serde_json::json;

    fn d(day: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn seed(manager: &DataManager, item: &str, docs: Vec<Document>) {
        manager
            .assembler(item)
            .unwrap()
            .insert_many(&docs, Some(TIMESTAMP_FIELD))
            .unwrap();
    }

    fn manager() -> DataManager {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let manager = DataManager::new(store, HubConfig::default());

        let status: Vec<Document> = (1..=12)
            .map(|day| {
                let code = match d(day).weekday() {
                    Weekday::Sat | Weekday::Sun => 0,
                    _ if day == 1 => -1,
                    _ => 1,
                };
                Document::series(d(day), json!(code))
            })
            .collect();
        seed(&manager, MARKET_STATUS, status);
        seed(
            &manager,
            CLOSE,
            vec![
                Document::series(d(2), json!({"AAPL": 100.0, "MSFT": 300.0, "XOM": 90.0})),
                Document::series(d(3), json!({"AAPL": 50.0, "MSFT": 301.0, "XOM": 91.0})),
                Document::series(d(4), json!({"AAPL": 51.0, "MSFT": 302.0})),
            ],
        );
        seed(
            &manager,
            UNIV_SPX500,
            vec![
                Document::series(d(2), json!(["AAPL"])),
                Document::series(d(4), json!(["MSFT"])),
            ],
        );
        seed(
            &manager,
            STOCK_SPLIT,
            vec![Document::series(d(3), json!({"AAPL": 2.0}))],
        );
        manager
    }

    #[test]
    fn test_universe_scoping() {
        let manager = manager();
        let table = manager
            .get_item_table(&ItemQuery::by_date(CLOSE, d(2), d(4)).universe(UNIV_SPX500))
            .unwrap();
        assert_eq!(table.columns(), &["AAPL".to_string(), "MSFT".to_string()]);

        let narrow = manager
            .get_item_table(&ItemQuery::by_date(CLOSE, d(2), d(3)).universe(UNIV_SPX500))
            .unwrap();
        assert_eq!(narrow.columns(), &["AAPL".to_string()]);

        let empty = manager
            .get_item_table(&ItemQuery::by_date(CLOSE, d(5), d(9)).universe(UNIV_SPX500))
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_ticker_scoping_and_count_mode() {
        let manager = manager();
        let table = manager
            .get_numeric_table(&ItemQuery::by_count(CLOSE, 2).tickers(&["XOM"]))
            .unwrap();
        assert_eq!(table.index(), &[d(3), d(4)]);
        assert_eq!(table.columns(), &["XOM".to_string()]);
        assert!(table.get(d(4), "XOM").unwrap().is_nan());

        // Universes are not ticker-scopable; the restriction is dropped
        let universe = manager
            .get_item_table(&ItemQuery::by_date(UNIV_SPX500, d(2), d(4)).tickers(&["XOM"]))
            .unwrap();
        assert_eq!(universe.columns(), &["AAPL".to_string(), "MSFT".to_string()]);
    }

    #[test]
    fn test_query_validation() {
        let manager = manager();
        let unknown = manager.get_item_table(&ItemQuery::by_date("eps", d(2), d(4)));
        assert!(matches!(unknown, Err(DataHubError::Validation(_))));

        let no_count = manager.get_item_table(&ItemQuery::new(CLOSE, ReadMode::ByCount));
        assert!(matches!(no_count, Err(DataHubError::Validation(_))));

        let no_start = manager.get_item_table(&ItemQuery::new(CLOSE, ReadMode::ByDate).end(d(4)));
        assert!(matches!(no_start, Err(DataHubError::Validation(_))));
    }

    #[test]
    fn test_adjustment_factor_table() {
        let manager = manager();
        let backward = manager
            .adjustment_factor_table(d(2), d(4), AdjustMethod::Backward)
            .unwrap();
        assert_eq!(backward.index(), &[d(2), d(3), d(4)]);
        assert_relative_eq!(*backward.get(d(2), "AAPL").unwrap(), 0.5);
        assert_relative_eq!(*backward.get(d(4), "AAPL").unwrap(), 1.0);

        let forward = manager
            .adjustment_factor_table(d(2), d(4), AdjustMethod::Forward)
            .unwrap();
        assert_relative_eq!(*forward.get(d(4), "AAPL").unwrap(), 2.0);
    }

    #[test]
    fn test_calendar_lookups() {
        let manager = manager();
        assert_eq!(manager.trading_dates(d(5), d(9)).unwrap(), vec![d(5), d(8), d(9)]);
        assert!(!manager.is_trading_date(d(1)).unwrap());
        assert_eq!(
            manager.closest_trading_date(d(6), Direction::Last, true).unwrap(),
            d(5)
        );
        assert_eq!(
            manager.closest_trading_date(d(5), Direction::Next, false).unwrap(),
            d(8)
        );
    }

    #[test]
    fn test_latest_dates_and_missing() {
        let manager = manager();
        assert_eq!(manager.latest_data_date(CLOSE), Some(d(4)));
        assert_eq!(manager.latest_data_date(OPEN), None);
        assert_eq!(manager.latest_data_date("eps"), None);
        assert_eq!(manager.latest_universe_tickers(UNIV_SPX500).unwrap(), vec!["MSFT"]);

        assert_eq!(manager.missing_dates(CLOSE, d(2), d(9)).unwrap(), vec![d(5), d(8), d(9)]);
        let dates = manager.latest_data_dates(&[CLOSE, STOCK_SPLIT]);
        assert_eq!(dates[STOCK_SPLIT], Some(d(3)));
    }

    #[test]
    fn test_aligned_pull() {
        let manager = manager();
        let tables = manager
            .get_item_tables(&[CLOSE, STOCK_SPLIT], Window::range(d(2), d(4)), true)
            .unwrap();
        assert_eq!(tables[CLOSE].shape(), tables[STOCK_SPLIT].shape());
        assert!(tables[STOCK_SPLIT].get(d(2), "AAPL").unwrap().is_nan());
    }

    #[test]
    fn test_adapters_are_memoised_and_substitutable() {
        let mut manager = manager();
        let first = manager.adapter(CLOSE).unwrap();
        let second = manager.adapter(CLOSE).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // Point "close" at an empty collection
        let empty = TableAssembler::new(
            Arc::clone(manager.store()),
            Namespace::new("Scratch", "close").unwrap(),
        );
        manager.install_adapter(CLOSE, Adapter::Series(empty)).unwrap();
        assert_eq!(manager.latest_data_date(CLOSE), None);
        assert!(manager.install_adapter("eps", Adapter::Series(first.assembler().clone())).is_err());
        assert!(manager.adapter(CLOSE).unwrap().as_universe().is_err());
    }

    #[test]
    fn test_gics_through_manager() {
        let manager = manager();
        let mapping = manager.adapter(GICS_MAPPING).unwrap();
        mapping
            .as_taxonomy_mapping()
            .unwrap()
            .insert_mapping(
                GicsLevel::Sector,
                &BTreeMap::from([("Energy".to_string(), "10".to_string())]),
            )
            .unwrap();
        manager
            .adapter(GICS_CODE)
            .unwrap()
            .as_taxonomy()
            .unwrap()
            .insert_ticker("XOM", &BTreeMap::from([(GicsLevel::Sector, "10".to_string())]))
            .unwrap();

        assert_eq!(manager.gics_names_by_level(GicsLevel::Sector).unwrap(), vec!["Energy"]);
        assert_eq!(
            manager.gics_tickers_by_name(GicsLevel::Sector, "Energy").unwrap(),
            vec!["XOM"]
        );
        let info = manager.gics_info("XOM").unwrap().unwrap();
        assert_eq!(info.names[&GicsLevel::Sector], "Energy");
        assert_eq!(manager.gics_codes_by_level(GicsLevel::Sector).unwrap()["XOM"], "10");
    }
}
