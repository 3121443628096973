//! Item registry
//!
//! Maps each logical item name to its backing collection, the kind of adapter
//! that serves it and whether reads may be scoped by universe or ticker.

use crate::error::{DataHubError, Result};
use crate::store::Namespace;
use hashbrown::HashMap;

pub const OPEN: &str = "open";
pub const HIGH: &str = "high";
pub const LOW: &str = "low";
pub const CLOSE: &str = "close";
pub const VOLUME: &str = "volume";
pub const C2C_RET: &str = "c2c_ret";
pub const O2O_RET: &str = "o2o_ret";
pub const SHARES_OUTSTANDING: &str = "shares_outstanding";

pub const STOCK_SPLIT: &str = "stock_split";
pub const EX_DIVIDEND: &str = "ex_dividend";
pub const PAY_DIVIDEND: &str = "pay_dividend";

pub const UNIV_SPX500: &str = "univ_spx500";
pub const UNIV_DOW30: &str = "univ_dow30";
pub const UNIV_NDX100: &str = "univ_ndx100";
pub const UNIV_RAY3000: &str = "univ_ray3000";
pub const UNIV_US_STOCK: &str = "univ_us_stock";
pub const UNIV_US_ETF: &str = "univ_us_etf";

pub const MARKET_STATUS: &str = "market_status";
pub const GICS_CODE: &str = "gics_code";
pub const GICS_MAPPING: &str = "gics_mapping";
pub const ERROR_REPORT: &str = "error_report";

const PRICE_VOLUME_DB: &str = "PriceVolume";
const ACTIONS_DB: &str = "Actions";
const UNIVERSE_DB: &str = "Universe";
const REFERENCE_DB: &str = "Reference";

/// Which adapter serves an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Series,
    Universe,
    Calendar,
    Taxonomy,
    TaxonomyMapping,
    Reports,
}

/// Registration of one logical item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSpec {
    pub database: String,
    pub collection: String,
    pub kind: AdapterKind,
    /// Reads may be restricted to the members of a universe
    pub universe_scopable: bool,
    /// Reads may be restricted to explicit tickers
    pub ticker_scopable: bool,
}

impl ItemSpec {
    pub fn new(database: impl Into<String>, collection: impl Into<String>, kind: AdapterKind) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            kind,
            universe_scopable: false,
            ticker_scopable: false,
        }
    }

    /// Ticker-keyed series that accepts universe and ticker scoping
    pub fn series(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            universe_scopable: true,
            ticker_scopable: true,
            ..Self::new(database, collection, AdapterKind::Series)
        }
    }

    pub fn namespace(&self) -> Result<Namespace> {
        Namespace::new(self.database.as_str(), self.collection.as_str())
    }
}

/// Item name to registration
#[derive(Debug, Clone, Default)]
pub struct Registry {
    items: HashMap<String, ItemSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an item
    pub fn register(&mut self, item: impl Into<String>, spec: ItemSpec) -> &mut Self {
        self.items.insert(item.into(), spec);
        self
    }

    pub fn with(mut self, item: impl Into<String>, spec: ItemSpec) -> Self {
        self.register(item, spec);
        self
    }

    pub fn get(&self, item: &str) -> Result<&ItemSpec> {
        self.items
            .get(item)
            .ok_or_else(|| DataHubError::Validation(format!("Unknown item '{}'", item)))
    }

    pub fn contains(&self, item: &str) -> bool {
        self.items.contains_key(item)
    }

    /// Registered item names, sorted
    pub fn items(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.items.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// First item (by name) served by the given adapter kind
    pub fn item_of_kind(&self, kind: AdapterKind) -> Option<&str> {
        self.items()
            .into_iter()
            .find(|name| self.items.get(*name).map(|s| s.kind) == Some(kind))
    }
}

/// The standard item catalogue
pub fn default_registry() -> Registry {
    let mut registry = Registry::new();

    for item in [OPEN, HIGH, LOW, CLOSE, VOLUME, C2C_RET, O2O_RET, SHARES_OUTSTANDING] {
        registry.register(item, ItemSpec::series(PRICE_VOLUME_DB, item));
    }
    for item in [STOCK_SPLIT, EX_DIVIDEND, PAY_DIVIDEND] {
        registry.register(item, ItemSpec::series(ACTIONS_DB, item));
    }
    for item in [
        UNIV_SPX500,
        UNIV_DOW30,
        UNIV_NDX100,
        UNIV_RAY3000,
        UNIV_US_STOCK,
        UNIV_US_ETF,
    ] {
        registry.register(item, ItemSpec::new(UNIVERSE_DB, item, AdapterKind::Universe));
    }

    registry
        .register(
            MARKET_STATUS,
            ItemSpec::new(REFERENCE_DB, MARKET_STATUS, AdapterKind::Calendar),
        )
        .register(
            GICS_CODE,
            ItemSpec::new(REFERENCE_DB, GICS_CODE, AdapterKind::Taxonomy),
        )
        .register(
            GICS_MAPPING,
            ItemSpec::new(REFERENCE_DB, "gics_code_mapping", AdapterKind::TaxonomyMapping),
        )
        .register(
            ERROR_REPORT,
            ItemSpec::new(REFERENCE_DB, ERROR_REPORT, AdapterKind::Reports),
        );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalogue() {
        let registry = default_registry();
        assert_eq!(registry.items().len(), 21);

        let close = registry.get(CLOSE).unwrap();
        assert_eq!(close.kind, AdapterKind::Series);
        assert!(close.universe_scopable && close.ticker_scopable);
        assert_eq!(close.namespace().unwrap().to_string(), "PriceVolume.close");

        let spx = registry.get(UNIV_SPX500).unwrap();
        assert_eq!(spx.kind, AdapterKind::Universe);
        assert!(!spx.universe_scopable);

        assert_eq!(registry.get(GICS_MAPPING).unwrap().collection, "gics_code_mapping");
        assert_eq!(registry.item_of_kind(AdapterKind::Calendar), Some(MARKET_STATUS));
    }

    #[test]
    fn test_unknown_item() {
        let err = default_registry().get("dividend_yield").unwrap_err();
        assert!(matches!(err, DataHubError::Validation(_)));
    }

    #[test]
    fn test_register_replaces() {
        let registry = Registry::new()
            .with("close", ItemSpec::series("Test", "close"))
            .with("close", ItemSpec::new("Test", "close_v2", AdapterKind::Series));
        assert_eq!(registry.items(), vec!["close"]);
        assert_eq!(registry.get("close").unwrap().collection, "close_v2");
        assert!(!registry.contains("open"));
    }
}
