//! # equity_datahub
//!
//! Time-indexed equity data served as date-indexed wide tables.
//!
//! Series are stored as one JSON document per date in a document store.
//! The [`manager::DataManager`] resolves item names such as `close` or
//! `univ_spx500` to adapters, scopes reads by universe or ticker and derives
//! split adjustment factors. The [`updater::Updater`] ingests provider data
//! idempotently and the [`detector::DataAuditor`] audits stored tables.
//!
//! ## Example
//!
//! ```rust,no_run
//! use equity_datahub::prelude::*;
//!
//! # fn main() -> equity_datahub::Result<()> {
//! let config = HubConfig::default();
//! let manager = DataManager::new(config.open_store()?, config);
//!
//! let start = parse_timestamp("2024-01-02")?;
//! let end = parse_timestamp("2024-01-31")?;
//! let close = manager.get_numeric_table(
//!     &ItemQuery::by_date("close", start, end).universe("univ_spx500"),
//! )?;
//! let factors = manager.adjustment_factor_table(start, end, AdjustMethod::Backward)?;
//! # Ok(())
//! # }
//! ```

pub mod adjustments;
pub mod config;
pub mod dao;
pub mod detector;
pub mod error;
pub mod manager;
pub mod store;
pub mod table;
pub mod types;
pub mod updater;

pub use error::{DataHubError, Result};

pub mod prelude {
    //! Commonly used types and traits
    pub use crate::config::HubConfig;
    pub use crate::dao::{Adapter, Selection, TableAssembler};
    pub use crate::detector::{DataAuditor, Detector, ErrorReport};
    pub use crate::error::{DataHubError, Result};
    pub use crate::manager::{DataManager, ItemQuery};
    pub use crate::store::{Document, DocumentStore, Filter, SqliteStore};
    pub use crate::table::{Cell, Frame, Table};
    pub use crate::types::*;
    pub use crate::updater::{MarketDataProvider, Updater};
}

/// Install the `env_logger` backend with an `info` default filter.
/// Calling it more than once is harmless.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(cfg!(test))
        .try_init();
}
