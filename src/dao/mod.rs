//! Data access objects
//!
//! Every logical item is served by one adapter. All adapters share the
//! generic [`TableAssembler`]; the specialised ones add domain lookups on top.

pub mod base;
pub mod calendar;
pub mod reference;
pub mod report;
pub mod universe;

pub use base::{identity_transform, Selection, TableAssembler, Transform};
pub use calendar::MarketCalendarDao;
pub use reference::{GicsCodeDao, GicsInfo, GicsLevel, GicsMappingDao};
pub use report::ErrorReportDao;
pub use universe::UniverseDao;

use crate::error::{DataHubError, Result};
use crate::table::Frame;
use crate::types::Window;

/// Adapter bound to one registered item
#[derive(Debug, Clone)]
pub enum Adapter {
    /// Price, volume, return and corporate-action series
    Series(TableAssembler),
    Universe(UniverseDao),
    Calendar(MarketCalendarDao),
    Taxonomy(GicsCodeDao),
    TaxonomyMapping(GicsMappingDao),
    Reports(ErrorReportDao),
}

impl Adapter {
    pub fn assembler(&self) -> &TableAssembler {
        match self {
            Adapter::Series(assembler) => assembler,
            Adapter::Universe(dao) => dao.assembler(),
            Adapter::Calendar(dao) => dao.assembler(),
            Adapter::Taxonomy(dao) => dao.assembler(),
            Adapter::TaxonomyMapping(dao) => dao.assembler(),
            Adapter::Reports(dao) => dao.assembler(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Adapter::Series(_) => "series",
            Adapter::Universe(_) => "universe",
            Adapter::Calendar(_) => "calendar",
            Adapter::Taxonomy(_) => "taxonomy",
            Adapter::TaxonomyMapping(_) => "taxonomy mapping",
            Adapter::Reports(_) => "reports",
        }
    }

    /// Read a window through the adapter's assembler
    pub fn read(&self, window: Window, selection: &Selection) -> Result<Frame> {
        self.assembler().read(window, selection)
    }

    pub fn as_universe(&self) -> Result<&UniverseDao> {
        match self {
            Adapter::Universe(dao) => Ok(dao),
            other => Err(other.wrong_kind("universe")),
        }
    }

    pub fn as_calendar(&self) -> Result<&MarketCalendarDao> {
        match self {
            Adapter::Calendar(dao) => Ok(dao),
            other => Err(other.wrong_kind("calendar")),
        }
    }

    pub fn as_taxonomy(&self) -> Result<&GicsCodeDao> {
        match self {
            Adapter::Taxonomy(dao) => Ok(dao),
            other => Err(other.wrong_kind("taxonomy")),
        }
    }

    pub fn as_taxonomy_mapping(&self) -> Result<&GicsMappingDao> {
        match self {
            Adapter::TaxonomyMapping(dao) => Ok(dao),
            other => Err(other.wrong_kind("taxonomy mapping")),
        }
    }

    pub fn as_reports(&self) -> Result<&ErrorReportDao> {
        match self {
            Adapter::Reports(dao) => Ok(dao),
            other => Err(other.wrong_kind("reports")),
        }
    }

    fn wrong_kind(&self, expected: &str) -> DataHubError {
        DataHubError::Validation(format!(
            "{} is a {} adapter, not a {} adapter",
            self.assembler().namespace(),
            self.kind_name(),
            expected
        ))
    }
}
