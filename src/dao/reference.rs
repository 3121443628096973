//! GICS taxonomy adapters (no time dimension)

use super::base::TableAssembler;
use crate::error::{DataHubError, Result};
use crate::store::{Document, FieldPath, Filter, FindOptions, Projection};
use crate::types::VALUES_FIELD;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Level of the four-level GICS hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GicsLevel {
    Sector,
    IndustryGroup,
    Industry,
    SubIndustry,
}

impl GicsLevel {
    pub const ALL: [GicsLevel; 4] = [
        GicsLevel::Sector,
        GicsLevel::IndustryGroup,
        GicsLevel::Industry,
        GicsLevel::SubIndustry,
    ];

    pub fn number(self) -> u8 {
        match self {
            GicsLevel::Sector => 1,
            GicsLevel::IndustryGroup => 2,
            GicsLevel::Industry => 3,
            GicsLevel::SubIndustry => 4,
        }
    }

    /// Field holding this level's code in a ticker document
    pub fn field(self) -> &'static str {
        match self {
            GicsLevel::Sector => "gics_sector",
            GicsLevel::IndustryGroup => "gics_industry_group",
            GicsLevel::Industry => "gics_industry",
            GicsLevel::SubIndustry => "gics_sub_industry",
        }
    }
}

impl TryFrom<i64> for GicsLevel {
    type Error = DataHubError;

    fn try_from(level: i64) -> Result<Self> {
        match level {
            1 => Ok(GicsLevel::Sector),
            2 => Ok(GicsLevel::IndustryGroup),
            3 => Ok(GicsLevel::Industry),
            4 => Ok(GicsLevel::SubIndustry),
            other => Err(DataHubError::Validation(format!(
                "GICS level must be between 1 and 4, got {}",
                other
            ))),
        }
    }
}

/// Name/code mapping per level: `{level, values: {name: code}}`
#[derive(Debug, Clone)]
pub struct GicsMappingDao {
    assembler: TableAssembler,
}

impl GicsMappingDao {
    pub fn new(assembler: TableAssembler) -> Self {
        Self { assembler }
    }

    pub fn assembler(&self) -> &TableAssembler {
        &self.assembler
    }

    /// Store the mapping of one level
    pub fn insert_mapping(&self, level: GicsLevel, name_to_code: &BTreeMap<String, String>) -> Result<()> {
        let values: Map<String, Value> = name_to_code
            .iter()
            .map(|(name, code)| (name.clone(), Value::String(code.clone())))
            .collect();
        let doc = Document::new()
            .with("level", level.number())
            .with(VALUES_FIELD, values);
        self.assembler.insert_one(&doc, Some("level"))?;
        Ok(())
    }

    pub fn name_to_code(&self, level: GicsLevel) -> Result<BTreeMap<String, String>> {
        let doc = self.assembler.store().find_one(
            self.assembler.namespace(),
            &Filter::new().eq("level", level.number()),
            None,
        )?;
        Ok(doc
            .as_ref()
            .and_then(Document::values)
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(name, code)| Some((name.clone(), code_string(code)?)))
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn code_to_name(&self, level: GicsLevel) -> Result<BTreeMap<String, String>> {
        Ok(self
            .name_to_code(level)?
            .into_iter()
            .map(|(name, code)| (code, name))
            .collect())
    }
}

/// GICS codes per ticker: `{ticker, values: {gics_sector, ..., gics_sub_industry}}`
#[derive(Debug, Clone)]
pub struct GicsCodeDao {
    assembler: TableAssembler,
    mapping: GicsMappingDao,
}

/// Codes and names of one ticker at every level
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GicsInfo {
    pub codes: BTreeMap<GicsLevel, String>,
    pub names: BTreeMap<GicsLevel, String>,
}

impl GicsCodeDao {
    pub fn new(assembler: TableAssembler, mapping: GicsMappingDao) -> Self {
        Self { assembler, mapping }
    }

    pub fn assembler(&self) -> &TableAssembler {
        &self.assembler
    }

    pub fn mapping(&self) -> &GicsMappingDao {
        &self.mapping
    }

    pub fn insert_ticker(&self, ticker: &str, codes: &BTreeMap<GicsLevel, String>) -> Result<()> {
        let values: Map<String, Value> = codes
            .iter()
            .map(|(level, code)| (level.field().to_string(), Value::String(code.clone())))
            .collect();
        let doc = Document::new().with("ticker", ticker).with(VALUES_FIELD, values);
        self.assembler.insert_one(&doc, Some("ticker"))?;
        Ok(())
    }

    /// Sorted names defined at a level
    pub fn names_by_level(&self, level: GicsLevel) -> Result<Vec<String>> {
        Ok(self.mapping.name_to_code(level)?.into_keys().collect())
    }

    /// Ticker -> code at a level
    pub fn codes_by_level(&self, level: GicsLevel) -> Result<BTreeMap<String, String>> {
        let options = FindOptions::new(Filter::new()).projection(
            Projection::new()
                .field("ticker")
                .field(FieldPath::new([VALUES_FIELD, level.field()])),
        );
        let docs = self.assembler.store().find(self.assembler.namespace(), &options)?;
        Ok(docs
            .iter()
            .filter_map(|doc| {
                let ticker = doc.get("ticker")?.as_str()?;
                let code = doc.get_path(&FieldPath::new([VALUES_FIELD, level.field()]))?;
                Some((ticker.to_string(), code_string(code)?))
            })
            .collect())
    }

    /// Codes and names of a ticker; `None` for an unknown ticker
    pub fn info_by_ticker(&self, ticker: &str) -> Result<Option<GicsInfo>> {
        let doc = self.assembler.store().find_one(
            self.assembler.namespace(),
            &Filter::new().eq("ticker", ticker),
            None,
        )?;
        let Some(values) = doc.as_ref().and_then(Document::values).and_then(Value::as_object) else {
            return Ok(None);
        };

        let mut info = GicsInfo::default();
        for level in GicsLevel::ALL {
            let Some(code) = values.get(level.field()).and_then(code_string) else {
                continue;
            };
            if let Some(name) = self.mapping.code_to_name(level)?.remove(&code) {
                info.names.insert(level, name);
            }
            info.codes.insert(level, code);
        }
        Ok(Some(info))
    }

    /// Sorted tickers classified under `name` at a level
    pub fn tickers_by_name(&self, level: GicsLevel, name: &str) -> Result<Vec<String>> {
        let Some(code) = self.mapping.name_to_code(level)?.remove(name) else {
            return Ok(Vec::new());
        };
        let tickers = self.assembler.store().distinct(
            self.assembler.namespace(),
            &FieldPath::from("ticker"),
            &Filter::new().eq(FieldPath::new([VALUES_FIELD, level.field()]), code),
        )?;
        let mut tickers: Vec<String> = tickers
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        tickers.sort();
        Ok(tickers)
    }
}

/// Codes are stored as strings but older documents hold numbers
fn code_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Namespace, SqliteStore};
    use std::sync::Arc;

    fn taxonomy() -> GicsCodeDao {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mapping = GicsMappingDao::new(TableAssembler::new(
            store.clone(),
            Namespace::new("Reference", "gics_code_mapping").unwrap(),
        ));
        mapping
            .insert_mapping(
                GicsLevel::Sector,
                &BTreeMap::from([
                    ("Energy".to_string(), "10".to_string()),
                    ("Information Technology".to_string(), "45".to_string()),
                ]),
            )
            .unwrap();

        let dao = GicsCodeDao::new(
            TableAssembler::new(store, Namespace::new("Reference", "gics_code").unwrap()),
            mapping,
        );
        for (ticker, sector, sub) in [
            ("AAPL", "45", "45202030"),
            ("MSFT", "45", "45103020"),
            ("XOM", "10", "10102010"),
        ] {
            dao.insert_ticker(
                ticker,
                &BTreeMap::from([
                    (GicsLevel::Sector, sector.to_string()),
                    (GicsLevel::SubIndustry, sub.to_string()),
                ]),
            )
            .unwrap();
        }
        dao
    }

    #[test]
    fn test_level_conversion() {
        assert_eq!(GicsLevel::try_from(3).unwrap(), GicsLevel::Industry);
        assert!(matches!(GicsLevel::try_from(5), Err(DataHubError::Validation(_))));
        assert!(GicsLevel::try_from(0).is_err());
    }

    #[test]
    fn test_mapping_both_directions() {
        let dao = taxonomy();
        assert_eq!(
            dao.names_by_level(GicsLevel::Sector).unwrap(),
            vec!["Energy", "Information Technology"]
        );
        assert_eq!(
            dao.mapping().code_to_name(GicsLevel::Sector).unwrap()["45"],
            "Information Technology"
        );
        assert!(dao.names_by_level(GicsLevel::Industry).unwrap().is_empty());
    }

    #[test]
    fn test_codes_and_info() {
        let dao = taxonomy();
        let codes = dao.codes_by_level(GicsLevel::Sector).unwrap();
        assert_eq!(codes.len(), 3);
        assert_eq!(codes["XOM"], "10");

        let info = dao.info_by_ticker("AAPL").unwrap().unwrap();
        assert_eq!(info.codes[&GicsLevel::SubIndustry], "45202030");
        assert_eq!(info.names[&GicsLevel::Sector], "Information Technology");
        assert!(!info.names.contains_key(&GicsLevel::SubIndustry));
        assert!(dao.info_by_ticker("ZZZZ").unwrap().is_none());
    }

    #[test]
    fn test_tickers_by_name() {
        let dao = taxonomy();
        assert_eq!(
            dao.tickers_by_name(GicsLevel::Sector, "Information Technology").unwrap(),
            vec!["AAPL", "MSFT"]
        );
        assert!(dao.tickers_by_name(GicsLevel::Sector, "Utilities").unwrap().is_empty());
    }
}
