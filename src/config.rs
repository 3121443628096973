//! Runtime configuration
//!
//! Every field has a default, so an empty TOML document is a valid config.

use crate::error::{DataHubError, Result};
use crate::manager::registry::{default_registry, AdapterKind, Registry};
use crate::store::SqliteStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the data hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// SQLite file backing the document store; in-memory when absent
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Documents pulled per cursor batch
    #[serde(default = "default_query_batch_size")]
    pub query_batch_size: usize,
    /// How far `closest_trading_date` scans from its anchor, in days
    #[serde(default = "default_calendar_search_days")]
    pub calendar_search_days: u32,
    /// Universes the auditor reports error rates for
    #[serde(default = "default_audit_universes")]
    pub audit_universes: Vec<String>,
    /// Universes whose threshold breaches mark a report as failing
    #[serde(default = "default_gating_universes")]
    pub gating_universes: Vec<String>,
    /// Items checked for missing trading days
    #[serde(default = "default_audited_items")]
    pub audited_items: Vec<String>,
    #[serde(default = "default_provider_launch_delay_ms")]
    pub provider_launch_delay_ms: u64,
    #[serde(default = "default_max_error_records")]
    pub max_error_records: usize,
}

fn default_query_batch_size() -> usize {
    1000
}

fn default_calendar_search_days() -> u32 {
    10
}

fn default_audit_universes() -> Vec<String> {
    vec!["univ_spx500".to_string(), "univ_ray3000".to_string()]
}

fn default_gating_universes() -> Vec<String> {
    vec!["univ_spx500".to_string()]
}

fn default_audited_items() -> Vec<String> {
    ["open", "high", "low", "close", "volume", "c2c_ret", "o2o_ret"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_provider_launch_delay_ms() -> u64 {
    100
}

fn default_max_error_records() -> usize {
    1000
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            query_batch_size: default_query_batch_size(),
            calendar_search_days: default_calendar_search_days(),
            audit_universes: default_audit_universes(),
            gating_universes: default_gating_universes(),
            audited_items: default_audited_items(),
            provider_launch_delay_ms: default_provider_launch_delay_ms(),
            max_error_records: default_max_error_records(),
        }
    }
}

impl HubConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: HubConfig = toml::from_str(contents)
            .map_err(|e| DataHubError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            DataHubError::ConfigError(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.query_batch_size == 0 {
            return Err(DataHubError::ConfigError(
                "query_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.calendar_search_days == 0 {
            return Err(DataHubError::ConfigError(
                "calendar_search_days must be greater than 0".to_string(),
            ));
        }
        if let Some(missing) = self
            .gating_universes
            .iter()
            .find(|u| !self.audit_universes.contains(u))
        {
            return Err(DataHubError::ConfigError(format!(
                "Gating universe '{}' is not an audited universe",
                missing
            )));
        }
        self.validate_items(&default_registry())
    }

    /// Audited items and universes must be registered, universes as universes
    pub fn validate_items(&self, registry: &Registry) -> Result<()> {
        if let Some(unknown) = self.audited_items.iter().find(|i| !registry.contains(i)) {
            return Err(DataHubError::ConfigError(format!(
                "Audited item '{}' is not a registered item",
                unknown
            )));
        }
        for universe in &self.audit_universes {
            match registry.get(universe) {
                Ok(spec) if spec.kind == AdapterKind::Universe => {}
                _ => {
                    return Err(DataHubError::ConfigError(format!(
                        "Audit universe '{}' is not a registered universe",
                        universe
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn provider_launch_delay(&self) -> Duration {
        Duration::from_millis(self.provider_launch_delay_ms)
    }

    /// Open the configured document store
    pub fn open_store(&self) -> Result<Arc<SqliteStore>> {
        let store = match &self.store_path {
            Some(path) => {
                log::info!("Opening document store at {}", path.display());
                SqliteStore::open(path)?
            }
            None => {
                log::info!("Opening in-memory document store");
                SqliteStore::open_in_memory()?
            }
        };
        Ok(Arc::new(store))
    }
}
