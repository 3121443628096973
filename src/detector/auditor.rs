//! Audit run: pull the data every detector needs, run them in isolation and
//! persist one [`ErrorReport`].

use super::report::{DataStatus, DetectionResult, ErrorReport, ReportWindow};
use super::{builtins, Dataset, Detector};
use crate::config::HubConfig;
use crate::error::Result;
use crate::manager::DataManager;
use crate::table::align_tables;
use crate::types::{Timestamp, Window};
use chrono::{SubsecRound, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Ordered set of detectors run against one window
#[derive(Debug, Clone, Default)]
pub struct DataAuditor {
    detectors: Vec<Detector>,
}

impl DataAuditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in detectors, capped at the configured record count
    pub fn with_defaults(config: &HubConfig) -> Self {
        let mut auditor = Self::new();
        for detector in builtins::default_detectors() {
            auditor.register(detector.with_max_records(config.max_error_records));
        }
        auditor
    }

    pub fn register(&mut self, detector: Detector) -> &mut Self {
        log::debug!("Registered detector '{}'", detector.name);
        self.detectors.push(detector);
        self
    }

    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    /// Union of every detector's required items
    pub fn required_items(&self) -> BTreeSet<String> {
        self.detectors
            .iter()
            .flat_map(|d| d.required_items.iter().cloned())
            .collect()
    }

    /// Aligned tables of the required items. An item that cannot be read is
    /// left out, which fails only the detectors that need it.
    pub fn prepare_dataset(&self, manager: &DataManager, start: Timestamp, end: Timestamp) -> Dataset {
        let items = self.required_items();
        log::info!("Preparing data for items: {:?}", items);

        let window = Window::range(start, end);
        let mut tables = BTreeMap::new();
        for item in &items {
            match manager.get_item_tables(&[item], window, false) {
                Ok(mut pulled) => tables.append(&mut pulled),
                Err(e) => log::error!("Failed to load '{}' for the audit: {}", item, e),
            }
        }
        Dataset::new(align_tables(&tables))
    }

    /// Build the report for `[start, end]` without storing it
    pub fn audit(&self, manager: &DataManager, start: Timestamp, end: Timestamp) -> Result<ErrorReport> {
        let config = manager.config();
        let dataset = self.prepare_dataset(manager, start, end);

        let universes: BTreeMap<String, Vec<String>> = config
            .audit_universes
            .iter()
            .map(|universe| {
                let tickers = manager
                    .universe_tickers(universe, Window::range(start, end))
                    .unwrap_or_else(|e| {
                        log::error!("Failed to load universe '{}': {}", universe, e);
                        Vec::new()
                    });
                (universe.clone(), tickers)
            })
            .collect();

        let detection_results: Vec<DetectionResult> = self
            .detectors
            .par_iter()
            .map(|detector| {
                let outcome = detector.run(&dataset);
                match &outcome {
                    Ok(result) if result.error_count > 0 => log::error!(
                        "Detector '{}' found {} errors",
                        detector.name,
                        result.error_count
                    ),
                    Ok(_) => {}
                    Err(e) => log::error!("Error executing detector '{}': {}", detector.name, e),
                }
                DetectionResult::new(detector, &outcome, &universes)
            })
            .collect();

        let detection_analysis: Vec<_> = detection_results
            .iter()
            .flat_map(DetectionResult::analysis_rows)
            .collect();

        let mut missing_dates = BTreeMap::new();
        for item in &config.audited_items {
            match manager.missing_dates(item, start, end) {
                Ok(dates) if dates.is_empty() => {}
                Ok(dates) => {
                    log::info!("Missing data for {}: {:?}", item, dates);
                    missing_dates.insert(item.clone(), dates);
                }
                Err(e) => log::error!("Failed to check '{}' for missing dates: {}", item, e),
            }
        }

        let data_status = DataStatus {
            missing: !missing_dates.is_empty(),
            has_errors: ErrorReport::gating_breach(&detection_analysis, &config.gating_universes),
            latest_date_by_item: manager.latest_data_dates(&config.audited_items),
            missing_dates,
        };

        Ok(ErrorReport {
            timestamp: end,
            created_at: Utc::now().trunc_subsecs(6),
            window: ReportWindow { start, end },
            data_status,
            detection_results,
            detection_analysis,
        })
    }

    /// Audit `[start, end]` and append the report to the report collection
    pub fn run(&self, manager: &DataManager, start: Timestamp, end: Timestamp) -> Result<ErrorReport> {
        let report = self.audit(manager, start, end)?;
        manager.error_reports()?.insert(&report)?;
        if report.data_status.has_errors || report.data_status.missing {
            log::warn!(
                "Audit of {} ~ {} flagged data issues (errors: {}, missing: {})",
                start,
                end,
                report.data_status.has_errors,
                report.data_status.missing
            );
        }
        Ok(report)
    }
}
