//! Data-quality detectors
//!
//! A detector is a plain record: the items it needs, a predicate producing a
//! violation mask over the aligned dataset, and a tolerated error rate.
//! Adding a rule means adding one record; see [`builtins`].

pub mod auditor;
pub mod builtins;
pub mod report;

pub use auditor::DataAuditor;
pub use report::{AnalysisRow, DataStatus, DetectionResult, ErrorReport, ReportWindow, UniverseErrors};

use crate::error::{DataHubError, Result};
use crate::table::Table;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Aligned numeric tables keyed by item name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    items: BTreeMap<String, Table<f64>>,
}

impl Dataset {
    pub fn new(items: BTreeMap<String, Table<f64>>) -> Self {
        Self { items }
    }

    pub fn insert(&mut self, item: impl Into<String>, table: Table<f64>) {
        self.items.insert(item.into(), table);
    }

    pub fn get(&self, item: &str) -> Option<&Table<f64>> {
        self.items.get(item)
    }

    /// Table of a required item
    pub fn require(&self, item: &str) -> Result<&Table<f64>> {
        self.items
            .get(item)
            .ok_or_else(|| DataHubError::Validation(format!("Dataset has no item '{}'", item)))
    }

    pub fn contains(&self, item: &str) -> bool {
        self.items.contains_key(item)
    }

    pub fn items(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }
}

/// Violation predicate over a dataset
pub type DetectFn = Arc<dyn Fn(&Dataset) -> Result<Table<bool>> + Send + Sync>;

/// One flagged cell
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Violation {
    pub timestamp: Timestamp,
    pub ticker: String,
}

/// Outcome of one detector over one dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorResult {
    /// Violations, capped at the detector's `max_records`
    pub records: Vec<Violation>,
    /// Total violations before capping
    pub error_count: usize,
    /// `error_count` over the number of cells checked
    pub error_rate: f64,
}

#[derive(Clone)]
pub struct Detector {
    pub name: String,
    pub description: String,
    pub required_items: Vec<String>,
    /// Highest tolerated error rate
    pub threshold: f64,
    pub max_records: usize,
    detect: DetectFn,
}

impl fmt::Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("name", &self.name)
            .field("required_items", &self.required_items)
            .field("threshold", &self.threshold)
            .field("max_records", &self.max_records)
            .finish()
    }
}

impl Detector {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        required_items: impl IntoIterator<Item = S>,
        detect: DetectFn,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            required_items: required_items.into_iter().map(Into::into).collect(),
            threshold: 0.0,
            max_records: 1000,
            detect,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn missing_items(&self, dataset: &Dataset) -> Vec<String> {
        self.required_items
            .iter()
            .filter(|item| !dataset.contains(item))
            .cloned()
            .collect()
    }

    /// Check required items, run the predicate and summarise the mask.
    /// A predicate that errors or panics yields `DetectorExecution`.
    pub fn run(&self, dataset: &Dataset) -> Result<DetectorResult> {
        let missing = self.missing_items(dataset);
        if !missing.is_empty() {
            log::error!("Missing items for detector '{}': {:?}", self.name, missing);
            return Err(self.execution_error(format!("missing required items {:?}", missing)));
        }

        let mask = match panic::catch_unwind(AssertUnwindSafe(|| (self.detect)(dataset))) {
            Ok(Ok(mask)) => mask,
            Ok(Err(e)) => return Err(self.execution_error(e.to_string())),
            Err(payload) => return Err(self.execution_error(panic_message(payload.as_ref()))),
        };

        Ok(self.summarise(&mask))
    }

    fn summarise(&self, mask: &Table<bool>) -> DetectorResult {
        let mut records: Vec<Violation> = mask
            .true_cells()
            .into_iter()
            .map(|(timestamp, ticker)| Violation { timestamp, ticker })
            .collect();
        let error_count = records.len();
        if error_count == 0 {
            log::info!("Check passed for detector '{}'", self.name);
            return DetectorResult {
                records,
                error_count,
                error_rate: 0.0,
            };
        }

        let error_rate = error_count as f64 / mask.size() as f64;
        if error_rate > self.threshold {
            log::error!(
                "Error rate {:.4} exceeds threshold {} for detector '{}'",
                error_rate,
                self.threshold,
                self.name
            );
        }
        records.truncate(self.max_records);

        DetectorResult {
            records,
            error_count,
            error_rate,
        }
    }

    fn execution_error(&self, reason: String) -> DataHubError {
        DataHubError::DetectorExecution {
            detector: self.name.clone(),
            reason,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn d(day: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn dataset() -> Dataset {
        let close = Table::new(
            vec![d(2), d(3)],
            vec!["AAPL".to_string(), "MSFT".to_string()],
            vec![vec![1.0, -2.0], vec![-3.0, 4.0]],
        )
        .unwrap();
        Dataset::new(BTreeMap::from([("close".to_string(), close)]))
    }

    fn negative_close() -> Detector {
        Detector::new(
            "NegativeClose",
            ["close"],
            Arc::new(|data: &Dataset| -> Result<Table<bool>> {
                Ok(data.require("close")?.map(|x| *x < 0.0))
            }),
        )
    }

    #[test]
    fn test_run_counts_and_caps_records() {
        let result = negative_close().with_max_records(1).run(&dataset()).unwrap();
        assert_eq!(result.error_count, 2);
        assert_relative_eq!(result.error_rate, 0.5);
        assert_eq!(
            result.records,
            vec![Violation { timestamp: d(2), ticker: "MSFT".to_string() }]
        );
    }

    #[test]
    fn test_missing_items_fail_fast() {
        let detector = Detector::new(
            "NeedsOpen",
            ["open", "close"],
            Arc::new(|_: &Dataset| -> Result<Table<bool>> { panic!("must not run") }),
        );
        assert_eq!(detector.missing_items(&dataset()), vec!["open".to_string()]);
        assert!(matches!(
            detector.run(&dataset()),
            Err(DataHubError::DetectorExecution { .. })
        ));
    }

    #[test]
    fn test_panicking_predicate_is_isolated() {
        let detector = Detector::new(
            "Broken",
            ["close"],
            Arc::new(|_: &Dataset| -> Result<Table<bool>> { panic!("boom") }),
        );
        match detector.run(&dataset()) {
            Err(DataHubError::DetectorExecution { detector, reason }) => {
                assert_eq!(detector, "Broken");
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_clean_dataset() {
        let detector = Detector::new(
            "Never",
            ["close"],
            Arc::new(|data: &Dataset| -> Result<Table<bool>> {
                Ok(data.require("close")?.map(|_| false))
            }),
        );
        let result = detector.run(&dataset()).unwrap();
        assert_eq!(result.error_count, 0);
        assert!(result.records.is_empty());
    }
}
