//! Error report document and its aggregation

use super::{Detector, DetectorResult, Violation};
use crate::error::Result;
use crate::types::Timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStatus {
    /// Some audited item lacks a trading day in the window
    pub missing: bool,
    /// A gating universe breached a detector threshold
    pub has_errors: bool,
    pub latest_date_by_item: BTreeMap<String, Option<Timestamp>>,
    #[serde(default)]
    pub missing_dates: BTreeMap<String, Vec<Timestamp>>,
}

/// Error tally restricted to one universe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniverseErrors {
    pub error_count: usize,
    pub error_rate: f64,
}

/// Everything one detector produced during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub detector_name: String,
    pub description: String,
    pub threshold: f64,
    pub execution_error: Option<String>,
    pub error_records: Vec<Violation>,
    pub error_count: usize,
    pub error_rate: f64,
    pub error_analysis: BTreeMap<String, UniverseErrors>,
}

impl DetectionResult {
    /// Combine a detector outcome with the universes it is judged against
    pub fn new(
        detector: &Detector,
        outcome: &Result<DetectorResult>,
        universes: &BTreeMap<String, Vec<String>>,
    ) -> Self {
        let (records, error_count, error_rate, execution_error) = match outcome {
            Ok(result) => (result.records.clone(), result.error_count, result.error_rate, None),
            Err(e) => (Vec::new(), 0, 0.0, Some(e.to_string())),
        };

        let error_tickers: BTreeSet<&str> = records.iter().map(|v| v.ticker.as_str()).collect();
        let error_analysis = universes
            .iter()
            .map(|(universe, tickers)| {
                let count = tickers
                    .iter()
                    .filter(|t| error_tickers.contains(t.as_str()))
                    .collect::<BTreeSet<_>>()
                    .len();
                let rate = if tickers.is_empty() {
                    0.0
                } else {
                    count as f64 / tickers.len() as f64
                };
                (
                    universe.clone(),
                    UniverseErrors {
                        error_count: count,
                        error_rate: rate,
                    },
                )
            })
            .collect();

        Self {
            detector_name: detector.name.clone(),
            description: detector.description.clone(),
            threshold: detector.threshold,
            execution_error,
            error_records: records,
            error_count,
            error_rate,
            error_analysis,
        }
    }

    /// One analysis row per universe
    pub fn analysis_rows(&self) -> Vec<AnalysisRow> {
        self.error_analysis
            .iter()
            .map(|(universe, errors)| AnalysisRow {
                detector: self.detector_name.clone(),
                description: self.description.clone(),
                universe: universe.clone(),
                error_count: errors.error_count,
                error_rate: round4(errors.error_rate),
                threshold: self.threshold,
                above_threshold: errors.error_rate > self.threshold,
            })
            .collect()
    }
}

/// Flattened (detector, universe) verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRow {
    pub detector: String,
    pub description: String,
    pub universe: String,
    pub error_count: usize,
    pub error_rate: f64,
    pub threshold: f64,
    pub above_threshold: bool,
}

/// One audit run, persisted append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// End of the audited window
    pub timestamp: Timestamp,
    #[serde(rename = "created_at", with = "created_at_format")]
    pub created_at: DateTime<Utc>,
    pub window: ReportWindow,
    pub data_status: DataStatus,
    pub detection_results: Vec<DetectionResult>,
    pub detection_analysis: Vec<AnalysisRow>,
}

impl ErrorReport {
    /// Whether any row of a gating universe is above threshold
    pub fn gating_breach(rows: &[AnalysisRow], gating_universes: &[String]) -> bool {
        rows.iter()
            .any(|row| row.above_threshold && gating_universes.contains(&row.universe))
    }

    pub fn failed_detectors(&self) -> impl Iterator<Item = &DetectionResult> {
        self.detection_results
            .iter()
            .filter(|r| r.execution_error.is_some())
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

mod created_at_format {
    use crate::types::format_created_at;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_created_at(*at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|at| at.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::builtins;
    use crate::error::DataHubError;
    use approx::assert_relative_eq;
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    fn d(day: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn universes() -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([
            (
                "univ_spx500".to_string(),
                vec!["AAPL".to_string(), "MSFT".to_string(), "XOM".to_string()],
            ),
            ("univ_ray3000".to_string(), Vec::new()),
        ])
    }

    fn outcome() -> Result<DetectorResult> {
        Ok(DetectorResult {
            records: vec![
                Violation { timestamp: d(2), ticker: "AAPL".to_string() },
                Violation { timestamp: d(3), ticker: "AAPL".to_string() },
                Violation { timestamp: d(3), ticker: "ZZZ".to_string() },
            ],
            error_count: 3,
            error_rate: 0.1,
        })
    }

    #[test]
    fn test_universe_aggregation() {
        let result = DetectionResult::new(&builtins::high_low(), &outcome(), &universes());
        let spx = &result.error_analysis["univ_spx500"];
        assert_eq!(spx.error_count, 1);
        assert_relative_eq!(spx.error_rate, 1.0 / 3.0);
        assert_eq!(result.error_analysis["univ_ray3000"].error_rate, 0.0);

        let rows = result.analysis_rows();
        let spx_row = rows.iter().find(|r| r.universe == "univ_spx500").unwrap();
        assert_eq!(spx_row.error_rate, 0.3333);
        assert!(spx_row.above_threshold);
        assert!(ErrorReport::gating_breach(&rows, &["univ_spx500".to_string()]));
        assert!(!ErrorReport::gating_breach(&rows, &["univ_ray3000".to_string()]));
    }

    #[test]
    fn test_execution_error_recorded() {
        let failed: Result<DetectorResult> = Err(DataHubError::DetectorExecution {
            detector: "HighLowDetector".to_string(),
            reason: "missing required items [\"low\"]".to_string(),
        });
        let result = DetectionResult::new(&builtins::high_low(), &failed, &universes());
        assert!(result.execution_error.unwrap().contains("missing required items"));
        assert!(result.error_records.is_empty());
    }

    #[test]
    fn test_report_document_shape() {
        let result = DetectionResult::new(&builtins::high_low(), &outcome(), &universes());
        let report = ErrorReport {
            timestamp: d(5),
            created_at: Utc.with_ymd_and_hms(2024, 1, 5, 21, 30, 0).unwrap()
                + chrono::Duration::microseconds(250),
            window: ReportWindow { start: d(1), end: d(5) },
            data_status: DataStatus::default(),
            detection_analysis: result.analysis_rows(),
            detection_results: vec![result],
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["timestamp"], json!("2024-01-05"));
        assert_eq!(value["created_at"], json!("2024-01-05T21:30:00.000250Z"));
        assert_eq!(value["window"]["start"], json!("2024-01-01"));
        assert_eq!(value["dataStatus"]["hasErrors"], json!(false));
        assert!(value["dataStatus"].get("latestDateByItem").is_some());
        assert_eq!(value["detectionResults"][0]["errorRecords"][0]["ticker"], json!("AAPL"));

        let back: ErrorReport = serde_json::from_value(value).unwrap();
        assert_eq!(back, report);
        assert_eq!(back.failed_detectors().count(), 0);
    }
}
