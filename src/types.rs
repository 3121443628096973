//! Core types and constants

use crate::error::{DataHubError, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Data date of a time-series document (daily granularity)
pub type Timestamp = NaiveDate;

/// Field holding the data date of a series document
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Field holding the insertion time of a document
pub const CREATED_AT_FIELD: &str = "created_at";

/// Field holding the payload of a series document
pub const VALUES_FIELD: &str = "values";

/// Storage format of timestamps inside documents
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` string into a timestamp
pub fn parse_timestamp(s: &str) -> Result<Timestamp> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|e| DataHubError::Validation(format!("Invalid timestamp '{}': {}", s, e)))
}

/// Format a timestamp the way documents store it
pub fn format_timestamp(ts: Timestamp) -> String {
    ts.format(DATE_FORMAT).to_string()
}

/// Creation stamps are stored with a fixed microsecond precision so that
/// their string order is their time order
pub fn format_created_at(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// How a table read selects documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Every document inside an inclusive date range
    ByDate,
    /// The N most recent documents at or before an end date
    ByCount,
}

impl FromStr for ReadMode {
    type Err = DataHubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "by_date" => Ok(ReadMode::ByDate),
            "by_count" | "by_num" => Ok(ReadMode::ByCount),
            other => Err(DataHubError::Validation(format!(
                "Unsupported read mode '{}': expected 'by_date' or 'by_count'",
                other
            ))),
        }
    }
}

/// A resolved read window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Inclusive date range
    Range { start: Timestamp, end: Timestamp },
    /// Most recent `count` documents, optionally capped at `end`
    Recent { count: usize, end: Option<Timestamp> },
}

impl Window {
    pub fn range(start: Timestamp, end: Timestamp) -> Self {
        Window::Range { start, end }
    }

    pub fn recent(count: usize) -> Self {
        Window::Recent { count, end: None }
    }

    /// Build a window from loosely typed read arguments
    pub fn resolve(
        mode: ReadMode,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
        count: Option<usize>,
    ) -> Result<Self> {
        match mode {
            ReadMode::ByDate => match (start, end) {
                (Some(start), Some(end)) => Ok(Window::Range { start, end }),
                _ => Err(DataHubError::validation(
                    "by_date reads require both start and end timestamps",
                )),
            },
            ReadMode::ByCount => match count {
                Some(0) => Err(DataHubError::validation("by_count reads require count > 0")),
                Some(count) => Ok(Window::Recent { count, end }),
                None => Err(DataHubError::validation("by_count reads require a count")),
            },
        }
    }
}

/// Anchor of the cumulative split adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustMethod {
    /// Factor is 1 at the window start and accumulates forward
    Forward,
    /// Factor is 1 at the window's last date (current share basis)
    #[default]
    Backward,
}

impl FromStr for AdjustMethod {
    type Err = DataHubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "forward" => Ok(AdjustMethod::Forward),
            "backward" => Ok(AdjustMethod::Backward),
            other => Err(DataHubError::Validation(format!(
                "Unsupported adjustment method '{}'",
                other
            ))),
        }
    }
}

/// Search direction for nearest trading day lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Look backwards in time
    #[default]
    Last,
    /// Look forwards in time
    Next,
}

impl Direction {
    /// Day step for this direction
    pub fn step(self) -> i64 {
        match self {
            Direction::Last => -1,
            Direction::Next => 1,
        }
    }
}

impl FromStr for Direction {
    type Err = DataHubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "last" => Ok(Direction::Last),
            "next" => Ok(Direction::Next),
            other => Err(DataHubError::Validation(format!(
                "direction must be 'last' or 'next', got '{}'",
                other
            ))),
        }
    }
}

/// Daily market status code stored by the market calendar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Trading,
    Weekend,
    Holiday,
}

impl MarketStatus {
    pub fn code(self) -> i64 {
        match self {
            MarketStatus::Trading => 1,
            MarketStatus::Weekend => 0,
            MarketStatus::Holiday => -1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(MarketStatus::Trading),
            0 => Some(MarketStatus::Weekend),
            -1 => Some(MarketStatus::Holiday),
            _ => None,
        }
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketStatus::Trading => write!(f, "trading"),
            MarketStatus::Weekend => write!(f, "weekend"),
            MarketStatus::Holiday => write!(f, "holiday"),
        }
    }
}
