//! Built-in detectors

use super::{Dataset, Detector};
use crate::error::Result;
use crate::table::Table;
use std::sync::Arc;

/// Tolerated share of extreme daily moves
pub const EXTREME_RETURN_THRESHOLD: f64 = 0.005;

/// Cell-wise OR of `pred` applied to each item
fn any_item(dataset: &Dataset, items: &[&str], pred: impl Fn(f64) -> bool) -> Result<Table<bool>> {
    let mut combined: Option<Table<bool>> = None;
    for item in items {
        let mask = dataset.require(item)?.map(|x| pred(*x));
        combined = Some(match combined {
            Some(acc) => acc.or(&mask)?,
            None => mask,
        });
    }
    Ok(combined.unwrap_or_else(Table::empty))
}

/// High below low on the same day
pub fn high_low() -> Detector {
    Detector::new(
        "HighLowDetector",
        ["high", "low"],
        Arc::new(|data: &Dataset| -> Result<Table<bool>> {
            data.require("high")?.zip_with(data.require("low")?, |h, l| h < l)
        }),
    )
    .with_description("Detects if the high price is lower than the low price.")
}

/// Negative prices or volumes, or a daily loss beyond -100%
pub fn negative_value() -> Detector {
    Detector::new(
        "NegValueDetector",
        ["open", "high", "low", "close", "volume", "c2c_ret", "o2o_ret"],
        Arc::new(|data: &Dataset| -> Result<Table<bool>> {
            let prices = any_item(data, &["open", "high", "low", "close", "volume"], |x| x < 0.0)?;
            let returns = any_item(data, &["c2c_ret", "o2o_ret"], |x| x < -1.0)?;
            prices.or(&returns)
        }),
    )
    .with_description("Detects negative prices or volumes and daily returns below -100%.")
}

pub fn extreme_high_return() -> Detector {
    Detector::new(
        "ExtremeHighReturnDetector",
        ["c2c_ret", "o2o_ret"],
        Arc::new(|data: &Dataset| -> Result<Table<bool>> {
            any_item(data, &["c2c_ret", "o2o_ret"], |x| x > 1.0)
        }),
    )
    .with_description(
        "Detects if the close-to-close return or open-to-open return is greater than 100%.",
    )
    .with_threshold(EXTREME_RETURN_THRESHOLD)
}

pub fn extreme_low_return() -> Detector {
    Detector::new(
        "ExtremeLowReturnDetector",
        ["c2c_ret", "o2o_ret"],
        Arc::new(|data: &Dataset| -> Result<Table<bool>> {
            any_item(data, &["c2c_ret", "o2o_ret"], |x| x < -0.9)
        }),
    )
    .with_description(
        "Detects if the close-to-close return or open-to-open return is less than -90%.",
    )
    .with_threshold(EXTREME_RETURN_THRESHOLD)
}

/// The standard audit set, in run order
pub fn default_detectors() -> Vec<Detector> {
    vec![
        high_low(),
        negative_value(),
        extreme_high_return(),
        extreme_low_return(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Violation;
    use crate::types::Timestamp;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn d(day: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn table(rows: Vec<Vec<f64>>) -> Table<f64> {
        Table::new(
            vec![d(2), d(3)],
            vec!["AAPL".to_string(), "MSFT".to_string()],
            rows,
        )
        .unwrap()
    }

    fn dataset(entries: &[(&str, Table<f64>)]) -> Dataset {
        Dataset::new(
            entries
                .iter()
                .map(|(name, t)| (name.to_string(), t.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn test_high_low_single_violation() {
        let data = dataset(&[
            ("high", table(vec![vec![10.0, 20.0], vec![11.0, f64::NAN]])),
            ("low", table(vec![vec![9.0, 21.0], vec![10.0, 19.0]])),
        ]);
        let result = high_low().run(&data).unwrap();
        assert_eq!(result.error_count, 1);
        assert_eq!(
            result.records,
            vec![Violation { timestamp: d(2), ticker: "MSFT".to_string() }]
        );
    }

    #[test]
    fn test_extreme_returns() {
        let c2c = table(vec![vec![1.5, 0.0], vec![-0.95, 0.01]]);
        let o2o = table(vec![vec![0.0, 0.0], vec![0.0, 2.0]]);
        let data = dataset(&[("c2c_ret", c2c), ("o2o_ret", o2o)]);

        let high = extreme_high_return().run(&data).unwrap();
        assert_eq!(high.error_count, 2);

        let low = extreme_low_return().run(&data).unwrap();
        assert_eq!(
            low.records,
            vec![Violation { timestamp: d(3), ticker: "AAPL".to_string() }]
        );
    }

    #[test]
    fn test_negative_value() {
        let ok = table(vec![vec![1.0, 1.0], vec![1.0, 1.0]]);
        let data = dataset(&[
            ("open", ok.clone()),
            ("high", ok.clone()),
            ("low", ok.clone()),
            ("close", table(vec![vec![1.0, -1.0], vec![1.0, 1.0]])),
            ("volume", ok.clone()),
            ("c2c_ret", table(vec![vec![0.0, 0.0], vec![-1.5, 0.0]])),
            ("o2o_ret", table(vec![vec![0.0, 0.0], vec![-0.95, 0.0]])),
        ]);
        let result = negative_value().run(&data).unwrap();
        assert_eq!(result.error_count, 2);
        assert!(negative_value().threshold == 0.0);
    }

    #[test]
    fn test_default_set() {
        let names: Vec<_> = default_detectors().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "HighLowDetector",
                "NegValueDetector",
                "ExtremeHighReturnDetector",
                "ExtremeLowReturnDetector"
            ]
        );
    }
}
