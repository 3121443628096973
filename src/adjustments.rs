//! Corporate action adjustments
//!
//! Split ratios are stored per ex-date (2.0 for a 2-for-1 split). The
//! cumulative product of those ratios over trading days restates prices
//! across splits; dividends enter daily returns as a same-day yield.

use crate::error::Result;
use crate::table::Table;
use crate::types::{AdjustMethod, Timestamp};

/// A stored split ratio that is missing or zero means "no split"
fn effective_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() || ratio == 0.0 {
        1.0
    } else {
        ratio
    }
}

/// Cumulative split factors over `trading_dates` for every ticker in `splits`.
///
/// `Forward` is the running product from the window start, so a ticker's
/// factor never decreases when all its ratios are at least 1. `Backward`
/// divides that product by its value on the last date, which makes the
/// factor 1 at the end of the window.
pub fn adjustment_factors(
    splits: &Table<f64>,
    trading_dates: &[Timestamp],
    method: AdjustMethod,
) -> Table<f64> {
    if trading_dates.is_empty() {
        return Table::empty();
    }

    let ratios = splits
        .reindex(trading_dates, splits.columns(), f64::NAN)
        .map(|r| effective_ratio(*r));
    let forward = ratios.cumprod();

    match method {
        AdjustMethod::Forward => forward,
        AdjustMethod::Backward => {
            let last: Vec<f64> = forward.last_row().map(|r| r.to_vec()).unwrap_or_default();
            let rows = vec![last; trading_dates.len()];
            match Table::new(trading_dates.to_vec(), forward.columns().to_vec(), rows) {
                Ok(anchor) => forward
                    .zip_with(&anchor, |f, a| f / a)
                    .unwrap_or_else(|_| forward.clone()),
                Err(_) => forward,
            }
        }
    }
}

/// Split-adjusted daily returns including the dividend yield.
///
/// `factors` must be forward factors. The return of a ticker on date t is
/// defined iff its raw price exists on both t and the previous row; dates
/// with no prior row are dropped, so the result starts at the second row of
/// `prices`. Dividends outside the price index are ignored.
pub fn daily_returns(
    prices: &Table<f64>,
    factors: &Table<f64>,
    dividends: &Table<f64>,
) -> Result<Table<f64>> {
    if prices.is_empty() {
        return Ok(Table::empty());
    }

    let index = prices.index();
    let columns = prices.columns();

    let factors = factors.reindex(index, columns, f64::NAN).fill_nan(1.0);
    let adjusted = prices.zip_with(&factors, |p, f| p * f)?;

    let dividends = dividends.reindex(index, columns, f64::NAN).fill_nan(0.0);
    let dividend_yield = dividends.zip_with(prices, |d, p| {
        if p.is_nan() || *p == 0.0 {
            0.0
        } else {
            d / p
        }
    })?;

    let returns = adjusted
        .pct_change()
        .zip_with(&dividend_yield, |r, y| r + y)?
        .zip_with(prices, |r, p| if p.is_nan() { f64::NAN } else { *r })?;

    Ok(returns.skip_rows(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn d(day: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn sparse(entries: &[(u32, &str, f64)]) -> Table<f64> {
        let mut map: BTreeMap<Timestamp, BTreeMap<String, f64>> = BTreeMap::new();
        for (day, ticker, value) in entries {
            map.entry(d(*day)).or_default().insert(ticker.to_string(), *value);
        }
        Table::from_entries(map, f64::NAN)
    }

    fn trading() -> Vec<Timestamp> {
        vec![d(2), d(3), d(4), d(5)]
    }

    #[test]
    fn test_forward_factors() {
        let splits = sparse(&[(3, "AAPL", 2.0), (5, "AAPL", 3.0), (4, "MSFT", 0.0)]);
        let factors = adjustment_factors(&splits, &trading(), AdjustMethod::Forward);
        assert_eq!(factors.column_values("AAPL").unwrap(), vec![1.0, 2.0, 2.0, 6.0]);
        assert_eq!(factors.column_values("MSFT").unwrap(), vec![1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_backward_factors_anchor_last_date() {
        let splits = sparse(&[(3, "AAPL", 2.0), (5, "AAPL", 3.0)]);
        let factors = adjustment_factors(&splits, &trading(), AdjustMethod::Backward);
        let aapl = factors.column_values("AAPL").unwrap();
        assert_relative_eq!(aapl[0], 1.0 / 6.0);
        assert_relative_eq!(aapl[1], 1.0 / 3.0);
        assert_relative_eq!(aapl[3], 1.0);
    }

    #[test]
    fn test_split_off_calendar_is_ignored() {
        // A ratio stored on a non-trading day has no row to land on
        let splits = sparse(&[(6, "AAPL", 2.0)]);
        let factors = adjustment_factors(&splits, &trading(), AdjustMethod::Backward);
        assert_eq!(factors.column_values("AAPL").unwrap(), vec![1.0; 4]);
        assert!(adjustment_factors(&splits, &[], AdjustMethod::Forward).is_empty());
    }

    #[test]
    fn test_split_day_return_is_flat() {
        let prices = sparse(&[(2, "AAPL", 100.0), (3, "AAPL", 50.0), (4, "AAPL", 51.0)]);
        let splits = sparse(&[(3, "AAPL", 2.0)]);
        let factors = adjustment_factors(&splits, &[d(2), d(3), d(4)], AdjustMethod::Forward);
        let returns = daily_returns(&prices, &factors, &Table::empty()).unwrap();

        assert_eq!(returns.index(), &[d(3), d(4)]);
        assert_relative_eq!(*returns.get(d(3), "AAPL").unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(*returns.get(d(4), "AAPL").unwrap(), 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_dividend_yield_added() {
        let prices = sparse(&[(2, "XOM", 100.0), (3, "XOM", 99.0)]);
        let dividends = sparse(&[(3, "XOM", 1.0), (7, "XOM", 5.0)]);
        let returns = daily_returns(&prices, &Table::empty(), &dividends).unwrap();
        assert_relative_eq!(
            *returns.get(d(3), "XOM").unwrap(),
            99.0 / 100.0 - 1.0 + 1.0 / 99.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_return_requires_both_prices() {
        let prices = sparse(&[
            (2, "AAPL", 10.0),
            (3, "MSFT", 20.0),
            (4, "AAPL", 11.0),
            (4, "MSFT", 22.0),
        ]);
        let returns = daily_returns(&prices, &Table::empty(), &Table::empty()).unwrap();
        assert!(returns.get(d(3), "AAPL").unwrap().is_nan());
        assert!(returns.get(d(4), "AAPL").unwrap().is_nan());
        assert!(returns.get(d(3), "MSFT").unwrap().is_nan());
        assert_relative_eq!(*returns.get(d(4), "MSFT").unwrap(), 0.1, epsilon = 1e-12);
    }
}
