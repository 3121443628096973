//! Market data provider collaborator
//!
//! The provider wraps a third-party market data service. Its failures are
//! opaque (`anyhow`) and the updater treats them as "no data" for the
//! requested window. Nothing here retries.

use crate::error::DataHubError;
use crate::types::{MarketStatus, Timestamp};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Per-ticker values of one date
pub type TickerValues = BTreeMap<String, f64>;

/// Which date a cash dividend is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DividendKind {
    ExDividend,
    PayDividend,
}

impl DividendKind {
    /// Registered item the dividends are stored under
    pub fn item(self) -> &'static str {
        match self {
            DividendKind::ExDividend => crate::manager::registry::EX_DIVIDEND,
            DividendKind::PayDividend => crate::manager::registry::PAY_DIVIDEND,
        }
    }
}

/// Source of raw market data
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Grouped daily bars of one date, keyed by field (`open` .. `volume`)
    fn daily_bars(&self, date: Timestamp) -> anyhow::Result<BTreeMap<String, TickerValues>>;

    /// Split ratios keyed by execution date
    fn stock_splits(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> anyhow::Result<BTreeMap<Timestamp, TickerValues>>;

    /// Cash amounts per share keyed by the date `kind` selects
    fn cash_dividends(
        &self,
        kind: DividendKind,
        start: Timestamp,
        end: Timestamp,
    ) -> anyhow::Result<BTreeMap<Timestamp, TickerValues>>;

    /// Shares outstanding of one ticker as of `date`; `None` when unknown
    fn shares_outstanding(&self, ticker: &str, date: Timestamp) -> anyhow::Result<Option<f64>>;

    /// Full market calendar known to the provider
    fn market_status(&self) -> anyhow::Result<BTreeMap<Timestamp, MarketStatus>>;

    /// Members of a universe on one date
    fn universe_members(&self, universe: &str, date: Timestamp) -> anyhow::Result<Vec<String>>;
}

/// Crate error describing an opaque provider failure
pub fn provider_failure(what: impl Display, err: &anyhow::Error) -> DataHubError {
    DataHubError::Provider(format!("{} failed: {:#}", what, err))
}

/// Run `fetch` for every key on its own scoped thread, sleeping `delay`
/// between launches, and join before returning. Failed keys are logged and
/// left out.
pub fn fan_out<K, V, F>(keys: Vec<K>, delay: Duration, fetch: F) -> BTreeMap<K, V>
where
    K: Ord + Display + Send,
    V: Send,
    F: Fn(&K) -> anyhow::Result<V> + Sync,
{
    let results = Mutex::new(BTreeMap::new());
    let total = keys.len();

    thread::scope(|scope| {
        for (i, key) in keys.into_iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                thread::sleep(delay);
            }
            let results = &results;
            let fetch = &fetch;
            scope.spawn(move || match fetch(&key) {
                Ok(value) => {
                    results
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .insert(key, value);
                }
                Err(e) => log::warn!("{}", provider_failure(format_args!("Fetch for {}", key), &e)),
            });
        }
    });

    let results = results
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    log::debug!("Fetched {}/{} keys from provider", results.len(), total);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Barrier;

    #[test]
    fn test_fan_out_drops_failures() {
        let keys: Vec<u32> = (1..=6).collect();
        let results = fan_out(keys, Duration::ZERO, |k| {
            if k % 3 == 0 {
                Err(anyhow!("rate limited"))
            } else {
                Ok(k * 10)
            }
        });
        assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![1, 2, 4, 5]);
        assert_eq!(results[&5], 50);
    }

    #[test]
    fn test_fan_out_runs_fetches_concurrently() {
        // Every fetch blocks until all four are in flight
        let barrier = Barrier::new(4);
        let results = fan_out((0..4u32).collect(), Duration::ZERO, |k| {
            barrier.wait();
            Ok(k + 1)
        });
        assert_eq!(results.values().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_provider_failure_message() {
        let err = provider_failure("Fetch for AAPL", &anyhow!("rate limited").context("GET /v3/shares"));
        assert!(matches!(err, DataHubError::Provider(_)));
        assert_eq!(
            err.to_string(),
            "Provider error: Fetch for AAPL failed: GET /v3/shares: rate limited"
        );
    }

    #[test]
    fn test_fan_out_empty() {
        let results: BTreeMap<String, u8> = fan_out(Vec::new(), Duration::from_millis(5), |_| Ok(1));
        assert!(results.is_empty());
    }

    #[test]
    fn test_dividend_items() {
        assert_eq!(DividendKind::ExDividend.item(), "ex_dividend");
        assert_eq!(DividendKind::PayDividend.item(), "pay_dividend");
    }
}
