//! Robust aggregator - median/stdev outlier rejection over decimal quotes
//!
//! The same reduction runs twice per cycle: once over this peer's provider
//! quotes and once over the filtered medians the whole cohort exchanged.
//! Everything is decimal at 8 places so independent peers reproduce each
//! other's figures bit-for-bit.

use rust_decimal::prelude::MathematicalOps;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{OracleError, OracleResult};
use crate::types::{fixed8, Quote};

/// Stdev floor so a zero-spread set still passes the inclusive filter
pub fn stdev_epsilon() -> Decimal {
    Decimal::new(1, 8)
}

/// Result of one aggregation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Input values at 8 decimals, ascending
    pub raw_values: Vec<Decimal>,
    pub raw_median: Decimal,
    pub raw_stdev: Decimal,
    /// Values within one stdev of the raw median, ascending
    pub filtered_values: Vec<Decimal>,
    pub filtered_median: Decimal,
    pub filtered_mean: Decimal,
    /// Present quotes by provider name
    pub per_provider: BTreeMap<String, Decimal>,
}

/// Stateless median/stdev filter
#[derive(Debug, Clone, Copy, Default)]
pub struct RobustAggregator;

impl RobustAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate provider quotes, dropping absent ones
    pub fn aggregate_quotes(&self, quotes: &[Quote]) -> OracleResult<AggregateResult> {
        let per_provider: BTreeMap<String, Decimal> = quotes
            .iter()
            .filter_map(|q| q.value.map(|v| (q.provider.clone(), fixed8(v))))
            .collect();

        let values: Vec<Decimal> = quotes.iter().filter_map(|q| q.value).collect();
        let mut result = self.aggregate_values(&values)?;
        result.per_provider = per_provider;
        Ok(result)
    }

    /// Aggregate a bare value set
    pub fn aggregate_values(&self, values: &[Decimal]) -> OracleResult<AggregateResult> {
        if values.is_empty() {
            return Err(OracleError::DataUnavailable);
        }

        // Sorting first makes the whole result independent of input order.
        let mut raw: Vec<Decimal> = values.iter().copied().map(fixed8).collect();
        raw.sort();

        let (raw_median, raw_stdev) = match (median(&raw), population_stdev(&raw)) {
            (Some(m), Some(sd)) => (fixed8(m), fixed8(sd)),
            _ => {
                tracing::warn!(values = raw.len(), "Aggregate overflowed, values out of range");
                return Err(OracleError::DataUnavailable);
            }
        };

        let threshold = if raw_stdev.is_zero() {
            stdev_epsilon()
        } else {
            raw_stdev
        };

        let filtered: Vec<Decimal> = raw
            .iter()
            .copied()
            .filter(|v| {
                v.checked_sub(raw_median)
                    .is_some_and(|d| fixed8(d.abs()) <= threshold)
            })
            .collect();

        // Unreachable in practice: the median's own neighbourhood always passes.
        if filtered.is_empty() {
            return Err(OracleError::DataUnavailable);
        }

        let (filtered_median, filtered_mean) = match (median(&filtered), mean(&filtered)) {
            (Some(m), Some(avg)) => (fixed8(m), fixed8(avg)),
            _ => return Err(OracleError::DataUnavailable),
        };

        Ok(AggregateResult {
            filtered_median,
            filtered_mean,
            filtered_values: filtered,
            raw_values: raw,
            raw_median,
            raw_stdev,
            per_provider: BTreeMap::new(),
        })
    }
}

/// Median of an ascending, non-empty slice. None on overflow.
fn median(sorted: &[Decimal]) -> Option<Decimal> {
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        sorted[n / 2 - 1]
            .checked_add(sorted[n / 2])?
            .checked_div(Decimal::TWO)
    }
}

fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
}

fn mean(values: &[Decimal]) -> Option<Decimal> {
    checked_sum(values.iter().copied())?.checked_div(Decimal::from(values.len()))
}

fn population_stdev(values: &[Decimal]) -> Option<Decimal> {
    let m = mean(values)?;
    let squares = values
        .iter()
        .map(|v| {
            let d = v.checked_sub(m)?;
            d.checked_mul(d)
        })
        .collect::<Option<Vec<Decimal>>>()?;
    let variance = checked_sum(squares)?.checked_div(Decimal::from(values.len()))?;
    Some(variance.sqrt().unwrap_or(Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_outlier_is_rejected() {
        let agg = RobustAggregator::new();
        let result = agg
            .aggregate_values(&[dec!(0.50), dec!(0.51), dec!(0.49), dec!(10.00)])
            .unwrap();

        assert_eq!(result.raw_median, dec!(0.505));
        assert!(result.raw_stdev > dec!(4));
        assert!(!result.filtered_values.contains(&dec!(10)));
        assert_eq!(result.filtered_values.len(), 3);
        assert_eq!(result.filtered_median, dec!(0.5));
        assert_eq!(result.filtered_mean, dec!(0.5));
    }

    #[test]
    fn test_permutation_invariance() {
        let agg = RobustAggregator::new();
        let a = agg
            .aggregate_values(&[dec!(1.1), dec!(1.3), dec!(0.9), dec!(5.0), dec!(1.2)])
            .unwrap();
        let b = agg
            .aggregate_values(&[dec!(5.0), dec!(1.2), dec!(1.1), dec!(0.9), dec!(1.3)])
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_zero_stdev_keeps_every_value() {
        let agg = RobustAggregator::new();
        let result = agg
            .aggregate_values(&[dec!(0.52), dec!(0.52), dec!(0.520)])
            .unwrap();
        assert_eq!(result.raw_stdev, Decimal::ZERO);
        assert_eq!(result.filtered_values, result.raw_values);
        assert_eq!(result.filtered_median, dec!(0.52));
    }

    #[test]
    fn test_filter_is_inclusive_at_one_stdev() {
        // median 2, population stdev of {1,2,3} is ~0.816 so 1 and 3 fall outside
        let agg = RobustAggregator::new();
        let result = agg.aggregate_values(&[dec!(1), dec!(2), dec!(3)]).unwrap();
        assert_eq!(result.filtered_values, vec![dec!(2)]);

        // median 1.5, stdev 0.5: both endpoints sit exactly on the boundary
        let result = agg.aggregate_values(&[dec!(1), dec!(2)]).unwrap();
        assert_eq!(result.raw_stdev, dec!(0.5));
        assert_eq!(result.filtered_values.len(), 2);
    }

    #[test]
    fn test_idempotent() {
        let agg = RobustAggregator::new();
        let values = [dec!(0.4812), dec!(0.4820), dec!(0.4790)];
        assert_eq!(
            agg.aggregate_values(&values).unwrap(),
            agg.aggregate_values(&values).unwrap()
        );
    }

    #[test]
    fn test_empty_input_is_data_unavailable() {
        let agg = RobustAggregator::new();
        assert!(matches!(
            agg.aggregate_values(&[]),
            Err(OracleError::DataUnavailable)
        ));
        let quotes = vec![Quote::absent("binance"), Quote::absent("kraken")];
        assert!(matches!(
            agg.aggregate_quotes(&quotes),
            Err(OracleError::DataUnavailable)
        ));
    }

    #[test]
    fn test_absent_quotes_are_dropped_and_named() {
        let agg = RobustAggregator::new();
        let quotes = vec![
            Quote::present("bitstamp", dec!(0.51)),
            Quote::absent("kraken"),
            Quote::present("binance", dec!(0.50)),
        ];
        let result = agg.aggregate_quotes(&quotes).unwrap();
        assert_eq!(result.raw_values.len(), 2);
        assert_eq!(result.per_provider.len(), 2);
        assert_eq!(result.per_provider["binance"], dec!(0.5));
        assert!(!result.per_provider.contains_key("kraken"));
    }

    #[test]
    fn test_values_are_fixed_to_eight_places() {
        let agg = RobustAggregator::new();
        let result = agg.aggregate_values(&[dec!(0.123456789)]).unwrap();
        assert_eq!(result.raw_values, vec![dec!(0.12345679)]);
        assert_eq!(result.filtered_mean, dec!(0.12345679));
    }

    #[test]
    fn test_out_of_range_values_fail_without_panicking() {
        let agg = RobustAggregator::new();
        let result = agg.aggregate_values(&[dec!(0.5), dec!(1000000000000000)]);
        assert!(matches!(result, Err(OracleError::DataUnavailable)));

        let huge = Decimal::MAX;
        assert!(matches!(
            agg.aggregate_values(&[huge, huge]),
            Err(OracleError::DataUnavailable)
        ));
        assert!(matches!(
            agg.aggregate_values(&[Decimal::MIN, dec!(0.5), huge]),
            Err(OracleError::DataUnavailable)
        ));
    }
}
