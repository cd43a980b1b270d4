//! Spend accounting
//!
//! Costs are carried internally as integer micro-dollars so that sums and
//! comparisons against the daily limit are exact. Conversions at the edges:
//! estimates round up, billed amounts round to nearest.

pub mod estimator;
pub mod ledger;

pub use estimator::{CostEstimator, estimate_tokens};
pub use ledger::{BudgetCheck, BudgetDenied, BudgetLedger, BudgetStatus, Reservation, Transaction};

const MICROS_PER_USD: f64 = 1_000_000.0;

/// Float noise tolerated before rounding up (`0.015 * 1e6` is not exactly 15000)
const ROUNDING_EPSILON: f64 = 1e-6;

/// Convert a billed USD amount to micro-dollars, rounding to nearest
///
/// Negative and non-finite amounts map to zero.
pub fn usd_to_micros(usd: f64) -> u64 {
    if !usd.is_finite() || usd <= 0.0 {
        return 0;
    }
    (usd * MICROS_PER_USD).round() as u64
}

/// Convert an estimated USD amount to micro-dollars, rounding up
///
/// A non-finite estimate maps to `u64::MAX` so that no budget can cover it.
pub fn usd_to_micros_ceil(usd: f64) -> u64 {
    if usd.is_nan() || usd == f64::INFINITY {
        return u64::MAX;
    }
    if usd <= 0.0 {
        return 0;
    }
    ceil_with_tolerance(usd * MICROS_PER_USD)
}

/// Scale a micro-dollar amount by a ratio, rounding up
pub fn scale_micros_ceil(micros: u64, ratio: f64) -> u64 {
    if !ratio.is_finite() || ratio <= 0.0 {
        return 0;
    }
    ceil_with_tolerance(micros as f64 * ratio)
}

pub fn micros_to_usd(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_USD
}

fn ceil_with_tolerance(value: f64) -> u64 {
    let nearest = value.round();
    if (value - nearest).abs() < ROUNDING_EPSILON {
        nearest as u64
    } else {
        value.ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_of_common_amounts_is_exact() {
        assert_eq!(usd_to_micros(0.015), 15_000);
        assert_eq!(usd_to_micros_ceil(0.015), 15_000);
        assert_eq!(usd_to_micros(4.95), 4_950_000);
        assert_eq!(micros_to_usd(50_000), 0.05);
        assert_eq!(micros_to_usd(23_000), 0.023);
    }

    #[test]
    fn test_ceil_rounds_fractions_up() {
        assert_eq!(usd_to_micros_ceil(0.0000001), 1);
        assert_eq!(usd_to_micros(0.0000001), 0);
        assert_eq!(scale_micros_ceil(100_000, 1.5), 150_000);
        assert_eq!(scale_micros_ceil(3, 1.5), 5);
    }

    #[test]
    fn test_invalid_amounts_are_zero() {
        assert_eq!(usd_to_micros(-1.0), 0);
        assert_eq!(usd_to_micros(f64::NAN), 0);
        assert_eq!(usd_to_micros_ceil(-1.0), 0);
    }

    #[test]
    fn test_non_finite_estimates_cannot_fit() {
        assert_eq!(usd_to_micros_ceil(f64::INFINITY), u64::MAX);
        assert_eq!(usd_to_micros_ceil(f64::NAN), u64::MAX);
        assert_eq!(scale_micros_ceil(usd_to_micros_ceil(f64::INFINITY), 1.5), u64::MAX);
    }
}
