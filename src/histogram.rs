//! Travel-cost histograms and their algebra.
//!
//! A `Histogram` is a discretized probability distribution of travel cost
//! (integer cost -> probability) over a fixed time-of-day interval. Bucket
//! keys are kept in ascending order (`BTreeMap` ordering is load-bearing:
//! min/max cost, CDF walks and the BTCH writer all rely on it).
//!
//! Probability scale: percent (0-100) everywhere in this crate. The only
//! 0-1 quantity is the confidence weight in `hist_cost`, which multiplies
//! bucket probabilities without changing the scale.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::interval::TimeInterval;

/// Relative tolerance for the 100% probability invariant.
pub const EPSILON: f64 = 1e-6;

/// Probabilities are percentages; every valid histogram sums to this.
pub const TOTAL_PROBABILITY: f64 = 100.0;

#[derive(Debug, Error)]
pub enum AlgebraError {
    #[error("bucket probabilities sum to {sum} (expected {TOTAL_PROBABILITY} within tolerance)")]
    ProbabilitySum { sum: f64 },

    #[error("histogram has no buckets")]
    EmptyHistogram,
}

/// Outcome of a stochastic dominance comparison.
///
/// `Left` dominates when its CDF is above `Right`'s at some breakpoint and
/// never below it at any other; evidence in both directions (the CDFs cross)
/// or in neither (identical) yields `NoDominance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dominance {
    LeftDominates,
    RightDominates,
    NoDominance,
}

/// Probability distribution of travel cost for one time interval.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    interval: TimeInterval,
    n_measurements: u32,
    buckets: BTreeMap<u32, f64>,
}

impl Histogram {
    /// Build a histogram from pre-scaled buckets, enforcing the 100% invariant.
    pub fn new(
        interval: TimeInterval,
        n_measurements: u32,
        buckets: BTreeMap<u32, f64>,
    ) -> Result<Self, AlgebraError> {
        let h = Histogram { interval, n_measurements, buckets };
        h.validate()?;
        Ok(h)
    }

    /// Build a histogram by counting raw travel-time measurements.
    pub fn from_measurement_counts(
        interval: TimeInterval,
        counts: &BTreeMap<u32, u32>,
    ) -> Result<Self, AlgebraError> {
        let total: u32 = counts.values().sum();
        if total == 0 {
            return Err(AlgebraError::EmptyHistogram);
        }
        let buckets = counts
            .iter()
            .map(|(&cost, &n)| (cost, f64::from(n) * TOTAL_PROBABILITY / f64::from(total)))
            .collect();
        Histogram::new(interval, total, buckets)
    }

    /// A certain cost: one bucket at 100%. Used as the average-cost fallback
    /// for edges without measurements (`n_measurements == 0`).
    pub fn constant(interval: TimeInterval, cost: u32) -> Self {
        let mut buckets = BTreeMap::new();
        buckets.insert(cost, TOTAL_PROBABILITY);
        Histogram { interval, n_measurements: 0, buckets }
    }

    pub fn interval(&self) -> TimeInterval {
        self.interval
    }

    pub fn n_measurements(&self) -> u32 {
        self.n_measurements
    }

    pub fn buckets(&self) -> &BTreeMap<u32, f64> {
        &self.buckets
    }

    /// A histogram with exactly one bucket carries a certain cost.
    pub fn is_constant(&self) -> bool {
        self.buckets.len() == 1
    }

    pub fn min_cost(&self) -> u32 {
        self.buckets.keys().next().copied().unwrap_or(0)
    }

    pub fn max_cost(&self) -> u32 {
        self.buckets.keys().next_back().copied().unwrap_or(0)
    }

    pub fn probability(&self, cost: u32) -> Option<f64> {
        self.buckets.get(&cost).copied()
    }

    /// Check the 100% invariant (relative tolerance, scaled by the larger of
    /// goal and actual sum).
    pub fn validate(&self) -> Result<(), AlgebraError> {
        if self.buckets.is_empty() {
            return Err(AlgebraError::EmptyHistogram);
        }
        let sum: f64 = self.buckets.values().sum();
        let scale = TOTAL_PROBABILITY.max(sum).abs();
        if (TOTAL_PROBABILITY - sum).abs() > scale * EPSILON {
            return Err(AlgebraError::ProbabilitySum { sum });
        }
        Ok(())
    }

    /// Cumulative probability up to `cost`, linearly interpolated between
    /// the neighboring bucket keys. Never extrapolates: costs outside the
    /// recorded range clamp to the first/last bucket.
    pub fn cpi(&self, cost: u32) -> f64 {
        let mut below = 0.0;
        let mut prev: Option<(u32, f64)> = None;
        for (&c, &p) in &self.buckets {
            let cum = below + p;
            if cost <= c {
                return match prev {
                    _ if cost == c => cum,
                    None => cum,
                    Some((prev_cost, prev_cum)) => {
                        let slope = (cum - prev_cum) / f64::from(c - prev_cost);
                        prev_cum + slope * f64::from(cost - prev_cost)
                    }
                };
            }
            below = cum;
            prev = Some((c, cum));
        }
        below
    }

    /// Mean travel cost under this distribution.
    pub fn expected_cost(&self) -> f64 {
        self.buckets
            .iter()
            .map(|(&c, &p)| f64::from(c) * p)
            .sum::<f64>()
            / TOTAL_PROBABILITY
    }

    /// Step-function CDF: total probability of buckets with key <= `cost`.
    /// Below the first bucket this is 0 (dominance needs the raw step, not
    /// the clamped `cpi`).
    fn cdf(&self, cost: u32) -> f64 {
        self.buckets
            .range(..=cost)
            .map(|(_, &p)| p)
            .sum()
    }

    /// Multiply every bucket probability by `weight`. The result no longer
    /// sums to 100% on its own; callers re-assemble a valid histogram from
    /// complementary weights.
    pub(crate) fn scaled(&self, weight: f64) -> BTreeMap<u32, f64> {
        self.buckets
            .iter()
            .map(|(&c, &p)| (c, p * weight))
            .collect()
    }

    /// Re-stamp the covered interval (used when a convolution result takes
    /// over the departure slice's interval).
    pub(crate) fn with_interval(mut self, interval: TimeInterval) -> Histogram {
        self.interval = interval;
        self
    }
}

/// Combine two histograms covering (possibly different) intervals into one.
///
/// Each bucket probability becomes a measurement-count-weighted average, the
/// interval becomes the hull of the inputs, and the measurement counts add.
/// Merging two measurement-free fallback histograms weights them equally.
pub fn merge(lhs: &Histogram, rhs: &Histogram) -> Result<Histogram, AlgebraError> {
    let total = lhs.n_measurements + rhs.n_measurements;
    let (w_lhs, w_rhs, denom) = if total == 0 {
        (1.0, 1.0, 2.0)
    } else {
        (
            f64::from(lhs.n_measurements),
            f64::from(rhs.n_measurements),
            f64::from(total),
        )
    };

    let mut buckets: BTreeMap<u32, f64> = BTreeMap::new();
    for (&cost, &p) in &lhs.buckets {
        *buckets.entry(cost).or_insert(0.0) += p * w_lhs;
    }
    for (&cost, &p) in &rhs.buckets {
        *buckets.entry(cost).or_insert(0.0) += p * w_rhs;
    }
    for p in buckets.values_mut() {
        *p /= denom;
    }

    Histogram::new(lhs.interval.hull(&rhs.interval), total, buckets)
}

/// Distribution of the sum of two independent cost variables.
///
/// Every bucket pair `(c1,p1) x (c2,p2)` contributes `p1*p2/100` to bucket
/// `c1+c2` (inputs are percent-scale, so the product must be rescaled back).
pub fn convolve(lhs: &Histogram, rhs: &Histogram) -> Result<Histogram, AlgebraError> {
    let mut buckets: BTreeMap<u32, f64> = BTreeMap::new();
    for (&c1, &p1) in &lhs.buckets {
        for (&c2, &p2) in &rhs.buckets {
            *buckets.entry(c1 + c2).or_insert(0.0) += p1 * p2 / TOTAL_PROBABILITY;
        }
    }
    Histogram::new(
        lhs.interval.hull(&rhs.interval),
        lhs.n_measurements + rhs.n_measurements,
        buckets,
    )
}

/// Compare two histograms for stochastic dominance.
///
/// The CDFs are compared at every distinct cost breakpoint present in either
/// histogram. A histogram dominates when its CDF is above the other's
/// somewhere and below it nowhere ("finishes earlier" stochastically).
pub fn stochastic_dominance(left: &Histogram, right: &Histogram) -> Dominance {
    if left.buckets.is_empty() && right.buckets.is_empty() {
        return Dominance::NoDominance;
    }
    if left.buckets.is_empty() {
        return Dominance::RightDominates;
    }
    if right.buckets.is_empty() {
        return Dominance::LeftDominates;
    }

    let mut left_above = false;
    let mut right_above = false;

    let breakpoints = left.buckets.keys().chain(right.buckets.keys());
    for &cost in breakpoints {
        let l = left.cdf(cost);
        let r = right.cdf(cost);
        if l > r {
            left_above = true;
        } else if r > l {
            right_above = true;
        }
    }

    match (left_above, right_above) {
        (true, false) => Dominance::LeftDominates,
        (false, true) => Dominance::RightDominates,
        _ => Dominance::NoDominance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::hms;

    fn hist(buckets: &[(u32, f64)]) -> Histogram {
        Histogram::new(
            TimeInterval::all_day(),
            buckets.len() as u32,
            buckets.iter().copied().collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_validate_rejects_short_sum() {
        let result = Histogram::new(
            TimeInterval::all_day(),
            3,
            [(5, 40.0), (7, 40.0)].into_iter().collect(),
        );
        assert!(matches!(result, Err(AlgebraError::ProbabilitySum { .. })));
    }

    #[test]
    fn test_validate_tolerates_float_drift() {
        let drift = 100.0 + 100.0 * EPSILON * 0.5;
        let h = Histogram::new(
            TimeInterval::all_day(),
            1,
            [(5, drift)].into_iter().collect(),
        );
        assert!(h.is_ok());
    }

    #[test]
    fn test_from_measurement_counts() {
        let counts: BTreeMap<u32, u32> = [(10, 1), (20, 3)].into_iter().collect();
        let h = Histogram::from_measurement_counts(TimeInterval::all_day(), &counts).unwrap();
        assert_eq!(h.n_measurements(), 4);
        assert_eq!(h.probability(10), Some(25.0));
        assert_eq!(h.probability(20), Some(75.0));
    }

    #[test]
    fn test_constant_histogram() {
        let h = Histogram::constant(TimeInterval::all_day(), 42);
        assert!(h.is_constant());
        assert_eq!(h.n_measurements(), 0);
        assert_eq!(h.min_cost(), 42);
        assert_eq!(h.max_cost(), 42);
        h.validate().unwrap();
    }

    #[test]
    fn test_cpi_exact_and_interpolated() {
        let h = hist(&[(10, 25.0), (20, 25.0), (30, 50.0)]);
        assert_eq!(h.cpi(10), 25.0);
        assert_eq!(h.cpi(20), 50.0);
        assert_eq!(h.cpi(30), 100.0);
        // halfway between 20 (cum 50) and 30 (cum 100)
        assert!((h.cpi(25) - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpi_clamps_outside_range() {
        let h = hist(&[(10, 40.0), (20, 60.0)]);
        assert_eq!(h.cpi(3), 40.0);
        assert_eq!(h.cpi(999), 100.0);
    }

    #[test]
    fn test_merge_weighted_average() {
        let h1 = Histogram::new(
            TimeInterval::new(hms(0, 0, 0), hms(7, 0, 0)),
            3,
            [(5, 100.0)].into_iter().collect(),
        )
        .unwrap();
        let h2 = Histogram::new(
            TimeInterval::new(hms(7, 0, 0), hms(8, 30, 0)),
            1,
            [(9, 100.0)].into_iter().collect(),
        )
        .unwrap();

        let merged = merge(&h1, &h2).unwrap();
        assert_eq!(merged.n_measurements(), 4);
        assert_eq!(merged.interval(), TimeInterval::new(0, hms(8, 30, 0)));
        assert_eq!(merged.probability(5), Some(75.0));
        assert_eq!(merged.probability(9), Some(25.0));
        merged.validate().unwrap();
    }

    #[test]
    fn test_merge_identical_is_idempotent() {
        let counts: BTreeMap<u32, u32> = [(4, 2), (6, 1), (9, 1)].into_iter().collect();
        let h = Histogram::from_measurement_counts(TimeInterval::all_day(), &counts).unwrap();
        let merged = merge(&h, &h.clone()).unwrap();

        assert_eq!(merged.n_measurements(), 2 * h.n_measurements());
        for (cost, p) in h.buckets() {
            assert!((merged.probability(*cost).unwrap() - p).abs() < 1e-9);
        }
    }

    #[test]
    fn test_convolve_sum_of_costs() {
        let h1 = hist(&[(1, 50.0), (2, 50.0)]);
        let h2 = hist(&[(10, 50.0), (20, 50.0)]);
        let c = convolve(&h1, &h2).unwrap();

        let keys: Vec<u32> = c.buckets().keys().copied().collect();
        assert_eq!(keys, vec![11, 12, 21, 22]);
        for p in c.buckets().values() {
            assert!((p - 25.0).abs() < 1e-9);
        }
        c.validate().unwrap();
    }

    #[test]
    fn test_convolve_constants() {
        let h1 = Histogram::constant(TimeInterval::all_day(), 5);
        let h2 = Histogram::constant(TimeInterval::all_day(), 7);
        let c = convolve(&h1, &h2).unwrap();
        assert!(c.is_constant());
        assert_eq!(c.probability(12), Some(100.0));
    }

    #[test]
    fn test_convolve_accumulates_colliding_sums() {
        let h1 = hist(&[(1, 50.0), (2, 50.0)]);
        let h2 = hist(&[(1, 50.0), (2, 50.0)]);
        let c = convolve(&h1, &h2).unwrap();
        // 1+2 and 2+1 collide in bucket 3
        assert!((c.probability(3).unwrap() - 50.0).abs() < 1e-9);
        c.validate().unwrap();
    }

    #[test]
    fn test_dominance_self_is_none() {
        let h = hist(&[(3, 30.0), (8, 70.0)]);
        assert_eq!(stochastic_dominance(&h, &h), Dominance::NoDominance);
    }

    #[test]
    fn test_dominance_cheaper_wins() {
        let cheap = Histogram::constant(TimeInterval::all_day(), 2);
        let dear = Histogram::constant(TimeInterval::all_day(), 6);
        assert_eq!(stochastic_dominance(&cheap, &dear), Dominance::LeftDominates);
        assert_eq!(stochastic_dominance(&dear, &cheap), Dominance::RightDominates);
    }

    #[test]
    fn test_dominance_crossing_cdfs() {
        // left is sometimes faster, sometimes much slower
        let left = hist(&[(1, 50.0), (100, 50.0)]);
        let right = hist(&[(10, 100.0)]);
        assert_eq!(stochastic_dominance(&left, &right), Dominance::NoDominance);
    }
}
