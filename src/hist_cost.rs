//! Time-dependent edge costs: ordered histogram slices partitioning a period.
//!
//! A `HistCost` owns one histogram per time slice. The slices are contiguous
//! and non-overlapping within their partition variant (a single 24h slice,
//! the peak/off-peak partition, or quarter-hour slots). `size() == 1` means
//! the cost is time-independent.

use thiserror::Error;

use crate::histogram::{convolve, AlgebraError, Histogram, TOTAL_PROBABILITY};
use crate::interval::{TimeInterval, TimeOfDay, SECONDS_PER_DAY};

#[derive(Debug, Error)]
pub enum CostError {
    #[error("no histogram slice covers time point {time}")]
    TimeNotCovered { time: TimeOfDay },

    #[error(transparent)]
    Algebra(#[from] AlgebraError),
}

/// One edge's complete time-dependent cost.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistCost {
    histograms: Vec<Histogram>,
}

impl HistCost {
    /// Wrap slices that already form an ordered partition. Weekend slices
    /// restart at midnight after the weekday slices, so starts are ordered
    /// within a day class, not globally.
    pub fn from_histograms(histograms: Vec<Histogram>) -> Self {
        HistCost { histograms }
    }

    /// A single-slice, time-independent cost.
    pub fn from_histogram(histogram: Histogram) -> Self {
        HistCost { histograms: vec![histogram] }
    }

    /// A certain, time-independent cost covering the whole day.
    pub fn constant(cost: u32) -> Self {
        HistCost::from_histogram(Histogram::constant(TimeInterval::all_day(), cost))
    }

    pub fn histograms(&self) -> &[Histogram] {
        &self.histograms
    }

    /// Number of slices; this is the "complexity" the ordering engine sums.
    pub fn size(&self) -> usize {
        self.histograms.len()
    }

    /// Time-independent cost (exactly one slice covers the whole period).
    pub fn is_constant(&self) -> bool {
        self.histograms.len() == 1
    }

    /// Mean travel cost across slices, used as the scalar search estimate in
    /// the witness search (queue ordering only, never a correctness input).
    pub fn expected_cost(&self) -> f64 {
        if self.histograms.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.histograms.iter().map(Histogram::expected_cost).sum();
        sum / self.histograms.len() as f64
    }

    /// The slice covering time point `t`. No covering slice is an error,
    /// never a silent default.
    pub fn histogram_for_time(&self, t: TimeOfDay) -> Result<&Histogram, CostError> {
        self.histograms
            .iter()
            .find(|h| h.interval().contains(t))
            .ok_or(CostError::TimeNotCovered { time: t })
    }
}

/// Fraction (0-1) of `slice`'s probability mass that arrives inside
/// `target` when departing at the slice's interval start.
pub fn confidence(slice: &Histogram, target: &TimeInterval) -> f64 {
    let depart = slice.interval().start;
    let mass: f64 = slice
        .buckets()
        .iter()
        .filter(|&(&cost, _)| {
            let arrival = (depart + cost).min(SECONDS_PER_DAY - 1);
            target.contains(arrival)
        })
        .map(|(_, &p)| p)
        .sum();
    mass / TOTAL_PROBABILITY
}

/// Split a slice sequence into day classes. Within one class the slices are
/// strictly ordered by start time; a slice that fails to advance past its
/// predecessor (weekend slices restarting at midnight, or a second all-day
/// slice) begins the next class.
fn day_classes(cost: &HistCost) -> Vec<&[Histogram]> {
    let slices = cost.histograms();
    let mut classes = Vec::new();
    let mut begin = 0;
    for i in 1..slices.len() {
        if slices[i].interval().start <= slices[i - 1].interval().start {
            classes.push(&slices[begin..i]);
            begin = i;
        }
    }
    classes.push(&slices[begin..]);
    classes
}

/// Sequentially compose two edges' time-dependent costs: traverse `lhs`
/// entering at time t, then `rhs` at the arrival time.
///
/// For each slice of `lhs` the reachable arrival span selects the
/// overlapping slices of `rhs` within the same day class (classes are
/// matched by index; the last `rhs` class is reused when it has fewer). A
/// single covering slice is convolved directly. When the span straddles
/// several slices, each candidate is weighted by the confidence that the
/// traveler actually reaches it, the weighted slices are blended into one
/// expected distribution, and that is convolved with the departure slice.
/// The output has one histogram per `lhs` slice, stamped with the departure
/// slice's interval.
pub fn convolve_hist_cost(lhs: &HistCost, rhs: &HistCost) -> Result<HistCost, CostError> {
    let rhs_classes = day_classes(rhs);
    let mut out = Vec::with_capacity(lhs.size());

    for (k, lhs_class) in day_classes(lhs).into_iter().enumerate() {
        let rhs_class = rhs_classes[k.min(rhs_classes.len() - 1)];

        for depart in lhs_class {
            let iv = depart.interval();
            let span_start = (iv.start + depart.min_cost()).min(SECONDS_PER_DAY - 1);
            let span_end = (iv.end + depart.max_cost()).min(SECONDS_PER_DAY);
            let span = TimeInterval::new(span_start, span_end.max(span_start + 1));

            let reachable: Vec<&Histogram> = rhs_class
                .iter()
                .filter(|h| h.interval().overlaps(&span))
                .collect();

            let combined = match reachable.as_slice() {
                [] => return Err(CostError::TimeNotCovered { time: span_start }),
                [single] => convolve(depart, single)?,
                several => {
                    let arrival = blend_reachable(depart, several)?;
                    convolve(depart, &arrival)?
                }
            };

            out.push(combined.with_interval(iv));
        }
    }

    Ok(HistCost::from_histograms(out))
}

/// Blend the reachable arrival slices into one expected distribution,
/// weighted by per-slice confidence. Weights are renormalized so the blend
/// satisfies the 100% invariant even when clamping at the day boundary
/// moves mass between slices.
fn blend_reachable(depart: &Histogram, reachable: &[&Histogram]) -> Result<Histogram, CostError> {
    let weights: Vec<f64> = reachable
        .iter()
        .map(|h| confidence(depart, &h.interval()))
        .collect();
    let total: f64 = weights.iter().sum();

    if total <= 0.0 {
        // All mass clamped outside every candidate; fall back to the first
        // reachable slice rather than inventing a distribution.
        return Ok((*reachable[0]).clone());
    }

    let mut buckets = std::collections::BTreeMap::new();
    let mut interval = reachable[0].interval();
    let mut n_measurements = 0u32;
    for (h, w) in reachable.iter().zip(&weights) {
        interval = interval.hull(&h.interval());
        n_measurements += h.n_measurements();
        for (cost, p) in h.scaled(w / total) {
            *buckets.entry(cost).or_insert(0.0) += p;
        }
    }

    Ok(Histogram::new(interval, n_measurements, buckets)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::hms;
    use std::collections::BTreeMap;

    fn slice(start: TimeOfDay, end: TimeOfDay, buckets: &[(u32, f64)]) -> Histogram {
        Histogram::new(
            TimeInterval::new(start, end),
            buckets.len() as u32,
            buckets.iter().copied().collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_histogram_for_time() {
        let cost = HistCost::from_histograms(vec![
            slice(0, hms(12, 0, 0), &[(5, 100.0)]),
            slice(hms(12, 0, 0), SECONDS_PER_DAY, &[(9, 100.0)]),
        ]);
        assert_eq!(
            cost.histogram_for_time(hms(11, 59, 59)).unwrap().min_cost(),
            5
        );
        assert_eq!(cost.histogram_for_time(hms(12, 0, 0)).unwrap().min_cost(), 9);
    }

    #[test]
    fn test_histogram_for_time_not_covered() {
        let cost = HistCost::from_histogram(slice(0, hms(12, 0, 0), &[(5, 100.0)]));
        let err = cost.histogram_for_time(hms(13, 0, 0)).unwrap_err();
        assert!(matches!(err, CostError::TimeNotCovered { .. }));
    }

    #[test]
    fn test_constant_cost() {
        let cost = HistCost::constant(12);
        assert!(cost.is_constant());
        assert_eq!(cost.size(), 1);
        assert_eq!(cost.histograms()[0].probability(12), Some(100.0));
    }

    #[test]
    fn test_confidence_full_and_split() {
        // depart at 11:50, costs put arrival either before or after noon
        let depart = slice(hms(11, 50, 0), hms(12, 0, 0), &[(60, 75.0), (3600, 25.0)]);
        let morning = TimeInterval::new(0, hms(12, 0, 0));
        let afternoon = TimeInterval::new(hms(12, 0, 0), SECONDS_PER_DAY);
        assert!((confidence(&depart, &morning) - 0.75).abs() < 1e-9);
        assert!((confidence(&depart, &afternoon) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_convolve_constants_single_slice() {
        let a = HistCost::constant(5);
        let b = HistCost::constant(7);
        let c = convolve_hist_cost(&a, &b).unwrap();
        assert_eq!(c.size(), 1);
        let h = &c.histograms()[0];
        assert!(h.is_constant());
        assert_eq!(h.probability(12), Some(100.0));
        assert_eq!(h.interval(), TimeInterval::all_day());
    }

    #[test]
    fn test_convolve_one_slice_per_lhs_slice() {
        let lhs = HistCost::from_histograms(vec![
            slice(0, hms(12, 0, 0), &[(10, 100.0)]),
            slice(hms(12, 0, 0), SECONDS_PER_DAY, &[(20, 100.0)]),
        ]);
        let rhs = HistCost::constant(5);
        let c = convolve_hist_cost(&lhs, &rhs).unwrap();
        assert_eq!(c.size(), 2);
        assert_eq!(c.histograms()[0].probability(15), Some(100.0));
        assert_eq!(c.histograms()[1].probability(25), Some(100.0));
        // output keeps the departure slices' intervals
        assert_eq!(c.histograms()[0].interval(), lhs.histograms()[0].interval());
        assert_eq!(c.histograms()[1].interval(), lhs.histograms()[1].interval());
    }

    #[test]
    fn test_convolve_keeps_day_classes_apart() {
        // weekday slice + weekend slice on both sides; weekend arrivals must
        // never blend into weekday departures
        let lhs = HistCost::from_histograms(vec![
            slice(0, SECONDS_PER_DAY, &[(10, 100.0)]),
            slice(0, SECONDS_PER_DAY, &[(30, 100.0)]),
        ]);
        let rhs = HistCost::from_histograms(vec![
            slice(0, SECONDS_PER_DAY, &[(1, 100.0)]),
            slice(0, SECONDS_PER_DAY, &[(2, 100.0)]),
        ]);

        let c = convolve_hist_cost(&lhs, &rhs).unwrap();
        assert_eq!(c.size(), 2);
        assert_eq!(c.histograms()[0].probability(11), Some(100.0));
        assert_eq!(c.histograms()[1].probability(32), Some(100.0));
    }

    #[test]
    fn test_convolve_blends_straddling_slices() {
        // departure slice right before noon, mass split across the boundary
        let lhs = HistCost::from_histogram(slice(
            hms(11, 50, 0),
            hms(12, 0, 0),
            &[(60, 50.0), (3600, 50.0)],
        ));
        let rhs = HistCost::from_histograms(vec![
            slice(0, hms(12, 0, 0), &[(100, 100.0)]),
            slice(hms(12, 0, 0), SECONDS_PER_DAY, &[(200, 100.0)]),
        ]);

        let c = convolve_hist_cost(&lhs, &rhs).unwrap();
        assert_eq!(c.size(), 1);
        let h = &c.histograms()[0];
        h.validate().unwrap();

        // each arrival slice contributes at its confidence weight
        let mut expected: BTreeMap<u32, f64> = BTreeMap::new();
        for (&c1, &p1) in lhs.histograms()[0].buckets() {
            expected.insert(c1 + 100, p1 * 0.5);
            *expected.entry(c1 + 200).or_insert(0.0) += p1 * 0.5;
        }
        for (cost, p) in &expected {
            assert!((h.probability(*cost).unwrap() - p).abs() < 1e-9);
        }
    }
}
