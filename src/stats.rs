//! Streaming summary statistics.
//!
//! Each minion times its operations locally and ships a single
//! [`SummaryStat`] snapshot to the controller when its loop finishes.
//! The controller combines snapshots with [`SummaryStat::merge`], which
//! needs only the five summary fields of the other side. Because the
//! merge is commutative and associative, snapshots can arrive in any
//! order over the bus and still produce the same combined result as
//! observing every sample directly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Running aggregate (min, max, count, sum, sum of squares) over a
/// stream of numeric samples.
///
/// Emptiness is tracked by `count`, never by sentinel values in
/// `min`/`max`, so a legitimately-zero or negative sample aggregates
/// correctly. `min` and `max` hold garbage until the first update and
/// are only exposed through the `Option`-returning accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStat {
    count: u64,
    total: f64,
    sum_of_squares: f64,
    min: f64,
    max: f64,
}

impl SummaryStat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of samples observed, across every merged stream.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// Incorporate one raw sample in O(1).
    pub fn update(&mut self, sample: f64) {
        if self.count == 0 {
            self.min = sample;
            self.max = sample;
        } else {
            self.min = self.min.min(sample);
            self.max = self.max.max(sample);
        }
        self.count += 1;
        self.total += sample;
        self.sum_of_squares += sample * sample;
    }

    /// Fold in a summary built from a disjoint sample stream.
    ///
    /// Produces the same result as observing the union of both streams
    /// directly, using only the summary fields of `other`. Merging an
    /// empty summary is a no-op; merging into an empty summary copies
    /// `other`.
    pub fn merge(&mut self, other: &SummaryStat) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count += other.count;
        self.total += other.total;
        self.sum_of_squares += other.sum_of_squares;
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total / self.count as f64)
    }

    /// Population standard deviation.
    pub fn std_deviation(&self) -> Option<f64> {
        let average = self.average()?;
        let variance = self.sum_of_squares / self.count as f64 - average * average;
        // Rounding can push a zero variance slightly negative.
        Some(variance.max(0.0).sqrt())
    }
}

impl fmt::Display for SummaryStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min(), self.max(), self.average(), self.std_deviation()) {
            (Some(min), Some(max), Some(avg), Some(std_dev)) => write!(
                f,
                "min={:.3}, max={:.3}, avg={:.3}, std-dev={:.3}",
                min, max, avg, std_dev
            ),
            _ => write!(f, "no samples"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < TOLERANCE, "{} != {}", a, b);
    }

    fn from_samples(samples: &[f64]) -> SummaryStat {
        let mut stat = SummaryStat::new();
        for &s in samples {
            stat.update(s);
        }
        stat
    }

    fn assert_equivalent(a: &SummaryStat, b: &SummaryStat) {
        assert_eq!(a.count(), b.count());
        assert_close(a.total(), b.total());
        assert_eq!(a.min(), b.min());
        assert_eq!(a.max(), b.max());
        assert_close(a.average().unwrap(), b.average().unwrap());
        assert_close(a.std_deviation().unwrap(), b.std_deviation().unwrap());
    }

    #[test]
    fn first_update_establishes_min_and_max() {
        let mut stat = SummaryStat::new();
        stat.update(5.0);
        assert_eq!(stat.min(), Some(5.0));
        assert_eq!(stat.max(), Some(5.0));
        assert_eq!(stat.average(), Some(5.0));
        assert_eq!(stat.std_deviation(), Some(0.0));
    }

    #[test]
    fn empty_stat_exposes_nothing() {
        let stat = SummaryStat::new();
        assert!(stat.is_empty());
        assert_eq!(stat.min(), None);
        assert_eq!(stat.max(), None);
        assert_eq!(stat.average(), None);
        assert_eq!(stat.std_deviation(), None);
    }

    #[test]
    fn zero_and_negative_samples_order_numerically() {
        let stat = from_samples(&[3.0, 0.0, -2.0, 7.0]);
        assert_eq!(stat.min(), Some(-2.0));
        assert_eq!(stat.max(), Some(7.0));
        assert_close(stat.average().unwrap(), 2.0);
    }

    #[test]
    fn zero_min_survives_merge() {
        // A real sample value of zero must not be mistaken for "unset".
        let a = from_samples(&[0.0, 0.0]);
        let b = from_samples(&[4.0]);
        let mut merged = a.clone();
        merged.merge(&b);
        assert_eq!(merged.min(), Some(0.0));
        assert_eq!(merged.max(), Some(4.0));
        assert_eq!(merged.count(), 3);
    }

    #[test]
    fn split_merge_equals_elementwise_update() {
        let samples = [1.5, 0.0, -3.25, 42.0, 8.8, 8.8, 100.0, 0.125];
        let whole = from_samples(&samples);
        for split in 1..samples.len() {
            let mut left = from_samples(&samples[..split]);
            let right = from_samples(&samples[split..]);
            left.merge(&right);
            assert_equivalent(&left, &whole);
        }
    }

    #[test]
    fn merge_is_commutative() {
        let a = from_samples(&[1.0, 2.0, 3.0]);
        let b = from_samples(&[10.0, 20.0]);
        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_equivalent(&ab, &ba);
    }

    #[test]
    fn merge_is_associative() {
        let a = from_samples(&[1.0, 5.0]);
        let b = from_samples(&[-2.0]);
        let c = from_samples(&[7.5, 0.0, 3.0]);

        let mut ab_c = a.clone();
        ab_c.merge(&b);
        ab_c.merge(&c);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut a_bc = a.clone();
        a_bc.merge(&bc);

        assert_equivalent(&ab_c, &a_bc);
    }

    #[test]
    fn update_equals_merging_a_singleton() {
        let mut updated = from_samples(&[2.0, 4.0]);
        updated.update(9.0);

        let mut merged = from_samples(&[2.0, 4.0]);
        merged.merge(&from_samples(&[9.0]));

        assert_equivalent(&updated, &merged);
    }

    #[test]
    fn merging_an_empty_stat_is_a_noop() {
        let mut stat = from_samples(&[1.0, 2.0]);
        let before = stat.clone();
        stat.merge(&SummaryStat::new());
        assert_eq!(stat, before);

        let mut empty = SummaryStat::new();
        empty.merge(&before);
        assert_equivalent(&empty, &before);
    }

    #[test]
    fn three_identical_worker_reports() {
        // Three minions each report (min=1, max=1, count=1, total=1, sumsq=1).
        let singleton = from_samples(&[1.0]);
        let mut combined = SummaryStat::new();
        for _ in 0..3 {
            combined.merge(&singleton);
        }
        assert_eq!(combined.min(), Some(1.0));
        assert_eq!(combined.max(), Some(1.0));
        assert_eq!(combined.count(), 3);
        assert_close(combined.total(), 3.0);
        assert_close(combined.average().unwrap(), 1.0);
        assert_close(combined.std_deviation().unwrap(), 0.0);
    }

    #[test]
    fn throughput_values_combine_as_independent_samples() {
        let stat = from_samples(&[100.0, 200.0, 300.0]);
        assert_eq!(stat.count(), 3);
        assert_eq!(stat.min(), Some(100.0));
        assert_eq!(stat.max(), Some(300.0));
        assert_close(stat.average().unwrap(), 200.0);
    }

    #[test]
    fn size_weighted_average_across_uneven_streams() {
        let mut combined = from_samples(&[10.0; 9]);
        combined.merge(&from_samples(&[100.0]));
        assert_close(combined.average().unwrap(), 19.0);
    }
}
