//! Batch sizing for rollouts.
//!
//! A `Partitioner` turns a target count into a batch size. Batches are
//! contiguous runs of the (sorted) target list; the last one may be short.

use std::ops::Range;

use flotilla_core::Concurrency;

pub trait Partitioner: Send + Sync {
    /// Batch size for `n` targets. Always at least one.
    fn partition(&self, n: usize) -> usize;
}

/// A fraction of the targets per batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentPartitioner(pub f64);

impl Partitioner for PercentPartitioner {
    fn partition(&self, n: usize) -> usize {
        // NaN and non-positive fractions fall through to one at a time.
        if self.0.is_nan() || self.0 <= 0.0 {
            return 1;
        }
        let size = (n as f64 * self.0.min(1.0)).floor() as usize;
        size.max(1)
    }
}

/// A fixed number of targets per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantPartitioner(pub usize);

impl Partitioner for ConstantPartitioner {
    fn partition(&self, n: usize) -> usize {
        self.0.clamp(1, n.max(1))
    }
}

impl Partitioner for Concurrency {
    fn partition(&self, n: usize) -> usize {
        match *self {
            Concurrency::Percent(p) => PercentPartitioner(p).partition(n),
            Concurrency::Constant(k) => ConstantPartitioner(k).partition(n),
        }
    }
}

/// Index ranges of each batch over `n` targets.
pub fn batches(n: usize, partitioner: &dyn Partitioner) -> Vec<Range<usize>> {
    let size = partitioner.partition(n);
    (0..n).step_by(size).map(|start| start..(start + size).min(n)).collect()
}

/// Number of batches needed for `n` targets of `size` each.
pub fn batch_count(n: usize, size: usize) -> usize {
    if size == 0 {
        return 1;
    }
    n.div_ceil(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent() {
        assert_eq!(PercentPartitioner(0.5).partition(10), 5);
        assert_eq!(PercentPartitioner(0.25).partition(10), 2);
        assert_eq!(PercentPartitioner(0.01).partition(10), 1);
        assert_eq!(PercentPartitioner(3.0).partition(10), 10);
        assert_eq!(PercentPartitioner(0.0).partition(10), 1);
        assert_eq!(PercentPartitioner(-1.0).partition(10), 1);
        assert_eq!(PercentPartitioner(f64::NAN).partition(10), 1);
    }

    #[test]
    fn constant() {
        assert_eq!(ConstantPartitioner(3).partition(10), 3);
        assert_eq!(ConstantPartitioner(3).partition(2), 2);
        assert_eq!(ConstantPartitioner(0).partition(5), 1);
        assert_eq!(ConstantPartitioner(4).partition(0), 1);
    }

    #[test]
    fn concurrency_delegates() {
        assert_eq!(Concurrency::Percent(0.5).partition(10), 5);
        assert_eq!(Concurrency::Constant(3).partition(2), 2);
        assert_eq!(Concurrency::default().partition(7), 1);
    }

    #[test]
    fn batch_ranges_cover_targets() {
        assert_eq!(batches(5, &ConstantPartitioner(2)), vec![0..2, 2..4, 4..5]);
        assert_eq!(batches(4, &PercentPartitioner(1.0)), vec![0..4]);
        assert!(batches(0, &ConstantPartitioner(2)).is_empty());
        assert_eq!(batches(5, &ConstantPartitioner(2)).len(), batch_count(5, 2));
    }

    #[test]
    fn batch_count_handles_zero_size() {
        assert_eq!(batch_count(10, 0), 1);
        assert_eq!(batch_count(10, 3), 4);
    }
}
