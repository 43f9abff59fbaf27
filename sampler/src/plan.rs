use std::num::NonZeroUsize;

use crate::{Result, SamplerErr};

/// How the requested samples are split across ranks and iterations.
///
/// Every rank runs the same number of iterations of the same batch size, so
/// the total is rounded up to a multiple of the global batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplePlan {
    pub requested: usize,
    pub batch_size: usize,
    pub world_size: usize,
    pub total: usize,
    pub samples_per_worker: usize,
    pub iterations: usize,
}

impl SamplePlan {
    /// Plans `requested` samples in batches of `batch_size` on `world_size` ranks.
    ///
    /// # Errors
    /// Returns `SamplerErr::PlanOverflow` if the rounded total doesn't fit and
    /// `SamplerErr::NotDivisible` if the split doesn't come out even.
    pub fn new(requested: usize, batch_size: NonZeroUsize, world_size: usize) -> Result<Self> {
        let n = batch_size.get();
        let overflow = || SamplerErr::PlanOverflow {
            requested,
            global_batch_size: n.saturating_mul(world_size),
        };

        let global = n.checked_mul(world_size).filter(|&g| g > 0).ok_or_else(overflow)?;
        let total = requested
            .div_ceil(global)
            .checked_mul(global)
            .ok_or_else(overflow)?;

        if total % world_size != 0 {
            return Err(SamplerErr::NotDivisible {
                what: "total samples",
                value: total,
                divisor: world_size,
            });
        }

        let samples_per_worker = total / world_size;
        if samples_per_worker % n != 0 {
            return Err(SamplerErr::NotDivisible {
                what: "samples per worker",
                value: samples_per_worker,
                divisor: n,
            });
        }

        Ok(Self {
            requested,
            batch_size: n,
            world_size,
            total,
            samples_per_worker,
            iterations: samples_per_worker / n,
        })
    }

    /// The global index of the sample at `position` of `rank`'s batch in `iteration`.
    pub fn sample_index(&self, rank: usize, iteration: usize, position: usize) -> usize {
        position * self.world_size + rank + iteration * self.batch_size * self.world_size
    }

    /// The number of samples every iteration adds across all ranks.
    pub fn global_batch_size(&self) -> usize {
        self.batch_size * self.world_size
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn total_is_rounded_up_to_the_global_batch() {
        let plan = SamplePlan::new(100, nz(10), 4).unwrap();
        assert_eq!(plan.total, 120);
        assert_eq!(plan.samples_per_worker, 30);
        assert_eq!(plan.iterations, 3);
    }

    #[test]
    fn exact_multiples_are_kept() {
        let plan = SamplePlan::new(50_000, nz(250), 8).unwrap();
        assert_eq!(plan.total, 50_000);
        assert_eq!(plan.iterations, 25);
    }

    #[test]
    fn no_samples_means_no_iterations() {
        let plan = SamplePlan::new(0, nz(4), 2).unwrap();
        assert_eq!(plan.total, 0);
        assert_eq!(plan.iterations, 0);
    }

    #[test]
    fn indices_cover_the_total_exactly_once() {
        let plan = SamplePlan::new(37, nz(3), 4).unwrap();

        let mut seen = HashSet::new();
        for rank in 0..plan.world_size {
            for iteration in 0..plan.iterations {
                for position in 0..plan.batch_size {
                    let index = plan.sample_index(rank, iteration, position);
                    assert!(index < plan.total);
                    assert!(seen.insert(index), "index {index} produced twice");
                }
            }
        }

        assert_eq!(seen.len(), plan.total);
    }

    #[test]
    fn indices_interleave_ranks() {
        let plan = SamplePlan::new(16, nz(2), 4).unwrap();
        assert_eq!(plan.sample_index(0, 0, 0), 0);
        assert_eq!(plan.sample_index(3, 0, 0), 3);
        assert_eq!(plan.sample_index(0, 0, 1), 4);
        assert_eq!(plan.sample_index(1, 1, 1), 13);
    }

    #[test]
    fn overflowing_totals_are_rejected() {
        let err = SamplePlan::new(usize::MAX, nz(3), 2).unwrap_err();
        assert!(matches!(err, SamplerErr::PlanOverflow { .. }));

        let err = SamplePlan::new(10, nz(usize::MAX), 2).unwrap_err();
        assert!(matches!(err, SamplerErr::PlanOverflow { .. }));
    }
}
