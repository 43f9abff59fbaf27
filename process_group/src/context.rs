use crate::device::Device;

/// Per-process identity inside the group, immutable once joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    pub rank: usize,
    pub world_size: usize,
    pub local_rank: usize,
    pub device: Device,
    pub seed: i64,
}

impl WorkerContext {
    /// Whether this worker is the one that takes group wide decisions.
    pub fn is_root(&self) -> bool {
        self.rank == crate::ROOT
    }
}

/// Derives the random seed of `rank`.
///
/// Computes `((global_seed + rank) * world_size) / 2` with floor division.
/// Seeds of different world sizes are not simply related; the formula is kept
/// as is so previous runs stay reproducible.
pub fn derive_seed(global_seed: i64, rank: usize, world_size: usize) -> i64 {
    global_seed
        .wrapping_add(rank as i64)
        .wrapping_mul(world_size as i64)
        .div_euclid(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_formula_is_reproducible() {
        assert_eq!(derive_seed(0, 0, 1), 0);
        assert_eq!(derive_seed(0, 1, 4), 2);
        assert_eq!(derive_seed(0, 3, 4), 6);
        assert_eq!(derive_seed(1, 0, 1), 0);
        assert_eq!(derive_seed(1, 2, 3), 4);
        assert_eq!(derive_seed(7, 2, 3), derive_seed(7, 2, 3));
    }

    #[test]
    fn negative_seeds_floor() {
        assert_eq!(derive_seed(-3, 0, 1), -2);
        assert_eq!(derive_seed(-1, 0, 3), -2);
    }
}
