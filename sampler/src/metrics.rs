use std::time::Duration;

/// Counters and timings of one rank's sampling loop.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoopMetrics {
    pub solve_time: Duration,
    pub decode_time: Duration,
    pub save_time: Duration,

    pub iterations: u64,
    pub samples: u64,
}

impl LoopMetrics {
    #[inline]
    pub fn bump_iteration(&mut self) {
        self.iterations += 1;
    }

    #[inline]
    pub fn add_samples(&mut self, n: usize) {
        self.samples += n as u64;
    }
}
