//! Fixed workload shape for a benchmark run.

use crate::error::{BenchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkConfig {
    worker_count: usize,
    iterations_per_worker: usize,
}

impl BenchmarkConfig {
    pub const WORKER_COUNT: usize = 10;
    pub const ITERATIONS_PER_WORKER: usize = 1_000_000;

    pub const DEFAULT: BenchmarkConfig = BenchmarkConfig {
        worker_count: Self::WORKER_COUNT,
        iterations_per_worker: Self::ITERATIONS_PER_WORKER,
    };

    /// Both counts must be strictly positive.
    pub fn new(worker_count: usize, iterations_per_worker: usize) -> Result<Self> {
        if worker_count == 0 {
            return Err(BenchError::InvalidConfig {
                field: "worker_count",
                value: worker_count,
            });
        }
        if iterations_per_worker == 0 {
            return Err(BenchError::InvalidConfig {
                field: "iterations_per_worker",
                value: iterations_per_worker,
            });
        }
        Ok(Self {
            worker_count,
            iterations_per_worker,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn iterations_per_worker(&self) -> usize {
        self.iterations_per_worker
    }

    /// Expected final value of every store after a full stage.
    pub fn total_increments(&self) -> u64 {
        self.worker_count as u64 * self.iterations_per_worker as u64
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[test]
fn test_default_shape() {
    let config = BenchmarkConfig::default();
    assert_eq!(config.worker_count(), 10);
    assert_eq!(config.iterations_per_worker(), 1_000_000);
    assert_eq!(config.total_increments(), 10_000_000);
}

#[test]
fn test_rejects_zero_counts() {
    assert!(matches!(
        BenchmarkConfig::new(0, 5),
        Err(BenchError::InvalidConfig { field: "worker_count", .. })
    ));
    assert!(matches!(
        BenchmarkConfig::new(5, 0),
        Err(BenchError::InvalidConfig { field: "iterations_per_worker", .. })
    ));
    assert_eq!(BenchmarkConfig::new(2, 3).unwrap().total_increments(), 6);
}
