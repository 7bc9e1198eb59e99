//! Compares how fast three mutual-exclusion strategies let many threads
//! increment one shared counter.

pub mod cancel;
pub mod channel;
pub mod config;
pub mod controller;
pub mod counter;
pub mod error;
pub mod lock;
pub mod runner;
pub mod strategy;

pub use cancel::CancellationToken;
pub use config::BenchmarkConfig;
pub use controller::{Phase, RunController, Snapshot};
pub use counter::{CounterStore, ExclusiveLockCounter, NativeMutexCounter, SerializedAccessorCounter};
pub use error::{BenchError, Result};
pub use runner::{BenchmarkResult, BenchmarkRunner, RunSummary};
pub use strategy::Strategy;
