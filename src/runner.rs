//! Drives each strategy through one contended stage and times it.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::config::BenchmarkConfig;
use crate::counter::CounterStore;
use crate::error::Result;
use crate::strategy::Strategy;

/// Timing of one completed strategy stage.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkResult {
    pub strategy: Strategy,
    pub elapsed: Duration,
    /// Store value after all workers joined.
    pub final_count: u64,
}

impl BenchmarkResult {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

impl fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: elapsed time = {} seconds",
            self.strategy,
            self.elapsed_secs()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// One entry per completed stage, in the order the stages ran.
    pub results: Vec<BenchmarkResult>,
    /// Set when the run stopped before the last strategy.
    pub cancelled: bool,
}

pub struct BenchmarkRunner {
    config: BenchmarkConfig,
}

impl BenchmarkRunner {
    pub fn new(config: BenchmarkConfig) -> Self {
        Self { config }
    }

    /// Runs every strategy in order against a fresh store.
    ///
    /// `on_result` sees each result as soon as its stage finishes.
    pub fn run(
        &self,
        strategies: &[Strategy],
        cancel: &CancellationToken,
        on_result: impl FnMut(&BenchmarkResult),
    ) -> Result<RunSummary> {
        self.run_with(strategies, cancel, Strategy::create_store, on_result)
    }

    /// Like [`BenchmarkRunner::run`], with the store constructor supplied by
    /// the caller.
    pub fn run_with<F, S>(
        &self,
        strategies: &[Strategy],
        cancel: &CancellationToken,
        mut create_store: F,
        mut on_result: S,
    ) -> Result<RunSummary>
    where
        F: FnMut(Strategy) -> Result<Box<dyn CounterStore>>,
        S: FnMut(&BenchmarkResult),
    {
        let mut summary = RunSummary::default();

        for &strategy in strategies {
            // Stages already underway are never interrupted.
            if cancel.is_cancelled() {
                debug!(%strategy, "cancelled before stage");
                summary.cancelled = true;
                break;
            }

            let store = create_store(strategy)?;
            debug!(%strategy, "store created");

            let (elapsed, final_count) = self.contend(strategy, store.as_ref())?;
            drop(store);

            debug_assert_eq!(final_count, self.config.total_increments());
            debug!(%strategy, final_count, "stage finished");

            let result = BenchmarkResult {
                strategy,
                elapsed,
                final_count,
            };
            info!(%strategy, elapsed_secs = result.elapsed_secs(), "stage complete");
            on_result(&result);
            summary.results.push(result);
        }

        Ok(summary)
    }

    /// Fans out the workers and waits for all of them to join.
    fn contend(&self, strategy: Strategy, store: &dyn CounterStore) -> Result<(Duration, u64)> {
        let iterations = self.config.iterations_per_worker();
        let start = Instant::now();

        thread::scope(|s| -> Result<()> {
            for worker in 0..self.config.worker_count() {
                thread::Builder::new()
                    .name(format!("{}-worker-{worker}", strategy.name().to_lowercase()))
                    .spawn_scoped(s, move || {
                        for _ in 0..iterations {
                            store.increment();
                        }
                    })?;
            }
            Ok(())
        })?;

        let elapsed = start.elapsed();
        Ok((elapsed, store.count()))
    }
}

#[cfg(test)]
fn scaled(workers: usize, iterations: usize) -> BenchmarkRunner {
    BenchmarkRunner::new(BenchmarkConfig::new(workers, iterations).unwrap())
}

#[test]
fn test_single_strategy_two_by_three() {
    let runner = scaled(2, 3);
    let summary = runner
        .run(&[Strategy::ExclusiveLock], &CancellationToken::new(), |_| {})
        .unwrap();

    assert_eq!(summary.results.len(), 1);
    assert!(!summary.cancelled);
    let result = &summary.results[0];
    assert_eq!(result.final_count, 6);
    assert!(result.elapsed_secs() >= 0.0 && result.elapsed_secs().is_finite());
}

#[test]
fn test_every_strategy_exact_and_in_order() {
    let runner = scaled(4, 2_000);
    let mut streamed = Vec::new();
    let summary = runner
        .run(&Strategy::REPORT_ORDER, &CancellationToken::new(), |r| {
            streamed.push(r.strategy)
        })
        .unwrap();

    assert_eq!(streamed, Strategy::REPORT_ORDER);
    for result in &summary.results {
        assert_eq!(result.final_count, 8_000, "{}", result.strategy);
        assert!(result.elapsed_secs().is_finite());
    }
}

#[test]
fn test_cancel_between_stages_shortens_results() {
    let runner = scaled(2, 100);
    let cancel = CancellationToken::new();
    let summary = runner
        .run(&Strategy::REPORT_ORDER, &cancel, |_| cancel.cancel())
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.results[0].strategy, Strategy::SerializedAccessor);
    assert_eq!(summary.results[0].final_count, 200);
}

#[test]
fn test_cancelled_up_front_runs_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = scaled(2, 3)
        .run_with(
            &Strategy::REPORT_ORDER,
            &cancel,
            |_| panic!("no store should be built"),
            |_| {},
        )
        .unwrap();
    assert!(summary.cancelled);
    assert!(summary.results.is_empty());
}

#[test]
fn test_display_format() {
    let result = BenchmarkResult {
        strategy: Strategy::NativeMutex,
        elapsed: Duration::from_millis(1500),
        final_count: 0,
    };
    assert_eq!(result.to_string(), "Mutex: elapsed time = 1.5 seconds");
}

#[test]
fn test_store_failure_propagates() {
    let summary = scaled(1, 1).run_with(
        &Strategy::REPORT_ORDER,
        &CancellationToken::new(),
        |_| Err(crate::error::BenchError::DomainClosed),
        |_| {},
    );
    assert!(matches!(summary, Err(crate::error::BenchError::DomainClosed)));
}

#[cfg(test)]
type StoreLog = std::sync::Arc<std::sync::Mutex<Vec<(Strategy, Instant, Option<Instant>)>>>;

/// Records when each store is built and dropped.
#[cfg(test)]
struct Instrumented {
    inner: Box<dyn CounterStore>,
    log: StoreLog,
    slot: usize,
}

#[cfg(test)]
impl CounterStore for Instrumented {
    fn increment(&self) {
        self.inner.increment();
    }

    fn count(&self) -> u64 {
        self.inner.count()
    }
}

#[cfg(test)]
impl Drop for Instrumented {
    fn drop(&mut self) {
        self.log.lock().unwrap()[self.slot].2 = Some(Instant::now());
    }
}

#[test]
fn test_stages_never_overlap() {
    let log = StoreLog::default();
    let factory_log = log.clone();

    scaled(4, 5_000)
        .run_with(
            &Strategy::REPORT_ORDER,
            &CancellationToken::new(),
            move |strategy| {
                let inner = strategy.create_store()?;
                let mut entries = factory_log.lock().unwrap();
                entries.push((strategy, Instant::now(), None));
                let store: Box<dyn CounterStore> = Box::new(Instrumented {
                    inner,
                    log: factory_log.clone(),
                    slot: entries.len() - 1,
                });
                Ok(store)
            },
            |_| {},
        )
        .unwrap();

    let entries = log.lock().unwrap();
    assert_eq!(entries.len(), 3);
    for pair in entries.windows(2) {
        let dropped = pair[0].2.expect("store dropped");
        assert!(dropped <= pair[1].1, "{:?} overlapped {:?}", pair[0].0, pair[1].0);
    }
}

#[test]
#[ignore = "full-size workload; run with --release -- --ignored"]
fn test_full_size_exactness() {
    let runner = BenchmarkRunner::new(BenchmarkConfig::default());
    let summary = runner
        .run(&Strategy::REPORT_ORDER, &CancellationToken::new(), |_| {})
        .unwrap();
    for result in summary.results {
        assert_eq!(result.final_count, 10_000_000, "{}", result.strategy);
    }
}
