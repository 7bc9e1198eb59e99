//! Session lifecycle and the state published to a presentation layer.
//!
//! At most one session is current. Starting a new one cancels the previous
//! session and bumps the generation; anything an older generation reports
//! afterwards is discarded rather than merged.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::config::BenchmarkConfig;
use crate::error::Result;
use crate::lock::{Condvar, Mutex};
use crate::runner::BenchmarkRunner;
use crate::strategy::Strategy;

/// Consistent view of the published state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Number of sessions started so far; 0 before the first start.
    pub generation: u64,
    pub results: Vec<String>,
    pub is_running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    /// Cancel requested; the current stage is still finishing.
    Cancelling,
}

#[derive(Default)]
struct Published {
    generation: u64,
    results: Vec<String>,
    is_running: bool,
    cancelling: bool,
    subscribers: Vec<mpsc::Sender<Snapshot>>,
}

impl Published {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            generation: self.generation,
            results: self.results.clone(),
            is_running: self.is_running,
        }
    }

    fn phase(&self) -> Phase {
        match (self.is_running, self.cancelling) {
            (false, _) => Phase::Idle,
            (true, false) => Phase::Running,
            (true, true) => Phase::Cancelling,
        }
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        self.subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<Published>,
    idle: Condvar,
}

impl Shared {
    fn begin(&self) -> u64 {
        let mut state = self.state.lock();
        state.generation += 1;
        state.results.clear();
        state.is_running = true;
        state.cancelling = false;
        state.publish();
        state.generation
    }

    fn append(&self, generation: u64, line: String) {
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(generation, current = state.generation, "discarding stale result");
            return;
        }
        state.results.push(line);
        state.publish();
    }

    fn mark_cancelling(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation == generation && state.is_running {
            state.cancelling = true;
        }
    }

    fn finish(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(generation, current = state.generation, "stale session finished");
            return;
        }
        state.is_running = false;
        state.cancelling = false;
        state.publish();
        drop(state);
        self.idle.notify_all();
    }
}

/// Marks the session finished however its thread exits, panics included.
struct FinishOnExit {
    shared: Arc<Shared>,
    generation: u64,
}

impl Drop for FinishOnExit {
    fn drop(&mut self) {
        self.shared.finish(self.generation);
    }
}

struct Session {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Sessions {
    current: Option<Session>,
    /// Superseded sessions that may still be unwinding.
    retired: Vec<JoinHandle<()>>,
}

pub struct RunController {
    config: BenchmarkConfig,
    strategies: Vec<Strategy>,
    shared: Arc<Shared>,
    sessions: Mutex<Sessions>,
}

impl RunController {
    /// Controller for the standard workload over every strategy.
    pub fn new() -> Self {
        Self::with_config(BenchmarkConfig::default(), Strategy::REPORT_ORDER)
    }

    pub fn with_config(config: BenchmarkConfig, strategies: impl Into<Vec<Strategy>>) -> Self {
        Self {
            config,
            strategies: strategies.into(),
            shared: Arc::default(),
            sessions: Mutex::default(),
        }
    }

    /// (Re)starts measurement. Any running session is told to stop but is not
    /// waited for; its late results are dropped.
    ///
    /// Only fails if the session thread cannot be spawned.
    pub fn start(&self) -> Result<()> {
        let mut sessions = self.sessions.lock();

        if let Some(previous) = sessions.current.take() {
            if !previous.handle.is_finished() {
                warn!(generation = previous.generation, "superseding running session");
            }
            previous.cancel.cancel();
            sessions.retired.push(previous.handle);
        }
        sessions.retired.retain(|handle| !handle.is_finished());

        let generation = self.shared.begin();
        let cancel = CancellationToken::new();

        let guard = FinishOnExit {
            shared: self.shared.clone(),
            generation,
        };
        let runner = BenchmarkRunner::new(self.config);
        let strategies = self.strategies.clone();
        let token = cancel.clone();

        let handle = thread::Builder::new()
            .name(format!("bench-session-{generation}"))
            .spawn(move || run_session(guard, runner, &strategies, &token))?;

        sessions.current = Some(Session {
            generation,
            cancel,
            handle,
        });
        Ok(())
    }

    /// Asks the current session to stop after its running stage.
    pub fn cancel(&self) {
        let sessions = self.sessions.lock();
        if let Some(session) = &sessions.current {
            session.cancel.cancel();
            self.shared.mark_cancelling(session.generation);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.state.lock().snapshot()
    }

    pub fn results(&self) -> Vec<String> {
        self.shared.state.lock().results.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().is_running
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase()
    }

    /// Receives every state change published from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<Snapshot> {
        let (sender, receiver) = mpsc::channel();
        self.shared.state.lock().subscribers.push(sender);
        receiver
    }

    /// Blocks until no session is running.
    pub fn wait_idle(&self) -> Snapshot {
        let state = self
            .shared
            .idle
            .wait_while(self.shared.state.lock(), |state| state.is_running);
        state.snapshot()
    }
}

impl Default for RunController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        let sessions = std::mem::take(&mut *self.sessions.lock());
        let mut handles = sessions.retired;
        if let Some(current) = sessions.current {
            current.cancel.cancel();
            handles.push(current.handle);
        }
        for handle in handles {
            if handle.join().is_err() {
                error!("benchmark session panicked");
            }
        }
    }
}

fn run_session(
    guard: FinishOnExit,
    runner: BenchmarkRunner,
    strategies: &[Strategy],
    cancel: &CancellationToken,
) {
    let generation = guard.generation;
    let shared = guard.shared.clone();
    info!(generation, "session started");

    match runner.run(strategies, cancel, |result| {
        shared.append(generation, result.to_string())
    }) {
        Ok(summary) if summary.cancelled => {
            info!(generation, completed = summary.results.len(), "session cancelled")
        }
        Ok(summary) => info!(generation, completed = summary.results.len(), "session finished"),
        Err(e) => error!(generation, error = %e, "session failed"),
    }

    drop(guard);
}

#[cfg(test)]
fn scaled_controller(workers: usize, iterations: usize) -> RunController {
    RunController::with_config(
        BenchmarkConfig::new(workers, iterations).unwrap(),
        Strategy::REPORT_ORDER,
    )
}

#[cfg(test)]
fn assert_report_order(results: &[String]) {
    assert_eq!(results.len(), Strategy::REPORT_ORDER.len(), "{results:?}");
    for (line, strategy) in results.iter().zip(Strategy::REPORT_ORDER) {
        assert!(line.starts_with(&format!("{strategy}: elapsed time = ")), "{line}");
    }
}

#[test]
fn test_idle_before_first_start() {
    let controller = scaled_controller(2, 3);
    assert_eq!(controller.phase(), Phase::Idle);
    assert_eq!(
        controller.snapshot(),
        Snapshot {
            generation: 0,
            results: Vec::new(),
            is_running: false,
        }
    );
    // Nothing to wait for.
    assert!(!controller.wait_idle().is_running);
}

#[test]
fn test_start_publishes_empty_running_state_first() {
    let controller = scaled_controller(2, 1_000);
    let updates = controller.subscribe();
    controller.start().unwrap();

    let first = updates.recv().unwrap();
    assert_eq!(first.generation, 1);
    assert!(first.results.is_empty());
    assert!(first.is_running);
}

#[test]
fn test_full_run_publishes_one_line_per_strategy() {
    let controller = scaled_controller(2, 3);
    let updates = controller.subscribe();
    controller.start().unwrap();

    let done = controller.wait_idle();
    assert!(!done.is_running);
    assert_report_order(&done.results);

    // Each published step grows the list by at most one entry.
    let lengths: Vec<_> = updates.try_iter().map(|s| s.results.len()).collect();
    assert_eq!(lengths, [0, 1, 2, 3, 3]);
}

#[test]
fn test_restart_mid_run_discards_stale_results() {
    let controller = scaled_controller(2, 20_000);
    let updates = controller.subscribe();
    controller.start().unwrap();

    // Restart only once the first session has reported a stage, so it is
    // still working through the remaining ones.
    for snapshot in updates.iter() {
        if !snapshot.results.is_empty() {
            break;
        }
    }
    controller.start().unwrap();

    let done = controller.wait_idle();
    assert_eq!(done.generation, 2);
    assert_report_order(&done.results);
    assert_report_order(&controller.results());
}

#[test]
fn test_cancel_passes_through_cancelling() {
    let controller = scaled_controller(2, 50_000);
    controller.start().unwrap();

    // Let the session get into its first stage.
    thread::sleep(std::time::Duration::from_millis(20));
    controller.cancel();
    assert_eq!(controller.phase(), Phase::Cancelling);

    let done = controller.wait_idle();
    assert_eq!(controller.phase(), Phase::Idle);
    assert!(!done.is_running);
    assert_eq!(done.results.len(), 1);
    assert!(done.results[0].starts_with("Actor: "));
}

#[test]
fn test_cancelling_cleared_by_own_finish_only() {
    let shared = Shared::default();
    let stale = shared.begin();
    let current = shared.begin();

    shared.mark_cancelling(stale);
    assert_eq!(shared.state.lock().phase(), Phase::Running);

    shared.mark_cancelling(current);
    assert_eq!(shared.state.lock().phase(), Phase::Cancelling);

    shared.finish(stale);
    assert_eq!(shared.state.lock().phase(), Phase::Cancelling);

    shared.finish(current);
    assert_eq!(shared.state.lock().phase(), Phase::Idle);
}

#[test]
fn test_drop_joins_running_session() {
    let controller = scaled_controller(2, 1_000);
    controller.start().unwrap();
    drop(controller);
}
