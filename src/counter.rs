//! Shared counters, one per synchronization strategy.
//!
//! Every store starts at zero and must end at exactly the number of
//! `increment` calls made against it, however many threads were involved.

use std::cell::UnsafeCell;
use std::sync::mpsc;
use std::sync::PoisonError;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::channel::{self, Sender};
use crate::error::{BenchError, Result};
use crate::lock;

/// A counter that can be incremented concurrently without lost updates.
pub trait CounterStore: Send + Sync {
    fn increment(&self);

    /// Current value. Only meaningful once every incrementing worker has joined.
    fn count(&self) -> u64;
}

/// Explicit lock object taken around an unguarded integer.
pub struct ExclusiveLockCounter {
    lock: lock::Mutex<()>,
    value: UnsafeCell<u64>,
}

// `value` is only touched while `lock` is held.
unsafe impl Sync for ExclusiveLockCounter {}

impl ExclusiveLockCounter {
    pub fn new() -> Self {
        Self {
            lock: lock::Mutex::new(()),
            value: UnsafeCell::new(0),
        }
    }
}

impl Default for ExclusiveLockCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for ExclusiveLockCounter {
    fn increment(&self) {
        self.lock.with_lock(|_| unsafe { *self.value.get() += 1 });
    }

    fn count(&self) -> u64 {
        self.lock.with_lock(|_| unsafe { *self.value.get() })
    }
}

enum Request {
    Increment(Sender<()>),
    Read(Sender<u64>),
}

/// The integer lives on a dedicated thread; callers queue requests and park
/// until that thread acknowledges them. Only the domain thread ever mutates
/// the value, so increments never overlap.
pub struct SerializedAccessorCounter {
    requests: Option<mpsc::Sender<Request>>,
    domain: Option<JoinHandle<u64>>,
}

impl SerializedAccessorCounter {
    pub fn new() -> Result<Self> {
        let (requests, inbox) = mpsc::channel();
        let domain = thread::Builder::new()
            .name("serialization-domain".into())
            .spawn(move || serve(inbox))?;

        Ok(Self {
            requests: Some(requests),
            domain: Some(domain),
        })
    }

    fn submit(&self, request: Request) -> Result<()> {
        self.requests
            .as_ref()
            .ok_or(BenchError::DomainClosed)?
            .send(request)
            .map_err(|_| BenchError::DomainClosed)
    }
}

fn serve(inbox: mpsc::Receiver<Request>) -> u64 {
    let mut value = 0u64;
    for request in inbox {
        match request {
            Request::Increment(ack) => {
                value += 1;
                ack.send(());
            }
            Request::Read(reply) => reply.send(value),
        }
    }
    value
}

impl CounterStore for SerializedAccessorCounter {
    fn increment(&self) {
        let (ack, done) = channel::oneshot();
        if let Err(e) = self.submit(Request::Increment(ack)) {
            panic!("increment lost: {e}");
        }
        if done.receive().is_none() {
            panic!("increment lost: {}", BenchError::DomainClosed);
        }
    }

    fn count(&self) -> u64 {
        let (reply, value) = channel::oneshot();
        if let Err(e) = self.submit(Request::Read(reply)) {
            panic!("count unavailable: {e}");
        }
        match value.receive() {
            Some(value) => value,
            None => panic!("count unavailable: {}", BenchError::DomainClosed),
        }
    }
}

impl Drop for SerializedAccessorCounter {
    fn drop(&mut self) {
        // Closing the queue ends the domain loop.
        drop(self.requests.take());
        if let Some(domain) = self.domain.take() {
            match domain.join() {
                Ok(value) => debug!(value, "serialization domain stopped"),
                Err(_) => error!("serialization domain panicked"),
            }
        }
    }
}

/// The integer is owned by the mutex and reachable only through its guard.
#[derive(Default)]
pub struct NativeMutexCounter {
    value: std::sync::Mutex<u64>,
}

impl NativeMutexCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for NativeMutexCounter {
    fn increment(&self) {
        // A poisoned lock still holds a valid integer; += 1 cannot leave it torn.
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        *value += 1;
    }

    fn count(&self) -> u64 {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
fn hammer(store: &dyn CounterStore, workers: usize, iterations: usize) {
    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| {
                for _ in 0..iterations {
                    store.increment();
                }
            });
        }
    });
}

#[test]
fn test_exclusive_lock_counter_is_exact() {
    let store = ExclusiveLockCounter::new();
    assert_eq!(store.count(), 0);
    hammer(&store, 8, 25_000);
    assert_eq!(store.count(), 200_000);
}

#[test]
fn test_serialized_accessor_counter_is_exact() {
    let store = SerializedAccessorCounter::new().unwrap();
    assert_eq!(store.count(), 0);
    hammer(&store, 8, 2_000);
    assert_eq!(store.count(), 16_000);
}

#[test]
fn test_native_mutex_counter_is_exact() {
    let store = NativeMutexCounter::new();
    assert_eq!(store.count(), 0);
    hammer(&store, 8, 25_000);
    assert_eq!(store.count(), 200_000);
}

#[test]
fn test_serialized_accessor_drop_stops_domain() {
    let store = SerializedAccessorCounter::new().unwrap();
    store.increment();
    // Joins the domain thread; hangs if the loop never sees the queue close.
    drop(store);
}

#[test]
fn test_queued_request_fails_when_domain_goes_away() {
    let (requests, inbox) = mpsc::channel();
    let (ack, done) = channel::oneshot();
    requests.send(Request::Increment(ack)).unwrap();

    // A domain that dies drops its inbox with the request still queued.
    drop(inbox);
    assert!(done.receive().is_none());
}
