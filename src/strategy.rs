use std::fmt;

use crate::counter::{
    CounterStore, ExclusiveLockCounter, NativeMutexCounter, SerializedAccessorCounter,
};
use crate::error::Result;

/// A mechanism for guarding the shared counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    SerializedAccessor,
    ExclusiveLock,
    NativeMutex,
}

impl Strategy {
    /// Order in which a run measures and reports the strategies.
    pub const REPORT_ORDER: [Strategy; 3] = [
        Strategy::SerializedAccessor,
        Strategy::ExclusiveLock,
        Strategy::NativeMutex,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::SerializedAccessor => "Actor",
            Strategy::ExclusiveLock => "Lock",
            Strategy::NativeMutex => "Mutex",
        }
    }

    /// Builds a fresh store at zero.
    pub fn create_store(self) -> Result<Box<dyn CounterStore>> {
        Ok(match self {
            Strategy::SerializedAccessor => Box::new(SerializedAccessorCounter::new()?),
            Strategy::ExclusiveLock => Box::new(ExclusiveLockCounter::new()),
            Strategy::NativeMutex => Box::new(NativeMutexCounter::new()),
        })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[test]
fn test_report_order_is_actor_lock_mutex() {
    let names: Vec<_> = Strategy::REPORT_ORDER.iter().map(|s| s.name()).collect();
    assert_eq!(names, ["Actor", "Lock", "Mutex"]);
}

#[test]
fn test_created_stores_start_at_zero() {
    for strategy in Strategy::REPORT_ORDER {
        let store = strategy.create_store().unwrap();
        assert_eq!(store.count(), 0, "{strategy}");
        store.increment();
        assert_eq!(store.count(), 1, "{strategy}");
    }
}
