use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::*;
use std::sync::Arc;

/// Advisory stop flag shared between a controller and one session.
///
/// Checked only between strategy stages, never inside the increment loop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Acquire)
    }
}

#[test]
fn test_clones_share_state() {
    let token = CancellationToken::new();
    let observer = token.clone();
    assert!(!observer.is_cancelled());
    token.cancel();
    assert!(observer.is_cancelled());
}
