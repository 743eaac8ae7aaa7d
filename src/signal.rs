//! Shared stop signal
//!
//! Raised once, observed by the serial ingestor at every state boundary. The
//! backoff wait sleeps on a condvar so raising the signal cuts it short.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter. Idempotent.
    pub fn raise(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `timeout` or until the signal is raised.
    ///
    /// Returns `true` if the signal is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut raised = lock.lock();
        while !*raised {
            if cvar.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        *raised
    }

    /// Guard that raises this signal when dropped
    pub fn guard(&self) -> StopGuard {
        StopGuard(self.clone())
    }
}

/// Raises its signal on drop
#[derive(Debug)]
pub struct StopGuard(StopSignal);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.raise();
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("raised", &self.is_raised())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_times_out_when_not_raised() {
        let stop = StopSignal::new();
        let start = Instant::now();
        assert!(!stop.wait_timeout(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_raise_interrupts_wait() {
        let stop = StopSignal::new();
        let waiter = stop.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let raised = waiter.wait_timeout(Duration::from_secs(10));
            (raised, start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        stop.raise();

        let (raised, waited) = handle.join().unwrap();
        assert!(raised);
        assert!(waited < Duration::from_secs(5));
        assert!(stop.is_raised());
    }

    #[test]
    fn test_guard_raises_on_drop() {
        let stop = StopSignal::new();
        let guard = stop.guard();
        assert!(!stop.is_raised());
        drop(guard);
        assert!(stop.is_raised());
    }
}
