//! Rendezvous barrier used to join completion signals from the reactor thread
//! with a waiting thread.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    count: usize,
    ready: bool,
}

/// Single-use N-of-N barrier.
///
/// Becomes ready after `target` calls to [`CondVar::notify`], or immediately on
/// [`CondVar::notify_all`]. Once ready it stays ready.
#[derive(Debug)]
pub struct CondVar {
    target: usize,
    state: Mutex<State>,
    signal: Condvar,
}

impl CondVar {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            state: Mutex::new(State {
                count: 0,
                ready: target == 0,
            }),
            signal: Condvar::new(),
        }
    }

    pub fn notify(&self) {
        let mut state = self.lock();
        if !state.ready {
            state.count += 1;
            if state.count >= self.target {
                state.ready = true;
            }
        }
        drop(state);
        self.signal.notify_all();
    }

    pub fn notify_all(&self) {
        self.lock().ready = true;
        self.signal.notify_all();
    }

    pub fn wait(&self) {
        let guard = self.lock();
        let _ready = self
            .signal
            .wait_while(guard, |state| !state.ready)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Waits at most `timeout`; returns whether the barrier is ready.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (state, _) = self
            .signal
            .wait_timeout_while(guard, timeout, |state| !state.ready)
            .unwrap_or_else(PoisonError::into_inner);
        state.ready
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    pub fn count(&self) -> usize {
        self.lock().count
    }

    pub fn target(&self) -> usize {
        self.target
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ready_after_target_notifications() {
        let cv = CondVar::new(3);
        cv.notify();
        cv.notify();
        assert!(!cv.is_ready());
        cv.notify();
        assert!(cv.is_ready());

        // never exceeds the target once ready
        cv.notify();
        assert_eq!(cv.count(), 3);
    }

    #[test]
    fn notify_all_forces_ready() {
        let cv = CondVar::new(10);
        cv.notify_all();
        assert!(cv.is_ready());
        cv.wait();
    }

    #[test]
    fn wait_blocks_until_all_threads_notified() {
        let cv = Arc::new(CondVar::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cv = Arc::clone(&cv);
                thread::spawn(move || cv.notify())
            })
            .collect();

        cv.wait();
        assert!(cv.is_ready());
        assert_eq!(cv.count(), 4);

        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn wait_timeout_reports_not_ready() {
        let cv = CondVar::new(1);
        assert!(!cv.wait_timeout(Duration::from_millis(20)));
        cv.notify();
        assert!(cv.wait_timeout(Duration::from_millis(20)));
    }
}
