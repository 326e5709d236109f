//! Single-threaded event reactor.
//!
//! A [`Reactor`] owns exactly one worker thread that drives a current-thread
//! tokio runtime. Every watcher callback, protocol engine transition and user
//! handler runs on that thread, so the protocol code needs no locking.
//!
//! The reactor also keeps a registry of long-lived objects. Anything whose
//! asynchronous work is still outstanding (a listening server, an in-flight
//! client exchange) is added to it and stays alive until it is removed or the
//! reactor stops.
//!
//! ```text
//!   created ──start()──▶ running ──stop()──▶ stopped
//! ```

pub mod watcher;

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use thiserror::Error;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle as TaskHandle;
use tracing::{debug, info, warn};

pub use watcher::{Events, Io, Kind, Periodic, Timer, Watcher};

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("reactor is not running")]
    NotRunning,
    #[error("reactor has been stopped")]
    Stopped,
    #[error("watcher has no callback")]
    MissingCallback,
    #[error("failed to start reactor: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Running,
    Stopped,
}

type Object = Arc<dyn Any + Send + Sync>;

struct Loop {
    handle: Handle,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Loop {
    /// Signals the loop and joins the worker, unless we are the worker.
    fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        if thread::current().id() == self.thread_id {
            return;
        }

        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                warn!("reactor thread panicked");
            }
        }
    }
}

struct State {
    phase: Phase,
    event_loop: Option<Loop>,
}

struct Inner {
    state: Mutex<State>,
    objects: Mutex<HashMap<usize, Object>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(lp) = state.event_loop.take() {
            lp.shutdown();
        }
    }
}

/// Handle to a reactor service. Cloning is cheap and every clone refers to
/// the same loop.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<Inner>,
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("phase", &self.phase())
            .field("objects", &self.len())
            .finish()
    }
}

impl Reactor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    phase: Phase::Created,
                    event_loop: None,
                }),
                objects: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Process-wide instance, for programs that want a single implicit loop.
    pub fn global() -> &'static Reactor {
        static GLOBAL: OnceLock<Reactor> = OnceLock::new();
        GLOBAL.get_or_init(Reactor::new)
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// Starts the worker thread. Calling it on a running reactor is a no-op.
    pub fn start(&self) -> Result<(), ReactorError> {
        let mut state = self.state();

        match state.phase {
            Phase::Running => return Ok(()),
            Phase::Stopped => return Err(ReactorError::Stopped),
            Phase::Created => {}
        }

        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let (tx, rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("nx-reactor".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = rx.await;
                });
                // outstanding tasks are dropped with the runtime
                drop(runtime);
                debug!("reactor loop exited");
            })?;

        state.event_loop = Some(Loop {
            handle,
            shutdown: Some(tx),
            thread_id: thread.thread().id(),
            thread: Some(thread),
        });
        state.phase = Phase::Running;

        info!("reactor started");
        Ok(())
    }

    /// Stops the loop, joins the worker and releases every registered object.
    pub fn stop(&self) {
        let event_loop = {
            let mut state = self.state();
            if state.phase == Phase::Stopped {
                return;
            }
            state.phase = Phase::Stopped;
            state.event_loop.take()
        };

        if let Some(lp) = event_loop {
            lp.shutdown();
        }

        let released: Vec<Object> = self.objects().drain().map(|(_, obj)| obj).collect();
        info!(released = released.len(), "reactor stopped");
        drop(released);
    }

    /// Runtime handle of the running loop.
    pub fn handle(&self) -> Result<Handle, ReactorError> {
        let state = self.state();
        match (&state.phase, &state.event_loop) {
            (Phase::Running, Some(lp)) => Ok(lp.handle.clone()),
            (Phase::Stopped, _) => Err(ReactorError::Stopped),
            _ => Err(ReactorError::NotRunning),
        }
    }

    /// Schedules `future` on the reactor thread.
    pub fn spawn<F>(&self, future: F) -> Result<TaskHandle<F::Output>, ReactorError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        Ok(self.handle()?.spawn(future))
    }

    pub fn is_reactor_thread(&self) -> bool {
        self.state()
            .event_loop
            .as_ref()
            .is_some_and(|lp| lp.thread_id == thread::current().id())
    }

    /// Keeps `object` alive until [`Reactor::remove`] or [`Reactor::stop`].
    /// Returns `false` if it was already registered.
    pub fn add<T: Any + Send + Sync>(&self, object: Arc<T>) -> bool {
        let key = object_key(&object);
        self.objects().insert(key, object).is_none()
    }

    pub fn remove<T: Any + Send + Sync>(&self, object: &Arc<T>) -> bool {
        let removed = self.objects().remove(&object_key(object));
        // dropped outside the registry lock
        removed.is_some()
    }

    pub fn contains<T: Any + Send + Sync>(&self, object: &Arc<T>) -> bool {
        self.objects().contains_key(&object_key(object))
    }

    /// Number of registered objects.
    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<usize, Object>> {
        self.inner.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn object_key<T>(object: &Arc<T>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::CondVar;
    use std::time::Duration;

    #[test]
    fn lifecycle_phases() {
        let reactor = Reactor::new();
        assert_eq!(reactor.phase(), Phase::Created);
        assert!(matches!(reactor.spawn(async {}), Err(ReactorError::NotRunning)));

        reactor.start().unwrap();
        reactor.start().unwrap();
        assert!(reactor.is_running());

        reactor.stop();
        reactor.stop();
        assert_eq!(reactor.phase(), Phase::Stopped);
        assert!(matches!(reactor.start(), Err(ReactorError::Stopped)));
    }

    #[test]
    fn spawned_work_runs_on_one_thread() {
        let reactor = Reactor::new();
        reactor.start().unwrap();

        let cv = Arc::new(CondVar::new(2));
        let ids = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let (cv, ids, r) = (Arc::clone(&cv), Arc::clone(&ids), reactor.clone());
            reactor
                .spawn(async move {
                    assert!(r.is_reactor_thread());
                    ids.lock().unwrap().push(thread::current().id());
                    cv.notify();
                })
                .unwrap();
        }

        assert!(cv.wait_timeout(Duration::from_secs(5)));
        let ids = ids.lock().unwrap();
        assert_eq!(ids[0], ids[1]);
        assert_ne!(ids[0], thread::current().id());
        assert!(!reactor.is_reactor_thread());

        reactor.stop();
    }

    #[test]
    fn registry_keeps_objects_until_stop() {
        let reactor = Reactor::new();
        reactor.start().unwrap();

        let a = Arc::new(String::from("a"));
        let b = Arc::new(42u32);

        assert!(reactor.add(Arc::clone(&a)));
        assert!(!reactor.add(Arc::clone(&a)));
        assert!(reactor.add(Arc::clone(&b)));
        assert_eq!(reactor.len(), 2);
        assert_eq!(Arc::strong_count(&a), 2);

        assert!(reactor.remove(&b));
        assert!(!reactor.contains(&b));
        assert_eq!(Arc::strong_count(&b), 1);

        reactor.stop();
        assert!(reactor.is_empty());
        assert_eq!(Arc::strong_count(&a), 1);
    }

    #[test]
    fn stop_from_reactor_thread_does_not_deadlock() {
        let reactor = Reactor::new();
        reactor.start().unwrap();

        let cv = Arc::new(CondVar::new(1));
        let (r, done) = (reactor.clone(), Arc::clone(&cv));
        reactor
            .spawn(async move {
                r.stop();
                done.notify();
            })
            .unwrap();

        assert!(cv.wait_timeout(Duration::from_secs(5)));
        assert_eq!(reactor.phase(), Phase::Stopped);
    }
}
