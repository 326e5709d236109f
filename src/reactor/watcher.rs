//! Event-source registrations bound to a [`Reactor`].
//!
//! One concrete [`Watcher`] type, parameterized by its event kind:
//! [`Io`] readiness (unix), one-shot or repeating [`Timer`]s and wall-clock
//! anchored [`Periodic`] schedules. A watcher holds its configuration and a
//! single callback slot; it is move-only and stops itself when dropped.

use std::fmt;
use std::future::Future;
use std::ops::{BitOr, BitOrAssign};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{Reactor, ReactorError};

/// Bit mask of fired (or requested) events.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Events(u8);

impl Events {
    pub const NONE: Events = Events(0);
    pub const READ: Events = Events(0b0001);
    pub const WRITE: Events = Events(0b0010);
    pub const TIMER: Events = Events(0b0100);
    pub const PERIODIC: Events = Events(0b1000);

    pub fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn without(self, other: Events) -> Events {
        Events(self.0 & !other.0)
    }
}

impl BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

pub type Callback = Box<dyn FnMut(Events) + Send>;

type Slot = Arc<Mutex<Callback>>;

/// Handle an armed task uses to run the watcher's callback.
///
/// Each arming gets its own `live` flag; once the watcher is stopped the
/// flag is cleared and later calls do nothing.
#[derive(Clone)]
pub struct Fire {
    slot: Slot,
    live: Arc<AtomicBool>,
}

impl Fire {
    pub fn call(&self, events: Events) {
        let mut cb = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if self.live.load(Ordering::SeqCst) {
            (cb)(events);
        }
    }
}

pub type Armed = Pin<Box<dyn Future<Output = ()> + Send>>;

/// An event source kind: its configuration and how to wait for it.
pub trait Kind: Send + 'static {
    type Config: Clone + fmt::Debug + Send + 'static;

    /// Builds the task that waits for events and fires the callback.
    /// Runs on the reactor thread until it completes or is cancelled.
    fn arm(config: Self::Config, fire: Fire) -> Armed;
}

pub struct Timer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerConfig {
    pub after: Duration,
    /// Zero for a one-shot timer.
    pub repeat: Duration,
}

impl Kind for Timer {
    type Config = TimerConfig;

    fn arm(config: TimerConfig, fire: Fire) -> Armed {
        Box::pin(async move {
            tokio::time::sleep(config.after).await;
            fire.call(Events::TIMER);

            if config.repeat.is_zero() {
                return;
            }

            let mut ticks = tokio::time::interval_at(Instant::now() + config.repeat, config.repeat);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                fire.call(Events::TIMER);
            }
        })
    }
}

pub struct Periodic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicConfig {
    pub at: SystemTime,
    /// Zero fires once at `at`.
    pub interval: Duration,
}

impl Default for PeriodicConfig {
    fn default() -> Self {
        Self {
            at: SystemTime::UNIX_EPOCH,
            interval: Duration::ZERO,
        }
    }
}

impl PeriodicConfig {
    /// Delay from `now` until the next scheduled instant.
    pub fn next_delay(&self, now: SystemTime) -> Duration {
        match self.at.duration_since(now) {
            Ok(ahead) => ahead,
            Err(_) if self.interval.is_zero() => Duration::ZERO,
            Err(behind) => {
                let behind = behind.duration();
                let interval = self.interval.as_nanos();
                let rem = behind.as_nanos() % interval;
                if rem == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_nanos((interval - rem) as u64)
                }
            }
        }
    }
}

impl Kind for Periodic {
    type Config = PeriodicConfig;

    fn arm(config: PeriodicConfig, fire: Fire) -> Armed {
        Box::pin(async move {
            let first = Instant::now() + config.next_delay(SystemTime::now());

            if config.interval.is_zero() {
                tokio::time::sleep_until(first).await;
                fire.call(Events::PERIODIC);
                return;
            }

            let mut ticks = tokio::time::interval_at(first, config.interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                fire.call(Events::PERIODIC);
            }
        })
    }
}

pub struct Io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoConfig {
    pub fd: i32,
    pub interest: Events,
}

#[cfg(unix)]
impl Kind for Io {
    type Config = IoConfig;

    fn arm(config: IoConfig, fire: Fire) -> Armed {
        use tokio::io::Interest;
        use tokio::io::unix::AsyncFd;

        Box::pin(async move {
            let interest = match (
                config.interest.contains(Events::READ),
                config.interest.contains(Events::WRITE),
            ) {
                (true, true) => Interest::READABLE | Interest::WRITABLE,
                (true, false) => Interest::READABLE,
                (false, true) => Interest::WRITABLE,
                (false, false) => return,
            };

            let fd = match AsyncFd::with_interest(config.fd, interest) {
                Ok(fd) => fd,
                Err(e) => {
                    tracing::warn!(fd = config.fd, error = %e, "io watcher registration failed");
                    return;
                }
            };

            loop {
                let mut guard = match fd.ready(interest).await {
                    Ok(guard) => guard,
                    Err(e) => {
                        tracing::warn!(fd = config.fd, error = %e, "io watcher failed");
                        return;
                    }
                };

                let ready = guard.ready();
                let mut events = Events::NONE;
                if ready.is_readable() || ready.is_read_closed() {
                    events |= Events::READ;
                }
                if ready.is_writable() || ready.is_write_closed() {
                    events |= Events::WRITE;
                }

                fire.call(events);

                // level-triggered: stay ready while the fd still has events
                if pending(config.fd, config.interest).is_empty() {
                    guard.clear_ready();
                } else {
                    drop(guard);
                    tokio::task::yield_now().await;
                }
            }
        })
    }
}

/// Events still pending on `fd`, polled without blocking.
#[cfg(unix)]
fn pending(fd: i32, interest: Events) -> Events {
    let mut requested = 0;
    if interest.contains(Events::READ) {
        requested |= libc::POLLIN;
    }
    if interest.contains(Events::WRITE) {
        requested |= libc::POLLOUT;
    }

    let mut pfd = libc::pollfd {
        fd,
        events: requested,
        revents: 0,
    };
    // SAFETY: a single valid pollfd and a zero timeout.
    let n = unsafe { libc::poll(&mut pfd, 1, 0) };
    if n <= 0 {
        return Events::NONE;
    }

    let mut events = Events::NONE;
    if interest.contains(Events::READ) && pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
        events |= Events::READ;
    }
    if interest.contains(Events::WRITE) && pfd.revents & (libc::POLLOUT | libc::POLLERR) != 0 {
        events |= Events::WRITE;
    }
    events
}

/// A single registered event source.
///
/// I/O watchers are level-triggered: the callback keeps firing while the
/// descriptor has pending events, so it may consume data piecemeal.
pub struct Watcher<K: Kind> {
    reactor: Reactor,
    config: K::Config,
    slot: Option<Slot>,
    live: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl<K: Kind> Watcher<K> {
    pub fn with_config(reactor: &Reactor, config: K::Config) -> Self {
        Self {
            reactor: reactor.clone(),
            config,
            slot: None,
            live: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Installs the callback. A started watcher is re-armed with it.
    pub fn on<F>(&mut self, callback: F) -> Result<&mut Self, ReactorError>
    where
        F: FnMut(Events) + Send + 'static,
    {
        let was_started = self.is_started();
        self.stop();
        self.slot = Some(Arc::new(Mutex::new(Box::new(callback))));
        if was_started {
            self.start()?;
        }
        Ok(self)
    }

    pub fn start(&mut self) -> Result<(), ReactorError> {
        if self.is_started() {
            return Ok(());
        }
        self.arm(self.config.clone())
    }

    /// Once this returns no callback of this watcher is running or will run.
    ///
    /// Off the reactor thread this waits for a callback already in progress.
    pub fn stop(&mut self) {
        self.live.store(false, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            task.abort();
        }

        if let Some(slot) = &self.slot {
            if !self.reactor.is_reactor_thread() {
                drop(slot.lock().unwrap_or_else(PoisonError::into_inner));
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop, reconfigure, and resume if it was running.
    pub fn modify<F>(&mut self, f: F) -> Result<&mut Self, ReactorError>
    where
        F: FnOnce(&mut K::Config),
    {
        let was_started = self.is_started();
        self.stop();
        f(&mut self.config);
        if was_started {
            self.start()?;
        }
        Ok(self)
    }

    pub fn config(&self) -> &K::Config {
        &self.config
    }

    fn arm(&mut self, config: K::Config) -> Result<(), ReactorError> {
        let slot = self.slot.clone().ok_or(ReactorError::MissingCallback)?;
        self.live = Arc::new(AtomicBool::new(true));
        let fire = Fire {
            slot,
            live: self.live.clone(),
        };
        self.task = Some(self.reactor.spawn(K::arm(config, fire))?);
        Ok(())
    }
}

impl<K: Kind> Drop for Watcher<K> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<K: Kind> fmt::Debug for Watcher<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("config", &self.config)
            .field("started", &self.is_started())
            .finish()
    }
}

impl Watcher<Timer> {
    pub fn timer(reactor: &Reactor, after: Duration, repeat: Duration) -> Self {
        Self::with_config(reactor, TimerConfig { after, repeat })
    }

    pub fn set(&mut self, after: Duration, repeat: Duration) -> Result<&mut Self, ReactorError> {
        self.modify(|c| *c = TimerConfig { after, repeat })
    }

    /// Rearms from now using the repeat interval; a one-shot timer is stopped.
    pub fn again(&mut self) -> Result<(), ReactorError> {
        self.stop();
        let repeat = self.config.repeat;
        if repeat.is_zero() {
            return Ok(());
        }
        self.arm(TimerConfig {
            after: repeat,
            repeat,
        })
    }
}

impl Watcher<Periodic> {
    pub fn periodic(reactor: &Reactor, at: SystemTime, interval: Duration) -> Self {
        Self::with_config(reactor, PeriodicConfig { at, interval })
    }

    pub fn set(&mut self, at: SystemTime, interval: Duration) -> Result<&mut Self, ReactorError> {
        self.modify(|c| *c = PeriodicConfig { at, interval })
    }

    /// Restarts the schedule.
    pub fn again(&mut self) -> Result<(), ReactorError> {
        self.stop();
        self.start()
    }
}

#[cfg(unix)]
impl Watcher<Io> {
    pub fn io(reactor: &Reactor, fd: i32, interest: Events) -> Self {
        Self::with_config(reactor, IoConfig { fd, interest })
    }

    pub fn set_events(&mut self, interest: Events) -> Result<&mut Self, ReactorError> {
        self.modify(|c| c.interest = interest)
    }

    pub fn add_events(&mut self, events: Events) -> Result<&mut Self, ReactorError> {
        self.modify(|c| c.interest |= events)
    }

    pub fn remove_events(&mut self, events: Events) -> Result<&mut Self, ReactorError> {
        self.modify(|c| c.interest = c.interest.without(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::CondVar;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn running() -> Reactor {
        let reactor = Reactor::new();
        reactor.start().unwrap();
        reactor
    }

    #[test]
    fn one_shot_timer_fires_once() {
        let reactor = running();
        let cv = Arc::new(CondVar::new(1));
        let fired = Arc::new(AtomicUsize::new(0));

        let mut timer = Watcher::timer(&reactor, Duration::from_millis(10), Duration::ZERO);
        let (c, n) = (Arc::clone(&cv), Arc::clone(&fired));
        timer
            .on(move |ev| {
                assert!(ev.contains(Events::TIMER));
                n.fetch_add(1, Ordering::SeqCst);
                c.notify();
            })
            .unwrap();
        timer.start().unwrap();

        assert!(cv.wait_timeout(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_started());

        reactor.stop();
    }

    #[test]
    fn repeating_timer_until_stopped() {
        let reactor = running();
        let cv = Arc::new(CondVar::new(3));
        let fired = Arc::new(AtomicUsize::new(0));

        let mut timer = Watcher::timer(&reactor, Duration::from_millis(1), Duration::from_millis(5));
        let (c, n) = (Arc::clone(&cv), Arc::clone(&fired));
        timer
            .on(move |_| {
                n.fetch_add(1, Ordering::SeqCst);
                c.notify();
            })
            .unwrap();
        timer.start().unwrap();

        assert!(cv.wait_timeout(Duration::from_secs(5)));
        timer.stop();
        assert!(!timer.is_started());

        let seen = fired.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), seen);

        reactor.stop();
    }

    #[test]
    fn modify_keeps_started_state() {
        let reactor = running();
        let mut timer = Watcher::timer(&reactor, Duration::from_secs(60), Duration::ZERO);
        timer.on(|_| {}).unwrap();

        timer.set(Duration::from_secs(30), Duration::ZERO).unwrap();
        assert!(!timer.is_started());

        timer.start().unwrap();
        timer.set(Duration::from_secs(10), Duration::from_secs(1)).unwrap();
        assert!(timer.is_started());
        assert_eq!(timer.config().after, Duration::from_secs(10));

        drop(timer);
        reactor.stop();
    }

    #[test]
    fn start_without_callback_fails() {
        let reactor = running();
        let mut timer = Watcher::timer(&reactor, Duration::ZERO, Duration::ZERO);
        assert!(matches!(timer.start(), Err(ReactorError::MissingCallback)));
        reactor.stop();
    }

    #[test]
    fn again_on_one_shot_stops() {
        let reactor = running();
        let mut timer = Watcher::timer(&reactor, Duration::from_secs(60), Duration::ZERO);
        timer.on(|_| {}).unwrap();
        timer.start().unwrap();

        timer.again().unwrap();
        assert!(!timer.is_started());
        reactor.stop();
    }

    #[test]
    fn again_rearms_with_repeat() {
        let reactor = running();
        let cv = Arc::new(CondVar::new(1));
        let mut timer = Watcher::timer(&reactor, Duration::from_secs(60), Duration::from_millis(10));
        let c = Arc::clone(&cv);
        timer.on(move |_| c.notify()).unwrap();
        timer.start().unwrap();

        // without again() the first tick is a minute away
        timer.again().unwrap();
        assert!(cv.wait_timeout(Duration::from_secs(5)));
        reactor.stop();
    }

    #[test]
    fn periodic_next_delay_aligns_to_interval() {
        let now = SystemTime::now();
        let cfg = PeriodicConfig {
            at: now - Duration::from_millis(250),
            interval: Duration::from_millis(100),
        };
        assert_eq!(cfg.next_delay(now), Duration::from_millis(50));

        let ahead = PeriodicConfig {
            at: now + Duration::from_secs(2),
            interval: Duration::ZERO,
        };
        assert_eq!(ahead.next_delay(now), Duration::from_secs(2));
    }

    #[test]
    fn periodic_fires() {
        let reactor = running();
        let cv = Arc::new(CondVar::new(2));
        let mut periodic = Watcher::periodic(&reactor, SystemTime::now(), Duration::from_millis(5));
        let c = Arc::clone(&cv);
        periodic
            .on(move |ev| {
                assert!(ev.contains(Events::PERIODIC));
                c.notify();
            })
            .unwrap();
        periodic.start().unwrap();

        assert!(cv.wait_timeout(Duration::from_secs(5)));
        reactor.stop();
    }

    #[cfg(unix)]
    #[test]
    fn io_watcher_reports_readable() {
        use std::io::Write;
        use std::os::fd::AsRawFd;
        use std::os::unix::net::UnixStream;

        let reactor = running();
        let (mut tx, rx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();

        let cv = Arc::new(CondVar::new(1));
        let mut io = Watcher::io(&reactor, rx.as_raw_fd(), Events::READ);
        let c = Arc::clone(&cv);
        io.on(move |ev| {
            if ev.contains(Events::READ) {
                c.notify();
            }
        })
        .unwrap();
        io.start().unwrap();

        tx.write_all(b"ping").unwrap();
        assert!(cv.wait_timeout(Duration::from_secs(5)));

        io.stop();
        reactor.stop();
    }

    #[cfg(unix)]
    #[test]
    fn io_watcher_is_level_triggered() {
        use std::io::{Read, Write};
        use std::os::fd::AsRawFd;
        use std::os::unix::net::UnixStream;

        let reactor = running();
        let (mut tx, rx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();
        let fd = rx.as_raw_fd();

        let cv = Arc::new(CondVar::new(4));
        let got = Arc::new(AtomicUsize::new(0));
        let mut io = Watcher::io(&reactor, fd, Events::READ);
        let (c, n) = (Arc::clone(&cv), Arc::clone(&got));
        let mut source = rx.try_clone().unwrap();
        io.on(move |_| {
            // one byte per call, leaving the rest pending
            let mut byte = [0u8; 1];
            if let Ok(1) = source.read(&mut byte) {
                n.fetch_add(1, Ordering::SeqCst);
                c.notify();
            }
        })
        .unwrap();
        io.start().unwrap();

        tx.write_all(b"abcd").unwrap();
        assert!(cv.wait_timeout(Duration::from_secs(5)));
        assert_eq!(got.load(Ordering::SeqCst), 4);

        io.stop();
        reactor.stop();
    }

    #[test]
    fn stop_waits_for_running_callback() {
        let reactor = running();
        let entered = Arc::new(CondVar::new(1));
        let finished = Arc::new(AtomicBool::new(false));

        let mut timer = Watcher::timer(&reactor, Duration::ZERO, Duration::ZERO);
        let (e, f) = (Arc::clone(&entered), Arc::clone(&finished));
        timer
            .on(move |_| {
                e.notify();
                std::thread::sleep(Duration::from_millis(50));
                f.store(true, Ordering::SeqCst);
            })
            .unwrap();
        timer.start().unwrap();

        assert!(entered.wait_timeout(Duration::from_secs(5)));
        timer.stop();
        assert!(finished.load(Ordering::SeqCst));

        reactor.stop();
    }

    #[test]
    fn events_mask() {
        let mut ev = Events::READ;
        ev |= Events::WRITE;
        assert!(ev.contains(Events::READ | Events::WRITE));
        assert_eq!(ev.without(Events::READ), Events::WRITE);
        assert!(Events::NONE.is_empty());
    }
}
