//! Hung-thread watchdog.
//!
//! The watchdog periodically posts a trivial probe task to the monitored
//! thread. A probe that has not run by the next tick means the thread has
//! been unresponsive for a full interval; the watchdog then polls the host's
//! process error table to confirm the hang before invoking the callback,
//! since an unconfirmed stall is the block analyzer's business, not an ANR.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    thread,
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::{
    config::{AnrConfig, ConfigError},
    looper::{DispatchContext, LooperCallback},
};

/// How often the process error table is re-polled after a missed probe.
const LOOKUP_RETRY_COUNT: u32 = 6;
const LOOKUP_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Posts a task to run on the monitored thread's event loop.
pub trait MainTaskPoster: Send + Sync {
    fn post(&self, task: Box<dyn FnOnce() + Send>);
}

/// Host-reported error state for a hung process.
#[derive(Clone, Debug)]
pub struct ProcessErrorState {
    pub pid: i32,
    pub tag: String,
    pub short_message: String,
    pub long_message: String,
}

/// Queries the host for a not-responding entry about this process.
pub trait ProcessErrorLookup: Send + Sync {
    /// `None` while the host has not (yet) flagged the process.
    fn lookup(&self) -> Option<ProcessErrorState>;
}

#[derive(Default)]
struct WaitState {
    stopped: bool,
    kicked: bool,
}

struct WatchShared {
    state: Mutex<WaitState>,
    signal: Condvar,
    probe_completed: AtomicBool,
    dispatch_start_uptime: AtomicI64,
}

impl WatchShared {
    /// Sleep up to `timeout`, returning early on kick or stop. Returns
    /// false when the watchdog should exit.
    fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.stopped && !state.kicked {
            let _ = self.signal.wait_for(&mut state, timeout);
        }
        state.kicked = false;
        !state.stopped
    }

    fn kick(&self) {
        let mut state = self.state.lock();
        state.kicked = true;
        self.signal.notify_all();
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.signal.notify_all();
    }
}

pub struct AnrWatchdog {
    interval_millis: i64,
    poster: Arc<dyn MainTaskPoster>,
    lookup: Arc<dyn ProcessErrorLookup>,
    shared: Arc<WatchShared>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl AnrWatchdog {
    pub fn new(
        config: AnrConfig,
        poster: Arc<dyn MainTaskPoster>,
        lookup: Arc<dyn ProcessErrorLookup>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            interval_millis: config.interval_millis,
            poster,
            lookup,
            shared: Arc::new(WatchShared {
                state: Mutex::new(WaitState::default()),
                signal: Condvar::new(),
                probe_completed: AtomicBool::new(true),
                dispatch_start_uptime: AtomicI64::new(i64::MAX),
            }),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the watchdog thread. `on_anr` runs on that thread for every
    /// confirmed hang. A second start while running is a no-op.
    pub fn start(&self, on_anr: impl Fn(ProcessErrorState) + Send + 'static) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        self.shared.state.lock().stopped = false;
        let shared = self.shared.clone();
        let poster = self.poster.clone();
        let lookup = self.lookup.clone();
        let interval = Duration::from_millis(self.interval_millis as u64);
        let spawned = thread::Builder::new()
            .name("stalltrace-anr".to_string())
            .spawn(move || watch_loop(shared, poster, lookup, interval, on_anr))
            .expect("failed to spawn watchdog thread");
        *handle = Some(spawned);
    }

    pub fn stop(&self) {
        self.shared.stop();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AnrWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LooperCallback for AnrWatchdog {
    fn dispatch(&self, current: &DispatchContext) {
        match current {
            DispatchContext::Start(start) => {
                self.shared
                    .dispatch_start_uptime
                    .store(start.uptime_millis, Ordering::Relaxed);
            }
            DispatchContext::End(end) => {
                let start = self
                    .shared
                    .dispatch_start_uptime
                    .swap(i64::MAX, Ordering::Relaxed);
                // A dispatch that alone outlasted the probe interval is a
                // hang the next tick might miss; check right away.
                if end.uptime_millis.saturating_sub(start) >= self.interval_millis {
                    self.shared.kick();
                }
            }
        }
    }
}

fn watch_loop(
    shared: Arc<WatchShared>,
    poster: Arc<dyn MainTaskPoster>,
    lookup: Arc<dyn ProcessErrorLookup>,
    interval: Duration,
    on_anr: impl Fn(ProcessErrorState),
) {
    loop {
        shared.probe_completed.store(false, Ordering::Release);
        {
            let shared = shared.clone();
            poster.post(Box::new(move || {
                shared.probe_completed.store(true, Ordering::Release);
            }));
        }
        if !shared.wait(interval) {
            return;
        }
        if shared.probe_completed.load(Ordering::Acquire) {
            continue;
        }
        debug!("probe missed, polling process error state");
        // The host may publish the error entry a little after the hang is
        // observable; poll a few times before giving up.
        let mut confirmed = false;
        for _ in 0..LOOKUP_RETRY_COUNT {
            if let Some(state) = lookup.lookup() {
                confirmed = true;
                on_anr(state);
                break;
            }
            if !shared.wait(LOOKUP_RETRY_DELAY) {
                return;
            }
        }
        if !confirmed {
            error!("probe missed but no process error entry appeared");
        }
        // Wait out the stale probe before arming a fresh one.
        while !shared.probe_completed.load(Ordering::Acquire) {
            if !shared.wait(LOOKUP_RETRY_DELAY) {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    /// Runs posted tasks immediately, as a responsive main thread would.
    struct Responsive;
    impl MainTaskPoster for Responsive {
        fn post(&self, task: Box<dyn FnOnce() + Send>) {
            task();
        }
    }

    /// Drops posted tasks, as a hung main thread would.
    struct Hung;
    impl MainTaskPoster for Hung {
        fn post(&self, _: Box<dyn FnOnce() + Send>) {}
    }

    struct ErrorEntry;
    impl ProcessErrorLookup for ErrorEntry {
        fn lookup(&self) -> Option<ProcessErrorState> {
            Some(ProcessErrorState {
                pid: 42,
                tag: "app".to_string(),
                short_message: "not responding".to_string(),
                long_message: "main thread unresponsive".to_string(),
            })
        }
    }

    struct NoEntry;
    impl ProcessErrorLookup for NoEntry {
        fn lookup(&self) -> Option<ProcessErrorState> {
            None
        }
    }

    #[test]
    fn responsive_thread_never_fires() {
        let (sender, receiver) = mpsc::channel();
        let watchdog = AnrWatchdog::new(
            AnrConfig {
                interval_millis: 20,
            },
            Arc::new(Responsive),
            Arc::new(ErrorEntry),
        )
        .unwrap();
        watchdog.start(move |state| {
            let _ = sender.send(state);
        });
        thread::sleep(Duration::from_millis(120));
        watchdog.stop();
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn hung_thread_fires_with_error_state() {
        let (sender, receiver) = mpsc::channel();
        let watchdog = AnrWatchdog::new(
            AnrConfig {
                interval_millis: 20,
            },
            Arc::new(Hung),
            Arc::new(ErrorEntry),
        )
        .unwrap();
        watchdog.start(move |state| {
            let _ = sender.send(state);
        });
        let state = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(state.pid, 42);
        assert_eq!(state.short_message, "not responding");
        watchdog.stop();
    }

    #[test]
    fn unconfirmed_hang_does_not_fire() {
        let (sender, receiver) = mpsc::channel::<ProcessErrorState>();
        let watchdog = AnrWatchdog::new(
            AnrConfig {
                interval_millis: 10,
            },
            Arc::new(Hung),
            Arc::new(NoEntry),
        )
        .unwrap();
        watchdog.start(move |state| {
            let _ = sender.send(state);
        });
        thread::sleep(Duration::from_millis(80));
        watchdog.stop();
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn stop_interrupts_the_wait() {
        let watchdog = AnrWatchdog::new(
            AnrConfig {
                interval_millis: 60_000,
            },
            Arc::new(Responsive),
            Arc::new(NoEntry),
        )
        .unwrap();
        watchdog.start(|_| {});
        // Must return promptly despite the minute-long interval.
        watchdog.stop();
    }
}
