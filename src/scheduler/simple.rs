//! One dedicated thread per scheduled task. The simplest way to run a
//! handful of read callbacks, and what the collectd adapter uses.

use super::{run_guarded, STOP_GRACE};
use crate::errors::SchedulerError;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct Shared {
    /// True once stop has been requested. Guarded by `stop`; `wake` lets
    /// sleeping task threads notice the request before their next due time.
    stop: Mutex<bool>,
    wake: Condvar,

    /// Task threads still running. Guarded by `live`; `drained` is signaled
    /// each time one exits.
    live: Mutex<usize>,
    drained: Condvar,
}

/// Interval executor with one background thread per task. No per-task
/// cancellation: the only way to stop anything is to stop everything.
pub struct SimpleScheduler {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl Default for SimpleScheduler {
    fn default() -> Self {
        SimpleScheduler::new()
    }
}

impl SimpleScheduler {
    pub fn new() -> SimpleScheduler {
        SimpleScheduler {
            shared: Arc::new(Shared {
                stop: Mutex::new(false),
                wake: Condvar::new(),
                live: Mutex::new(0),
                drained: Condvar::new(),
            }),
            threads: Vec::new(),
        }
    }

    /// Spawns a thread that invokes `callback` every `interval`, starting
    /// immediately when `immediately` is set and one interval out otherwise.
    /// The cadence is fixed: the next due time advances by `interval` from
    /// the previous due time, not from when the callback finished.
    pub fn run_on_interval<F>(&mut self, interval: Duration, immediately: bool, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        *shared.live.lock().expect("scheduler lock poisoned") += 1;

        let handle = thread::spawn(move || {
            let mut callback = callback;
            let mut next_run = Instant::now();
            if !immediately {
                next_run += interval;
            }

            loop {
                if sleep_until(&shared, next_run) {
                    break;
                }
                run_guarded(&mut callback);
                next_run += interval;
            }

            let mut live = shared.live.lock().expect("scheduler lock poisoned");
            *live -= 1;
            shared.drained.notify_all();
        });

        self.threads.push(handle);
    }

    /// Signals every task thread and waits for them to finish. Threads get
    /// a fixed grace period; if any is still inside a callback when it
    /// expires, this fails rather than silently leaking a thread that may
    /// still invoke plugin code.
    pub fn stop(&mut self) -> Result<(), SchedulerError> {
        {
            let mut stop = self.shared.stop.lock().expect("scheduler lock poisoned");
            *stop = true;
        }
        self.shared.wake.notify_all();

        let deadline = Instant::now() + STOP_GRACE;
        let mut live = self.shared.live.lock().expect("scheduler lock poisoned");
        while *live > 0 {
            let now = Instant::now();
            if now >= deadline {
                return Err(SchedulerError::StopTimeout {
                    pending: *live,
                    grace: STOP_GRACE,
                });
            }
            let (guard, _) = self
                .shared
                .drained
                .wait_timeout(live, deadline - now)
                .expect("scheduler lock poisoned");
            live = guard;
        }
        drop(live);

        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        Ok(())
    }
}

/// Blocks until `next_run` or a stop request, whichever comes first.
/// Returns true when the scheduler is stopping.
fn sleep_until(shared: &Shared, next_run: Instant) -> bool {
    let mut stop = shared.stop.lock().expect("scheduler lock poisoned");
    loop {
        if *stop {
            return true;
        }
        let now = Instant::now();
        if now >= next_run {
            return false;
        }
        let (guard, _) = shared
            .wake
            .wait_timeout(stop, next_run - now)
            .expect("scheduler lock poisoned");
        stop = guard;
    }
}
