//! Interval execution across a bounded, shared pool of worker threads.
//!
//! A min-heap of due times decides what runs next. Workers claim the
//! earliest task, wait out its due time off-heap, run it, and push it back
//! one interval later. Scheduling a task earlier than everything pending
//! wakes the waiting workers so one of them trades its claim for the
//! earlier task.

use super::run_guarded;
use log::debug;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_MAX_THREADS: usize = 5;

type TaskFn = Arc<Mutex<dyn FnMut() + Send>>;

struct Task {
    due: Instant,
    /// Identity for cancellation and for deterministic ordering of tasks
    /// due at the same instant.
    id: u64,
    interval: Duration,
    callback: TaskFn,
}

// BinaryHeap is a max-heap; the ordering is reversed so the earliest due
// time surfaces first.
impl Ord for Task {
    fn cmp(&self, other: &Task) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Task) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Task) -> bool {
        self.due == other.due && self.id == other.id
    }
}

impl Eq for Task {}

struct Inner {
    heap: BinaryHeap<Task>,
    /// Ids of tasks cancelled after a worker already claimed them; consulted
    /// immediately before invocation.
    cancelled: HashSet<u64>,
    /// Set when a task earlier than every pending one arrives; exactly one
    /// woken worker consumes it and trades in its claim.
    new_earlier: bool,
    stop: bool,
    /// Earliest due time any worker is currently waiting toward.
    next_scheduled: Option<Instant>,
    live_workers: usize,
    next_id: u64,
}

impl Inner {
    /// Pushes a task and reports whether it is now the earliest pending
    /// one. Caller holds the lock.
    fn schedule(&mut self, task: Task) -> bool {
        let due = task.due;
        self.heap.push(task);
        if self.next_scheduled.map_or(true, |next| due < next) {
            self.next_scheduled = Some(due);
            true
        } else {
            false
        }
    }
}

struct Shared {
    max_threads: usize,
    inner: Mutex<Inner>,
    wake: Condvar,
}

/// Shared-pool interval executor with dynamic add and per-task
/// cancellation.
pub struct IntervalScheduler {
    shared: Arc<Shared>,
}

impl Default for IntervalScheduler {
    fn default() -> Self {
        IntervalScheduler::new(DEFAULT_MAX_THREADS)
    }
}

impl IntervalScheduler {
    pub fn new(max_threads: usize) -> IntervalScheduler {
        assert!(max_threads > 0, "scheduler needs at least one worker");
        IntervalScheduler {
            shared: Arc::new(Shared {
                max_threads,
                inner: Mutex::new(Inner {
                    heap: BinaryHeap::new(),
                    cancelled: HashSet::new(),
                    new_earlier: false,
                    stop: false,
                    next_scheduled: None,
                    live_workers: 0,
                    next_id: 0,
                }),
                wake: Condvar::new(),
            }),
        }
    }

    /// Schedules `callback` every `interval`, starting now or one interval
    /// out. Returns a handle that cancels the task.
    pub fn run_on_interval<F>(
        &self,
        interval: Duration,
        immediately: bool,
        callback: F,
    ) -> CancelHandle
    where
        F: FnMut() + Send + 'static,
    {
        let mut due = Instant::now();
        if !immediately {
            due += interval;
        }

        let mut inner = self.shared.inner.lock().expect("scheduler lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;

        let is_earliest = inner.schedule(Task {
            due,
            id,
            interval,
            callback: Arc::new(Mutex::new(callback)),
        });

        // A task due before everything pending has to pull at least one
        // waiting worker off its current target.
        if is_earliest {
            inner.new_earlier = true;
            self.shared.wake.notify_all();
        }

        if inner.heap.len() > inner.live_workers && inner.live_workers < self.shared.max_threads {
            inner.live_workers += 1;
            let shared = Arc::clone(&self.shared);
            thread::spawn(move || worker(shared));
        }

        CancelHandle {
            shared: Arc::clone(&self.shared),
            id,
            called: AtomicBool::new(false),
        }
    }

    /// Signals every worker to exit. Workers that are mid-callback finish
    /// that invocation; nothing is joined.
    pub fn stop(&self) {
        let mut inner = self.shared.inner.lock().expect("scheduler lock poisoned");
        inner.stop = true;
        self.shared.wake.notify_all();
    }
}

fn worker(shared: Arc<Shared>) {
    loop {
        let mut inner = shared.inner.lock().expect("scheduler lock poisoned");
        if inner.stop {
            inner.live_workers -= 1;
            return;
        }

        let task = match inner.heap.pop() {
            Some(task) => task,
            None => {
                // A later run_on_interval call spins up a replacement.
                debug!("nothing for interval worker to do, shutting down");
                inner.live_workers -= 1;
                return;
            }
        };
        inner.next_scheduled = Some(task.due);

        // Wait out the due time. The lock is released inside wait_timeout,
        // so other workers and schedulers proceed meanwhile.
        let mut preempted = false;
        loop {
            if inner.stop {
                // A claimed task still runs one final time on stop; the
                // worker exits at the top of the next cycle.
                break;
            }
            let now = Instant::now();
            if now >= task.due {
                break;
            }
            let (guard, _) = shared
                .wake
                .wait_timeout(inner, task.due - now)
                .expect("scheduler lock poisoned");
            inner = guard;
            if inner.new_earlier && !inner.stop {
                // Only the first worker through the lock takes the trade;
                // the rest go back to sleep against their own claims.
                inner.new_earlier = false;
                preempted = true;
                break;
            }
        }

        if preempted {
            inner.schedule(task);
            continue;
        }

        if inner.cancelled.remove(&task.id) {
            // Cancelled while claimed: skip and drop, do not reschedule.
            continue;
        }

        drop(inner);

        {
            let mut callback = task.callback.lock().expect("task callback lock poisoned");
            run_guarded(&mut *callback);
        }

        let mut inner = shared.inner.lock().expect("scheduler lock poisoned");
        inner.schedule(Task {
            due: task.due + task.interval,
            id: task.id,
            interval: task.interval,
            callback: task.callback,
        });
    }
}

/// Cancels one scheduled task. Cancellation is idempotent and best-effort:
/// a task already claimed by a worker is skipped immediately before its
/// next invocation rather than interrupted.
pub struct CancelHandle {
    shared: Arc<Shared>,
    id: u64,
    called: AtomicBool,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if self.called.swap(true, AtomicOrdering::SeqCst) {
            return;
        }

        let mut inner = self.shared.inner.lock().expect("scheduler lock poisoned");

        // The task is either still on the heap, or claimed by exactly one
        // worker awaiting execution.
        let tasks: Vec<Task> = inner.heap.drain().collect();
        let mut found = false;
        for task in tasks {
            if task.id == self.id {
                found = true;
            } else {
                inner.heap.push(task);
            }
        }

        if !found {
            inner.cancelled.insert(self.id);
        }
    }
}
