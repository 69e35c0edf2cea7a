//! Periodic execution of plugin read callbacks.
//!
//! Two implementations with different cost models: [`SimpleScheduler`]
//! dedicates one thread to every task, [`IntervalScheduler`] multiplexes
//! tasks over a bounded pool ordered by a min-heap of due times.

use log::error;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

pub use self::interval::{CancelHandle, IntervalScheduler};
pub use self::simple::SimpleScheduler;

mod interval;
mod simple;

/// How long `stop` waits for task threads to quiesce before failing loudly.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Invokes a scheduled callback. A panicking callback must not take down
/// its scheduler thread; the panic is logged and the task keeps its normal
/// interval, with no backoff and no disabling.
pub(crate) fn run_guarded(callback: &mut dyn FnMut()) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
        error!("scheduled callback panicked; it stays on its normal interval");
    }
}
