pub mod allocator;

use log::{error, warn};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Locks `mutex`, recovering the guard if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Joins `handle`, giving up after `timeout` so a wedged worker cannot hang
/// shutdown. Joining the current thread is skipped.
pub(crate) fn join_bounded(handle: JoinHandle<()>, name: &str, timeout: Duration) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("Thread[{name}] did not exit in time, detaching it");
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if handle.join().is_err() {
        error!("Thread[{name}] panicked");
    }
}
