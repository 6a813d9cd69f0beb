
// sys/std.rs provides the clock, locking, and threading primitives on top of
// std, this is what everything but the loom model tests run on.
//

use core::time::Duration;

use std::io;
use std::sync::PoisonError;
use std::time::Instant;

use crate::traits::*;


// Time primitives, everything is measured in microseconds
#[allow(non_camel_case_types)] pub type utick = u64;


// Locking primitives
pub(crate) use std::sync::Mutex;
pub(crate) use std::sync::MutexGuard;
pub(crate) use std::sync::Condvar;
pub(crate) use std::sync::atomic::AtomicU64;
pub(crate) use std::sync::atomic::AtomicBool;
pub(crate) use std::thread::JoinHandle;

// none of our critical sections run user code, so a poisoned lock can
// only come from a panic we already report elsewhere, it's safe to keep
// going with the inner state
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[inline]
pub(crate) fn wait<'a, T>(
    cond: &Condvar,
    guard: MutexGuard<'a, T>
) -> MutexGuard<'a, T> {
    cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

/// Returns the guard and whether we actually timed out
#[inline]
pub(crate) fn wait_timeout<'a, T>(
    cond: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration
) -> (MutexGuard<'a, T>, bool) {
    let (guard, res) = cond
        .wait_timeout(guard, timeout)
        .unwrap_or_else(PoisonError::into_inner);
    (guard, res.timed_out())
}


// Threading primitives
pub(crate) fn spawn<F>(name: String, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static
{
    std::thread::Builder::new()
        .name(name)
        .spawn(f)
}

/// Some token identifying the current thread, if we can tell
pub(crate) fn thread_token() -> Option<std::thread::ThreadId> {
    Some(std::thread::current().id())
}


// Some way to get the time
#[derive(Debug, Clone, Copy)]
pub struct SysClock {
    instant: Instant,
}

impl SysClock {
    pub fn new() -> Self {
        Self {
            instant: Instant::now(),
        }
    }
}

impl Default for SysClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SysClock {
    fn now(&self) -> utick {
        utick::try_from(self.instant.elapsed().as_micros())
            .unwrap_or(utick::MAX)
    }
}
