
// sys/loom.rs swaps in loom's model-checked primitives, this is only
// useful for running the loom tests, loom types panic outside of a
// loom::model
//

use core::time::Duration;

use std::io;
use std::sync::PoisonError;
use std::time::Instant;

use crate::traits::*;


// Time primitives, everything is measured in microseconds
#[allow(non_camel_case_types)] pub type utick = u64;


// Locking primitives
pub(crate) use loom::sync::Mutex;
pub(crate) use loom::sync::MutexGuard;
pub(crate) use loom::sync::Condvar;
pub(crate) use loom::sync::atomic::AtomicU64;
pub(crate) use loom::sync::atomic::AtomicBool;
pub(crate) use loom::thread::JoinHandle;

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
///
/// Note loom has no notion of time, so this never reports a timeout, the
/// models must only rely on notifications
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
pub(crate) fn spawn<F>(_name: String, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static
{
    Ok(loom::thread::spawn(f))
}

/// loom threads all share one OS thread, so we can't tell them apart
pub(crate) fn thread_token() -> Option<std::thread::ThreadId> {
    None
}


// Some way to get the time, loom doesn't model time so we just use the
// real clock
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
