
use core::fmt::Debug;

use crate::sys::*;
use crate::QueueHandle;


//// fire traits ////

/// Fire trait, the body of an event
///
/// Called on the dispatch thread with a handle to the owning queue and the
/// time the event actually fired. The queue lock is _not_ held, so a body is
/// free to post or cancel events, including on its own queue.
pub trait Fire<K>: Send + Sync {
    fn fire(&self, q: &QueueHandle<K>, now: utick);
}

impl<K, F> Fire<K> for F
where
    F: Fn(&QueueHandle<K>, utick) + Send + Sync
{
    fn fire(&self, q: &QueueHandle<K>, now: utick) {
        self(q, now)
    }
}


//// System level traits ////

/// Some way to get the time, in microseconds, for some definition of time
///
/// This should be monotonic, the queue only ever compares times it read
/// from the same clock.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> utick;
}
