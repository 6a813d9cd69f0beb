//! A timed event queue with a single dispatch thread, and a polling media
//! source built on top of it.
//!
//! Events are posted with a target time and fired, one at a time and in
//! time order, on the queue's dispatch thread. Firing happens without the
//! queue lock held, so an event is free to post its own successor.

#![deny(missing_debug_implementations)]

use core::fmt;
use core::num::NonZeroU64;
use core::time::Duration;
use core::ops::Deref;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use cfg_if::cfg_if;
use tracing::{debug, error, trace};

cfg_if! {
    if #[cfg(feature="loom")] {
        #[path="../sys/loom.rs"]
        pub mod sys;
    } else {
        #[path="../sys/std.rs"]
        pub mod sys;
    }
}

mod util;
pub mod traits;
pub mod registry;
pub mod source;

use sys::*;
use util::*;

pub use sys::utick;
pub use sys::SysClock;
pub use traits::*;
pub use registry::Handle;
pub use registry::Registry;


// compile-time configuration, see build.rs
const MAX_TIMEOUT: utick = parse_const_utick(env!("TEQUEUE_MAX_TIMEOUT_US"));


/// Event queue errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The event is already waiting in a queue, an event can only be
    /// pending once at a time
    #[error("event is already pending as {0:?}")]
    AlreadyPending(Id),

    /// The dispatch thread could not be created
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// stop can't join the thread it's running on
    #[error("stop called from the dispatch thread")]
    StopFromDispatch,

    /// An event body panicked and took the dispatch thread with it
    #[error("dispatch thread panicked")]
    DispatchPanicked,
}


/// An id we can use to try to cancel an event
///
/// Ids are handed out in increasing order and never reused while an event
/// is pending. The "not pending" state has no id at all, see [`Event::id`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Id(NonZeroU64);

impl Id {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

impl From<Id> for u64 {
    fn from(id: Id) -> u64 {
        id.get()
    }
}


/// Where an entry sits in the pending list
///
/// The variant order is the list order, Stop jumps ahead of everything,
/// Front leaves room below it only for Stop, Back lands behind everything.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
enum Target {
    Stop,
    Front,
    At(utick),
    Back,
}


/// Event handle
///
/// A cheap, cloneable reference to some deferred work. The queue keeps its
/// own clone while the event is pending and lets go of it once the event
/// fires or is cancelled.
pub struct Event<K = ()> {
    inner: Arc<EventInner<K>>,
}

struct EventInner<K> {
    // 0 when not pending
    id: AtomicU64,
    tag: Option<K>,
    body: Box<dyn Fire<K>>,
}

impl<K: 'static> Event<K> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&QueueHandle<K>, utick) + Send + Sync + 'static
    {
        Self::from_fire(None, f)
    }

    /// Create an event tagged with some category, see
    /// [`QueueHandle::cancel_tagged`]
    pub fn tagged<F>(tag: K, f: F) -> Self
    where
        F: Fn(&QueueHandle<K>, utick) + Send + Sync + 'static
    {
        Self::from_fire(Some(tag), f)
    }

    pub fn from_fire<F: Fire<K> + 'static>(tag: Option<K>, f: F) -> Self {
        Self {
            inner: Arc::new(EventInner {
                id: AtomicU64::new(0),
                tag: tag,
                body: Box::new(f),
            }),
        }
    }
}

impl<K> Event<K> {
    /// The id of the currently pending occurrence, None if the event
    /// isn't pending
    pub fn id(&self) -> Option<Id> {
        NonZeroU64::new(self.inner.id.load(Ordering::SeqCst)).map(Id)
    }

    pub fn is_pending(&self) -> bool {
        self.id().is_some()
    }

    pub fn tag(&self) -> Option<&K> {
        self.inner.tag.as_ref()
    }

    /// Do these handles refer to the same event?
    pub fn ptr_eq(&self, other: &Event<K>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // only called with the queue lock held
    fn claim_id(&self, id: Id) -> Result<(), Id> {
        self.inner.id
            .compare_exchange(0, id.get(), Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|old| Id(NonZeroU64::new(old).unwrap_or(id.0)))
    }

    fn clear_id(&self) {
        self.inner.id.store(0, Ordering::SeqCst);
    }

    fn fire(&self, q: &QueueHandle<K>, now: utick) {
        self.inner.body.fire(q, now)
    }
}

impl<K> Clone for Event<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: fmt::Debug> fmt::Debug for Event<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id())
            .field("tag", &self.inner.tag)
            .finish()
    }
}


// Pending list internals
enum Entry<K> {
    Fire(Event<K>),
    Stop,
}

struct Pending<K> {
    id: Id,
    target: Target,
    entry: Entry<K>,
}

struct State<K> {
    pending: VecDeque<Pending<K>>,
    next_id: NonZeroU64,
    stopped: bool,
    dispatcher: Option<std::thread::ThreadId>,
}

struct Shared<K> {
    state: Mutex<State<K>>,
    // signaled on every insertion
    not_empty: Condvar,
    // signaled whenever what fires next may have changed
    head_changed: Condvar,
    running: AtomicBool,

    clock: Arc<dyn Clock>,
    max_timeout: utick,
}

impl<K> Shared<K> {
    // Central insert function, must hold the lock
    fn insert(
        &self,
        state: &mut State<K>,
        entry: Entry<K>,
        target: Target
    ) -> Result<Id, Error> {
        let id = Id(state.next_id);
        if let Entry::Fire(ref e) = entry {
            e.claim_id(id).map_err(Error::AlreadyPending)?;
        }
        state.next_id = state.next_id.saturating_add(1);

        // find the first entry strictly after us, this keeps equal targets
        // in FIFO order
        let pos = state.pending.partition_point(|p| p.target <= target);
        if pos == 0 {
            self.head_changed.notify_one();
        }

        state.pending.insert(pos, Pending {
            id: id,
            target: target,
            entry: entry,
        });

        self.not_empty.notify_one();
        Ok(id)
    }

    // Central remove function, must hold the lock
    fn remove_at(&self, state: &mut State<K>, pos: usize) -> Option<Pending<K>> {
        if pos == 0 {
            self.head_changed.notify_one();
        }

        let p = state.pending.remove(pos)?;
        if let Entry::Fire(ref e) = p.entry {
            e.clear_id();
        }
        Some(p)
    }

    fn post(&self, e: &Event<K>, target: Target) -> Result<Id, Error> {
        let mut state = lock(&self.state);
        let id = self.insert(&mut state, Entry::Fire(e.clone()), target)?;
        trace!(?id, ?target, "posted");
        Ok(id)
    }

    fn cancel_where<F>(&self, mut pred: F, stop_after_first: bool) -> usize
    where
        F: FnMut(Id, &Event<K>) -> bool
    {
        // removed events are dropped outside of the lock, an event's
        // captures may very well want to touch the queue
        let mut removed = Vec::new();
        {
            let mut state = lock(&self.state);
            let mut i = 0;
            while i < state.pending.len() {
                let p = &state.pending[i];
                let hit = match p.entry {
                    Entry::Fire(ref e) => pred(p.id, e),
                    Entry::Stop => false,
                };
                if !hit {
                    i += 1;
                    continue;
                }

                removed.extend(self.remove_at(&mut state, i));
                if stop_after_first {
                    break;
                }
            }
        }

        removed.len()
    }

    // Central dispatch function, runs on the dispatch thread until the
    // stop marker is claimed
    fn run(self: Arc<Self>) {
        debug!("dispatch thread enter");
        let q = QueueHandle { shared: self.clone() };
        let _guard = PanicGuard(&self);

        let mut state = lock(&self.state);
        state.dispatcher = thread_token();
        loop {
            if state.stopped {
                break;
            }

            while state.pending.is_empty() {
                state = wait(&self.not_empty, state);
            }

            // wait until the head is ready, the head can change under us
            // while we wait, so always start over from the current head
            let mut now = self.clock.now();
            let mut ready = None;
            while let Some(head) = state.pending.front() {
                let id = head.id;
                now = self.clock.now();
                let delay = match head.target {
                    Target::At(when) => when.saturating_sub(now),
                    _ => 0,
                };

                if delay == 0 {
                    ready = Some(id);
                    break;
                }

                // we never block for more than max_timeout, instead we split
                // long waits into chunks and look at the head again
                let capped = delay > self.max_timeout;
                if capped {
                    debug!(delay, "delay exceeds max timeout");
                }

                let (guard, timed_out) = wait_timeout(
                    &self.head_changed,
                    state,
                    ticks_to_duration(delay.min(self.max_timeout))
                );
                state = guard;

                if !capped && timed_out {
                    now = self.clock.now();
                    ready = Some(id);
                    break;
                }
            }

            // the only event could have been cancelled while we waited
            let id = match ready {
                Some(id) => id,
                None => continue,
            };

            // claim the head, if it's not the event we waited on it was
            // cancelled and we need to start over
            let claimed = if state.pending.front().map(|head| head.id) == Some(id) {
                state.pending.pop_front()
            } else {
                debug!(?id, "event not found at head, already cancelled?");
                None
            };

            match claimed.map(|p| p.entry) {
                Some(Entry::Stop) => {
                    state.stopped = true;
                }
                Some(Entry::Fire(e)) => {
                    e.clear_id();
                    drop(state);

                    // dispatch!
                    e.fire(&q, now);
                    drop(e);

                    state = lock(&self.state);
                }
                None => {}
            }
        }

        drop(state);
        debug!("dispatch thread exit");
    }
}

// marks the queue stopped if an event body unwinds through the dispatch
// thread, nothing else will ever fire on this queue
struct PanicGuard<'a, K>(&'a Shared<K>);

impl<K> Drop for PanicGuard<'_, K> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("event body panicked, dispatch thread exiting");
            lock(&self.0.state).stopped = true;
        }
    }
}


/// Runtime queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    max_timeout: Duration,
    thread_name: String,
    clock: Option<Arc<dyn Clock>>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_timeout: ticks_to_duration(MAX_TIMEOUT),
            thread_name: "tequeue-dispatch".to_owned(),
            clock: None,
        }
    }
}

impl QueueConfig {
    /// Longest single wait of the dispatch thread, longer delays are
    /// waited out in chunks of this size
    pub fn max_timeout(mut self, max_timeout: Duration) -> Self {
        self.max_timeout = max_timeout;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }
}


/// A handle for posting to and cancelling from a queue
///
/// Handles are cheap to clone and can be used from any thread, including
/// from inside event bodies, which receive one when they fire.
pub struct QueueHandle<K = ()> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for QueueHandle<K> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<K> fmt::Debug for QueueHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("pending", &self.len())
            .field("running", &self.shared.running.load(Ordering::SeqCst))
            .finish()
    }
}

impl<K> QueueHandle<K> {
    pub fn now(&self) -> utick {
        self.shared.clock.now()
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        lock(&self.shared.state).pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Post an event ahead of every timed and back-posted event
    pub fn post(&self, e: &Event<K>) -> Result<Id, Error> {
        self.shared.post(e, Target::Front)
    }

    /// Post an event behind everything currently pending
    pub fn post_to_back(&self, e: &Event<K>) -> Result<Id, Error> {
        self.shared.post(e, Target::Back)
    }

    /// Post an event to fire after a delay
    pub fn post_in(&self, e: &Event<K>, delay: Duration) -> Result<Id, Error> {
        let when = self.now().saturating_add(duration_to_ticks(delay));
        self.shared.post(e, Target::At(when))
    }

    /// Post an event to fire at an absolute time, as seen by the queue's
    /// clock
    pub fn post_at(&self, e: &Event<K>, when: utick) -> Result<Id, Error> {
        self.shared.post(e, Target::At(when))
    }

    /// Cancel a pending event
    ///
    /// Returns true only if the event was still pending. An event that
    /// already fired, was already cancelled, or is firing right now can't
    /// be cancelled.
    pub fn cancel(&self, id: Id) -> bool {
        self.shared.cancel_where(|pid, _| pid == id, true) > 0
    }

    /// Cancel every pending event matching a predicate, or just the first
    ///
    /// The predicate runs with the queue lock held, so it must not touch
    /// the queue. Returns the number of events cancelled.
    pub fn cancel_events<F>(&self, mut pred: F, stop_after_first: bool) -> usize
    where
        F: FnMut(&Event<K>) -> bool
    {
        self.shared.cancel_where(|_, e| pred(e), stop_after_first)
    }
}

impl<K: PartialEq> QueueHandle<K> {
    /// Cancel every pending event with the given tag
    pub fn cancel_tagged(&self, tag: &K) -> usize {
        self.cancel_events(|e| e.tag() == Some(tag), false)
    }
}


/// Event queue struct
///
/// Owns the dispatch thread. Dropping the queue stops it immediately,
/// dropping anything still pending.
pub struct TimedEventQueue<K = ()> {
    handle: QueueHandle<K>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_name: String,
}

impl<K> fmt::Debug for TimedEventQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedEventQueue")
            .field("thread_name", &self.thread_name)
            .field("handle", &self.handle)
            .finish()
    }
}

impl TimedEventQueue {
    /// An untagged queue with the default configuration, tagged queues
    /// go through [`TimedEventQueue::with_config`] or `Default`
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }
}

impl<K> TimedEventQueue<K> {
    pub fn with_config(config: QueueConfig) -> Self {
        let clock = config.clock
            .unwrap_or_else(|| Arc::new(SysClock::new()));

        Self {
            handle: QueueHandle {
                shared: Arc::new(Shared {
                    state: Mutex::new(State {
                        pending: VecDeque::new(),
                        next_id: NonZeroU64::MIN,
                        stopped: false,
                        dispatcher: None,
                    }),
                    not_empty: Condvar::new(),
                    head_changed: Condvar::new(),
                    running: AtomicBool::new(false),
                    clock: clock,
                    // a zero timeout would just spin
                    max_timeout: duration_to_ticks(config.max_timeout).max(1),
                }),
            },
            thread: Mutex::new(None),
            thread_name: config.thread_name,
        }
    }

    pub fn handle(&self) -> QueueHandle<K> {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.shared.running.load(Ordering::SeqCst)
    }

    /// Stop the dispatch thread
    ///
    /// With `flush`, everything already pending fires first. Without it,
    /// the queue halts before firing anything else. Either way this blocks
    /// until the dispatch thread exits, and anything left pending is
    /// dropped without firing.
    pub fn stop(&self, flush: bool) -> Result<(), Error> {
        let shared = &self.handle.shared;

        // joining ourselves would never return
        let dispatcher = lock(&shared.state).dispatcher;
        if dispatcher.is_some() && dispatcher == thread_token() {
            return Err(Error::StopFromDispatch);
        }

        let mut thread = lock(&self.thread);
        let handle = match thread.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };

        {
            let mut state = lock(&shared.state);
            let target = if flush { Target::Back } else { Target::Stop };
            shared.insert(&mut state, Entry::Stop, target)?;
        }

        let joined = handle.join();

        let dropped = {
            let mut state = lock(&shared.state);
            state.dispatcher = None;
            state.pending.drain(..)
                .map(|p| {
                    if let Entry::Fire(ref e) = p.entry {
                        e.clear_id();
                    }
                    p
                })
                .collect::<Vec<_>>()
        };
        shared.running.store(false, Ordering::SeqCst);
        debug!(flush, dropped = dropped.len(), "queue stopped");
        drop(dropped);

        joined.map_err(|_| Error::DispatchPanicked)
    }
}

impl<K: Send + Sync + 'static> TimedEventQueue<K> {
    /// Start the dispatch thread, does nothing if already running
    pub fn start(&self) -> Result<(), Error> {
        let mut thread = lock(&self.thread);
        if thread.is_some() {
            return Ok(());
        }

        let shared = self.handle.shared.clone();
        lock(&shared.state).stopped = false;
        *thread = Some(spawn(self.thread_name.clone(), move || shared.run())?);
        self.handle.shared.running.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl<K> Default for TimedEventQueue<K> {
    fn default() -> Self {
        Self::with_config(QueueConfig::default())
    }
}

impl<K> Deref for TimedEventQueue<K> {
    type Target = QueueHandle<K>;
    fn deref(&self) -> &QueueHandle<K> {
        &self.handle
    }
}

impl<K> Drop for TimedEventQueue<K> {
    fn drop(&mut self) {
        if let Err(err) = self.stop(false) {
            error!(%err, "failed to stop queue");
        }
    }
}
