//! A polling media source driven by a [`TimedEventQueue`].
//!
//! The source cycles through a handful of phases on its own queue, pulling
//! packets from a [`Demuxer`] and pushing them into a [`PacketSink`]. Seeks
//! go through a [`ReadinessBarrier`] so they only run once every elected
//! track has dropped its buffered state.
//!
//! ``` no_run
//! # use std::sync::Arc;
//! # use tequeue::source::*;
//! # fn demo(demuxer: impl Demuxer + 'static, sink: Arc<dyn PacketSink>) -> Result<(), SourceError> {
//! let source = Source::new(demuxer, sink, SourceConfig::default());
//! source.set_listener(Arc::new(|notice: Notice| println!("{:?}", notice)));
//! source.open("file:///movie.mkv")?;
//! source.start()?;
//! # Ok(())
//! # }
//! ```

use core::fmt;
use core::time::Duration;

use std::sync::Arc;
use std::sync::Weak;

use tracing::{debug, warn};

use crate::*;
use crate::sys::*;
use crate::util::*;

mod barrier;
mod machine;
mod traits;

pub use barrier::ReadinessBarrier;
pub use machine::Machine;
pub use machine::Phase;
pub use machine::Transition;
pub use traits::*;


// compile-time configuration, see build.rs
const RETRY_INTERVAL: utick = parse_const_utick(env!("TEQUEUE_RETRY_INTERVAL_MS"));


/// Source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open {uri}: {reason}")]
    Open { uri: String, reason: String },

    #[error("read failed: {0}")]
    Read(String),

    #[error("seek to {target_ms}ms failed: {reason}")]
    Seek { target_ms: i64, reason: String },

    /// The source needs to be opened first
    #[error("source is not open")]
    NotOpen,

    #[error(transparent)]
    Queue(#[from] Error),
}

/// What a source reports to its listener
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Notice {
    SeekComplete { target_ms: i64 },
    SeekFailed { target_ms: i64 },
    EndOfStream,
    ReadError(String),
}

/// What a source accepts from its consumers
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Inbound {
    /// A track dropped its buffered state after a clear
    TrackCleared(TrackId),
}


/// Source configuration
#[derive(Debug, Clone)]
pub struct SourceConfig {
    wait_interval: Duration,
    retry_interval: Duration,
    queue: QueueConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            wait_interval: Duration::from_millis(RETRY_INTERVAL),
            retry_interval: Duration::from_millis(RETRY_INTERVAL),
            queue: QueueConfig::default().thread_name("tequeue-source"),
        }
    }
}

impl SourceConfig {
    /// How long to park between checks while waiting
    pub fn wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval = interval;
        self
    }

    /// How long to back off when the demuxer has nothing or the sink is
    /// full
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }
}


// one reusable event per phase, each can only be pending once
struct Phases {
    wait: Event<Phase>,
    work: Event<Phase>,
    seek: Event<Phase>,
    exit: Event<Phase>,
}

impl Phases {
    fn new(core: &Weak<Core>) -> Self {
        Self {
            wait: Self::event(core, Phase::Wait),
            work: Self::event(core, Phase::Work),
            seek: Self::event(core, Phase::Seek),
            exit: Self::event(core, Phase::Exit),
        }
    }

    fn event(core: &Weak<Core>, phase: Phase) -> Event<Phase> {
        // events only hold a weak reference, the core owns the events
        let core = core.clone();
        Event::tagged(phase, move |q, _| {
            if let Some(core) = core.upgrade() {
                core.run(q, phase);
            }
        })
    }

    fn get(&self, phase: Phase) -> &Event<Phase> {
        match phase {
            Phase::Wait => &self.wait,
            Phase::Work => &self.work,
            Phase::Seek => &self.seek,
            Phase::Exit => &self.exit,
        }
    }
}

struct Opened {
    info: StreamInfo,
    video: Option<TrackId>,
    audio: Option<TrackId>,
}

struct Core {
    machine: Machine,
    phases: Phases,
    listener: Mutex<Option<Arc<dyn Listener>>>,
    opened: Mutex<Option<Opened>>,
}

impl Core {
    fn run(&self, q: &QueueHandle<Phase>, phase: Phase) {
        let t = self.machine.step(phase);
        self.apply(q, t);
    }

    fn apply(&self, q: &QueueHandle<Phase>, t: Transition) {
        if let Some(phase) = t.cancel {
            q.cancel_tagged(&phase);
        }

        if let Some((phase, delay)) = t.next {
            let e = self.phases.get(phase);
            let res = if delay.is_zero() {
                q.post(e)
            } else {
                q.post_in(e, delay)
            };
            if let Err(err) = res {
                debug!(%err, ?phase, "phase not posted");
            }
        }

        if let Some(notice) = t.notice {
            self.notify(notice);
        }
    }

    fn notify(&self, notice: Notice) {
        // don't call out with the lock held
        let listener = lock(&self.listener).clone();
        match listener {
            Some(listener) => listener.notify(notice),
            None => debug!(?notice, "no listener"),
        }
    }
}


/// Media source
///
/// Owns its own queue. Dropping the source stops the queue immediately.
pub struct Source {
    // dropped first, so nothing fires while the core goes away
    queue: TimedEventQueue<Phase>,
    core: Arc<Core>,
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("queue", &self.queue)
            .field("machine", &self.core.machine)
            .finish()
    }
}

impl Source {
    pub fn new<D>(demuxer: D, sink: Arc<dyn PacketSink>, config: SourceConfig) -> Self
    where
        D: Demuxer + 'static
    {
        let queue = TimedEventQueue::with_config(config.queue.clone());
        let core = Arc::new_cyclic(|weak| Core {
            machine: Machine::new(Box::new(demuxer), sink, config),
            phases: Phases::new(weak),
            listener: Mutex::new(None),
            opened: Mutex::new(None),
        });

        Self {
            queue: queue,
            core: core,
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn Listener>) {
        *lock(&self.core.listener) = Some(listener);
    }

    /// Open a stream and start the source's queue
    ///
    /// Opening again replaces the previous stream, the queue is stopped
    /// first and anything pending is dropped.
    pub fn open(&self, uri: &str) -> Result<StreamInfo, SourceError> {
        if self.queue.is_running() {
            self.core.machine.halt();
            self.queue.stop(false)?;
        }

        let (info, video, audio) = self.core.machine.open(uri)?;
        *lock(&self.core.opened) = Some(Opened {
            info: info.clone(),
            video: video,
            audio: audio,
        });

        self.queue.start()?;
        Ok(info)
    }

    /// Kick off the wait/work cycle
    pub fn start(&self) -> Result<(), SourceError> {
        if lock(&self.core.opened).is_none() || !self.queue.is_running() {
            return Err(SourceError::NotOpen);
        }

        let phases = &self.core.phases;
        if phases.wait.is_pending() || phases.work.is_pending() {
            debug!("source already started");
            return Ok(());
        }

        self.queue.post(&phases.wait)?;
        Ok(())
    }

    /// Stop the source
    ///
    /// The wait/work cycle stops re-arming itself either way. With `flush`,
    /// a pending seek still runs and the exit phase fires last, without it
    /// everything pending is dropped.
    pub fn stop(&self, flush: bool) -> Result<(), SourceError> {
        self.core.machine.halt();
        if flush && self.queue.is_running() {
            if let Err(err) = self.queue.post_to_back(&self.core.phases.exit) {
                debug!(%err, "exit not posted");
            }
        }

        self.queue.stop(flush)?;
        Ok(())
    }

    /// Request a seek
    ///
    /// This only records the target. The seek itself runs once every
    /// elected track reported back through [`Source::on_track_cleared`].
    /// Clearing the tracks is up to the caller.
    pub fn seek_to(&self, target_ms: i64) {
        debug!(target_ms, "seek requested");
        if self.core.machine.barrier().request(target_ms) {
            self.post_seek();
        }
    }

    /// A track finished clearing, may be called from any thread
    pub fn on_track_cleared(&self, track: TrackId) {
        if self.core.machine.barrier().acknowledge(track) {
            self.post_seek();
        }
    }

    pub fn on_notify(&self, msg: Inbound) {
        match msg {
            Inbound::TrackCleared(track) => self.on_track_cleared(track),
        }
    }

    fn post_seek(&self) {
        if let Err(err) = self.queue.post(&self.core.phases.seek) {
            warn!(%err, "seek not posted");
        }
    }

    /// Ask the source to hold off reading, or to resume
    pub fn set_waiting(&self, waiting: bool) {
        self.core.machine.set_waiting(waiting);
    }

    pub fn is_seeking(&self) -> bool {
        self.core.machine.barrier().is_seeking()
    }

    pub fn is_running(&self) -> bool {
        self.queue.is_running()
    }

    pub fn info(&self) -> Option<StreamInfo> {
        lock(&self.core.opened).as_ref().map(|o| o.info.clone())
    }

    pub fn video_track(&self) -> Option<TrackId> {
        lock(&self.core.opened).as_ref().and_then(|o| o.video)
    }

    pub fn audio_track(&self) -> Option<TrackId> {
        lock(&self.core.opened).as_ref().and_then(|o| o.audio)
    }

    pub fn has_video(&self) -> bool {
        self.video_track().is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio_track().is_some()
    }

    pub fn is_panoramic(&self) -> bool {
        self.info()
            .and_then(|info| info.video_format())
            .map_or(false, |format| format.is_panoramic())
    }
}
