//! The source's state machine, four phases that each decide what runs next.
//!
//! A phase never schedules anything itself. [`Machine::step`] runs one phase
//! and returns a [`Transition`] describing what to cancel, what to post and
//! what to report, and whoever drives the machine applies it. [`Source`]
//! drives it with a [`TimedEventQueue`], but any single-threaded runner
//! will do.
//!
//! [`Source`]: super::Source
//! [`TimedEventQueue`]: crate::TimedEventQueue

use core::fmt;
use core::time::Duration;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, info, trace, warn};

use super::*;


/// Phases of a source
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Phase {
    /// Parked while the consumer asked us to hold off
    Wait,
    /// Move one packet from the demuxer to the sink
    Work,
    /// Run a seek the readiness barrier released
    Seek,
    /// Final phase, does nothing and schedules nothing
    Exit,
}

/// What to do after a phase ran, applied in field order
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Transition {
    /// Withdraw a pending phase
    pub cancel: Option<Phase>,
    /// Schedule a phase, a zero delay means as soon as possible
    pub next: Option<(Phase, Duration)>,
    /// Report something to the listener
    pub notice: Option<Notice>,
}

impl Transition {
    /// Nothing further, the cycle ends here
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn then(phase: Phase) -> Self {
        Self::after(phase, Duration::ZERO)
    }

    pub fn after(phase: Phase, delay: Duration) -> Self {
        Self {
            next: Some((phase, delay)),
            ..Self::default()
        }
    }

    pub fn cancelling(mut self, phase: Phase) -> Self {
        self.cancel = Some(phase);
        self
    }

    pub fn notifying(mut self, notice: Notice) -> Self {
        self.notice = Some(notice);
        self
    }
}


enum Pull {
    Delivered,
    Again,
    Eof,
}

/// Source state shared between the driving runner and outside callers
pub struct Machine {
    demuxer: Mutex<Box<dyn Demuxer>>,
    sink: Arc<dyn PacketSink>,
    // a packet the sink refused, offered again before reading anything new
    stash: Mutex<Option<Packet>>,
    waiting: AtomicBool,
    halted: AtomicBool,
    barrier: ReadinessBarrier,
    config: SourceConfig,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("stashed", &lock(&self.stash).is_some())
            .field("waiting", &self.waiting.load(Ordering::SeqCst))
            .field("halted", &self.halted.load(Ordering::SeqCst))
            .field("barrier", &self.barrier)
            .finish()
    }
}

impl Machine {
    pub fn new(
        demuxer: Box<dyn Demuxer>,
        sink: Arc<dyn PacketSink>,
        config: SourceConfig
    ) -> Self {
        Self {
            demuxer: Mutex::new(demuxer),
            sink: sink,
            stash: Mutex::new(None),
            waiting: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            barrier: ReadinessBarrier::new(),
            config: config,
        }
    }

    /// Open a stream, electing the first video and first audio track
    ///
    /// Returns the stream info along with the elected tracks.
    pub fn open(
        &self,
        uri: &str
    ) -> Result<(StreamInfo, Option<TrackId>, Option<TrackId>), SourceError> {
        let info = lock(&self.demuxer).open(uri)?;
        let video = info.first_of(TrackKind::Video).map(|t| t.id);
        let audio = info.first_of(TrackKind::Audio).map(|t| t.id);

        lock(&self.stash).take();
        self.barrier.reset(video.into_iter().chain(audio));
        self.halted.store(false, Ordering::SeqCst);
        info!(uri, ?video, ?audio, duration = ?info.duration, "opened");
        Ok((info, video, audio))
    }

    pub fn barrier(&self) -> &ReadinessBarrier {
        &self.barrier
    }

    pub fn set_waiting(&self, waiting: bool) {
        self.waiting.store(waiting, Ordering::SeqCst);
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Stop the wait/work cycle from re-arming itself, reopening undoes
    /// this
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Run one phase
    pub fn step(&self, phase: Phase) -> Transition {
        trace!(?phase, "step");
        match phase {
            Phase::Wait => self.on_wait(),
            Phase::Work => self.on_work(),
            Phase::Seek => self.on_seek(),
            Phase::Exit => self.on_exit(),
        }
    }

    fn on_wait(&self) -> Transition {
        if self.is_halted() {
            return Transition::idle();
        }

        if self.is_waiting() {
            Transition::after(Phase::Wait, self.config.wait_interval)
        } else {
            Transition::then(Phase::Work)
        }
    }

    fn on_work(&self) -> Transition {
        if self.is_halted() {
            return Transition::idle();
        }

        match self.pull() {
            Ok(Pull::Delivered) => Transition::then(Phase::Work),
            Ok(Pull::Again) => {
                Transition::after(Phase::Work, self.config.retry_interval)
            }
            Ok(Pull::Eof) => {
                info!("end of stream");
                Transition::idle().notifying(Notice::EndOfStream)
            }
            Err(err) => {
                warn!(%err, "read failed");
                Transition::idle().notifying(Notice::ReadError(err.to_string()))
            }
        }
    }

    fn pull(&self) -> Result<Pull, SourceError> {
        let mut stash = lock(&self.stash);
        let packet = match stash.take() {
            Some(packet) => packet,
            None => match lock(&self.demuxer).read_packet()? {
                ReadOutcome::Packet(packet) => packet,
                ReadOutcome::Again => return Ok(Pull::Again),
                ReadOutcome::Eof => return Ok(Pull::Eof),
            },
        };

        match self.sink.accept(packet) {
            Ok(()) => Ok(Pull::Delivered),
            Err(SinkFull(packet)) => {
                trace!(track = %packet.track, "sink full");
                *stash = Some(packet);
                Ok(Pull::Again)
            }
        }
    }

    fn on_seek(&self) -> Transition {
        // WORK only ever runs on the runner's thread, so withdrawing it
        // after the seek leaves no window for a stale read
        let target_ms = match self.barrier.begin() {
            Some(target_ms) => target_ms,
            None => {
                debug!("seek phase without a released seek");
                return Transition::idle();
            }
        };

        let res = lock(&self.demuxer).seek(target_ms);
        // a request that came in meanwhile runs before reading resumes
        let next = if self.barrier.finish() {
            Phase::Seek
        } else {
            Phase::Work
        };

        match res {
            Ok(()) => {
                // whatever was read so far belongs to the old position,
                // stashed or already handed over
                lock(&self.stash).take();
                self.sink.clear();
                info!(target_ms, "seek complete");
                Transition::then(next)
                    .cancelling(Phase::Work)
                    .notifying(Notice::SeekComplete { target_ms })
            }
            Err(err) => {
                warn!(%err, target_ms, "seek failed");
                Transition::then(next)
                    .cancelling(Phase::Work)
                    .notifying(Notice::SeekFailed { target_ms })
            }
        }
    }

    fn on_exit(&self) -> Transition {
        debug!("source exit");
        Transition::idle()
    }
}
