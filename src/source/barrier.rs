//! Readiness barrier, joins one acknowledgement per elected track before a
//! seek is allowed to run.

use core::fmt;

use tracing::debug;

use crate::sys::*;

use super::TrackId;


struct BarrierState {
    seeking: bool,
    // set once the barrier let a seek through, until that seek finishes
    released: bool,
    target_ms: i64,
    // bumped by every request
    gen: u64,
    // request generation the running seek read its target at
    running: Option<u64>,
    // elected tracks and whether each acknowledged the current seek
    tracks: Vec<(TrackId, bool)>,
}

impl BarrierState {
    fn all_ready(&self) -> bool {
        self.tracks.iter().all(|&(_, ready)| ready)
    }

    fn release(&mut self) -> bool {
        if self.released || !self.all_ready() {
            return false;
        }

        self.released = true;
        true
    }
}

/// Readiness barrier
///
/// A seek request only records its target. Every elected track then has to
/// acknowledge that it dropped its buffered state, and only the
/// acknowledgement completing the set releases the barrier. Tracks that
/// aren't elected are ignored, so a missing track never holds things up.
pub struct ReadinessBarrier {
    inner: Mutex<BarrierState>,
}

impl fmt::Debug for ReadinessBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("ReadinessBarrier")
            .field("seeking", &inner.seeking)
            .field("released", &inner.released)
            .field("target_ms", &inner.target_ms)
            .field("gen", &inner.gen)
            .field("running", &inner.running)
            .field("tracks", &inner.tracks)
            .finish()
    }
}

impl Default for ReadinessBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessBarrier {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BarrierState {
                seeking: false,
                released: false,
                target_ms: 0,
                gen: 0,
                running: None,
                tracks: Vec::new(),
            }),
        }
    }

    /// Start over with a new set of elected tracks, dropping any seek in
    /// progress
    pub fn reset<I>(&self, tracks: I)
    where
        I: IntoIterator<Item=TrackId>
    {
        let mut inner = lock(&self.inner);
        inner.seeking = false;
        inner.released = false;
        inner.running = None;
        inner.tracks = tracks.into_iter().map(|t| (t, false)).collect();
        inner.tracks.dedup();
    }

    /// Record a seek request
    ///
    /// A newer request replaces the target of an older one. Once the
    /// barrier released, a newer request needs a fresh acknowledgement from
    /// every track, the tracks cleared once more for it. Returns true if
    /// this request released the barrier by itself, which only happens
    /// when there are no elected tracks to wait on.
    pub fn request(&self, target_ms: i64) -> bool {
        let mut inner = lock(&self.inner);
        inner.seeking = true;
        inner.target_ms = target_ms;
        inner.gen += 1;
        if inner.released {
            for (_, ready) in inner.tracks.iter_mut() {
                *ready = false;
            }
        }
        inner.release()
    }

    /// A track finished clearing, returns true for exactly the one
    /// acknowledgement that releases the barrier
    pub fn acknowledge(&self, track: TrackId) -> bool {
        let mut inner = lock(&self.inner);
        debug!(seeking = inner.seeking, %track, "track cleared");
        if !inner.seeking {
            return false;
        }

        match inner.tracks.iter_mut().find(|(t, _)| *t == track) {
            Some((_, ready)) => *ready = true,
            None => return false,
        }

        inner.release()
    }

    /// Target of the current seek, if there is one
    pub fn target(&self) -> Option<i64> {
        let inner = lock(&self.inner);
        if inner.seeking {
            Some(inner.target_ms)
        } else {
            None
        }
    }

    /// Claim the target of a released seek, right before running it
    ///
    /// Returns None if nothing was released, or if a newer request came in
    /// after the release and is still waiting on acknowledgements. The
    /// barrier then releases again once those arrive.
    pub fn begin(&self) -> Option<i64> {
        let mut inner = lock(&self.inner);
        if !inner.seeking || !inner.released {
            return None;
        }
        if !inner.all_ready() {
            inner.released = false;
            return None;
        }

        inner.running = Some(inner.gen);
        Some(inner.target_ms)
    }

    /// The claimed seek ran, successfully or not
    ///
    /// If nothing was requested since [`ReadinessBarrier::begin`], the
    /// session ends and everything is cleared for the next one. Otherwise
    /// the newer request stays armed, and this returns true if its
    /// acknowledgements are already in and it needs to run right away.
    pub fn finish(&self) -> bool {
        let mut inner = lock(&self.inner);
        inner.released = false;
        if inner.running.take() != Some(inner.gen) {
            debug!(target_ms = inner.target_ms, "seek requested during seek");
            return inner.release();
        }

        inner.seeking = false;
        for (_, ready) in inner.tracks.iter_mut() {
            *ready = false;
        }
        false
    }

    pub fn is_seeking(&self) -> bool {
        lock(&self.inner).seeking
    }

    pub fn is_released(&self) -> bool {
        lock(&self.inner).released
    }
}
