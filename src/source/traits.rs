
use core::fmt;
use core::time::Duration;

use bytes::Bytes;

use super::Notice;
use super::SourceError;


//// data types ////

/// Identifies a track, usually its stream index in the container
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrackKind {
    Video,
    Audio,
    Other,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
}

impl VideoFormat {
    /// Equirectangular panoramas are twice as wide as they are tall, it's
    /// only a guess but a decent one
    pub fn is_panoramic(&self) -> bool {
        self.height != 0 && self.width == self.height * 2
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrackInfo {
    pub id: TrackId,
    pub kind: TrackKind,
    pub video: Option<VideoFormat>,
}

/// Whatever a demuxer found when opening a stream
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct StreamInfo {
    pub tracks: Vec<TrackInfo>,
    pub duration: Option<Duration>,
}

impl StreamInfo {
    /// The first track of a given kind, this is the track a source elects
    pub fn first_of(&self, kind: TrackKind) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    pub fn video_format(&self) -> Option<VideoFormat> {
        self.first_of(TrackKind::Video).and_then(|t| t.video)
    }
}

/// One unit of compressed data
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Packet {
    pub track: TrackId,
    pub pts_us: Option<i64>,
    pub data: Bytes,
}

/// Result of asking a demuxer for the next packet
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ReadOutcome {
    Packet(Packet),
    /// Nothing available right now, try again later
    Again,
    Eof,
}

/// A sink refused a packet, the packet is handed back
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SinkFull(pub Packet);


//// collaborator traits ////

/// Pull-based demuxer, only ever used from one thread at a time
pub trait Demuxer: Send {
    fn open(&mut self, uri: &str) -> Result<StreamInfo, SourceError>;
    fn read_packet(&mut self) -> Result<ReadOutcome, SourceError>;

    /// Blocking seek to a position in milliseconds
    fn seek(&mut self, target_ms: i64) -> Result<(), SourceError>;
}

/// Downstream consumer of packets, usually fanning out to per-track
/// decoders
///
/// Once a track's buffered state has been discarded after a clear, the
/// consumer reports it back with [`Source::on_track_cleared`], possibly from
/// another thread.
///
/// [`Source::on_track_cleared`]: super::Source::on_track_cleared
pub trait PacketSink: Send + Sync {
    fn accept(&self, packet: Packet) -> Result<(), SinkFull>;
    fn clear(&self);
}

/// Receives notices from a source
pub trait Listener: Send + Sync {
    fn notify(&self, notice: Notice);
}

impl<F> Listener for F
where
    F: Fn(Notice) + Send + Sync
{
    fn notify(&self, notice: Notice) {
        self(notice)
    }
}
