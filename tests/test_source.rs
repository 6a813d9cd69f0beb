
use tequeue::source::*;

use bytes::Bytes;
use tracing_subscriber::EnvFilter;

use std::sync::Arc;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

const VIDEO: TrackId = TrackId(0);
const AUDIO: TrackId = TrackId(1);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// each packet covers 10ms, alternating between video and audio
#[derive(Debug, Default)]
struct Script {
    pos: u32,
    end: u32,
    // Again's to hand out before the next packet
    agains: u32,
    seeks: Vec<i64>,
    fail_seeks: bool,
    // park reads once we hit this position
    hold_at: Option<u32>,
    // the next seek reports in, then waits for the go ahead
    gate: Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>,
}

#[derive(Clone)]
struct Fake(Arc<Mutex<Script>>);

impl Fake {
    fn new(end: u32) -> Self {
        Fake(Arc::new(Mutex::new(Script { end, ..Script::default() })))
    }
}

impl Demuxer for Fake {
    fn open(&mut self, _uri: &str) -> Result<StreamInfo, SourceError> {
        Ok(StreamInfo {
            tracks: vec![
                TrackInfo {
                    id: VIDEO,
                    kind: TrackKind::Video,
                    video: Some(VideoFormat { width: 1920, height: 1080 }),
                },
                TrackInfo { id: AUDIO, kind: TrackKind::Audio, video: None },
            ],
            duration: Some(Duration::from_millis(u64::from(self.0.lock().unwrap().end) * 10)),
        })
    }

    fn read_packet(&mut self) -> Result<ReadOutcome, SourceError> {
        let mut s = self.0.lock().unwrap();
        if s.agains > 0 {
            s.agains -= 1;
            return Ok(ReadOutcome::Again);
        }
        if s.hold_at == Some(s.pos) {
            return Ok(ReadOutcome::Again);
        }
        if s.pos >= s.end {
            return Ok(ReadOutcome::Eof);
        }

        let pos = s.pos;
        s.pos += 1;
        Ok(ReadOutcome::Packet(Packet {
            track: if pos % 2 == 0 { VIDEO } else { AUDIO },
            pts_us: Some(i64::from(pos) * 10_000),
            data: Bytes::from(pos.to_le_bytes().to_vec()),
        }))
    }

    fn seek(&mut self, target_ms: i64) -> Result<(), SourceError> {
        let gate = self.0.lock().unwrap().gate.take();
        if let Some((entered, go)) = gate {
            entered.send(()).unwrap();
            go.recv().unwrap();
        }

        let mut s = self.0.lock().unwrap();
        s.seeks.push(target_ms);
        if s.fail_seeks {
            return Err(SourceError::Seek {
                target_ms,
                reason: "not seekable".into(),
            });
        }
        s.pos = (target_ms / 10) as u32;
        Ok(())
    }
}

// sink with a bounded buffer that the test drains by hand
struct Sink {
    capacity: usize,
    buffered: Mutex<Vec<Packet>>,
    clears: Mutex<u32>,
}

impl Sink {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Sink {
            capacity,
            buffered: Mutex::new(vec![]),
            clears: Mutex::new(0),
        })
    }

    fn take(&self) -> Vec<Packet> {
        std::mem::take(&mut *self.buffered.lock().unwrap())
    }

    fn positions(packets: &[Packet]) -> Vec<u32> {
        packets.iter()
            .map(|p| u32::from_le_bytes(p.data[..].try_into().unwrap()))
            .collect()
    }
}

impl PacketSink for Sink {
    fn accept(&self, packet: Packet) -> Result<(), SinkFull> {
        let mut buffered = self.buffered.lock().unwrap();
        if buffered.len() >= self.capacity {
            return Err(SinkFull(packet));
        }
        buffered.push(packet);
        Ok(())
    }

    fn clear(&self) {
        self.buffered.lock().unwrap().clear();
        *self.clears.lock().unwrap() += 1;
    }
}

fn source(
    demuxer: Fake,
    sink: Arc<Sink>
) -> (Arc<Source>, mpsc::Receiver<Notice>) {
    init_tracing();
    let config = SourceConfig::default()
        .wait_interval(Duration::from_millis(10))
        .retry_interval(Duration::from_millis(10));
    let s = Source::new(demuxer, sink, config);

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    s.set_listener(Arc::new(move |notice: Notice| {
        tx.lock().unwrap().send(notice).unwrap();
    }));
    (Arc::new(s), rx)
}

fn next(rx: &mpsc::Receiver<Notice>) -> Notice {
    rx.recv_timeout(Duration::from_secs(5)).unwrap()
}

#[test]
fn test_source_open() {
    let (s, _) = source(Fake::new(10), Sink::new(100));

    let info = s.open("test://video").unwrap();
    assert_eq!(info.duration, Some(Duration::from_millis(100)));
    assert_eq!(s.video_track(), Some(VIDEO));
    assert_eq!(s.audio_track(), Some(AUDIO));
    assert!(s.has_video() && s.has_audio());
    assert!(!s.is_panoramic());
    assert!(s.is_running());
    s.stop(false).unwrap();
}

#[test]
fn test_source_reads_to_eof() {
    let sink = Sink::new(1000);
    let (s, rx) = source(Fake::new(100), sink.clone());
    s.open("test://video").unwrap();
    s.start().unwrap();

    assert_eq!(next(&rx), Notice::EndOfStream);
    assert_eq!(Sink::positions(&sink.take()), (0..100).collect::<Vec<_>>());
    s.stop(true).unwrap();
}

#[test]
fn test_source_backs_off() {
    let demuxer = Fake::new(1);
    demuxer.0.lock().unwrap().agains = 5;
    let sink = Sink::new(1000);
    let (s, rx) = source(demuxer, sink.clone());
    s.open("test://video").unwrap();

    let start = Instant::now();
    s.start().unwrap();
    assert_eq!(next(&rx), Notice::EndOfStream);

    // five retries at 10ms each, rather than a hot loop
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(sink.take().len(), 1);
    s.stop(false).unwrap();
}

#[test]
fn test_source_waiting() {
    let sink = Sink::new(1000);
    let (s, rx) = source(Fake::new(10), sink.clone());
    s.open("test://video").unwrap();

    s.set_waiting(true);
    s.start().unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(sink.take().is_empty());

    s.set_waiting(false);
    assert_eq!(next(&rx), Notice::EndOfStream);
    assert_eq!(sink.take().len(), 10);
    s.stop(false).unwrap();
}

#[test]
fn test_source_full_sink_redelivers() {
    let sink = Sink::new(3);
    let (s, rx) = source(Fake::new(20), sink.clone());
    s.open("test://video").unwrap();
    s.start().unwrap();

    // drain by hand, nothing may be lost or duplicated
    let mut got = vec![];
    let deadline = Instant::now() + Duration::from_secs(5);
    while got.len() < 20 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
        got.extend(sink.take());
    }

    assert_eq!(Sink::positions(&got), (0..20).collect::<Vec<_>>());
    assert_eq!(next(&rx), Notice::EndOfStream);
    s.stop(false).unwrap();
}

#[test]
fn test_source_seek() {
    // reads stall at 10, but not at the seek target
    let demuxer = Fake::new(510);
    demuxer.0.lock().unwrap().hold_at = Some(10);
    let sink = Sink::new(1000);
    let (s, rx) = source(demuxer.clone(), sink.clone());
    s.open("test://video").unwrap();
    s.start().unwrap();

    thread::sleep(Duration::from_millis(50));
    s.seek_to(5000);
    assert!(s.is_seeking());

    // tracks report back from their own threads, in no particular order
    sink.clear();
    let mut threads = vec![];
    for (track, delay) in [(AUDIO, 10), (VIDEO, 30)] {
        let s = s.clone();
        threads.push(thread::spawn(move || {
            thread::sleep(Duration::from_millis(delay));
            s.on_track_cleared(track);
        }));
    }

    // nothing happens until both tracks are clear
    thread::sleep(Duration::from_millis(5));
    assert!(demuxer.0.lock().unwrap().seeks.is_empty());

    for thread in threads.into_iter() {
        thread.join().unwrap();
    }
    assert_eq!(next(&rx), Notice::SeekComplete { target_ms: 5000 });
    assert!(!s.is_seeking());
    assert_eq!(demuxer.0.lock().unwrap().seeks, vec![5000]);

    // reading picks up at the new position
    assert_eq!(next(&rx), Notice::EndOfStream);
    assert_eq!(Sink::positions(&sink.take()), (500..510).collect::<Vec<_>>());
    // once by us, once by the seek
    assert_eq!(*sink.clears.lock().unwrap(), 2);
    s.stop(false).unwrap();
}

#[test]
fn test_source_seek_drops_stale_packets() {
    // reading goes on while the tracks clear
    let demuxer = Fake::new(u32::MAX);
    let sink = Sink::new(1000);
    let (s, rx) = source(demuxer.clone(), sink.clone());
    s.open("test://video").unwrap();
    s.start().unwrap();

    s.seek_to(5_000_000);
    sink.clear();
    thread::sleep(Duration::from_millis(20));
    s.on_track_cleared(VIDEO);
    s.on_track_cleared(AUDIO);
    assert_eq!(next(&rx), Notice::SeekComplete { target_ms: 5_000_000 });

    // only packets from the new position are left
    let positions = Sink::positions(&sink.take());
    assert!(positions.iter().all(|&pos| pos >= 500_000));
    s.stop(false).unwrap();
}

#[test]
fn test_source_seek_during_seek() {
    let demuxer = Fake::new(1000);
    let (entered_tx, entered_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel();
    {
        let mut script = demuxer.0.lock().unwrap();
        script.hold_at = Some(10);
        script.gate = Some((entered_tx, go_rx));
    }
    let (s, rx) = source(demuxer.clone(), Sink::new(1000));
    s.open("test://video").unwrap();
    s.start().unwrap();

    s.seek_to(100);
    s.on_track_cleared(VIDEO);
    s.on_track_cleared(AUDIO);
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // the first seek is underway, ask and clear for another
    s.seek_to(200);
    s.on_track_cleared(AUDIO);
    s.on_track_cleared(VIDEO);
    go_tx.send(()).unwrap();

    assert_eq!(next(&rx), Notice::SeekComplete { target_ms: 100 });
    assert_eq!(next(&rx), Notice::SeekComplete { target_ms: 200 });
    assert!(!s.is_seeking());
    assert_eq!(demuxer.0.lock().unwrap().seeks, vec![100, 200]);
    s.stop(false).unwrap();
}

#[test]
fn test_source_seek_during_seek_waits_for_tracks() {
    // reads park right after the first seek
    let demuxer = Fake::new(1000);
    let (entered_tx, entered_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel();
    {
        let mut script = demuxer.0.lock().unwrap();
        script.hold_at = Some(10);
        script.gate = Some((entered_tx, go_rx));
    }
    let (s, rx) = source(demuxer.clone(), Sink::new(1000));
    s.open("test://video").unwrap();
    s.start().unwrap();

    s.seek_to(100);
    s.on_track_cleared(VIDEO);
    s.on_track_cleared(AUDIO);
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    s.seek_to(200);
    s.on_track_cleared(VIDEO);
    go_tx.send(()).unwrap();

    assert_eq!(next(&rx), Notice::SeekComplete { target_ms: 100 });
    assert!(s.is_seeking());
    thread::sleep(Duration::from_millis(20));
    assert_eq!(demuxer.0.lock().unwrap().seeks, vec![100]);

    // the missing track clears, and the second seek runs
    s.on_track_cleared(AUDIO);
    assert_eq!(next(&rx), Notice::SeekComplete { target_ms: 200 });
    assert!(!s.is_seeking());
    assert_eq!(demuxer.0.lock().unwrap().seeks, vec![100, 200]);
    s.stop(false).unwrap();
}

#[test]
fn test_source_seek_latest_target_wins() {
    let demuxer = Fake::new(1000);
    demuxer.0.lock().unwrap().hold_at = Some(0);
    let (s, rx) = source(demuxer.clone(), Sink::new(1000));
    s.open("test://video").unwrap();
    s.start().unwrap();

    s.seek_to(100);
    s.on_track_cleared(VIDEO);
    s.seek_to(200);
    s.on_track_cleared(AUDIO);

    assert_eq!(next(&rx), Notice::SeekComplete { target_ms: 200 });
    assert_eq!(demuxer.0.lock().unwrap().seeks, vec![200]);
    s.stop(false).unwrap();
}

#[test]
fn test_source_seek_failure() {
    let demuxer = Fake::new(8);
    {
        let mut script = demuxer.0.lock().unwrap();
        script.fail_seeks = true;
        script.hold_at = Some(5);
    }
    let sink = Sink::new(1000);
    let (s, rx) = source(demuxer.clone(), sink.clone());
    s.open("test://video").unwrap();
    s.start().unwrap();

    s.seek_to(3000);
    s.on_track_cleared(VIDEO);
    s.on_track_cleared(AUDIO);
    assert_eq!(next(&rx), Notice::SeekFailed { target_ms: 3000 });
    assert!(!s.is_seeking());

    // still reading from where we were
    demuxer.0.lock().unwrap().hold_at = None;
    assert_eq!(next(&rx), Notice::EndOfStream);
    assert_eq!(Sink::positions(&sink.take()), (0..8).collect::<Vec<_>>());
    s.stop(false).unwrap();
}

#[test]
fn test_source_stop_flush() {
    // endless stream, the flush must still terminate
    let demuxer = Fake::new(u32::MAX);
    let (s, _) = source(demuxer, Sink::new(1000));
    s.open("test://video").unwrap();
    s.start().unwrap();
    thread::sleep(Duration::from_millis(20));

    let start = Instant::now();
    s.stop(true).unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!s.is_running());

    // and a stopped source can be opened and started again
    s.open("test://video").unwrap();
    s.start().unwrap();
    s.stop(false).unwrap();
}
