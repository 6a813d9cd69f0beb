use tequeue::source::*;
use tequeue::Registry;
use tequeue::Handle;

use std::thread;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
use rand;
use rand::Rng;
use structopt;
use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::EnvFilter;


#[derive(Debug, StructOpt, Clone)]
#[structopt(rename_all="kebab")]
struct Opt {
    /// How long to run, in seconds
    #[structopt(short, long, default_value="10")]
    duration: u64,

    /// Packets the sink buffers before refusing more
    #[structopt(short, long, default_value="64")]
    capacity: usize,

    /// Chance a read comes back empty, in percent
    #[structopt(short, long, default_value="10")]
    again: u32,

    /// Average time between seeks, in milliseconds
    #[structopt(short, long, default_value="500")]
    seek_every: u64,
}

// a synthetic stream, a packet every 10ms of media time
struct Noise {
    pos: u64,
    again: u32,
}

impl Demuxer for Noise {
    fn open(&mut self, _uri: &str) -> Result<StreamInfo, SourceError> {
        Ok(StreamInfo {
            tracks: vec![
                TrackInfo {
                    id: TrackId(0),
                    kind: TrackKind::Video,
                    video: Some(VideoFormat { width: 4096, height: 2048 }),
                },
                TrackInfo { id: TrackId(1), kind: TrackKind::Audio, video: None },
            ],
            duration: None,
        })
    }

    fn read_packet(&mut self) -> Result<ReadOutcome, SourceError> {
        if rand::thread_rng().gen_range(0..100) < self.again {
            return Ok(ReadOutcome::Again);
        }

        self.pos += 1;
        Ok(ReadOutcome::Packet(Packet {
            track: TrackId((self.pos % 2) as u32),
            pts_us: Some((self.pos * 10_000) as i64),
            data: Bytes::from(vec![0; 188]),
        }))
    }

    fn seek(&mut self, target_ms: i64) -> Result<(), SourceError> {
        self.pos = (target_ms.max(0) / 10) as u64;
        Ok(())
    }
}

// a bounded buffer drained by a consumer thread
struct Buffer {
    capacity: usize,
    packets: Mutex<Vec<Packet>>,
}

impl PacketSink for Buffer {
    fn accept(&self, packet: Packet) -> Result<(), SinkFull> {
        let mut packets = self.packets.lock().unwrap();
        if packets.len() >= self.capacity {
            return Err(SinkFull(packet));
        }
        packets.push(packet);
        Ok(())
    }

    fn clear(&self) {
        self.packets.lock().unwrap().clear();
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let opt = Opt::from_args();

    let buffer = Arc::new(Buffer {
        capacity: opt.capacity,
        packets: Mutex::new(vec![]),
    });
    let source = Arc::new(Source::new(
        Noise { pos: 0, again: opt.again },
        buffer.clone(),
        SourceConfig::default()
            .retry_interval(Duration::from_millis(5))
    ));

    let seeks = Arc::new(AtomicU64::new(0));
    source.set_listener({
        let seeks = seeks.clone();
        Arc::new(move |notice: Notice| {
            if let Notice::SeekComplete { .. } = notice {
                seeks.fetch_add(1, Ordering::Relaxed);
            }
        })
    });

    let info = source.open("noise://").unwrap();
    info!(
        tracks = info.tracks.len(),
        panoramic = source.is_panoramic(),
        "opened"
    );
    source.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(opt.duration);

    // consumer, drains the buffer at a jittery pace
    let consumed = Arc::new(AtomicU64::new(0));
    let consumer = {
        let buffer = buffer.clone();
        let consumed = consumed.clone();
        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            while Instant::now() < deadline {
                let n = buffer.packets.lock().unwrap().drain(..).count();
                consumed.fetch_add(n as u64, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(rng.gen_range(1..20)));
            }
        })
    };

    // tracks only ever see a raw handle, the way a foreign consumer would,
    // and look the source up again when they report back
    let sources = Arc::new(Registry::new());
    let raw = sources.insert(source.clone()).to_raw();

    // seeker, seeks somewhere random, clears the buffer, and has each
    // track report back from its own thread
    let seeker = {
        let source = source.clone();
        let sources = sources.clone();
        let buffer = buffer.clone();
        let opt = opt.clone();
        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            while Instant::now() < deadline {
                thread::sleep(Duration::from_millis(rng.gen_range(0..2*opt.seek_every)));

                source.seek_to(rng.gen_range(0..3_600_000));
                buffer.clear();
                let mut acks = vec![];
                for track in [TrackId(0), TrackId(1)] {
                    let sources = sources.clone();
                    let delay = rng.gen_range(0..50);
                    acks.push(thread::spawn(move || {
                        thread::sleep(Duration::from_millis(delay));
                        let source: Option<Arc<Source>> = sources.get(Handle::from_raw(raw));
                        match source {
                            Some(source) => source.on_notify(Inbound::TrackCleared(track)),
                            None => info!(%track, "source gone, dropping ack"),
                        }
                    }));
                }

                for ack in acks.into_iter() {
                    ack.join().unwrap();
                }
            }
        })
    };

    consumer.join().unwrap();
    seeker.join().unwrap();
    sources.remove(Handle::from_raw(raw));

    source.stop(true).unwrap();
    println!(
        "consumed: {}, seeks: {}",
        consumed.load(Ordering::Relaxed),
        seeks.load(Ordering::Relaxed)
    );
}
