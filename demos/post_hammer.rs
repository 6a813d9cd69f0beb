use tequeue::TimedEventQueue;
use tequeue::Event;

use std::thread;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::cmp::max;

use rand;
use rand::Rng;
use structopt;
use structopt::StructOpt;


#[derive(Debug, StructOpt, Clone)]
#[structopt(rename_all="kebab")]
struct Opt {
    /// Width of rendering (excluding fields)
    #[structopt(short, long, default_value="48")]
    width: usize,

    /// Amount to scale delays
    #[structopt(short, long, default_value="1000000")]
    scale: u64,

    /// Number of posting threads
    #[structopt(short, long, default_value="100")]
    threads: usize,
}

fn main() {
    let opt = Opt::from_args();

    let q = Arc::new(TimedEventQueue::new());
    q.start().unwrap();

    let fired = Arc::new(AtomicU64::new(0));
    let cancelled = Arc::new(AtomicU64::new(0));

    // some busywork, n threads, each with a random delay, and maybe a
    // cancel
    let mut threads = vec![];
    for _ in 0..opt.threads {
        let opt = opt.clone();
        let q = q.handle();
        let fired = fired.clone();
        let cancelled = cancelled.clone();
        threads.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            loop {
                thread::sleep(Duration::from_nanos(rng.gen_range(0..2000*opt.scale)));

                let e = {
                    let fired = fired.clone();
                    Event::new(move |_, _| {
                        fired.fetch_add(1, Ordering::Relaxed);
                    })
                };

                // choose a random delay
                let delay = rng.gen_range(0..max(2000*opt.scale/1000_000, 10));
                let id = q.post_in(&e, Duration::from_millis(delay)).unwrap();

                // should we try to cancel?
                if rng.gen() {
                    // wait a random time and then cancel, our event may have already
                    // fired but that's ok
                    thread::sleep(Duration::from_nanos(rng.gen_range(0..2000*opt.scale)));
                    if q.cancel(id) {
                        cancelled.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }

    // and now, in our main thread, lets render something nice looking
    println!();
    let mut pending_max = 1;
    loop {
        let pending = q.len();
        if pending > pending_max {
            pending_max = pending;
        }

        let width = opt.width;
        print!("\x1b[K  q ");
        for _ in 0 .. (width-2)*pending / pending_max {
            print!("'");
        }
        for _ in (width-2)*pending / pending_max .. width-2 {
            print!(" ");
        }
        println!("  pending: {}", pending);

        println!("\x1b[K    fired: {}", fired.load(Ordering::Relaxed));
        println!("\x1b[K    cancelled: {}", cancelled.load(Ordering::Relaxed));

        thread::sleep(Duration::from_millis(10));

        print!("\x1b[3F");
    }
}
