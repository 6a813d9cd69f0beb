use std::time::Duration;

use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use criterion::BatchSize;

use tequeue::TimedEventQueue;
use tequeue::Event;

fn bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("ops");

    {
        group.bench_function("event", |b| b.iter_with_large_drop(
            || {
                Event::<()>::new(|_, _| {})
            }
        ));
    }

    {
        // no dispatch thread, so everything stays pending
        let q = TimedEventQueue::new();
        group.bench_function("post", |b| b.iter_batched(
            || Event::new(|_, _| {}),
            |e| {
                q.post(&e).unwrap();
                e
            },
            BatchSize::SmallInput
        ));
    }

    {
        // timed events land somewhere in the middle of a list of 1000,
        // cancelled again to keep the list from growing
        let q = TimedEventQueue::new();
        let background = (0..1000)
            .map(|i| {
                let e = Event::new(|_, _| {});
                q.post_in(&e, Duration::from_secs(3600 + i)).unwrap();
                e
            })
            .collect::<Vec<_>>();
        let mut i = 0;
        group.bench_function("post_in_cancel", |b| b.iter_batched(
            || {
                i = (i + 7919) % 1000;
                (Event::new(|_, _| {}), Duration::from_secs(3600 + i))
            },
            |(e, delay)| {
                let id = q.post_in(&e, delay).unwrap();
                q.cancel(id);
                e
            },
            BatchSize::SmallInput
        ));
        drop(background);
    }

    {
        let q = TimedEventQueue::new();
        group.bench_function("cancel", |b| b.iter_batched(
            || {
                let e = Event::new(|_, _| {});
                let id = q.post(&e).unwrap();
                (e, id)
            },
            |(e, id)| {
                assert!(q.cancel(id));
                e
            },
            BatchSize::SmallInput
        ));
    }

    {
        // round trip through a running dispatch thread
        let q = TimedEventQueue::new();
        q.start().unwrap();
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let tx = std::sync::Mutex::new(tx);
        let e = Event::new(move |_, _| {
            tx.lock().unwrap().send(()).unwrap();
        });
        group.bench_function("dispatch", |b| b.iter(|| {
            q.post(&e).unwrap();
            rx.recv().unwrap();
        }));
        q.stop(false).unwrap();
    }
}

criterion_group!(benches, bench);
criterion_main!(benches);
