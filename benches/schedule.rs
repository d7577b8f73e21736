//! Scheduling throughput benchmarks.
//!
//! Measures the submit → drain → complete round trip for plain schedules
//! and zero-delay timers, both through `sync_wait`.

#![allow(missing_docs)]

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use loopexec::{AsyncScope, EventLoop, SenderExt};

fn bench_schedule(c: &mut Criterion) {
    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let mut group = c.benchmark_group("schedule");
    group.throughput(Throughput::Elements(1));
    group.bench_function("sync_wait", |b| {
        b.iter(|| {
            lp.sync_wait(sched.schedule()).unwrap().unwrap();
        });
    });
    group.bench_function("sync_wait_timer_zero", |b| {
        b.iter(|| {
            lp.sync_wait(sched.schedule_after(Duration::ZERO))
                .unwrap()
                .unwrap();
        });
    });
    group.finish();
}

fn bench_spawn_burst(c: &mut Criterion) {
    const BURST: usize = 100;

    let lp = EventLoop::new().unwrap();
    let sched = lp.scheduler();

    let mut group = c.benchmark_group("spawn_burst");
    group.throughput(Throughput::Elements(BURST as u64));
    group.bench_function("scope_100", |b| {
        b.iter(|| {
            let scope = AsyncScope::new();
            for _ in 0..BURST {
                scope.spawn(sched.schedule().then(|()| ()));
            }
            let drained = sched.schedule().let_value({
                let scope = scope.clone();
                move |()| scope.on_empty()
            });
            lp.sync_wait(drained).unwrap().unwrap();
        });
    });
    group.finish();
}

criterion_group!(benches, bench_schedule, bench_spawn_burst);
criterion_main!(benches);
