//! This is the `readmostly` benchmark harness. It measures how fast threads
//! can lock a [`WeakPtr`](readmostly_ptr::WeakPtr) to one shared value, once
//! with a [`TlRefCount`] and once with an [`AtomicRefCount`] behind the
//! pointer. Measurement and reporting are done by criterion.
//!
//! The counters themselves live in `readmostly-common`; the pointers in
//! `readmostly-ptr`.

#[macro_use]
extern crate log;

pub mod settings;

use criterion::{BenchmarkId, Criterion};
use readmostly_common::{AtomicRefCount, RefCounter, TlRefCount};
use readmostly_ptr::MainPtr;
use settings::Settings;
use std::hint::black_box;
use std::thread;
use std::time::{Duration, Instant};

type Workload = fn(usize, u64) -> Duration;

pub struct Benchmark {
    pub name: &'static str,
    workload: Workload,
}

const BENCHMARKS: &[Benchmark] = &[
    Benchmark {
        name: "AtomicWeakPtr",
        workload: weak_lock_loop::<AtomicRefCount>,
    },
    Benchmark {
        name: "TlWeakPtr",
        workload: weak_lock_loop::<TlRefCount>,
    },
];

/// Spawn `threads` threads that each take their own weak pointer to one
/// shared value and lock it `iterations` times, and time the whole run.
pub fn weak_lock_loop<C: RefCounter + 'static>(threads: usize, iterations: u64) -> Duration {
    let main = MainPtr::<i32, C>::new(42);

    let start = Instant::now();
    thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                let weak = main.downgrade();
                for _ in 0..iterations {
                    black_box(weak.lock());
                }
            });
        }
    });
    start.elapsed()
}

/// The benchmarks `settings` asks for, as (benchmark, thread count) pairs in
/// run order.
pub fn selected(settings: &Settings) -> Vec<(&'static Benchmark, usize)> {
    let mut selected = Vec::new();
    for &threads in &settings.threads {
        for bench in BENCHMARKS {
            let label = format!("{}/{}", bench.name, threads);
            if settings
                .filter
                .as_deref()
                .is_some_and(|filter| !label.contains(filter))
            {
                continue;
            }
            selected.push((bench, threads));
        }
    }
    selected
}

/// A criterion instance that spends `settings.min_duration` warming up and
/// measuring each benchmark.
pub fn criterion(settings: &Settings) -> Criterion {
    Criterion::default()
        .warm_up_time(settings.min_duration)
        .measurement_time(settings.min_duration)
}

/// Register the selected benchmarks with `c` as the `weak_lock` group.
pub fn bench_weak_lock(c: &mut Criterion, settings: &Settings) {
    let mut group = c.benchmark_group("weak_lock");
    for (bench, threads) in selected(settings) {
        info!("running {}/{threads}", bench.name);
        group.bench_with_input(
            BenchmarkId::new(bench.name, threads),
            &threads,
            |b, &threads| b.iter_custom(|iters| (bench.workload)(threads, iters)),
        );
    }
    group.finish();
}

/// Run the benchmarks configured by `settings` and print criterion's
/// summary.
pub fn run(settings: &Settings) {
    let mut c = criterion(settings);
    bench_weak_lock(&mut c, settings);
    c.final_summary();
}
