use rand::Rng;
use readmostly_common::{AtomicRefCount, Count, Phase, RefCounter, TlRefCount};
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread;

fn drain<C: RefCounter>(rc: &C) {
    while rc.load().global().is_some_and(|n| n > 0) {
        rc.decrement();
    }
}

#[test]
fn two_threads_net_one_each() {
    let rc = TlRefCount::new();
    thread::scope(|s| {
        for _ in 0..2 {
            s.spawn(|| {
                for _ in 0..1000 {
                    assert!(rc.increment().is_alive());
                }
                for _ in 0..999 {
                    assert!(rc.decrement().is_alive());
                }
            });
        }
    });
    thread::scope(|s| {
        s.spawn(|| rc.promote_to_global());
    });
    assert_eq!(rc.load(), Count::Global(3));
    drain(&rc);
}

#[test]
fn conservation_over_random_interleavings() {
    const THREADS: usize = 8;
    let rc = TlRefCount::new();
    let expected = AtomicI64::new(1);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let mut rng = rand::rng();
                let mut held = 0i64;
                for _ in 0..rng.random_range(100..2000) {
                    if held == 0 || rng.random_bool(0.6) {
                        rc.increment();
                        held += 1;
                    } else {
                        rc.decrement();
                        held -= 1;
                    }
                }
                expected.fetch_add(held, Ordering::SeqCst);
            });
        }
    });

    rc.promote_to_global();
    assert_eq!(
        rc.load(),
        Count::Global(expected.load(Ordering::SeqCst)),
        "promotion must see every thread's net delta"
    );
    drain(&rc);
}

#[test]
fn promotion_racing_fast_path() {
    const THREADS: usize = 6;
    const ROUNDS: usize = 20;

    for _ in 0..ROUNDS {
        let rc = Arc::new(TlRefCount::new());
        let expected = Arc::new(AtomicI64::new(1));
        let start = Arc::new(AtomicBool::new(false));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let rc = Arc::clone(&rc);
                let expected = Arc::clone(&expected);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    while !start.load(Ordering::Acquire) {
                        std::hint::spin_loop();
                    }
                    let mut rng = rand::rng();
                    let mut held = 0i64;
                    for _ in 0..5000 {
                        if held == 0 || rng.random_bool(0.5) {
                            // the main thread keeps its reference, so this
                            // can never be refused
                            assert!(rc.increment().is_alive());
                            held += 1;
                        } else {
                            assert!(rc.decrement().is_alive());
                            held -= 1;
                        }
                    }
                    expected.fetch_add(held, Ordering::SeqCst);
                })
            })
            .collect();

        start.store(true, Ordering::Release);
        thread::yield_now();
        rc.promote_to_global();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(rc.phase(), Phase::Global);
        assert_eq!(rc.load(), Count::Global(expected.load(Ordering::SeqCst)));
        drain(&*rc);
    }
}

#[test]
fn phase_never_regresses() {
    let rc = TlRefCount::new();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut last = Phase::Local;
                while !done.load(Ordering::Acquire) {
                    rc.increment();
                    rc.decrement();
                    let phase = rc.phase();
                    assert!(phase >= last, "{phase:?} observed after {last:?}");
                    last = phase;
                }
                assert_eq!(rc.phase(), Phase::Global);
            });
        }
        thread::yield_now();
        rc.promote_to_global();
        done.store(true, Ordering::Release);
    });

    assert_eq!(rc.load(), Count::Global(1));
    drain(&rc);
}

fn assert_no_resurrection<C: RefCounter>(rc: &C) {
    rc.promote_to_global();

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut refused = false;
                for _ in 0..20_000 {
                    match rc.increment() {
                        Count::Global(0) => refused = true,
                        count => {
                            assert!(!refused, "count came back from zero: {count:?}");
                            rc.decrement();
                        }
                    }
                }
            });
        }
        // release the only owned reference while the workers are busy
        thread::yield_now();
        rc.decrement();
    });

    assert_eq!(rc.load(), Count::Global(0));
    assert_eq!(rc.increment(), Count::Global(0));
    assert_eq!(rc.load(), Count::Global(0));
}

#[test]
fn tl_count_does_not_resurrect() {
    assert_no_resurrection(&TlRefCount::new());
}

#[test]
fn atomic_count_does_not_resurrect() {
    assert_no_resurrection(&AtomicRefCount::new());
}

#[test]
fn exited_threads_are_folded_before_promotion() {
    let rc = Arc::new(TlRefCount::new());
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let rc = Arc::clone(&rc);
            thread::spawn(move || {
                for _ in 0..100 {
                    rc.increment();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    rc.promote_to_global();
    assert_eq!(rc.load(), Count::Global(401));
    drain(&*rc);
}

/// Takes five references when its thread's local storage is torn down.
struct IncrementOnExit(Arc<TlRefCount>);

impl Drop for IncrementOnExit {
    fn drop(&mut self) {
        for _ in 0..5 {
            assert!(self.0.increment().is_alive());
        }
    }
}

thread_local! {
    static ON_EXIT: RefCell<Option<IncrementOnExit>> = const { RefCell::new(None) };
}

#[test]
fn updates_after_thread_local_teardown_are_counted() {
    let rc = Arc::new(TlRefCount::new());
    let worker = {
        let rc = Arc::clone(&rc);
        thread::spawn(move || {
            // set up before the counter's cell list exists, so it is torn
            // down after it
            ON_EXIT.with(|slot| *slot.borrow_mut() = Some(IncrementOnExit(Arc::clone(&rc))));
            assert!(rc.increment().is_alive());
        })
    };
    worker.join().unwrap();

    assert_eq!(rc.phase(), Phase::Local);
    rc.promote_to_global();
    assert_eq!(rc.load(), Count::Global(7));
    drain(&*rc);
}
