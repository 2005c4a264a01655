use readmostly_common::{AtomicRefCount, RefCounter, TlRefCount};
use readmostly_ptr::{MainPtr, SharedPtr, WeakPtr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

struct Tracked {
    value: u64,
    drops: Arc<AtomicUsize>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn readers_then_reset<C: RefCounter + 'static>() {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut main = MainPtr::<_, C>::new(Tracked {
        value: 42,
        drops: Arc::clone(&drops),
    });

    thread::scope(|s| {
        for _ in 0..4 {
            let weak = main.downgrade();
            s.spawn(move || {
                for _ in 0..10_000 {
                    let shared = weak.lock().expect("owner is still alive");
                    assert_eq!(shared.value, 42);
                }
            });
        }
    });

    main.reset();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn readers_then_reset_tl() {
    readers_then_reset::<TlRefCount>();
}

#[test]
fn readers_then_reset_atomic() {
    readers_then_reset::<AtomicRefCount>();
}

/// Readers race the owner's reset; the value must be dropped exactly once and
/// no reader may see it after that.
fn readers_race_reset<C: RefCounter + 'static>() {
    for _ in 0..20 {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut main = MainPtr::<_, C>::new(Tracked {
            value: 7,
            drops: Arc::clone(&drops),
        });
        let weaks: Vec<WeakPtr<Tracked, C>> = (0..4).map(|_| main.downgrade()).collect();

        let readers: Vec<_> = weaks
            .into_iter()
            .map(|weak| {
                thread::spawn(move || {
                    let mut held: Vec<SharedPtr<Tracked, C>> = Vec::new();
                    let mut gone = false;
                    for i in 0..5_000 {
                        match weak.lock() {
                            Some(shared) => {
                                assert!(!gone, "value came back after it was dropped");
                                assert_eq!(shared.value, 7);
                                if i % 7 == 0 {
                                    held.push(shared);
                                }
                            }
                            None => gone = true,
                        }
                        if i % 13 == 0 {
                            held.clear();
                        }
                    }
                })
            })
            .collect();

        thread::yield_now();
        main.reset();

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn readers_race_reset_tl() {
    readers_race_reset::<TlRefCount>();
}

#[test]
fn readers_race_reset_atomic() {
    readers_race_reset::<AtomicRefCount>();
}

#[test]
fn shared_outlives_main_across_threads() {
    let drops = Arc::new(AtomicUsize::new(0));
    let main = MainPtr::<_>::new(Tracked {
        value: 1,
        drops: Arc::clone(&drops),
    });
    let shared = main.share().unwrap();
    let weak = main.downgrade();
    drop(main);

    let handle = thread::spawn(move || {
        assert_eq!(shared.value, 1);
        let again = weak.lock().expect("shared pointer keeps it alive");
        drop(shared);
        drop(again);
        assert!(weak.lock().is_none());
    });
    handle.join().unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
