//! Integration tests over the guard-typed API, one per concrete scenario
//! group this state machine is expected to satisfy.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rand::Rng;

use plock::word::Layout;
use plock::PLock;

#[test]
fn single_thread_round_trip_through_every_state() {
    let lock = PLock::<_, u32>::new(0usize);

    drop(lock.read());
    {
        let seek = lock.seek();
        let write = seek.stow();
        drop(write);
    }
    drop(lock.write());
    drop(lock.atomic());

    // every drop rebalanced the word; a fresh write still succeeds
    // immediately, proving nothing was left held.
    assert!(lock.try_write().is_some());
}

#[test]
fn readers_coexist_without_waiting() {
    let lock = PLock::<_, u32>::new(0usize);
    let guards: Vec<_> = (0..8).map(|_| lock.read()).collect();
    assert_eq!(guards.len(), 8);
    // a seeker must wait until every reader above has dropped
    assert!(lock.try_seek().is_none());
    drop(guards);
    assert!(lock.try_seek().is_some() || lock.try_write().is_some());
}

#[test]
fn writer_blocks_readers_until_dropped() {
    let lock = PLock::<_, u32>::new(0usize);
    let w = lock.write();

    let started = Barrier::new(5);
    let completed = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                started.wait();
                let _r = lock.read();
                completed.fetch_add(1, Ordering::SeqCst);
            });
        }
        started.wait();
        thread::yield_now();
        assert_eq!(completed.load(Ordering::SeqCst), 0);

        drop(w);
    });

    assert_eq!(completed.load(Ordering::SeqCst), 4);
}

#[test]
fn single_seeker_invariant_under_contention() {
    let lock = PLock::<_, u32>::new(0usize);
    let order = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..3 {
            scope.spawn(|| {
                let _seek = lock.seek();
                order.fetch_add(1, Ordering::SeqCst);
                thread::yield_now();
            });
        }
    });

    assert_eq!(order.load(Ordering::SeqCst), 3);
    // the slot is free again once every seeker has dropped
    assert!(lock.try_seek().is_some());
}

#[test]
fn r_to_s_upgrade_race_has_at_most_one_winner() {
    let lock = PLock::<_, u32>::new(0usize);
    let r1 = lock.read();
    let r2 = lock.read();

    let (t1_won, t2_won) = thread::scope(|scope| {
        let handle = scope.spawn(move || r1.try_rtos().is_ok());
        let result2 = r2.try_rtos();
        (handle.join().unwrap(), result2.is_ok())
    });

    assert!(t1_won ^ t2_won, "exactly one of the two racers should win");
}

#[test]
fn atomic_hold_excludes_seek() {
    let lock = PLock::<_, u32>::new(0usize);
    let a = lock.atomic();
    let acquired = AtomicBool::new(false);

    thread::scope(|scope| {
        let handle = scope.spawn(|| {
            let _s = lock.seek();
            acquired.store(true, Ordering::SeqCst);
        });

        thread::yield_now();
        assert!(!acquired.load(Ordering::SeqCst));

        drop(a);
        handle.join().unwrap();
    });

    assert!(acquired.load(Ordering::SeqCst));
}

#[test]
fn reader_to_atomic_upgrade_waits_for_other_readers_to_drain() {
    let lock = PLock::<_, u32>::new(0usize);
    let r1 = lock.read();
    let r2 = lock.read();
    let upgraded = AtomicBool::new(false);

    thread::scope(|scope| {
        let upgraded_ref = &upgraded;
        let handle = scope.spawn(move || {
            let _atomic = r1.try_rtoa().unwrap_or_else(|_| panic!("no seeker contends here"));
            upgraded_ref.store(true, Ordering::SeqCst);
        });

        thread::yield_now();
        assert!(!upgraded.load(Ordering::SeqCst));

        drop(r2);
        handle.join().unwrap();
    });

    assert!(upgraded.load(Ordering::SeqCst));
}

#[test]
fn contention_makes_progress() {
    let lock = PLock::<_, usize>::new(0usize);
    let total = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..200 {
                    let mut w = lock.write();
                    *w += 1;
                    drop(w);
                    total.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(total.load(Ordering::SeqCst), 800);
    assert_eq!(*lock.read(), 800);
}

#[test]
fn randomized_delay_stress_across_read_seek_write() {
    const READ_THREADS: usize = 6;
    const SEEK_THREADS: usize = 3;
    const ITERS: usize = 50;

    let lock = Arc::new(PLock::<_, usize>::new(0usize));

    let readers: Vec<_> = (0..READ_THREADS)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..ITERS {
                    let guard = lock.read();
                    let seen = *guard;
                    thread::sleep(Duration::from_millis(rng.gen_range(1..4)));
                    assert_eq!(*guard, seen, "value changed while R was held");
                    drop(guard);
                    thread::yield_now();
                }
            })
        })
        .collect();

    let seekers: Vec<_> = (0..SEEK_THREADS)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..ITERS {
                    let seek = lock.seek();
                    thread::sleep(Duration::from_millis(rng.gen_range(1..4)));
                    let mut write = seek.stow();
                    *write += 1;
                    thread::sleep(Duration::from_millis(rng.gen_range(1..4)));
                    drop(write);
                    thread::yield_now();
                }
            })
        })
        .collect();

    for t in readers {
        t.join().unwrap();
    }
    for t in seekers {
        t.join().unwrap();
    }

    assert_eq!(*lock.read(), SEEK_THREADS * ITERS);
}

#[test]
fn join_claim_rendezvous_elects_a_single_committer() {
    let lock = PLock::<_, usize>::new(100usize);
    let r1 = lock.read();
    let r2 = lock.read();
    let winner_saw_last_writer = AtomicBool::new(false);

    thread::scope(|scope| {
        let winner_ref = &winner_saw_last_writer;
        let handle = scope.spawn(move || {
            let join = r2.join().unwrap_or_else(|_| panic!("no seeker contends here"));
            if join.last_writer() {
                winner_ref.store(true, Ordering::SeqCst);
                let mut claim = join.claim();
                *claim += 1;
                drop(claim.into_atomic());
            } else {
                join.wait_for_commit();
            }
        });

        let join1 = r1.join().unwrap_or_else(|_| panic!("no seeker contends here"));
        let mut elected_here = false;
        if join1.last_writer() {
            elected_here = true;
            let mut claim = join1.claim();
            *claim += 1;
            drop(claim.into_atomic());
        } else {
            join1.wait_for_commit();
            drop(join1);
        }

        handle.join().unwrap();

        // exactly one side incremented the value; `last_writer` only ever
        // returns true for one racer at a time, so the final value is 101,
        // not 102.
        assert_eq!(*lock.read(), 101);
        assert!(elected_here ^ winner_saw_last_writer.load(Ordering::SeqCst));
    });
}

#[test]
fn round_trip_laws_preserve_reserved_tag_bits() {
    let lock = PLock::<_, u32>::new(0usize);
    lock.set_tag(0b11);

    drop(lock.read());
    assert_eq!(lock.tag(), 0b11);

    {
        let seek = lock.seek();
        let write = seek.stow();
        let seek_again = write.wtos();
        drop(seek_again);
    }
    assert_eq!(lock.tag(), 0b11);

    {
        let seek = lock.seek();
        let write = seek.stow();
        drop(write);
    }
    assert_eq!(lock.tag(), 0b11);
}

#[test]
fn field_layout_matches_the_published_constants() {
    assert_eq!(<u32 as Layout>::R1, 0x0000_0004);
    assert_eq!(<u32 as Layout>::S1, 0x0001_0000);
    assert_eq!(<u32 as Layout>::W1, 0x0004_0000);
    assert_eq!(<u64 as Layout>::R1, 0x0000_0000_0000_0004);
    assert_eq!(<u64 as Layout>::W1, 0x0000_0004_0000_0000);
}
