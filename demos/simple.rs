use std::sync::Arc;
use std::thread;

use plock::PLock;

/// Mirrors a concurrent-increment workload, but shows the seek/stow path a
/// plain rwlock can't express: a reader that decides mid-read it wants to
/// become the writer, without ever releasing its hold on the structure.
fn main() {
    let counter = Arc::new(PLock::<_, u32>::new(0usize));

    let writer = thread::spawn({
        let counter = counter.clone();
        move || {
            for _ in 0..1000 {
                *counter.write() += 1;
            }
        }
    });

    for _ in 0..1000 {
        println!("read {}", *counter.read());
    }

    writer.join().unwrap();
    assert_eq!(*counter.read(), 1000);

    // a seeker reads, then progresses straight to a writer without ever
    // dropping back to U in between.
    let seek = counter.seek();
    println!("seeking, still see {}", *seek);
    let mut write = seek.stow();
    *write += 1;
    drop(write);
    assert_eq!(*counter.read(), 1001);
}
