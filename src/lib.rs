#![no_std]

//! Progressive locks: a single-word, multi-state reader/writer/seeker lock
//! for read-dominated in-memory data structures such as trees, caches and
//! hash tables.
//!
//! A progressive lock lets many holders share a state (`R`), and lets one
//! holder *progress* through increasingly exclusive states (`R` -> `S` ->
//! `W`) without ever releasing and re-acquiring the lock from scratch. That
//! removes the "release, then re-acquire exclusively" window in which a
//! concurrent writer could sneak in between a tree descent and the mutation
//! that descent was preparing.
//!
//! The lock is **not fair** (no FIFO queue, no ticket order), provides no
//! priority inheritance, does not integrate with a blocking scheduler
//! (waiters busy-spin with bounded backoff), is **not reentrant**, and does
//! not detect deadlock. See the [`raw`] module docs for the full state
//! machine, and [`lock`] for the guard-typed API most callers want.
//!
//! ```
//! use plock::PLock;
//!
//! let lock = PLock::<_, u32>::new(0usize);
//!
//! {
//!     let mut guard = lock.write();
//!     *guard += 1;
//! }
//!
//! assert_eq!(*lock.read(), 1);
//! ```

#[cfg(any(test, feature = "std"))]
extern crate std;

#[macro_use]
extern crate static_assertions;

pub mod atomic;
pub mod backoff;
pub mod lock;
pub mod raw;
pub mod word;

pub use atomic::Word;
pub use lock::{
    AtomicGuard, ClaimGuard, ExclusiveGuard, JoinGuard, PLock, ReadGuard, SeekGuard, WriteGuard,
};
pub use word::Layout;
