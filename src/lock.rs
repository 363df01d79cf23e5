//! The guard-typed public API: [`PLock<T, W>`] wraps a bare word
//! from [`crate::raw`] around a [`UnsafeCell<T>`], and hands out a guard per
//! state that can only be reached, and only be transitioned onward, the way
//! the state machine allows. An illegal transition (e.g. reading through a
//! dropped [`SeekGuard`], or mutating through a [`JoinGuard`] that never won
//! the rendezvous) is a type error, not a runtime check.

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};

use crate::atomic::Word;
use crate::backoff::wait_new;
use crate::raw;
use crate::word::{load_tag_bits, store_tag_bits, Layout};

/// A progressive lock protecting `T`, encoded into a single `W` (`u32` by
/// default, or `u64`).
pub struct PLock<T, W: Layout = u32> {
    word: W::Atomic,
    /// Round-tracking companion for the extended `join`/`claim` rendezvous;
    /// see [`crate::raw::rtoj`] for why it can't just be more bits in `word`.
    round: W::Atomic,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send, W: Layout> Send for PLock<T, W> {}
unsafe impl<T: Send + Sync, W: Layout> Sync for PLock<T, W> {}

impl<T, W: Layout> PLock<T, W> {
    /// Wraps `data` in a new, unlocked lock.
    pub fn new(data: T) -> Self {
        Self {
            word: W::new_atomic(W::ZERO),
            round: W::new_atomic(W::ZERO),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire read access (`R`), retrying forever under writer contention.
    pub fn read(&self) -> ReadGuard<'_, T, W> {
        raw::take_r::<W>(&self.word);
        ReadGuard { lock: self }
    }

    /// Attempt read access without blocking.
    pub fn try_read(&self) -> Option<ReadGuard<'_, T, W>> {
        if raw::try_r::<W>(&self.word) {
            Some(ReadGuard { lock: self })
        } else {
            None
        }
    }

    /// Acquire the single seek slot (`S`), retrying forever until no other
    /// seeker or writer remains.
    pub fn seek(&self) -> SeekGuard<'_, T, W> {
        raw::take_s::<W>(&self.word);
        SeekGuard { lock: self }
    }

    /// Attempt to acquire the seek slot without blocking.
    pub fn try_seek(&self) -> Option<SeekGuard<'_, T, W>> {
        if raw::try_s::<W>(&self.word) {
            Some(SeekGuard { lock: self })
        } else {
            None
        }
    }

    /// Acquire the direct exclusive lock (`X`) from `U`, retrying forever.
    /// This is the ordinary "I just want to write" entry point; callers that
    /// need to read-then-maybe-write without releasing in between want
    /// [`PLock::seek`] instead.
    pub fn write(&self) -> ExclusiveGuard<'_, T, W> {
        raw::take_x::<W>(&self.word);
        ExclusiveGuard { lock: self }
    }

    /// Attempt the direct exclusive lock without blocking past its own
    /// reader-drain wait.
    pub fn try_write(&self) -> Option<ExclusiveGuard<'_, T, W>> {
        if raw::try_x::<W>(&self.word) {
            Some(ExclusiveGuard { lock: self })
        } else {
            None
        }
    }

    /// Join the set of concurrent atomic writers (`A`), retrying forever.
    /// Only shared access is handed out: mutation under `A` is only sound if
    /// `T` coordinates its own interior mutation (e.g. `T` is itself built of
    /// atomics), since more than one `AtomicGuard` can be live at once.
    pub fn atomic(&self) -> AtomicGuard<'_, T, W> {
        raw::take_a::<W>(&self.word, &self.round);
        AtomicGuard { lock: self }
    }

    /// Attempt to join the set of concurrent atomic writers without
    /// blocking.
    pub fn try_atomic(&self) -> Option<AtomicGuard<'_, T, W>> {
        if raw::try_a::<W>(&self.word, &self.round) {
            Some(AtomicGuard { lock: self })
        } else {
            None
        }
    }

    /// Reads the two caller-owned reserved tag bits.
    pub fn tag(&self) -> W {
        load_tag_bits::<W>(&self.word)
    }

    /// Overwrites the two caller-owned reserved tag bits.
    pub fn set_tag(&self, tag: W) {
        store_tag_bits::<W>(&self.word, tag);
    }

    /// `&mut self` already proves exclusive access at the Rust level, so this
    /// bypasses the lock word entirely.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Unwraps the lock, returning the inner data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: fmt::Debug, W: Layout> fmt::Debug for PLock<T, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_read() {
            Some(guard) => f.debug_struct("PLock").field("data", &*guard).finish(),
            None => f.debug_struct("PLock").field("data", &"<locked>").finish(),
        }
    }
}

// ---------------------------------------------------------------- R: read

/// Shared read access. Any number of these may be live at once.
pub struct ReadGuard<'a, T, W: Layout> {
    lock: &'a PLock<T, W>,
}

impl<'a, T, W: Layout> ReadGuard<'a, T, W> {
    /// Upgrade to [`SeekGuard`] (`R -> S`). On failure the guard is handed
    /// back unchanged so the caller may retry or drop it.
    pub fn try_rtos(self) -> Result<SeekGuard<'a, T, W>, Self> {
        if raw::try_rtos::<W>(&self.lock.word) {
            let lock = self.lock;
            core::mem::forget(self);
            Ok(SeekGuard { lock })
        } else {
            Err(self)
        }
    }

    /// Upgrade to [`AtomicGuard`] (`R -> A`), waiting out any other readers.
    pub fn try_rtoa(self) -> Result<AtomicGuard<'a, T, W>, Self> {
        if raw::try_rtoa::<W>(&self.lock.word, &self.lock.round) {
            let lock = self.lock;
            core::mem::forget(self);
            Ok(AtomicGuard { lock })
        } else {
            Err(self)
        }
    }

    /// Upgrade directly to [`WriteGuard`] (`R -> W`), [`try_rtos`] and
    /// `stow` fused into one step.
    ///
    /// [`try_rtos`]: ReadGuard::try_rtos
    pub fn try_rtow(self) -> Result<WriteGuard<'a, T, W>, Self> {
        if raw::try_rtow::<W>(&self.lock.word) {
            let lock = self.lock;
            core::mem::forget(self);
            Ok(WriteGuard { lock })
        } else {
            Err(self)
        }
    }

    /// Announce a write candidacy (`R -> J`). Blocks until every other
    /// reader has also announced or dropped, or fails if a seeker appears in
    /// the meantime, in which case the caller keeps its `R` and may retry.
    pub fn join(self) -> Result<JoinGuard<'a, T, W>, Self> {
        match raw::rtoj::<W>(&self.lock.word, &self.lock.round) {
            Some(elected) => {
                let lock = self.lock;
                core::mem::forget(self);
                Ok(JoinGuard { lock, elected })
            }
            None => Err(self),
        }
    }
}

impl<'a, T, W: Layout> Drop for ReadGuard<'a, T, W> {
    fn drop(&mut self) {
        raw::drop_r::<W>(&self.lock.word);
    }
}

impl<'a, T, W: Layout> Deref for ReadGuard<'a, T, W> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

// ---------------------------------------------------------------- S: seek

/// The single seek slot. Grants the same read access as [`ReadGuard`] plus
/// the exclusive right to progress to [`WriteGuard`].
pub struct SeekGuard<'a, T, W: Layout> {
    lock: &'a PLock<T, W>,
}

impl<'a, T, W: Layout> SeekGuard<'a, T, W> {
    /// Progress to exclusive access (`S -> W`), waiting out any readers.
    pub fn stow(self) -> WriteGuard<'a, T, W> {
        raw::stow::<W>(&self.lock.word);
        let lock = self.lock;
        core::mem::forget(self);
        WriteGuard { lock }
    }
}

impl<'a, T, W: Layout> Drop for SeekGuard<'a, T, W> {
    fn drop(&mut self) {
        raw::drop_s::<W>(&self.lock.word);
    }
}

impl<'a, T, W: Layout> Deref for SeekGuard<'a, T, W> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

// ------------------------------------------------------------ S <-> W: write

/// Exclusive access reached through [`SeekGuard::stow`]. Can step back down
/// to a `SeekGuard` without releasing the underlying slot.
pub struct WriteGuard<'a, T, W: Layout> {
    lock: &'a PLock<T, W>,
}

impl<'a, T, W: Layout> WriteGuard<'a, T, W> {
    /// Downgrade back to [`SeekGuard`] (`W -> S`), retaining the seek slot.
    pub fn wtos(self) -> SeekGuard<'a, T, W> {
        raw::wtos::<W>(&self.lock.word);
        let lock = self.lock;
        core::mem::forget(self);
        SeekGuard { lock }
    }
}

impl<'a, T, W: Layout> Drop for WriteGuard<'a, T, W> {
    fn drop(&mut self) {
        raw::drop_w::<W>(&self.lock.word);
    }
}

impl<'a, T, W: Layout> Deref for WriteGuard<'a, T, W> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T, W: Layout> DerefMut for WriteGuard<'a, T, W> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

// ------------------------------------------------------------ X: exclusive

/// Exclusive access reached directly from `U` via [`PLock::write`].
pub struct ExclusiveGuard<'a, T, W: Layout> {
    lock: &'a PLock<T, W>,
}

impl<'a, T, W: Layout> Drop for ExclusiveGuard<'a, T, W> {
    fn drop(&mut self) {
        raw::drop_x::<W>(&self.lock.word);
    }
}

impl<'a, T, W: Layout> Deref for ExclusiveGuard<'a, T, W> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T, W: Layout> DerefMut for ExclusiveGuard<'a, T, W> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

// ------------------------------------------------------------- A: atomic

/// One of potentially several concurrent atomic-writer holders. Only shared
/// access is exposed here; see [`PLock::atomic`] for why `DerefMut` isn't.
pub struct AtomicGuard<'a, T, W: Layout> {
    lock: &'a PLock<T, W>,
}

impl<'a, T, W: Layout> AtomicGuard<'a, T, W> {
    /// A raw pointer to the protected data, for callers whose `T` has its
    /// own interior mutability (atomics, a lock-free structure) and can
    /// therefore mutate safely despite other concurrent `AtomicGuard`s.
    pub fn data_ptr(&self) -> *mut T {
        self.lock.data.get()
    }
}

impl<'a, T, W: Layout> Drop for AtomicGuard<'a, T, W> {
    fn drop(&mut self) {
        raw::drop_a::<W>(&self.lock.word);
    }
}

impl<'a, T, W: Layout> Deref for AtomicGuard<'a, T, W> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

// ------------------------------------------------- extended J/C rendezvous

/// One of potentially several readers that announced a write candidacy via
/// [`ReadGuard::join`]. Exactly one `JoinGuard` among the set becomes the
/// committer; the rest must wait for it and then release.
///
/// Like [`AtomicGuard`], a `JoinGuard` alone grants no exclusive access:
/// more than one may be live, so only [`JoinGuard::data_ptr`] is exposed. The
/// guard elected by [`JoinGuard::last_writer`] is the only one that may
/// dereference it before calling [`JoinGuard::claim`].
pub struct JoinGuard<'a, T, W: Layout> {
    lock: &'a PLock<T, W>,
    elected: bool,
}

impl<'a, T, W: Layout> JoinGuard<'a, T, W> {
    /// Returns true iff this is the sole holder elected to commit. Decided
    /// once, at the moment [`ReadGuard::join`] announced this holder's
    /// candidacy, since a shared counter can no longer tell contributions
    /// apart once more than one has been added.
    pub fn last_writer(&self) -> bool {
        self.elected
    }

    /// A raw pointer to the protected data. Sound to dereference only from
    /// the single guard for which [`last_writer`] is true.
    ///
    /// [`last_writer`]: JoinGuard::last_writer
    pub fn data_ptr(&self) -> *mut T {
        self.lock.data.get()
    }

    /// Mark this as the committed writer (`J -> C`). Only meaningful when
    /// [`last_writer`] was observed true; calling it from a losing holder
    /// marks the rendezvous as committed without that holder actually being
    /// the elected one, so callers must check first.
    ///
    /// [`last_writer`]: JoinGuard::last_writer
    pub fn claim(self) -> ClaimGuard<'a, T, W> {
        raw::jtoc::<W>(&self.lock.word);
        let lock = self.lock;
        core::mem::forget(self);
        ClaimGuard { lock }
    }

    /// Spin until some holder has called [`claim`], then return. A losing
    /// holder calls this before dropping, so it does not race the
    /// committer's mutation.
    ///
    /// [`claim`]: JoinGuard::claim
    pub fn wait_for_commit(&self) {
        let mut cur = W::load(&self.lock.word, crate::atomic::Ordering::Acquire);
        while W::bitand(cur, W::S_ANY).is_zero() {
            cur = wait_new::<W>(&self.lock.word, cur);
        }
    }
}

impl<'a, T, W: Layout> Drop for JoinGuard<'a, T, W> {
    fn drop(&mut self) {
        raw::drop_c::<W>(&self.lock.word, &self.lock.round);
    }
}

/// The single elected committer, reached via [`JoinGuard::claim`]. Grants
/// exclusive mutation: by construction no other `JoinGuard` in the same
/// rendezvous round is also a `ClaimGuard`.
pub struct ClaimGuard<'a, T, W: Layout> {
    lock: &'a PLock<T, W>,
}

impl<'a, T, W: Layout> ClaimGuard<'a, T, W> {
    /// Step back down to a plain [`AtomicGuard`] (`C -> A`), dropping this
    /// thread's own reader contribution.
    pub fn into_atomic(self) -> AtomicGuard<'a, T, W> {
        raw::ctoa::<W>(&self.lock.word, &self.lock.round);
        let lock = self.lock;
        core::mem::forget(self);
        AtomicGuard { lock }
    }
}

impl<'a, T, W: Layout> Drop for ClaimGuard<'a, T, W> {
    fn drop(&mut self) {
        raw::drop_c::<W>(&self.lock.word, &self.lock.round);
    }
}

impl<'a, T, W: Layout> Deref for ClaimGuard<'a, T, W> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T, W: Layout> DerefMut for ClaimGuard<'a, T, W> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}
